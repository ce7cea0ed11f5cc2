use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "preceptor",
    about = "Voice study-tutor orchestrator: sessions, channel credentials, and the speech pipeline in one binary",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator HTTP gateway
    Serve {
        /// Port to listen on (default: 8080)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Mint channel credentials for debugging
    Token {
        /// Channel name to grant access to
        #[arg(long)]
        channel: String,

        /// User id the credentials are issued for
        #[arg(long)]
        user: String,

        /// Channel role: publisher or subscriber
        #[arg(long, default_value = "publisher")]
        role: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Validate the configuration
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(preceptor_core::config::Config::config_dir);
    let config = preceptor_core::config::Config::load(&config_path)?;

    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or_else(|| config.gateway_port());
            serve(config, port).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{value}"),
                None => {
                    eprintln!("Unknown config key: {key}");
                    std::process::exit(1);
                }
            },
            ConfigAction::Check => {
                if !check_config(&config) {
                    std::process::exit(1);
                }
            }
        },
        Commands::Token { channel, user, role } => {
            let issuer = preceptor_rtc::TokenIssuer::from_config(&config)?;
            let credentials = issuer.issue(
                &channel,
                &user,
                preceptor_core::types::ChannelRole::parse(&role),
            )?;
            println!("{}", serde_json::to_string_pretty(&credentials)?);
        }
    }

    Ok(())
}

fn init_logging(config: &preceptor_core::config::Config, verbose: bool) {
    let base = if verbose {
        "debug".to_string()
    } else {
        config.log_level()
    };
    let mut directives = vec![base];
    directives.extend(config.log_filters());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives.join(",")));

    if config.log_format() == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Print validation results. Returns false when serving would fail.
fn check_config(config: &preceptor_core::config::Config) -> bool {
    let (warnings, errors) = config.validate();

    for warning in &warnings {
        println!("warning: {warning}");
    }
    for error in &errors {
        println!("error: {error}");
    }

    if errors.is_empty() {
        println!("Configuration OK ({} warnings)", warnings.len());
        true
    } else {
        println!("Configuration has {} error(s)", errors.len());
        false
    }
}

/// Assemble the full orchestrator and serve it.
async fn serve(config: preceptor_core::config::Config, port: u16) -> anyhow::Result<()> {
    use preceptor_providers::{ChromaIndex, LlmClient, NullArchive, RestArchive, SessionArchive};

    let config = Arc::new(config);

    let issuer = preceptor_rtc::TokenIssuer::from_config(&config)?;
    let stt = preceptor_speech::SttGateway::from_config(&config)?;
    let tts = preceptor_speech::TtsGateway::from_config(&config)?;
    let llm = Arc::new(LlmClient::from_config(&config)?);
    let index = Arc::new(ChromaIndex::from_config(&config));

    let archive: Arc<dyn SessionArchive> = match RestArchive::from_config(&config) {
        Some(rest) => Arc::new(rest),
        None => {
            tracing::warn!("Archive not configured, session persistence disabled");
            Arc::new(NullArchive)
        }
    };

    let top_k = config.retrieval.clone().unwrap_or_default().top_k;
    let generator = preceptor_tutor::ResponseGenerator::new(llm, index, top_k);
    let engine =
        preceptor_session::TurnEngine::new(stt, tts, generator, Arc::clone(&archive));

    let registry = Arc::new(preceptor_session::SessionRegistry::new(
        issuer.clone(),
        engine,
        archive,
        config.max_context_turns(),
        config.session_kind(),
    ));

    let session_cfg = config.session.clone().unwrap_or_default();
    if let Some(idle_secs) = session_cfg.idle_timeout_secs {
        registry.spawn_idle_sweep(
            Duration::from_secs(idle_secs),
            Duration::from_secs(session_cfg.sweep_interval_secs),
        );
        tracing::info!("Idle session sweep enabled ({idle_secs}s timeout)");
    }

    tracing::info!("Starting Preceptor gateway on port {port}");
    let state = Arc::new(preceptor_gateway::GatewayState::new(
        Arc::clone(&config),
        registry,
        issuer,
    ));
    preceptor_gateway::start_gateway(state, port).await
}
