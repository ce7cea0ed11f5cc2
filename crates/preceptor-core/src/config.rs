//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Preceptor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtc: Option<RtcConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt: Option<SttConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<RetrievalConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Real-time channel credentials: application identity and signing secret
/// used to mint media/messaging join tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtcConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_certificate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_certificate_env: Option<String>,

    /// Token lifetime in seconds (default: 3600). Tokens are reissued,
    /// never extended in place.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            app_certificate: None,
            app_certificate_env: None,
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

fn default_token_ttl_secs() -> u64 {
    3600
}

impl RtcConfig {
    pub fn resolve_app_certificate(&self) -> Option<String> {
        resolve_secret_field(&self.app_certificate, &self.app_certificate_env)
    }
}

/// Speech-to-text provider selection.
///
/// `provider` is the preferred provider; if it lacks required configuration
/// the gateway substitutes `fallback_provider` once at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default = "default_stt_provider")]
    pub provider: String,

    #[serde(default = "default_stt_fallback")]
    pub fallback_provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Base URL for the OpenAI-compatible transcription API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Per-call timeout in seconds (default: 30).
    #[serde(default = "default_speech_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub whisper: Option<WhisperConfig>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: default_stt_provider(),
            fallback_provider: default_stt_fallback(),
            api_key: None,
            api_key_env: None,
            base_url: None,
            model: None,
            timeout_secs: default_speech_timeout_secs(),
            whisper: None,
        }
    }
}

fn default_stt_provider() -> String {
    "scribe".into()
}

fn default_stt_fallback() -> String {
    "whisper".into()
}

fn default_speech_timeout_secs() -> u64 {
    30
}

impl SttConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Local whisper.cpp transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperConfig {
    #[serde(default = "default_whisper_binary")]
    pub binary_path: String,

    /// Path to the ggml model file. Required for the whisper provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,

    #[serde(default = "default_speech_timeout_secs")]
    pub timeout_secs: u64,

    /// Reject clips larger than this before spawning (default: 25 MB).
    #[serde(default = "default_max_audio_bytes")]
    pub max_audio_bytes: usize,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            binary_path: default_whisper_binary(),
            model_path: None,
            timeout_secs: default_speech_timeout_secs(),
            max_audio_bytes: default_max_audio_bytes(),
        }
    }
}

fn default_whisper_binary() -> String {
    "whisper-cli".into()
}

fn default_max_audio_bytes() -> usize {
    25 * 1024 * 1024
}

impl WhisperConfig {
    pub fn resolved_binary(&self) -> String {
        shellexpand::tilde(&self.binary_path).into_owned()
    }

    pub fn resolved_model(&self) -> Option<String> {
        self.model_path
            .as_deref()
            .map(|p| shellexpand::tilde(p).into_owned())
    }
}

/// Text-to-speech provider selection. Same fallback-at-init policy as STT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_provider")]
    pub provider: String,

    #[serde(default = "default_tts_fallback")]
    pub fallback_provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Base URL for the OpenAI-compatible speech API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Provider-specific output encoding (e.g. "mp3_44100_128").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,

    #[serde(default = "default_speech_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub piper: Option<PiperConfig>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: default_tts_provider(),
            fallback_provider: default_tts_fallback(),
            api_key: None,
            api_key_env: None,
            base_url: None,
            voice: None,
            model: None,
            output_format: None,
            timeout_secs: default_speech_timeout_secs(),
            piper: None,
        }
    }
}

fn default_tts_provider() -> String {
    "eleven".into()
}

fn default_tts_fallback() -> String {
    "piper".into()
}

impl TtsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Local piper synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiperConfig {
    #[serde(default = "default_piper_binary")]
    pub binary_path: String,

    /// Path to the voice model (.onnx). Required for the piper provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,

    /// Output sample rate of the voice model (default: 22050).
    #[serde(default = "default_piper_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_speech_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PiperConfig {
    fn default() -> Self {
        Self {
            binary_path: default_piper_binary(),
            model_path: None,
            sample_rate: default_piper_sample_rate(),
            timeout_secs: default_speech_timeout_secs(),
        }
    }
}

fn default_piper_binary() -> String {
    "piper".into()
}

fn default_piper_sample_rate() -> u32 {
    22050
}

impl PiperConfig {
    pub fn resolved_binary(&self) -> String {
        shellexpand::tilde(&self.binary_path).into_owned()
    }

    pub fn resolved_model(&self) -> Option<String> {
        self.model_path
            .as_deref()
            .map(|p| shellexpand::tilde(p).into_owned())
    }
}

/// Completion and embedding endpoint (OpenAI-compatible).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "mistral" (default) or "openrouter".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Per-call timeout in seconds (default: 60).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl LlmConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Vector retrieval index over the user's study material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_url")]
    pub base_url: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    /// Passages fetched per query (default: 5).
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_url: default_retrieval_url(),
            collection: default_collection(),
            top_k: default_top_k(),
            timeout_secs: default_retrieval_timeout_secs(),
        }
    }
}

fn default_retrieval_url() -> String {
    "http://localhost:8000".into()
}

fn default_collection() -> String {
    "study_material".into()
}

fn default_top_k() -> usize {
    5
}

fn default_retrieval_timeout_secs() -> u64 {
    10
}

/// Best-effort session/turn persistence (PostgREST-style REST store).
/// Absent config disables persistence entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_sessions_table")]
    pub sessions_table: String,

    #[serde(default = "default_turns_table")]
    pub turns_table: String,

    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            api_key_env: None,
            sessions_table: default_sessions_table(),
            turns_table: default_turns_table(),
            timeout_secs: default_retrieval_timeout_secs(),
        }
    }
}

fn default_sessions_table() -> String {
    "tutor_sessions".into()
}

fn default_turns_table() -> String {
    "tutor_messages".into()
}

impl ArchiveConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum turns kept in a session's context (default: 50, 0 = unbounded).
    #[serde(default = "default_max_context_turns")]
    pub max_context_turns: usize,

    /// End sessions with no turn activity for this long. Unset disables the sweep.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Session kind recorded in the archive (default: "voice_tutor").
    #[serde(default = "default_session_kind")]
    pub session_kind: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_context_turns: default_max_context_turns(),
            idle_timeout_secs: None,
            sweep_interval_secs: default_sweep_interval_secs(),
            session_kind: default_session_kind(),
        }
    }
}

fn default_max_context_turns() -> usize {
    50
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_session_kind() -> String {
    "voice_tutor".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: None,
        }
    }
}

fn default_gateway_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "preceptor_session=debug").
    #[serde(default)]
    pub filters: Vec<String>,
}

fn default_log_format() -> String {
    "plain".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| {
            tracing::warn!("Config references unset environment variable {var_name}");
            String::new()
        })
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::PreceptorError::Io)?;

        // Substitute ${ENV_VAR} references before parsing
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::PreceptorError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location.
    pub fn config_dir() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or_else(default_gateway_port)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn max_context_turns(&self) -> usize {
        self.session
            .as_ref()
            .map(|s| s.max_context_turns)
            .unwrap_or_else(default_max_context_turns)
    }

    pub fn session_kind(&self) -> String {
        self.session
            .as_ref()
            .map(|s| s.session_kind.clone())
            .unwrap_or_else(default_session_kind)
    }

    pub fn log_format(&self) -> String {
        self.logging
            .as_ref()
            .map(|l| l.format.clone())
            .unwrap_or_else(default_log_format)
    }

    pub fn log_level(&self) -> String {
        self.logging
            .as_ref()
            .and_then(|l| l.level.clone())
            .unwrap_or_else(|| "info".to_string())
    }

    pub fn log_filters(&self) -> Vec<String> {
        self.logging
            .as_ref()
            .map(|l| l.filters.clone())
            .unwrap_or_default()
    }

    /// Get a config value by dotted path (e.g. "gateway.port", "stt.provider").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        // Credential issuing cannot run without the channel app identity
        match &self.rtc {
            None => errors.push("rtc section missing (app_id and app_certificate required)".to_string()),
            Some(rtc) => {
                if rtc.app_id.as_deref().unwrap_or("").is_empty() {
                    errors.push("rtc.app_id is not set".to_string());
                }
                if rtc.resolve_app_certificate().is_none() {
                    errors.push("rtc.app_certificate is not set".to_string());
                }
                if rtc.token_ttl_secs == 0 {
                    errors.push("rtc.token_ttl_secs cannot be 0".to_string());
                }
            }
        }

        if let Some(stt) = &self.stt {
            if matches!(stt.provider.as_str(), "scribe" | "cloud_speech")
                && stt.resolve_api_key().is_none()
            {
                warnings.push(format!(
                    "STT provider '{}' has no API key configured, fallback '{}' will be used",
                    stt.provider, stt.fallback_provider
                ));
            }
            if let Some(model) = stt.whisper.as_ref().and_then(|w| w.resolved_model()) {
                if !Path::new(&model).exists() {
                    errors.push(format!("whisper model file not found: {model}"));
                }
            }
        }

        if let Some(tts) = &self.tts {
            if matches!(tts.provider.as_str(), "eleven" | "cloud_speech")
                && tts.resolve_api_key().is_none()
            {
                warnings.push(format!(
                    "TTS provider '{}' has no API key configured, fallback '{}' will be used",
                    tts.provider, tts.fallback_provider
                ));
            }
            if let Some(model) = tts.piper.as_ref().and_then(|p| p.resolved_model()) {
                if !Path::new(&model).exists() {
                    errors.push(format!("piper model file not found: {model}"));
                }
            }
        }

        if self
            .llm
            .as_ref()
            .and_then(|l| l.resolve_api_key())
            .is_none()
        {
            errors.push("llm.api_key is not set".to_string());
        }

        if let Some(archive) = &self.archive {
            if archive.base_url.as_deref().unwrap_or("").is_empty() {
                warnings.push("archive.base_url is not set, persistence disabled".to_string());
            }
        }

        if let Some(retrieval) = &self.retrieval {
            if retrieval.top_k == 0 {
                warnings.push("retrieval.top_k is 0, responses will not be document-grounded".to_string());
            }
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Preceptor data: `~/.preceptor/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".preceptor")
}
