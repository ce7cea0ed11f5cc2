//! Text-to-speech providers and the gateway that fronts them.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use preceptor_core::config::{Config, PiperConfig, TtsConfig};
use preceptor_core::error::{PreceptorError, Result};

use crate::wav;

const ELEVEN_BASE_URL: &str = "https://api.elevenlabs.io";
const CLOUD_TTS_BASE_URL: &str = "https://api.openai.com";

/// One synthesis backend. Returns audio in the provider's native encoding.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    fn id(&self) -> &'static str;

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Build the ElevenLabs synthesis URL for a voice and output encoding.
fn eleven_speech_url(voice: &str, output_format: &str) -> String {
    format!("{ELEVEN_BASE_URL}/v1/text-to-speech/{voice}?output_format={output_format}")
}

/// ElevenLabs synthesis.
pub struct ElevenTts {
    api_key: String,
    voice: String,
    model: String,
    output_format: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl ElevenTts {
    pub fn new(
        api_key: String,
        voice: Option<String>,
        model: Option<String>,
        output_format: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            api_key,
            voice: voice.unwrap_or_else(|| "21m00Tcm4TlvDq8ikWAM".into()),
            model: model.unwrap_or_else(|| "eleven_turbo_v2".into()),
            output_format: output_format.unwrap_or_else(|| "mp3_44100_128".into()),
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TtsProvider for ElevenTts {
    fn id(&self) -> &'static str {
        "eleven"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let url = eleven_speech_url(&self.voice, &self.output_format);

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "text": text,
                "model_id": self.model,
            }))
            .send()
            .await
            .map_err(|e| PreceptorError::Provider(format!("TTS request: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PreceptorError::Provider(format!(
                "TTS API error {status}: {body}"
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| PreceptorError::Provider(format!("TTS response: {e}")))?;
        Ok(bytes.to_vec())
    }
}

/// OpenAI-compatible speech API.
pub struct CloudSpeechTts {
    api_key: String,
    base_url: String,
    model: String,
    voice: String,
    output_format: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl CloudSpeechTts {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        voice: Option<String>,
        output_format: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            api_key,
            base_url: base_url
                .unwrap_or_else(|| CLOUD_TTS_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| "tts-1".into()),
            voice: voice.unwrap_or_else(|| "alloy".into()),
            output_format: output_format.unwrap_or_else(|| "mp3".into()),
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TtsProvider for CloudSpeechTts {
    fn id(&self) -> &'static str {
        "cloud_speech"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v1/audio/speech", self.base_url);

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "input": text,
                "voice": self.voice,
                "response_format": self.output_format,
            }))
            .send()
            .await
            .map_err(|e| PreceptorError::Provider(format!("TTS request: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PreceptorError::Provider(format!(
                "TTS API error {status}: {body}"
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| PreceptorError::Provider(format!("TTS response: {e}")))?;
        Ok(bytes.to_vec())
    }
}

/// Local piper synthesis via subprocess. Output is WAV-wrapped PCM.
pub struct PiperTts {
    binary: String,
    model: String,
    sample_rate: u32,
    timeout: Duration,
}

/// Reject synthesis requests larger than this before spawning.
const MAX_TEXT_BYTES: usize = 64 * 1024;

impl PiperTts {
    /// Returns `None` when no voice model is configured.
    pub fn from_config(cfg: &PiperConfig) -> Option<Self> {
        let model = cfg.resolved_model()?;
        Some(Self {
            binary: cfg.resolved_binary(),
            model,
            sample_rate: cfg.sample_rate,
            timeout: Duration::from_secs(cfg.timeout_secs),
        })
    }
}

#[async_trait]
impl TtsProvider for PiperTts {
    fn id(&self) -> &'static str {
        "piper"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        if text.len() > MAX_TEXT_BYTES {
            return Err(PreceptorError::Provider(format!(
                "text of {} bytes exceeds the {} byte limit",
                text.len(),
                MAX_TEXT_BYTES
            )));
        }

        let mut child = Command::new(&self.binary)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_raw")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PreceptorError::Provider(format!("failed to spawn {}: {e}", self.binary)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PreceptorError::Provider("failed to open piper stdin".into()))?;

        // Feed stdin from a task so a full stdout pipe cannot deadlock the child
        let input = text.to_string();
        let feeder = tokio::spawn(async move {
            let result = stdin.write_all(input.as_bytes()).await;
            drop(stdin);
            result
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                PreceptorError::Provider(format!(
                    "piper timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| PreceptorError::Provider(format!("piper failed: {e}")))?;

        match feeder.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(PreceptorError::Provider(format!(
                    "failed to write piper stdin: {e}"
                )))
            }
            Err(e) => {
                return Err(PreceptorError::Provider(format!(
                    "piper stdin task failed: {e}"
                )))
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PreceptorError::Provider(format!(
                "piper exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(wav::pcm_to_wav(&output.stdout, self.sample_rate, 1, 16))
    }
}

/// Picks one provider at construction and shields callers from its failures.
pub struct TtsGateway {
    provider: Arc<dyn TtsProvider>,
}

impl TtsGateway {
    pub fn new(provider: Arc<dyn TtsProvider>) -> Self {
        Self { provider }
    }

    /// Same fallback-at-init substitution policy as the STT gateway.
    pub fn from_config(config: &Config) -> Result<Self> {
        let cfg = config.tts.clone().unwrap_or_default();
        let provider = match build_provider(&cfg.provider, &cfg) {
            Some(p) => p,
            None => {
                warn!(
                    primary = %cfg.provider,
                    fallback = %cfg.fallback_provider,
                    "TTS provider not configured, substituting fallback"
                );
                build_provider(&cfg.fallback_provider, &cfg).ok_or_else(|| {
                    PreceptorError::Config(format!(
                        "no usable TTS provider: '{}' and fallback '{}' are both unconfigured",
                        cfg.provider, cfg.fallback_provider
                    ))
                })?
            }
        };
        debug!(provider = provider.id(), "TTS gateway ready");
        Ok(Self { provider })
    }

    pub fn provider_id(&self) -> &'static str {
        self.provider.id()
    }

    /// Synthesize speech. Empty or whitespace-only text returns `None`
    /// without a provider call; provider failures are logged and collapse
    /// to `None`.
    pub async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        if text.trim().is_empty() {
            return None;
        }

        debug!(
            provider = self.provider.id(),
            text_len = text.len(),
            "synthesizing"
        );
        match self.provider.synthesize(text).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => {
                debug!(provider = self.provider.id(), "synthesis produced no audio");
                None
            }
            Err(e) => {
                warn!(provider = self.provider.id(), error = %e, "synthesis failed");
                None
            }
        }
    }
}

fn build_provider(kind: &str, cfg: &TtsConfig) -> Option<Arc<dyn TtsProvider>> {
    let timeout = Duration::from_secs(cfg.timeout_secs);
    match kind {
        "eleven" => {
            let api_key = cfg.resolve_api_key()?;
            Some(Arc::new(ElevenTts::new(
                api_key,
                cfg.voice.clone(),
                cfg.model.clone(),
                cfg.output_format.clone(),
                timeout,
            )))
        }
        "cloud_speech" => {
            let api_key = cfg.resolve_api_key()?;
            Some(Arc::new(CloudSpeechTts::new(
                api_key,
                cfg.base_url.clone(),
                cfg.model.clone(),
                cfg.voice.clone(),
                cfg.output_format.clone(),
                timeout,
            )))
        }
        "piper" => {
            let piper = cfg.piper.clone().unwrap_or_default();
            PiperTts::from_config(&piper).map(|p| Arc::new(p) as Arc<dyn TtsProvider>)
        }
        other => {
            warn!(provider = other, "unknown TTS provider");
            None
        }
    }
}
