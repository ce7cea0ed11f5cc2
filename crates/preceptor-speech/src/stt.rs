//! Speech-to-text providers and the gateway that fronts them.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use preceptor_core::config::{Config, SttConfig, WhisperConfig};
use preceptor_core::error::{PreceptorError, Result};
use preceptor_core::types::AudioFormat;

use crate::wav;

const SCRIBE_URL: &str = "https://api.elevenlabs.io/v1/speech-to-text";
const CLOUD_SPEECH_BASE_URL: &str = "https://api.groq.com/openai";

/// One transcription backend.
#[async_trait]
pub trait SttProvider: Send + Sync {
    fn id(&self) -> &'static str;

    /// Transcribe one utterance. `Ok(None)` means the provider heard nothing.
    async fn transcribe(&self, audio: &[u8], format: AudioFormat) -> Result<Option<String>>;
}

/// ElevenLabs Scribe transcription.
pub struct ScribeStt {
    api_key: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl ScribeStt {
    pub fn new(api_key: String, model: Option<String>, timeout: Duration) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| "scribe_v1".into()),
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScribeResponse {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl SttProvider for ScribeStt {
    fn id(&self) -> &'static str {
        "scribe"
    }

    async fn transcribe(&self, audio: &[u8], format: AudioFormat) -> Result<Option<String>> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(format.file_name())
            .mime_str(format.mime_type())
            .map_err(|e| PreceptorError::Provider(format!("scribe request: {e}")))?;

        let form = reqwest::multipart::Form::new()
            .text("model_id", self.model.clone())
            .part("file", part);

        let resp = self
            .client
            .post(SCRIBE_URL)
            .timeout(self.timeout)
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PreceptorError::Provider(format!("scribe request: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PreceptorError::Provider(format!(
                "scribe API error {status}: {body}"
            )));
        }

        let parsed: ScribeResponse = resp
            .json()
            .await
            .map_err(|e| PreceptorError::Provider(format!("scribe response: {e}")))?;

        let text = parsed.text.trim().to_string();
        Ok((!text.is_empty()).then_some(text))
    }
}

/// OpenAI-compatible transcription API (OpenAI, Groq, and friends).
pub struct CloudSpeechStt {
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl CloudSpeechStt {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            api_key,
            base_url: base_url
                .unwrap_or_else(|| CLOUD_SPEECH_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| "whisper-large-v3-turbo".into()),
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SttProvider for CloudSpeechStt {
    fn id(&self) -> &'static str {
        "cloud_speech"
    }

    async fn transcribe(&self, audio: &[u8], format: AudioFormat) -> Result<Option<String>> {
        let url = format!("{}/v1/audio/transcriptions", self.base_url);

        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(format.file_name())
            .mime_str(format.mime_type())
            .map_err(|e| PreceptorError::Provider(format!("transcription request: {e}")))?;

        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "text")
            .part("file", part);

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PreceptorError::Provider(format!("transcription request: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PreceptorError::Provider(format!(
                "transcription API error {status}: {body}"
            )));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| PreceptorError::Provider(format!("transcription response: {e}")))?
            .trim()
            .to_string();
        Ok((!text.is_empty()).then_some(text))
    }
}

/// Local whisper.cpp transcription via subprocess.
pub struct WhisperStt {
    binary: String,
    model: String,
    timeout: Duration,
    max_audio_bytes: usize,
}

impl WhisperStt {
    /// Returns `None` when no model path is configured.
    pub fn from_config(cfg: &WhisperConfig) -> Option<Self> {
        let model = cfg.resolved_model()?;
        Some(Self {
            binary: cfg.resolved_binary(),
            model,
            timeout: Duration::from_secs(cfg.timeout_secs),
            max_audio_bytes: cfg.max_audio_bytes,
        })
    }
}

/// Extract usable text from whisper stdout. Silence markers count as no speech.
fn parse_whisper_output(stdout: &str) -> Option<String> {
    let text = stdout.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("[BLANK_AUDIO]") {
        return None;
    }
    Some(text.to_string())
}

#[async_trait]
impl SttProvider for WhisperStt {
    fn id(&self) -> &'static str {
        "whisper"
    }

    async fn transcribe(&self, audio: &[u8], format: AudioFormat) -> Result<Option<String>> {
        if audio.len() > self.max_audio_bytes {
            return Err(PreceptorError::Provider(format!(
                "audio clip of {} bytes exceeds the {} byte limit",
                audio.len(),
                self.max_audio_bytes
            )));
        }

        // whisper.cpp expects a container on stdin; bare PCM gets a WAV header first
        let input = match format {
            AudioFormat::Pcm16 => wav::pcm_to_wav(audio, 16000, 1, 16),
            _ => audio.to_vec(),
        };

        let mut child = Command::new(&self.binary)
            .arg("-m")
            .arg(&self.model)
            .arg("-f")
            .arg("-")
            .arg("--no-timestamps")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PreceptorError::Provider(format!("failed to spawn {}: {e}", self.binary)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PreceptorError::Provider("failed to open whisper stdin".into()))?;

        // Feed stdin from a task so a full stdout pipe cannot deadlock the child
        let feeder = tokio::spawn(async move {
            let result = stdin.write_all(&input).await;
            drop(stdin);
            result
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                PreceptorError::Provider(format!(
                    "whisper timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| PreceptorError::Provider(format!("whisper failed: {e}")))?;

        match feeder.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(PreceptorError::Provider(format!(
                    "failed to write whisper stdin: {e}"
                )))
            }
            Err(e) => {
                return Err(PreceptorError::Provider(format!(
                    "whisper stdin task failed: {e}"
                )))
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PreceptorError::Provider(format!(
                "whisper exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(parse_whisper_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Picks one provider at construction and shields callers from its failures.
pub struct SttGateway {
    provider: Arc<dyn SttProvider>,
}

impl SttGateway {
    pub fn new(provider: Arc<dyn SttProvider>) -> Self {
        Self { provider }
    }

    /// Select the configured provider, substituting the fallback when the
    /// primary lacks required configuration. Decided once, not per call.
    pub fn from_config(config: &Config) -> Result<Self> {
        let cfg = config.stt.clone().unwrap_or_default();
        let provider = match build_provider(&cfg.provider, &cfg) {
            Some(p) => p,
            None => {
                warn!(
                    primary = %cfg.provider,
                    fallback = %cfg.fallback_provider,
                    "STT provider not configured, substituting fallback"
                );
                build_provider(&cfg.fallback_provider, &cfg).ok_or_else(|| {
                    PreceptorError::Config(format!(
                        "no usable STT provider: '{}' and fallback '{}' are both unconfigured",
                        cfg.provider, cfg.fallback_provider
                    ))
                })?
            }
        };
        debug!(provider = provider.id(), "STT gateway ready");
        Ok(Self { provider })
    }

    pub fn provider_id(&self) -> &'static str {
        self.provider.id()
    }

    /// Transcribe audio. Never raises: provider failures are logged and
    /// reported as `None`, the same as silence.
    pub async fn transcribe(&self, audio: &[u8], format: AudioFormat) -> Option<String> {
        debug!(
            provider = self.provider.id(),
            audio_bytes = audio.len(),
            "transcribing"
        );
        match self.provider.transcribe(audio, format).await {
            Ok(Some(text)) if !text.trim().is_empty() => Some(text),
            Ok(_) => {
                debug!(provider = self.provider.id(), "no speech detected");
                None
            }
            Err(e) => {
                warn!(provider = self.provider.id(), error = %e, "transcription failed");
                None
            }
        }
    }
}

fn build_provider(kind: &str, cfg: &SttConfig) -> Option<Arc<dyn SttProvider>> {
    let timeout = Duration::from_secs(cfg.timeout_secs);
    match kind {
        "scribe" => {
            let api_key = cfg.resolve_api_key()?;
            Some(Arc::new(ScribeStt::new(api_key, cfg.model.clone(), timeout)))
        }
        "cloud_speech" => {
            let api_key = cfg.resolve_api_key()?;
            Some(Arc::new(CloudSpeechStt::new(
                api_key,
                cfg.base_url.clone(),
                cfg.model.clone(),
                timeout,
            )))
        }
        "whisper" => {
            let whisper = cfg.whisper.clone().unwrap_or_default();
            WhisperStt::from_config(&whisper).map(|p| Arc::new(p) as Arc<dyn SttProvider>)
        }
        other => {
            warn!(provider = other, "unknown STT provider");
            None
        }
    }
}
