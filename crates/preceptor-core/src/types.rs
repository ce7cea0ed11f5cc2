use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One utterance in a session's conversation history.
///
/// Turns are immutable once appended to a [`crate::context::ContextLog`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Container format of inbound audio, as declared by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Wav,
    Mp3,
    Opus,
    Webm,
    /// Raw 16-bit little-endian PCM with no container.
    Pcm16,
}

impl AudioFormat {
    /// Parse a declared format string. Unknown values are rejected, not guessed.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wav" => Some(AudioFormat::Wav),
            "mp3" => Some(AudioFormat::Mp3),
            "opus" => Some(AudioFormat::Opus),
            "webm" => Some(AudioFormat::Webm),
            "pcm16" | "pcm" => Some(AudioFormat::Pcm16),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Opus => "audio/ogg",
            AudioFormat::Webm => "audio/webm",
            AudioFormat::Pcm16 => "application/octet-stream",
        }
    }

    /// Filename to attach when a provider upload requires one.
    pub fn file_name(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio.wav",
            AudioFormat::Mp3 => "audio.mp3",
            AudioFormat::Opus => "audio.ogg",
            AudioFormat::Webm => "audio.webm",
            AudioFormat::Pcm16 => "audio.pcm",
        }
    }
}

/// Privilege level granted by a channel credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    Publisher,
    #[default]
    Subscriber,
}

impl ChannelRole {
    /// Parse a role string. Unrecognized values get the lowest-privilege
    /// subscriber grant instead of an error.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "publisher" => ChannelRole::Publisher,
            _ => ChannelRole::Subscriber,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelRole::Publisher => "publisher",
            ChannelRole::Subscriber => "subscriber",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_format_parse() {
        assert_eq!(AudioFormat::parse("wav"), Some(AudioFormat::Wav));
        assert_eq!(AudioFormat::parse("MP3"), Some(AudioFormat::Mp3));
        assert_eq!(AudioFormat::parse("pcm"), Some(AudioFormat::Pcm16));
        assert_eq!(AudioFormat::parse("flac"), None);
    }

    #[test]
    fn test_channel_role_defaults_to_subscriber() {
        assert_eq!(ChannelRole::parse("publisher"), ChannelRole::Publisher);
        assert_eq!(ChannelRole::parse("SUBSCRIBER"), ChannelRole::Subscriber);
        assert_eq!(ChannelRole::parse("admin"), ChannelRole::Subscriber);
        assert_eq!(ChannelRole::parse(""), ChannelRole::Subscriber);
    }

    #[test]
    fn test_role_serde_snake_case() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, r#""assistant""#);
    }
}
