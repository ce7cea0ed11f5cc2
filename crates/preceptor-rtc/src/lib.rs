//! Credential issuing for the real-time media and messaging channels.
//!
//! The issuer is stateless: every call derives the participant identity from
//! the user id and mints a fresh pair of time-boxed tokens. Credentials are
//! never extended in place, only reissued.

pub mod identity;
pub mod token;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use preceptor_core::config::Config;
use preceptor_core::error::{PreceptorError, Result};
use preceptor_core::types::ChannelRole;

use crate::token::{TokenClaims, TokenKind};

/// Join credentials for one participant on one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCredentials {
    pub media_token: String,
    pub messaging_token: String,
    /// Application identity the tokens were signed under.
    pub app_identity: String,
    pub channel_name: String,
    pub participant_identity: u32,
    /// Absolute epoch-seconds expiry, issuance time plus the fixed TTL.
    pub expires_at: i64,
}

/// Mints channel credentials with a fixed TTL.
#[derive(Clone)]
pub struct TokenIssuer {
    app_id: String,
    app_certificate: String,
    ttl_secs: i64,
}

impl TokenIssuer {
    pub fn new(app_id: impl Into<String>, app_certificate: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            app_id: app_id.into(),
            app_certificate: app_certificate.into(),
            ttl_secs: ttl_secs as i64,
        }
    }

    /// Build an issuer from config. Missing app identity or signing secret is
    /// a config error, surfaced at startup rather than on first issue.
    pub fn from_config(config: &Config) -> Result<Self> {
        let rtc = config.rtc.as_ref().ok_or_else(|| {
            PreceptorError::Config("rtc section missing (app_id and app_certificate required)".into())
        })?;
        let app_id = rtc
            .app_id
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| PreceptorError::Config("rtc.app_id is not set".into()))?;
        let app_certificate = rtc
            .resolve_app_certificate()
            .ok_or_else(|| PreceptorError::Config("rtc.app_certificate is not set".into()))?;

        Ok(Self::new(app_id, app_certificate, rtc.token_ttl_secs))
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Issue media and messaging tokens for `user_id` on `channel_name`.
    ///
    /// The participant identity is derived deterministically, so repeated
    /// issuance for the same user maps to the same on-channel identity.
    pub fn issue(
        &self,
        channel_name: &str,
        user_id: &str,
        role: ChannelRole,
    ) -> Result<ChannelCredentials> {
        if self.app_id.is_empty() || self.app_certificate.is_empty() {
            return Err(PreceptorError::Config(
                "credential issuer has no app identity or signing secret".into(),
            ));
        }

        let participant_identity = identity::participant_identity(user_id);
        let issued_at = Utc::now().timestamp();
        let expires_at = issued_at + self.ttl_secs;

        let media_token = self.sign_kind(channel_name, participant_identity, role, TokenKind::Media, issued_at, expires_at)?;
        let messaging_token = self.sign_kind(channel_name, participant_identity, role, TokenKind::Messaging, issued_at, expires_at)?;

        Ok(ChannelCredentials {
            media_token,
            messaging_token,
            app_identity: self.app_id.clone(),
            channel_name: channel_name.to_string(),
            participant_identity,
            expires_at,
        })
    }

    fn sign_kind(
        &self,
        channel: &str,
        identity: u32,
        role: ChannelRole,
        kind: TokenKind,
        issued_at: i64,
        expires_at: i64,
    ) -> Result<String> {
        let claims = TokenClaims {
            channel: channel.to_string(),
            identity,
            role,
            kind,
            issued_at,
            expires_at,
            salt: rand::random(),
        };
        token::sign(&claims, &self.app_id, &self.app_certificate)
    }
}
