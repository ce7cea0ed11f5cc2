//! Signed, time-boxed join tokens.
//!
//! Token layout: `pt1.<base64url(claims json)>.<hex(hmac-sha256)>`, where the
//! signature covers the app id and the encoded claims. The token is opaque to
//! clients; the media transport verifies it with the shared app certificate.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use preceptor_core::error::{PreceptorError, Result};
use preceptor_core::types::ChannelRole;

const TOKEN_VERSION: &str = "pt1";

/// Which channel a token grants access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Media,
    Messaging,
}

/// Claims carried inside a join token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub channel: String,
    pub identity: u32,
    pub role: ChannelRole,
    pub kind: TokenKind,
    pub issued_at: i64,
    pub expires_at: i64,
    /// Random salt so two tokens for the same grant never compare equal.
    pub salt: u32,
}

/// Sign claims into a wire token.
pub fn sign(claims: &TokenClaims, app_id: &str, app_certificate: &str) -> Result<String> {
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let sig = hex::encode(mac_bytes(app_id, app_certificate, &payload)?);
    Ok(format!("{TOKEN_VERSION}.{payload}.{sig}"))
}

/// Verify a wire token and return its claims.
///
/// Rejects unknown versions, bad signatures, and expired tokens.
pub fn verify(token: &str, app_id: &str, app_certificate: &str) -> Result<TokenClaims> {
    let mut parts = token.splitn(3, '.');
    let (version, payload, sig) = match (parts.next(), parts.next(), parts.next()) {
        (Some(v), Some(p), Some(s)) => (v, p, s),
        _ => return Err(PreceptorError::Token("malformed token".into())),
    };

    if version != TOKEN_VERSION {
        return Err(PreceptorError::Token(format!(
            "unsupported token version '{version}'"
        )));
    }

    let sig_bytes = hex::decode(sig)
        .map_err(|_| PreceptorError::Token("malformed token signature".into()))?;
    let mut mac = new_mac(app_id, app_certificate, payload)?;
    mac.verify_slice(&sig_bytes)
        .map_err(|_| PreceptorError::Token("token signature mismatch".into()))?;

    let raw = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| PreceptorError::Token("malformed token payload".into()))?;
    let claims: TokenClaims = serde_json::from_slice(&raw)?;

    if claims.expires_at <= Utc::now().timestamp() {
        return Err(PreceptorError::Token("token expired".into()));
    }

    Ok(claims)
}

fn new_mac(app_id: &str, app_certificate: &str, payload: &str) -> Result<Hmac<Sha256>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(app_certificate.as_bytes())
        .map_err(|_| PreceptorError::Token("invalid signing key".into()))?;
    mac.update(app_id.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Ok(mac)
}

fn mac_bytes(app_id: &str, app_certificate: &str, payload: &str) -> Result<Vec<u8>> {
    let mac = new_mac(app_id, app_certificate, payload)?;
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(expires_at: i64) -> TokenClaims {
        TokenClaims {
            channel: "tutor_u1_abc".into(),
            identity: 42,
            role: ChannelRole::Publisher,
            kind: TokenKind::Media,
            issued_at: Utc::now().timestamp(),
            expires_at,
            salt: 7,
        }
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let c = claims(Utc::now().timestamp() + 3600);
        let token = sign(&c, "app-1", "cert-secret").unwrap();
        assert!(token.starts_with("pt1."));

        let parsed = verify(&token, "app-1", "cert-secret").unwrap();
        assert_eq!(parsed.channel, "tutor_u1_abc");
        assert_eq!(parsed.identity, 42);
        assert_eq!(parsed.kind, TokenKind::Media);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let c = claims(Utc::now().timestamp() + 3600);
        let token = sign(&c, "app-1", "cert-secret").unwrap();
        assert!(verify(&token, "app-1", "other-secret").is_err());
        assert!(verify(&token, "app-2", "cert-secret").is_err());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let c = claims(Utc::now().timestamp() + 3600);
        let token = sign(&c, "app-1", "cert-secret").unwrap();

        let mut forged = claims(Utc::now().timestamp() + 3600);
        forged.identity = 1;
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let sig = token.rsplit('.').next().unwrap();
        let tampered = format!("pt1.{forged_payload}.{sig}");

        assert!(verify(&tampered, "app-1", "cert-secret").is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let c = claims(Utc::now().timestamp() - 10);
        let token = sign(&c, "app-1", "cert-secret").unwrap();
        let err = verify(&token, "app-1", "cert-secret").unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_malformed_token_rejected() {
        assert!(verify("not-a-token", "app-1", "cert").is_err());
        assert!(verify("pt9.abc.def", "app-1", "cert").is_err());
        assert!(verify("pt1.!!!.00", "app-1", "cert").is_err());
    }
}
