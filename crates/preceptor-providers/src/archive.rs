//! Session persistence against a PostgREST-style store.
//!
//! Every call is best-effort: the registry spawns these off the turn path
//! and logs failures without retrying.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use preceptor_core::config::Config;
use preceptor_core::error::{PreceptorError, Result};

use crate::{SessionArchive, SessionRecord, TurnRecord};

pub struct RestArchive {
    base_url: String,
    api_key: Option<String>,
    sessions_table: String,
    turns_table: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl RestArchive {
    /// Returns `None` when no archive endpoint is configured, in which case
    /// the caller should fall back to [`NullArchive`].
    pub fn from_config(config: &Config) -> Option<Self> {
        let cfg = config.archive.clone()?;
        let base_url = cfg.base_url.clone()?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: cfg.resolve_api_key(),
            sessions_table: cfg.sessions_table,
            turns_table: cfg.turns_table,
            timeout: Duration::from_secs(cfg.timeout_secs),
            client: reqwest::Client::new(),
        })
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req
                .header("apikey", key)
                .header("Authorization", format!("Bearer {key}")),
            None => req,
        }
    }

    async fn insert<T: serde::Serialize>(&self, table: &str, record: &T) -> Result<()> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let resp = self
            .apply_auth(self.client.post(&url))
            .timeout(self.timeout)
            .header("Prefer", "return=minimal")
            .json(record)
            .send()
            .await
            .map_err(|e| PreceptorError::Provider(format!("archive insert: {e}")))?;

        if !resp.status().is_success() {
            return Err(PreceptorError::Provider(format!(
                "archive insert into '{table}' failed: {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionArchive for RestArchive {
    async fn create_session(&self, record: &SessionRecord) -> Result<()> {
        self.insert(&self.sessions_table, record).await
    }

    async fn mark_session_ended(&self, session_id: &str) -> Result<()> {
        let url = format!(
            "{}/rest/v1/{}?id=eq.{}",
            self.base_url, self.sessions_table, session_id
        );
        let resp = self
            .apply_auth(self.client.patch(&url))
            .timeout(self.timeout)
            .header("Prefer", "return=minimal")
            .json(&json!({ "ended_at": chrono::Utc::now() }))
            .send()
            .await
            .map_err(|e| PreceptorError::Provider(format!("archive update: {e}")))?;

        if !resp.status().is_success() {
            return Err(PreceptorError::Provider(format!(
                "archive session-end update failed: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn append_turn(&self, record: &TurnRecord) -> Result<()> {
        self.insert(&self.turns_table, record).await
    }
}

/// Archive that stores nothing. Used when persistence is not configured.
pub struct NullArchive;

#[async_trait]
impl SessionArchive for NullArchive {
    async fn create_session(&self, _record: &SessionRecord) -> Result<()> {
        Ok(())
    }

    async fn mark_session_ended(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }

    async fn append_turn(&self, _record: &TurnRecord) -> Result<()> {
        Ok(())
    }
}
