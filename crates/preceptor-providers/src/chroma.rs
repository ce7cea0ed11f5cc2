//! Chroma vector store client.
//!
//! Collections are addressed by name in config but queried by UUID, so the
//! id is resolved once on first use and cached for the life of the client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;

use preceptor_core::config::Config;
use preceptor_core::error::{PreceptorError, Result};

use crate::{Passage, PassageIndex};

pub struct ChromaIndex {
    base_url: String,
    collection: String,
    timeout: Duration,
    client: reqwest::Client,
    collection_id: OnceCell<String>,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    documents: Vec<Vec<String>>,
    #[serde(default)]
    metadatas: Vec<Vec<Option<serde_json::Value>>>,
}

impl ChromaIndex {
    pub fn from_config(config: &Config) -> Self {
        let cfg = config.retrieval.clone().unwrap_or_default();
        Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            collection: cfg.collection,
            timeout: Duration::from_secs(cfg.timeout_secs),
            client: reqwest::Client::new(),
            collection_id: OnceCell::new(),
        }
    }

    async fn collection_id(&self) -> Result<&str> {
        self.collection_id
            .get_or_try_init(|| async {
                let url = format!("{}/api/v1/collections/{}", self.base_url, self.collection);
                let resp = self
                    .client
                    .get(&url)
                    .timeout(self.timeout)
                    .send()
                    .await
                    .map_err(|e| PreceptorError::Provider(format!("collection lookup: {e}")))?;

                if !resp.status().is_success() {
                    return Err(PreceptorError::Provider(format!(
                        "collection '{}' lookup failed: {}",
                        self.collection,
                        resp.status()
                    )));
                }

                let info: CollectionInfo = resp
                    .json()
                    .await
                    .map_err(|e| PreceptorError::Provider(format!("collection response: {e}")))?;
                debug!(collection = %self.collection, id = %info.id, "resolved collection");
                Ok(info.id)
            })
            .await
            .map(String::as_str)
    }
}

/// Flatten the first result group into passages, pairing each document with
/// the `source` field of its metadata when present.
fn passages_from_response(resp: QueryResponse) -> Vec<Passage> {
    let documents = resp.documents.into_iter().next().unwrap_or_default();
    let mut metadatas = resp
        .metadatas
        .into_iter()
        .next()
        .unwrap_or_default()
        .into_iter();

    documents
        .into_iter()
        .map(|text| {
            let source = metadatas.next().flatten().and_then(|m| {
                m.get("source")
                    .and_then(|s| s.as_str())
                    .map(str::to_string)
            });
            Passage { text, source }
        })
        .collect()
}

#[async_trait]
impl PassageIndex for ChromaIndex {
    async fn query(&self, embedding: &[f32], k: usize, user_id: &str) -> Result<Vec<Passage>> {
        if k == 0 || embedding.is_empty() {
            return Ok(Vec::new());
        }

        let id = self.collection_id().await?;
        let url = format!("{}/api/v1/collections/{}/query", self.base_url, id);

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&json!({
                "query_embeddings": [embedding],
                "n_results": k,
                "where": { "user_id": user_id },
                "include": ["documents", "metadatas"],
            }))
            .send()
            .await
            .map_err(|e| PreceptorError::Provider(format!("passage query: {e}")))?;

        if !resp.status().is_success() {
            return Err(PreceptorError::Provider(format!(
                "passage query failed: {}",
                resp.status()
            )));
        }

        let parsed: QueryResponse = resp
            .json()
            .await
            .map_err(|e| PreceptorError::Provider(format!("passage response: {e}")))?;

        Ok(passages_from_response(parsed))
    }
}
