//! Locale-filtered passthrough to the site search index.

pub mod elastic;
pub mod router;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SearchConfig;

pub use elastic::ElasticsearchClient;
pub use router::search_router;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search backend is not configured")]
    NotConfigured,
    #[error("unable to build search client: {0}")]
    Client(String),
    #[error("search request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("search backend responded with {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_score", default)]
    pub score: Option<f64>,
    #[serde(rename = "_source", default)]
    pub source: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHits {
    /// Either a bare count or `{value, relation}` depending on the backend version.
    #[serde(default)]
    pub total: Value,
    #[serde(default)]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub took: u64,
    pub timed_out: bool,
    pub hits: SearchHits,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Runs `query` restricted to documents of `locale`.
    async fn search(&self, query: Value, locale: &str) -> Result<SearchResponse, SearchError>;
}

/// Stand-in used when no search node is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSearch;

#[async_trait]
impl SearchBackend for DisabledSearch {
    async fn search(&self, _query: Value, _locale: &str) -> Result<SearchResponse, SearchError> {
        Err(SearchError::NotConfigured)
    }
}

/// Elasticsearch when `ELASTIC_NODE` is set, otherwise [`DisabledSearch`].
pub fn backend_from_config(config: &SearchConfig) -> Result<Arc<dyn SearchBackend>, SearchError> {
    match config.node.as_deref() {
        Some(_) => Ok(Arc::new(ElasticsearchClient::from_config(config)?)),
        None => {
            tracing::info!("ELASTIC_NODE not set; search endpoint disabled");
            Ok(Arc::new(DisabledSearch))
        }
    }
}
