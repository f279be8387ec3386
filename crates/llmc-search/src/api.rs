//! Query API consumed by CLIs and tools.
//!
//! One façade over the retriever, router, and store: `search`,
//! `where_used`, `lineage`, `stats`, `health`, `index_status`, and
//! `explain`. Every operation has a JSON-ready result shape; errors
//! convert to a structured `{code, message, remediation?}` payload.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use llmc_core::store::IndexStore;
use llmc_core::sync::SyncEngine;
use llmc_core::types::{HealthReport, IndexStats, IndexStatus};
use llmc_core::TraversalDirection;

use crate::error::{Result, SearchError};
use crate::providers::{build_provider, EmbeddingProvider};
use crate::retriever::{GraphSlice, Retriever, RetrieverConfig, SearchResponse};
use crate::router::{QueryRouter, RouteExplanation};

/// Structured error payload for JSON surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl From<&SearchError> for ApiError {
    fn from(err: &SearchError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            remediation: err.remediation().map(String::from),
        }
    }
}

/// Lineage direction names used by the API surface.
pub fn parse_direction(s: &str) -> Option<TraversalDirection> {
    match s {
        "upstream" => Some(TraversalDirection::Upstream),
        "downstream" => Some(TraversalDirection::Downstream),
        _ => None,
    }
}

/// The query engine: everything a tool needs to ask about one repo.
pub struct QueryEngine {
    store: Arc<IndexStore>,
    retriever: Retriever,
    router: QueryRouter,
}

impl QueryEngine {
    /// Assemble from configuration: builds providers for every profile
    /// and wires the freshness gate to the repo's sync engine.
    pub fn from_config(
        config: &llmc_config::LlmcConfig,
        store: Arc<IndexStore>,
        sync: Arc<SyncEngine>,
    ) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn EmbeddingProvider>> = HashMap::new();
        for (name, profile) in &config.embeddings.profiles {
            providers.insert(name.clone(), build_provider(name, profile)?);
        }

        let router = QueryRouter::new(config)?;
        let retriever_router = QueryRouter::new(config)?;
        let retriever = Retriever::new(
            store.clone(),
            sync,
            retriever_router,
            providers,
            RetrieverConfig {
                two_hop_complexity: config.routing.two_hop_complexity,
                ..RetrieverConfig::default()
            },
        );

        Ok(Self {
            store,
            retriever,
            router,
        })
    }

    /// Hybrid retrieval.
    pub async fn search(&self, query: &str, limit: usize) -> Result<SearchResponse> {
        self.retriever.search(query, limit).await
    }

    /// Graph query materialized as spans.
    pub fn where_used(&self, symbol: &str, limit: usize) -> Result<SearchResponse> {
        self.retriever.where_used(symbol, limit)
    }

    /// Graph slice around a symbol.
    pub fn lineage(
        &self,
        symbol: &str,
        direction: TraversalDirection,
        depth: u32,
    ) -> Result<GraphSlice> {
        self.retriever.lineage(symbol, direction, depth)
    }

    /// Aggregate counts.
    pub fn stats(&self) -> Result<IndexStats> {
        self.store.stats().map_err(Into::into)
    }

    /// Health snapshot.
    pub fn health(&self) -> Result<HealthReport> {
        self.store.health().map_err(Into::into)
    }

    /// Raw index status record.
    pub fn index_status(&self) -> Result<IndexStatus> {
        self.store.index_status().map_err(Into::into)
    }

    /// Routing observability.
    pub fn explain(&self, query: &str) -> RouteExplanation {
        self.router.explain(query)
    }
}
