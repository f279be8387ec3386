//! Embedder: fills `(span, profile)` gaps with vectors.
//!
//! For every configured profile, spans missing an embedding are
//! collected (bounded per cycle), embedded in batches from the
//! enrichment summary when one exists or the canonicalized span text
//! otherwise, and written through the batch writer as little-endian
//! f32 blobs. A profile whose provider identity or dimension changed
//! has its stored vectors invalidated first.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use llmc_core::store::{IndexStore, WriteOp};
use llmc_core::types::EmbeddingRecord;
use llmc_search::{build_provider, EmbeddingProvider};

use crate::error::{PipelineError, Result};
use crate::events::{Event, EventBus};

/// Outcome of one embedding cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbedReport {
    pub embedded: usize,
    pub invalidated: u64,
    pub profiles_skipped: usize,
}

impl EmbedReport {
    pub fn did_work(&self) -> bool {
        self.embedded > 0 || self.invalidated > 0
    }
}

/// The embedder for one repo.
pub struct Embedder {
    store: Arc<IndexStore>,
    providers: HashMap<String, Arc<dyn EmbeddingProvider>>,
    config: llmc_config::EmbeddingsConfig,
    events: EventBus,
    cancel: CancellationToken,
}

impl Embedder {
    pub fn new(
        store: Arc<IndexStore>,
        providers: HashMap<String, Arc<dyn EmbeddingProvider>>,
        config: llmc_config::EmbeddingsConfig,
        events: EventBus,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            providers,
            config,
            events,
            cancel,
        }
    }

    /// Build providers for every configured profile.
    pub fn from_config(
        store: Arc<IndexStore>,
        config: &llmc_config::EmbeddingsConfig,
        events: EventBus,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn EmbeddingProvider>> = HashMap::new();
        for (name, profile) in &config.profiles {
            providers.insert(name.clone(), build_provider(name, profile)?);
        }
        Ok(Self::new(store, providers, config.clone(), events, cancel))
    }

    /// One bounded cycle across all profiles.
    pub async fn run_cycle(&self) -> Result<EmbedReport> {
        let mut report = EmbedReport::default();

        for (profile, provider) in &self.providers {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            // A model/dim change invalidates the profile's vectors.
            report.invalidated +=
                self.store
                    .invalidate_profile(profile, provider.provider_id(), provider.dim())?;

            let pending = self
                .store
                .pending_embeddings(profile, self.config.max_spans_per_cycle)?;
            if pending.is_empty() {
                continue;
            }
            debug!(profile, pending = pending.len(), "embedding cycle");

            let mut writer = self.store.begin_batch();
            let mut profile_failed = false;
            for chunk in pending.chunks(self.config.batch_size.max(1)) {
                if self.cancel.is_cancelled() {
                    writer.flush()?;
                    return Err(PipelineError::Cancelled);
                }

                let texts: Vec<String> = chunk.iter().map(|p| p.text.clone()).collect();
                let vectors = match provider.embed(&texts).await {
                    Ok(vectors) => vectors,
                    Err(e) => {
                        // An unreachable provider skips the profile this
                        // cycle; the daemon retries next tick.
                        warn!(profile, "embedding provider unavailable: {e}");
                        profile_failed = true;
                        break;
                    }
                };

                let created_at = chrono::Utc::now().to_rfc3339();
                for (pending_span, vector) in chunk.iter().zip(vectors) {
                    let dim = vector.len();
                    writer.push(WriteOp::Embedding(EmbeddingRecord {
                        span_hash: pending_span.span_hash.clone(),
                        profile: profile.clone(),
                        vector,
                        dim,
                        provider_id: provider.provider_id().to_string(),
                        created_at: created_at.clone(),
                    }))?;
                    self.events.emit(Event::EmbeddingCompleted {
                        span_hash: pending_span.span_hash.clone(),
                        profile: profile.clone(),
                    });
                    report.embedded += 1;
                }
            }
            writer.flush()?;
            if profile_failed {
                report.profiles_skipped += 1;
            }
        }

        if report.did_work() {
            info!(
                embedded = report.embedded,
                invalidated = report.invalidated,
                "embedding cycle complete"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use llmc_core::types::{Span, SpanKind};
    use llmc_search::SearchError;

    /// Deterministic provider: maps text length onto a 2-dim vector.
    struct FakeProvider {
        id: String,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for FakeProvider {
        fn provider_id(&self) -> &str {
            &self.id
        }

        fn dim(&self) -> usize {
            2
        }

        async fn embed(
            &self,
            texts: &[String],
        ) -> llmc_search::Result<Vec<Vec<f32>>> {
            if self.fail {
                return Err(SearchError::ProviderUnavailable("down".to_string()));
            }
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0])
                .collect())
        }
    }

    fn store_with_span() -> (Arc<IndexStore>, String) {
        let store = Arc::new(IndexStore::open_in_memory("/repo").unwrap());
        let (file_id, _) = store.upsert_file("a.py", "h", 100, "python", 10).unwrap();
        let content = "def f():\n    return 1".to_string();
        let span = Span {
            span_hash: llmc_core::span_hash("code", "python", &content),
            kind: SpanKind::Function,
            symbol_name: Some("f".to_string()),
            start_line: 1,
            end_line: 2,
            content,
            content_type: "code".to_string(),
            content_language: "python".to_string(),
        };
        let hash = span.span_hash.clone();
        store.replace_spans_for_file(file_id, &[span]).unwrap();
        (store, hash)
    }

    fn embedder(store: Arc<IndexStore>, fail: bool) -> Embedder {
        let mut providers: HashMap<String, Arc<dyn EmbeddingProvider>> = HashMap::new();
        providers.insert(
            "code".to_string(),
            Arc::new(FakeProvider {
                id: "fake:v1".to_string(),
                fail,
            }),
        );
        Embedder::new(
            store,
            providers,
            llmc_config::EmbeddingsConfig::default(),
            EventBus::new(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_fills_missing_embeddings() {
        let (store, hash) = store_with_span();
        let report = embedder(store.clone(), false).run_cycle().await.unwrap();
        assert_eq!(report.embedded, 1);

        let stats = store.stats().unwrap();
        assert_eq!(stats.embeddings["code"], 1);

        // Second cycle: nothing left to do.
        let report = embedder(store.clone(), false).run_cycle().await.unwrap();
        assert_eq!(report.embedded, 0);

        let hits = store.search_vector("code", &[21.0, 1.0], 1, None).unwrap();
        assert_eq!(hits[0].span_hash, hash);
    }

    #[tokio::test]
    async fn test_provider_change_invalidates() {
        let (store, _) = store_with_span();
        embedder(store.clone(), false).run_cycle().await.unwrap();

        // Same profile, different provider identity.
        let mut providers: HashMap<String, Arc<dyn EmbeddingProvider>> = HashMap::new();
        providers.insert(
            "code".to_string(),
            Arc::new(FakeProvider {
                id: "fake:v2".to_string(),
                fail: false,
            }),
        );
        let embedder = Embedder::new(
            store.clone(),
            providers,
            llmc_config::EmbeddingsConfig::default(),
            EventBus::new(),
            CancellationToken::new(),
        );
        let report = embedder.run_cycle().await.unwrap();
        assert_eq!(report.invalidated, 1);
        assert_eq!(report.embedded, 1);
    }

    #[tokio::test]
    async fn test_provider_outage_skips_profile() {
        let (store, _) = store_with_span();
        let report = embedder(store.clone(), true).run_cycle().await.unwrap();
        assert_eq!(report.embedded, 0);
        assert_eq!(report.profiles_skipped, 1);
        // Nothing half-written.
        assert!(store.stats().unwrap().embeddings.is_empty());
    }

    #[tokio::test]
    async fn test_summary_preferred_over_text() {
        let (store, hash) = store_with_span();
        store
            .put_enrichment(&llmc_core::types::Enrichment {
                span_hash: hash,
                summary: "short".to_string(),
                inputs: vec![],
                outputs: vec![],
                side_effects: vec![],
                pitfalls: vec![],
                usage_snippet: None,
                evidence: vec![],
                model_id: "m".to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
            })
            .unwrap();

        embedder(store.clone(), false).run_cycle().await.unwrap();
        // FakeProvider encodes text length: "short" is 5 chars.
        let hits = store.search_vector("code", &[5.0, 1.0], 1, None).unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }
}
