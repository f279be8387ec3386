//! Cascade behavior: escalation, batching with per-span fallback, and
//! failure bookkeeping, driven by scripted in-memory backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use llmc_backend::{
    BackendError, CapacityLimiter, CircuitBreaker, CostTracker, GenerateBackend, GenerateOutput,
    GenerateParams, ReliableBackend, RetryPolicy, TokenPricing,
};
use llmc_core::store::IndexStore;
use llmc_core::sync::SyncEngine;
use llmc_pipeline::{EnrichmentPipeline, EventBus, MetricEvent, MetricsWriter};
use llmc_search::QueryRouter;

/// One scripted response per call; the last entry repeats.
enum Script {
    Ok(&'static str),
    Err(fn() -> BackendError),
}

struct ScriptedBackend {
    id: String,
    model: String,
    script: Mutex<Vec<Script>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn new(id: &str, model: &str, script: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            model: model.to_string(),
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerateBackend for ScriptedBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        _prompt: &str,
        _params: &GenerateParams,
    ) -> Result<GenerateOutput, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock();
        let step = if script.len() > 1 {
            script.remove(0)
        } else {
            match &script[0] {
                Script::Ok(text) => Script::Ok(*text),
                Script::Err(f) => Script::Err(*f),
            }
        };
        match step {
            Script::Ok(text) => Ok(GenerateOutput {
                text: text.to_string(),
                tokens_in: 100,
                tokens_out: 50,
                latency_ms: 5,
            }),
            Script::Err(make) => Err(make()),
        }
    }
}

const GOOD_SINGLE: &str = r#"{"summary": "Does a thing.", "inputs": [], "outputs": [],
"side_effects": [], "pitfalls": [], "usage_snippet": null,
"evidence": [{"start_line": 1, "end_line": 2}]}"#;

const GOOD_PAIR_BATCH: &str = r#"[
  {"summary": "First.", "inputs": [], "outputs": [], "side_effects": [],
   "pitfalls": [], "usage_snippet": null, "evidence": []},
  {"summary": "Second.", "inputs": [], "outputs": [], "side_effects": [],
   "pitfalls": [], "usage_snippet": null, "evidence": []}
]"#;

fn fixture(files: &[(&str, &str)]) -> (tempfile::TempDir, Arc<IndexStore>) {
    let tmp = tempfile::tempdir().unwrap();
    for (path, content) in files {
        std::fs::write(tmp.path().join(path), content).unwrap();
    }
    let store = Arc::new(
        IndexStore::open(&tmp.path().join(".llmc/index.db"), &tmp.path().to_string_lossy())
            .unwrap(),
    );
    SyncEngine::new(tmp.path(), store.clone()).sync().unwrap();
    (tmp, store)
}

fn two_tier_config() -> llmc_config::LlmcConfig {
    let mut config = llmc_config::LlmcConfig::default();
    config.enrichment.cascade = vec!["tierA".to_string(), "tierB".to_string()];
    config
        .enrichment
        .backends
        .insert("tierA".to_string(), llmc_config::BackendSettings::default());
    config
        .enrichment
        .backends
        .insert("tierB".to_string(), llmc_config::BackendSettings::default());
    config.enrichment.cooldown_seconds = 0;
    config
}

fn pipeline(
    store: Arc<IndexStore>,
    metrics_path: &std::path::Path,
    config: &llmc_config::LlmcConfig,
    cascade: Vec<Arc<dyn GenerateBackend>>,
) -> EnrichmentPipeline {
    EnrichmentPipeline::new(
        store,
        cascade,
        QueryRouter::new(config).unwrap(),
        config.enrichment.clone(),
        Arc::new(MetricsWriter::new(metrics_path)),
        EventBus::new(),
        CancellationToken::new(),
    )
}

fn read_metrics(path: &std::path::Path) -> Vec<MetricEvent> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Cascade escalation: tierA keeps failing to parse (through the
/// middleware's retry budget), then tierB answers and the enrichment
/// records tierB's model.
#[tokio::test]
async fn test_parse_failures_escalate_to_next_tier() {
    let (tmp, store) = fixture(&[("a.py", "def f():\n    return 1\n")]);
    let config = two_tier_config();

    let tier_a_inner = ScriptedBackend::new(
        "tierA",
        "model-a",
        vec![Script::Err(|| BackendError::Parse("garbage".to_string()))],
    );
    let tier_a = Arc::new(
        ReliableBackend::new(
            tier_a_inner.clone(),
            CapacityLimiter::new(10_000, 10_000_000),
            CircuitBreaker::new("tierA"),
            CostTracker::new("tierA", 0.0, 0.0),
            TokenPricing::default(),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: Duration::ZERO,
            },
            CancellationToken::new(),
        ),
    );
    let tier_b = ScriptedBackend::new("tierB", "model-b", vec![Script::Ok(GOOD_SINGLE)]);

    let metrics_path = tmp.path().join("logs/enrichment_metrics.jsonl");
    let cascade: Vec<Arc<dyn GenerateBackend>> =
        vec![tier_a, tier_b.clone() as Arc<dyn GenerateBackend>];
    let pipeline = pipeline(store.clone(), &metrics_path, &config, cascade);
    let report = pipeline.run_cycle().await.unwrap();

    assert_eq!(report.enriched, 1);
    // Three middleware attempts at tierA before escalation.
    assert_eq!(tier_a_inner.calls(), 3);
    assert_eq!(tier_b.calls(), 1);

    // The enrichment row carries tierB's model.
    let pending = store.pending_enrichments(10, 0).unwrap();
    assert!(pending.is_empty());
    let stats = store.stats().unwrap();
    assert_eq!(stats.enrichments, 1);
    let hash = store.orphan_enrichments().unwrap();
    assert!(hash.is_empty());

    let metrics = read_metrics(&metrics_path);
    assert!(metrics.iter().any(|m| m.tier == "tierA" && !m.success));
    assert!(metrics.iter().any(|m| m.tier == "tierB" && m.success && m.model == "model-b"));
}

/// Batched enrichment with fallback: two adjacent functions get one
/// batch prompt; the malformed array falls back to two successful
/// singles, and the metrics show one batch failure plus two successes.
#[tokio::test]
async fn test_batch_fallback_never_loses_progress() {
    let (tmp, store) = fixture(&[(
        "mod.py",
        "def a():\n    return 1\n\ndef b():\n    return 2\n",
    )]);
    let mut config = two_tier_config();
    config.enrichment.cascade = vec!["tierA".to_string()];
    config.enrichment.batch_min_spans = 2;

    // First call (the batch) returns a malformed array; the two
    // per-span fallbacks succeed.
    let tier_a = ScriptedBackend::new(
        "tierA",
        "model-a",
        vec![
            Script::Ok("[{\"summary\": \"only one\"}"),
            Script::Ok(GOOD_SINGLE),
            Script::Ok(GOOD_SINGLE),
        ],
    );

    let metrics_path = tmp.path().join("logs/enrichment_metrics.jsonl");
    let cascade: Vec<Arc<dyn GenerateBackend>> = vec![tier_a.clone()];
    let pipeline = pipeline(store.clone(), &metrics_path, &config, cascade);
    let report = pipeline.run_cycle().await.unwrap();

    assert_eq!(report.batches_attempted, 1);
    assert_eq!(report.batch_fallbacks, 1);
    assert_eq!(report.enriched, 2);
    assert_eq!(tier_a.calls(), 3);
    assert_eq!(store.stats().unwrap().enrichments, 2);

    let metrics = read_metrics(&metrics_path);
    let batch_failures = metrics
        .iter()
        .filter(|m| !m.success && m.span_hash.starts_with("batch:"))
        .count();
    let single_successes = metrics.iter().filter(|m| m.success).count();
    assert_eq!(batch_failures, 1);
    assert_eq!(single_successes, 2);
}

/// A successful batch writes every span in one pass.
#[tokio::test]
async fn test_successful_batch() {
    let (tmp, store) = fixture(&[(
        "mod.py",
        "def a():\n    return 1\n\ndef b():\n    return 2\n",
    )]);
    let mut config = two_tier_config();
    config.enrichment.cascade = vec!["tierA".to_string()];

    let tier_a = ScriptedBackend::new("tierA", "model-a", vec![Script::Ok(GOOD_PAIR_BATCH)]);
    let metrics_path = tmp.path().join("logs/m.jsonl");
    let cascade: Vec<Arc<dyn GenerateBackend>> = vec![tier_a.clone()];
    let pipeline = pipeline(store.clone(), &metrics_path, &config, cascade);
    let report = pipeline.run_cycle().await.unwrap();

    assert_eq!(report.enriched, 2);
    assert_eq!(report.batch_fallbacks, 0);
    assert_eq!(tier_a.calls(), 1);
}

/// Fatal errors record a failure and never block the rest of the queue.
#[tokio::test]
async fn test_fatal_failure_skips_span_and_continues() {
    let (tmp, store) = fixture(&[
        ("one.py", "def one():\n    return 1\n"),
        ("two.py", "def two():\n    return 2\n"),
    ]);
    let mut config = two_tier_config();
    config.enrichment.cascade = vec!["tierA".to_string()];
    config.enrichment.batch_min_spans = 99; // force singles

    let tier_a = ScriptedBackend::new(
        "tierA",
        "model-a",
        vec![
            Script::Err(|| BackendError::HttpStatus {
                status: 400,
                message: "bad request".to_string(),
            }),
            Script::Ok(GOOD_SINGLE),
        ],
    );

    let metrics_path = tmp.path().join("logs/m.jsonl");
    let cascade: Vec<Arc<dyn GenerateBackend>> = vec![tier_a];
    let pipeline = pipeline(store.clone(), &metrics_path, &config, cascade);
    let report = pipeline.run_cycle().await.unwrap();

    assert_eq!(report.enriched, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(store.stats().unwrap().enrichments, 1);

    // The failed span has a failure record with a cooldown.
    let pending = store.pending_enrichments(10, 0).unwrap();
    assert_eq!(pending.len(), 1);
    let failures = store.failures_for(&pending[0].span.span_hash).unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].cooldown_until.is_some());
}

/// An exhausted cascade records the failure instead of hanging.
#[tokio::test]
async fn test_cascade_exhaustion_records_failure() {
    let (tmp, store) = fixture(&[("a.py", "def f():\n    return 1\n")]);
    let mut config = two_tier_config();
    config.enrichment.cascade = vec!["tierA".to_string()];

    let tier_a = ScriptedBackend::new(
        "tierA",
        "model-a",
        vec![Script::Err(|| BackendError::Parse("noise".to_string()))],
    );

    let metrics_path = tmp.path().join("logs/m.jsonl");
    let cascade: Vec<Arc<dyn GenerateBackend>> = vec![tier_a];
    let pipeline = pipeline(store.clone(), &metrics_path, &config, cascade);
    let report = pipeline.run_cycle().await.unwrap();

    assert_eq!(report.enriched, 0);
    assert_eq!(report.failed, 1);
    let pending = store.pending_enrichments(10, 0).unwrap();
    let failures = store.failures_for(&pending[0].span.span_hash).unwrap();
    assert!(failures.iter().any(|f| f.tier == "cascade"));
}
