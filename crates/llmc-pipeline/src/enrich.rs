//! Enrichment pipeline: pending-span selection, tier cascade, batching.
//!
//! Spans lacking an enrichment are selected newest-file-first (subject
//! to the cooldown window), grouped into batch prompts when adjacent,
//! and fanned out through the backend cascade by a bounded worker pool;
//! a single writer drains validated results into the store's batch
//! writer. Backpressure is structural: a saturated writer stalls the
//! workers, which stalls the feeder. Parse and quota failures escalate
//! to the next tier; fatal failures are recorded and skipped; a failed
//! batch falls back to per-span requests so progress is never lost.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use llmc_backend::{extract_json, BackendError, GenerateBackend, GenerateParams};
use llmc_core::store::{IndexStore, PendingSpan, WriteOp};
use llmc_search::QueryRouter;

use crate::error::{PipelineError, Result};
use crate::events::{Event, EventBus};
use crate::metrics::{MetricEvent, MetricsWriter};
use crate::prompt;

/// Concurrent units in flight; per-backend token buckets do the real
/// request-level throttling.
const MAX_IN_FLIGHT: usize = 4;

/// Cooldown stamped on a tier after a fatal failure.
const FATAL_COOLDOWN_HOURS: i64 = 1;

/// Cooldown stamped on a span once the whole cascade is exhausted.
const EXHAUSTED_COOLDOWN_MINUTES: i64 = 10;

/// Outcome of one pipeline cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleReport {
    pub selected: usize,
    pub enriched: usize,
    pub failed: usize,
    pub batches_attempted: usize,
    pub batch_fallbacks: usize,
}

impl CycleReport {
    pub fn did_work(&self) -> bool {
        self.enriched > 0
    }
}

/// A unit of work: one span, or a batch of adjacent spans from one file.
enum WorkUnit {
    Single(PendingSpan),
    Batch(Vec<PendingSpan>),
}

/// What one worker produced for one unit.
struct UnitOutcome {
    ops: Vec<WriteOp>,
    enriched: usize,
    failed: usize,
    was_batch: bool,
    fell_back: bool,
}

/// The enrichment pipeline for one repo.
pub struct EnrichmentPipeline {
    store: Arc<IndexStore>,
    cascade: Vec<Arc<dyn GenerateBackend>>,
    router: QueryRouter,
    config: llmc_config::EnrichmentConfig,
    metrics: Arc<MetricsWriter>,
    events: EventBus,
    cancel: CancellationToken,
}

impl EnrichmentPipeline {
    pub fn new(
        store: Arc<IndexStore>,
        cascade: Vec<Arc<dyn GenerateBackend>>,
        router: QueryRouter,
        config: llmc_config::EnrichmentConfig,
        metrics: Arc<MetricsWriter>,
        events: EventBus,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            cascade,
            router,
            config,
            metrics,
            events,
            cancel,
        }
    }

    /// Build the cascade from configuration, wrapping every member in
    /// the reliability middleware.
    pub fn cascade_from_config(
        config: &llmc_config::EnrichmentConfig,
        cancel: CancellationToken,
    ) -> Result<Vec<Arc<dyn GenerateBackend>>> {
        let mut cascade: Vec<Arc<dyn GenerateBackend>> = Vec::new();
        for tier in &config.cascade {
            let settings = config.backends.get(tier).ok_or_else(|| {
                PipelineError::Validation(format!("cascade tier '{tier}' has no backend settings"))
            })?;
            cascade.push(llmc_backend::build_backend(tier, settings, cancel.clone())?);
        }
        Ok(cascade)
    }

    /// One bounded work unit: select, cascade, persist.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        if !self.config.enabled || self.cascade.is_empty() {
            return Ok(report);
        }

        let pending = self
            .store
            .pending_enrichments(self.config.max_spans_per_cycle, self.config.cooldown_seconds)?;
        report.selected = pending.len();
        if pending.is_empty() {
            return Ok(report);
        }
        debug!(selected = report.selected, "enrichment cycle starting");

        let units = group_into_units(pending, &self.config);
        let mut writer = self.store.begin_batch();

        // Fan out units to workers; drain outcomes as they complete.
        let mut outcomes = std::pin::pin!(futures::stream::iter(units)
            .map(|unit| self.process_unit(unit))
            .buffer_unordered(MAX_IN_FLIGHT));

        while let Some(outcome) = outcomes.next().await {
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Validated partial progress survives a cancellation.
                    writer.flush()?;
                    return Err(e);
                }
            };
            for op in outcome.ops {
                writer.push(op)?;
            }
            report.enriched += outcome.enriched;
            report.failed += outcome.failed;
            if outcome.was_batch {
                report.batches_attempted += 1;
            }
            if outcome.fell_back {
                report.batch_fallbacks += 1;
            }
        }

        writer.flush()?;
        if report.enriched > 0 {
            info!(
                enriched = report.enriched,
                failed = report.failed,
                "enrichment cycle complete"
            );
        }
        Ok(report)
    }

    async fn process_unit(&self, unit: WorkUnit) -> Result<UnitOutcome> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        match unit {
            WorkUnit::Single(span) => {
                let (ops, enriched) = self.enrich_span(&span).await?;
                Ok(UnitOutcome {
                    ops,
                    enriched: usize::from(enriched),
                    failed: usize::from(!enriched),
                    was_batch: false,
                    fell_back: false,
                })
            }
            WorkUnit::Batch(spans) => self.enrich_batch(&spans).await,
        }
    }

    /// Try a batch prompt; on any parse/validation trouble fall back to
    /// per-span requests.
    async fn enrich_batch(&self, spans: &[PendingSpan]) -> Result<UnitOutcome> {
        let tier_index = self.start_index_for(&spans[0]);
        let backend = &self.cascade[tier_index];
        let prompt_text = prompt::batch_prompt(spans);
        let params = self.params();

        let started = Instant::now();
        match backend.generate(&prompt_text, &params).await {
            Ok(output) => {
                let parsed = extract_json(&output.text)
                    .map_err(PipelineError::from)
                    .and_then(|value| prompt::validate_batch(&value, spans, backend.model_id()));
                match parsed {
                    Ok(enrichments) => {
                        let duration_ms = started.elapsed().as_millis() as u64;
                        let per_span_tokens = (
                            output.tokens_in / spans.len() as u64,
                            output.tokens_out / spans.len() as u64,
                        );
                        let mut ops = Vec::with_capacity(enrichments.len() * 2);
                        for enrichment in enrichments {
                            self.metrics.record(&MetricEvent::success(
                                &enrichment.span_hash,
                                backend.id(),
                                backend.model_id(),
                                per_span_tokens.0,
                                per_span_tokens.1,
                                duration_ms,
                            ));
                            self.events.emit(Event::EnrichmentCompleted {
                                span_hash: enrichment.span_hash.clone(),
                                tier: backend.id().to_string(),
                                model: backend.model_id().to_string(),
                            });
                            ops.push(WriteOp::ClearFailures {
                                span_hash: enrichment.span_hash.clone(),
                            });
                            ops.push(WriteOp::Enrichment(enrichment));
                        }
                        return Ok(UnitOutcome {
                            enriched: spans.len(),
                            failed: 0,
                            ops,
                            was_batch: true,
                            fell_back: false,
                        });
                    }
                    Err(e) => {
                        warn!(tier = backend.id(), "batch response unusable: {e}");
                        self.metrics.record(&MetricEvent::failure(
                            format!("batch:{}", spans[0].span.span_hash),
                            backend.id(),
                            backend.model_id(),
                            started.elapsed().as_millis() as u64,
                            "batch_parse_error",
                        ));
                    }
                }
            }
            Err(BackendError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                warn!(tier = backend.id(), "batch request failed: {e}");
                self.metrics.record(&MetricEvent::failure(
                    format!("batch:{}", spans[0].span.span_hash),
                    backend.id(),
                    backend.model_id(),
                    started.elapsed().as_millis() as u64,
                    e.reason(),
                ));
            }
        }

        // Fallback: each span individually; progress is never lost.
        let mut outcome = UnitOutcome {
            ops: Vec::new(),
            enriched: 0,
            failed: 0,
            was_batch: true,
            fell_back: true,
        };
        for span in spans {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let (ops, enriched) = self.enrich_span(span).await?;
            outcome.ops.extend(ops);
            if enriched {
                outcome.enriched += 1;
            } else {
                outcome.failed += 1;
            }
        }
        Ok(outcome)
    }

    /// Walk the cascade for one span. Returns the write ops to queue and
    /// whether an enrichment was produced.
    async fn enrich_span(&self, span: &PendingSpan) -> Result<(Vec<WriteOp>, bool)> {
        let failures = self.store.failures_for(&span.span.span_hash)?;
        let now = Utc::now().to_rfc3339();
        let prompt_text = prompt::span_prompt(span);
        let params = self.params();

        let mut index = self.start_index_for(span);
        let mut last_reason = "no usable tier".to_string();

        while index < self.cascade.len() {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let backend = &self.cascade[index];

            // Per-tier cooldown from earlier failures.
            if failures
                .iter()
                .any(|f| f.tier == backend.id() && f.cooldown_until.as_deref() > Some(now.as_str()))
            {
                debug!(tier = backend.id(), span = %span.span.span_hash, "tier cooling down");
                index += 1;
                continue;
            }

            let started = Instant::now();
            match backend.generate(&prompt_text, &params).await {
                Ok(output) => {
                    let validated = extract_json(&output.text)
                        .map_err(PipelineError::from)
                        .and_then(|value| {
                            prompt::validate_enrichment(&value, span, backend.model_id())
                        });
                    match validated {
                        Ok(enrichment) => {
                            self.metrics.record(&MetricEvent::success(
                                &span.span.span_hash,
                                backend.id(),
                                backend.model_id(),
                                output.tokens_in,
                                output.tokens_out,
                                started.elapsed().as_millis() as u64,
                            ));
                            self.events.emit(Event::EnrichmentCompleted {
                                span_hash: span.span.span_hash.clone(),
                                tier: backend.id().to_string(),
                                model: backend.model_id().to_string(),
                            });
                            return Ok((
                                vec![
                                    WriteOp::ClearFailures {
                                        span_hash: span.span.span_hash.clone(),
                                    },
                                    WriteOp::Enrichment(enrichment),
                                ],
                                true,
                            ));
                        }
                        Err(e) => {
                            // Unusable content escalates to the next tier.
                            self.metrics.record(&MetricEvent::failure(
                                &span.span.span_hash,
                                backend.id(),
                                backend.model_id(),
                                started.elapsed().as_millis() as u64,
                                "parse_error",
                            ));
                            debug!(tier = backend.id(), "escalating after parse failure: {e}");
                            last_reason = "parse_error".to_string();
                            index += 1;
                        }
                    }
                }
                Err(BackendError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) if e.is_fatal() => {
                    self.metrics.record(&MetricEvent::failure(
                        &span.span.span_hash,
                        backend.id(),
                        backend.model_id(),
                        started.elapsed().as_millis() as u64,
                        e.reason(),
                    ));
                    self.events.emit(Event::ErrorRecorded {
                        message: e.to_string(),
                    });
                    return Ok((
                        vec![failure_op(
                            span,
                            backend.id(),
                            e.reason(),
                            ChronoDuration::hours(FATAL_COOLDOWN_HOURS),
                        )],
                        false,
                    ));
                }
                Err(e) => {
                    // Retries are already spent inside the middleware;
                    // whatever surfaces here escalates.
                    self.metrics.record(&MetricEvent::failure(
                        &span.span.span_hash,
                        backend.id(),
                        backend.model_id(),
                        started.elapsed().as_millis() as u64,
                        e.reason(),
                    ));
                    debug!(tier = backend.id(), reason = e.reason(), "escalating tier");
                    last_reason = e.reason().to_string();
                    index += 1;
                }
            }
        }

        Ok((
            vec![failure_op(
                span,
                "cascade",
                &last_reason,
                ChronoDuration::minutes(EXHAUSTED_COOLDOWN_MINUTES),
            )],
            false,
        ))
    }

    fn start_index_for(&self, span: &PendingSpan) -> usize {
        if !self.config.router {
            // Fixed start tier, router disabled.
            return self
                .config
                .start_tier
                .as_deref()
                .and_then(|tier| self.cascade.iter().position(|b| b.id() == tier))
                .unwrap_or(0);
        }
        let tier = self
            .router
            .start_tier_for_span(span.span.kind, &span.span.content_type);
        self.cascade
            .iter()
            .position(|b| b.id() == tier)
            .unwrap_or(0)
    }

    fn params(&self) -> GenerateParams {
        GenerateParams {
            system: Some(prompt::system_prompt().to_string()),
            ..GenerateParams::default()
        }
    }
}

fn failure_op(span: &PendingSpan, tier: &str, reason: &str, cooldown: ChronoDuration) -> WriteOp {
    WriteOp::Failure {
        span_hash: span.span.span_hash.clone(),
        tier: tier.to_string(),
        reason: reason.to_string(),
        cooldown_until: Some((Utc::now() + cooldown).to_rfc3339()),
    }
}

/// Group ordered pending spans into batches: at least
/// `batch_min_spans` consecutive spans from the same file within
/// `max_line_gap` lines of each other, capped at `batch_size`.
fn group_into_units(
    pending: Vec<PendingSpan>,
    config: &llmc_config::EnrichmentConfig,
) -> Vec<WorkUnit> {
    let mut units = Vec::new();
    let mut group: Vec<PendingSpan> = Vec::new();

    let flush = |group: &mut Vec<PendingSpan>, units: &mut Vec<WorkUnit>| {
        if group.len() >= config.batch_min_spans.max(2) {
            for chunk in group.chunks(config.batch_size.max(2)) {
                if chunk.len() >= config.batch_min_spans.max(2) {
                    units.push(WorkUnit::Batch(chunk.to_vec()));
                } else {
                    units.extend(chunk.iter().cloned().map(WorkUnit::Single));
                }
            }
        } else {
            units.extend(group.iter().cloned().map(WorkUnit::Single));
        }
        group.clear();
    };

    for span in pending {
        let adjacent = group.last().map(|prev: &PendingSpan| {
            prev.file_id == span.file_id
                && span.span.start_line.saturating_sub(prev.span.end_line) <= config.max_line_gap
        });
        match adjacent {
            Some(true) => group.push(span),
            Some(false) => {
                flush(&mut group, &mut units);
                group.push(span);
            }
            None => group.push(span),
        }
    }
    flush(&mut group, &mut units);
    units
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmc_core::types::{Span, SpanKind};

    fn pending(file_id: i64, start: u32, end: u32, name: &str) -> PendingSpan {
        let content = format!("def {name}():\n    return 1");
        PendingSpan {
            file_id,
            file_path: format!("file{file_id}.py"),
            file_mtime: 0,
            span: Span {
                span_hash: llmc_core::span_hash("code", "python", &content),
                kind: SpanKind::Function,
                symbol_name: Some(name.to_string()),
                start_line: start,
                end_line: end,
                content,
                content_type: "code".to_string(),
                content_language: "python".to_string(),
            },
        }
    }

    fn config() -> llmc_config::EnrichmentConfig {
        llmc_config::EnrichmentConfig::default()
    }

    #[test]
    fn test_adjacent_spans_batch() {
        let units = group_into_units(
            vec![
                pending(1, 1, 5, "a"),
                pending(1, 8, 12, "b"),
                pending(1, 14, 20, "c"),
            ],
            &config(),
        );
        assert_eq!(units.len(), 1);
        assert!(matches!(&units[0], WorkUnit::Batch(spans) if spans.len() == 3));
    }

    #[test]
    fn test_far_apart_spans_stay_single() {
        let mut cfg = config();
        cfg.max_line_gap = 5;
        let units = group_into_units(
            vec![pending(1, 1, 5, "a"), pending(1, 100, 110, "b")],
            &cfg,
        );
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| matches!(u, WorkUnit::Single(_))));
    }

    #[test]
    fn test_different_files_never_batch() {
        let units = group_into_units(
            vec![pending(1, 1, 5, "a"), pending(2, 6, 10, "b")],
            &config(),
        );
        assert_eq!(units.len(), 2);
    }

    #[test]
    fn test_batch_size_caps_chunks() {
        let mut cfg = config();
        cfg.batch_size = 2;
        let units = group_into_units(
            vec![
                pending(1, 1, 2, "a"),
                pending(1, 3, 4, "b"),
                pending(1, 5, 6, "c"),
                pending(1, 7, 8, "d"),
            ],
            &cfg,
        );
        assert_eq!(units.len(), 2);
        for unit in units {
            assert!(matches!(unit, WorkUnit::Batch(spans) if spans.len() == 2));
        }
    }
}
