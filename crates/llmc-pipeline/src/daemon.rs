//! Per-repo background daemon.
//!
//! One logical loop per registered repository. Each tick runs
//! `sync → enrich (bounded) → embed (bounded) → health snapshot`, with
//! cancellation checked between phases and a per-phase deadline so a
//! stuck phase cannot wedge the loop. An idle tick doubles the next
//! sleep up to a cap; any observed work resets it. Sleeps are chunked
//! so cancellation lands within seconds.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use llmc_core::store::IndexStore;
use llmc_core::sync::SyncEngine;
use llmc_core::types::{HealthReport, IndexState, IndexStatus};
use llmc_search::QueryRouter;

use crate::embed::Embedder;
use crate::enrich::EnrichmentPipeline;
use crate::error::{PipelineError, Result};
use crate::events::{Event, EventBus};
use crate::lock::RepoLock;
use crate::metrics::MetricsWriter;

/// Sleep chunk size: the longest cancellation can go unnoticed.
const SLEEP_CHUNK: Duration = Duration::from_secs(5);

/// External status snapshot written next to the index.
#[derive(Debug, Clone, Serialize)]
struct StatusSnapshot<'a> {
    status: &'a IndexStatus,
    health: &'a HealthReport,
    generated_at: String,
}

/// The per-repo daemon.
pub struct Daemon {
    repo_root: PathBuf,
    store: Arc<IndexStore>,
    sync: Arc<SyncEngine>,
    pipeline: EnrichmentPipeline,
    embedder: Embedder,
    events: EventBus,
    config: llmc_config::DaemonConfig,
    status_path: PathBuf,
    orphan_ttl_days: u32,
    cancel: CancellationToken,
}

impl Daemon {
    /// Wire up every stage from configuration.
    pub fn from_config(
        repo_root: impl Into<PathBuf>,
        config: &llmc_config::LlmcConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let repo_root = repo_root.into();
        let store = Arc::new(IndexStore::open(
            &repo_root.join(&config.storage.index_path),
            &repo_root.to_string_lossy(),
        )?);
        let sync = Arc::new(SyncEngine::new(repo_root.clone(), store.clone()));
        let events = EventBus::new();

        let cascade =
            EnrichmentPipeline::cascade_from_config(&config.enrichment, cancel.clone())?;
        let metrics = Arc::new(MetricsWriter::new(
            repo_root.join(&config.storage.metrics_path),
        ));
        let pipeline = EnrichmentPipeline::new(
            store.clone(),
            cascade,
            QueryRouter::new(config)?,
            config.enrichment.clone(),
            metrics,
            events.clone(),
            cancel.clone(),
        );
        let embedder = Embedder::from_config(
            store.clone(),
            &config.embeddings,
            events.clone(),
            cancel.clone(),
        )?;

        Ok(Self {
            status_path: repo_root.join(&config.storage.status_path),
            repo_root,
            store,
            sync,
            pipeline,
            embedder,
            events,
            config: config.daemon.clone(),
            orphan_ttl_days: config.enrichment.orphan_ttl_days,
            cancel,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    /// Run until cancelled. A fatal store error marks the repo `error`
    /// and returns; the caller decides whether other repos continue.
    pub async fn run(&self) -> Result<()> {
        let _lock = RepoLock::acquire(&self.repo_root.join(".llmc"))?;
        lower_priority(self.config.nice_level);
        info!(repo = %self.repo_root.display(), "daemon started");

        let base = Duration::from_secs(self.config.tick_seconds);
        let idle_base = Duration::from_secs(self.config.idle_backoff_base.max(1));
        let idle_max = Duration::from_secs(self.config.idle_backoff_max.max(1));
        let mut next_sleep = base;

        loop {
            if self.cancel.is_cancelled() {
                info!("daemon cancelled");
                return Ok(());
            }

            let did_work = match self.tick().await {
                Ok(did_work) => did_work,
                Err(PipelineError::Cancelled) => return Ok(()),
                Err(e) if e.is_fatal_for_repo() => {
                    error!("fatal error, stopping daemon for this repo: {e}");
                    let _ = self.store.set_state(IndexState::Error, Some(&e.to_string()));
                    self.events.emit(Event::ErrorRecorded {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
                Err(e) => {
                    warn!("tick failed, will retry: {e}");
                    self.events.emit(Event::ErrorRecorded {
                        message: e.to_string(),
                    });
                    false
                }
            };

            // Idle backoff: double after quiet ticks, reset on work.
            next_sleep = if did_work {
                base
            } else {
                (next_sleep.max(idle_base) * 2).min(idle_max)
            };
            debug!(sleep_s = next_sleep.as_secs(), "tick complete");

            if interruptible_sleep(next_sleep, &self.cancel).await {
                info!("daemon cancelled during sleep");
                return Ok(());
            }
        }
    }

    /// One tick: sync → enrich → embed → health snapshot.
    pub async fn tick(&self) -> Result<bool> {
        let deadline = Duration::from_secs(self.config.phase_deadline_seconds.max(1));
        let mut did_work = false;

        // Phase: sync (blocking IO and parsing off the async runtime).
        let sync = self.sync.clone();
        let report = match tokio::time::timeout(
            deadline,
            tokio::task::spawn_blocking(move || sync.sync()),
        )
        .await
        {
            Ok(joined) => joined.expect("sync task panicked")?,
            Err(_) => {
                warn!("sync phase exceeded its deadline");
                return Ok(false);
            }
        };
        if report.did_work() {
            did_work = true;
            self.events.emit(Event::IndexUpdated {
                files_added: report.files_added,
                files_modified: report.files_modified,
                files_deleted: report.files_deleted,
                spans_inserted: report.spans_inserted,
                spans_removed: report.spans_removed,
            });
        }
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        // Orphans past their TTL are reaped as part of housekeeping.
        if self.store.reap_orphans(self.orphan_ttl_days)? > 0 {
            did_work = true;
        }

        // Phase: enrichment (bounded work unit).
        match tokio::time::timeout(deadline, self.pipeline.run_cycle()).await {
            Ok(result) => {
                if result?.did_work() {
                    did_work = true;
                }
            }
            Err(_) => warn!("enrichment phase exceeded its deadline"),
        }
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        // Phase: embedding (bounded work unit).
        match tokio::time::timeout(deadline, self.embedder.run_cycle()).await {
            Ok(result) => {
                if result?.did_work() {
                    did_work = true;
                }
            }
            Err(_) => warn!("embedding phase exceeded its deadline"),
        }
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        // Phase: health snapshot for external readers.
        self.write_snapshot()?;

        Ok(did_work)
    }

    fn write_snapshot(&self) -> Result<()> {
        let status = self.store.index_status()?;
        let health = self.store.health()?;
        let snapshot = StatusSnapshot {
            status: &status,
            health: &health,
            generated_at: chrono::Utc::now().to_rfc3339(),
        };
        if let Some(parent) = self.status_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write-then-rename so readers never see a torn snapshot.
        let tmp_path = self.status_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(&snapshot)?)?;
        std::fs::rename(&tmp_path, &self.status_path)?;

        self.events.emit(Event::HealthSnapshot {
            status: health.status.as_str().to_string(),
            issues: health.issues.len(),
        });
        Ok(())
    }
}

/// Sleep in chunks so cancellation is observed promptly. Returns true
/// when cancelled.
pub async fn interruptible_sleep(total: Duration, cancel: &CancellationToken) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        let chunk = remaining.min(SLEEP_CHUNK);
        tokio::select! {
            _ = cancel.cancelled() => return true,
            _ = tokio::time::sleep(chunk) => {}
        }
        remaining = remaining.saturating_sub(chunk);
    }
    false
}

/// Best-effort niceness drop; the daemon must never outcompete the
/// editor it serves.
fn lower_priority(nice_level: i32) {
    #[cfg(unix)]
    {
        let outcome = unsafe { libc::nice(nice_level) };
        if outcome == -1 {
            debug!("could not lower process priority");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = nice_level;
    }
}
