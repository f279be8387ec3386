//! Batched write queue for the enrichment and embedding paths.
//!
//! The store's locking discipline makes per-item commits a throughput
//! collapse, so pipeline writes buffer here and commit in one
//! transaction every [`BATCH_MAX_ITEMS`] items or [`BATCH_MAX_AGE`],
//! whichever comes first.

use std::time::{Duration, Instant};

use tracing::warn;

use super::IndexStore;
use crate::error::Result;
use crate::types::{EmbeddingRecord, Enrichment};

/// Commit after this many queued items.
pub const BATCH_MAX_ITEMS: usize = 50;

/// Commit after this much wall-clock time with items queued.
pub const BATCH_MAX_AGE: Duration = Duration::from_secs(5);

/// One queued write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Enrichment(Enrichment),
    Embedding(EmbeddingRecord),
    Failure {
        span_hash: String,
        tier: String,
        reason: String,
        cooldown_until: Option<String>,
    },
    ClearFailures {
        span_hash: String,
    },
}

/// Accumulates writes and flushes them transactionally.
///
/// Dropping a writer flushes best-effort; call [`BatchWriter::flush`]
/// explicitly on the success path so errors surface.
pub struct BatchWriter<'a> {
    store: &'a IndexStore,
    buf: Vec<WriteOp>,
    max_items: usize,
    max_age: Duration,
    opened_at: Instant,
    flushed: usize,
}

impl<'a> BatchWriter<'a> {
    pub(super) fn new(store: &'a IndexStore) -> Self {
        Self {
            store,
            buf: Vec::with_capacity(BATCH_MAX_ITEMS),
            max_items: BATCH_MAX_ITEMS,
            max_age: BATCH_MAX_AGE,
            opened_at: Instant::now(),
            flushed: 0,
        }
    }

    /// Override limits (tests).
    pub fn with_limits(mut self, max_items: usize, max_age: Duration) -> Self {
        self.max_items = max_items.max(1);
        self.max_age = max_age;
        self
    }

    /// Queue one write; flushes when either limit is reached.
    pub fn push(&mut self, op: WriteOp) -> Result<()> {
        self.buf.push(op);
        if self.buf.len() >= self.max_items || self.opened_at.elapsed() >= self.max_age {
            self.flush()?;
        }
        Ok(())
    }

    /// Commit everything queued in one transaction.
    pub fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let ops = std::mem::take(&mut self.buf);
        self.store.apply_batch(&ops)?;
        self.flushed += ops.len();
        self.opened_at = Instant::now();
        Ok(())
    }

    /// Total items committed through this writer.
    pub fn flushed(&self) -> usize {
        self.flushed
    }

    /// Items queued but not yet committed.
    pub fn queued(&self) -> usize {
        self.buf.len()
    }
}

impl Drop for BatchWriter<'_> {
    fn drop(&mut self) {
        if !self.buf.is_empty() {
            if let Err(e) = self.flush() {
                warn!("batch writer dropped with unflushed items: {e}");
            }
        }
    }
}
