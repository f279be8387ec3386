//! In-process event bus for collaborators.
//!
//! Hosts (CLIs, editors, MCP servers) subscribe to a broadcast channel;
//! emitting never blocks and silently drops when nobody listens.

use serde::Serialize;
use tokio::sync::broadcast;

/// Events emitted at pipeline phase boundaries.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    #[serde(rename = "index.updated")]
    IndexUpdated {
        files_added: usize,
        files_modified: usize,
        files_deleted: usize,
        spans_inserted: usize,
        spans_removed: usize,
    },
    #[serde(rename = "enrichment.completed")]
    EnrichmentCompleted {
        span_hash: String,
        tier: String,
        model: String,
    },
    #[serde(rename = "embedding.completed")]
    EmbeddingCompleted { span_hash: String, profile: String },
    #[serde(rename = "health.snapshot")]
    HealthSnapshot { status: String, issues: usize },
    #[serde(rename = "error.recorded")]
    ErrorRecorded { message: String },
}

/// Broadcast bus, cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Fire-and-forget; a missing audience is not an error.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}
