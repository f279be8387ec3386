//! llmc-pipeline: enrichment cascade, embedder, and per-repo daemon.
//!
//! The pipeline pulls pending spans from the store, routes them through
//! an ordered backend cascade (escalating on parse/quota failures,
//! recording fatal ones), validates and batch-writes the results, and
//! appends one metrics line per attempt. The embedder fills
//! `(span, profile)` gaps. The daemon runs both behind a sync phase on
//! a backoff-paced tick, holding a per-repo advisory lock, and emits
//! structured events for collaborators.

pub mod daemon;
pub mod embed;
pub mod enrich;
pub mod error;
pub mod events;
pub mod lock;
pub mod metrics;
pub mod prompt;

pub use daemon::{interruptible_sleep, Daemon};
pub use embed::{EmbedReport, Embedder};
pub use enrich::{CycleReport, EnrichmentPipeline};
pub use error::{PipelineError, Result};
pub use events::{Event, EventBus};
pub use lock::RepoLock;
pub use metrics::{MetricEvent, MetricsWriter};
