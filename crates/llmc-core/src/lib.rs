//! llmc-core: span extraction, persistent index store, code graph, and
//! sync engine.
//!
//! This crate is the storage and analysis heart of LLMC. It knows
//! nothing about LLM backends or query routing; those live in
//! `llmc-backend`, `llmc-pipeline`, and `llmc-search` and talk to this
//! crate through [`store::IndexStore`] and [`sync::SyncEngine`].
//!
//! Data flow: files → [`extract`] → ([`graph`], [`sync`]) → [`store`].

pub mod error;
pub mod extract;
pub mod graph;
pub mod store;
pub mod sync;
pub mod types;

pub use error::{CoreError, Result};
pub use extract::{canonicalize, content_hash, extract as extract_spans, span_hash, Extraction};
pub use graph::{build as build_graph, EntityGraph, FileExtraction, TraversalDirection};
pub use store::{
    BatchWriter, IndexStore, LexicalHit, PendingEmbedding, PendingSpan, SpanRow, VectorHit,
    WriteOp, CURRENT_SCHEMA_VERSION,
};
pub use sync::{ApplyReport, ChangeSet, SyncEngine};
pub use types::{
    EdgeType, EmbeddingRecord, Enrichment, Entity, EntityKind, EvidenceRange, FailureRecord,
    FileRecord, Freshness, HealthReport, IndexState, IndexStats, IndexStatus, Span, SpanKind,
};
