//! Shared data model: files, spans, enrichments, embeddings, graph
//! entities and relations, index status, failure records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Files and spans
// ============================================================================

/// A tracked repository file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Store-assigned id; tombstoned on deletion or rename.
    pub id: i64,
    /// Repo-relative path.
    pub path: String,
    /// SHA-256 of the raw file bytes, hex-encoded.
    pub content_hash: String,
    /// Last modification time, seconds since the epoch.
    pub mtime: i64,
    /// Detected language name ("python", "markdown", "text", ...).
    pub language: String,
    /// File size in bytes.
    pub size: i64,
}

/// Kinds of spans the extractor emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Function,
    Class,
    Method,
    MarkdownSection,
    Block,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Function => "function",
            SpanKind::Class => "class",
            SpanKind::Method => "method",
            SpanKind::MarkdownSection => "markdown_section",
            SpanKind::Block => "block",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(SpanKind::Function),
            "class" => Some(SpanKind::Class),
            "method" => Some(SpanKind::Method),
            "markdown_section" => Some(SpanKind::MarkdownSection),
            "block" => Some(SpanKind::Block),
            _ => None,
        }
    }
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A contiguous, semantically meaningful slice of a source file.
///
/// The hash is deterministic in `(content_type, content_language,
/// canonicalized text)`; line numbers are metadata and do not participate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// blake2b-128 fingerprint, 32 hex chars.
    pub span_hash: String,
    pub kind: SpanKind,
    /// Declared symbol name, when the span is a declaration.
    pub symbol_name: Option<String>,
    /// 1-based inclusive line range within the file.
    pub start_line: u32,
    pub end_line: u32,
    /// Canonicalized span text (LF line endings, trailing whitespace
    /// stripped per line).
    pub content: String,
    /// "code", "markdown", or "text".
    pub content_type: String,
    /// Language name matching `FileRecord::language`.
    pub content_language: String,
}

// ============================================================================
// Enrichment
// ============================================================================

/// A line range inside a span, cited as evidence for an enrichment claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRange {
    /// 1-based line offset from the span start, inclusive.
    pub start_line: u32,
    pub end_line: u32,
}

/// LLM-produced structured metadata about one span.
///
/// One-to-one with a span by hash. Never mutated once written; a changed
/// span gets a new hash and a fresh enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrichment {
    pub span_hash: String,
    /// At most 120 words.
    pub summary: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub side_effects: Vec<String>,
    pub pitfalls: Vec<String>,
    pub usage_snippet: Option<String>,
    pub evidence: Vec<EvidenceRange>,
    /// Model that produced this enrichment.
    pub model_id: String,
    /// RFC3339 creation timestamp.
    pub created_at: String,
}

// ============================================================================
// Embeddings
// ============================================================================

/// A stored vector for one `(span, profile)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub span_hash: String,
    /// Profile name from configuration.
    pub profile: String,
    pub vector: Vec<f32>,
    pub dim: usize,
    /// Provider identity; a profile's rows are invalidated when this or
    /// the dim changes.
    pub provider_id: String,
    /// RFC3339 creation timestamp.
    pub created_at: String,
}

// ============================================================================
// Graph
// ============================================================================

/// Kinds of graph entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Module,
    Function,
    Class,
    Method,
    Type,
    Variable,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Module => "module",
            EntityKind::Function => "function",
            EntityKind::Class => "class",
            EntityKind::Method => "method",
            EntityKind::Type => "type",
            EntityKind::Variable => "variable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "module" => Some(EntityKind::Module),
            "function" => Some(EntityKind::Function),
            "class" => Some(EntityKind::Class),
            "method" => Some(EntityKind::Method),
            "type" => Some(EntityKind::Type),
            "variable" => Some(EntityKind::Variable),
            _ => None,
        }
    }
}

/// A graph node, unique by id within a repo.
///
/// Ids are structured: `mod:src.auth`, `sym:src.auth.login`,
/// `type:Result`, `var:src.auth.SESSION`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub kind: EntityKind,
    /// Repo-relative path of the defining file, when known.
    pub path_ref: Option<String>,
    pub metadata: EntityMetadata,
}

/// Structured entity metadata persisted as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityMetadata {
    pub symbol_name: Option<String>,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
}

/// Types of relationships between entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Calls,
    Extends,
    Imports,
    Reads,
    Writes,
    Defines,
    Returns,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Calls => "calls",
            EdgeType::Extends => "extends",
            EdgeType::Imports => "imports",
            EdgeType::Reads => "reads",
            EdgeType::Writes => "writes",
            EdgeType::Defines => "defines",
            EdgeType::Returns => "returns",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "calls" => Some(EdgeType::Calls),
            "extends" => Some(EdgeType::Extends),
            "imports" => Some(EdgeType::Imports),
            "reads" => Some(EdgeType::Reads),
            "writes" => Some(EdgeType::Writes),
            "defines" => Some(EdgeType::Defines),
            "returns" => Some(EdgeType::Returns),
            _ => None,
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A graph edge. Multi-edges collapse on `(src, edge_type, dst)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Relation {
    pub src_id: String,
    pub edge_type: EdgeType,
    pub dst_id: String,
}

// ============================================================================
// Index status
// ============================================================================

/// Indexing state machine:
/// `empty → indexing → ready → {warn ↔ ready, error → empty on recovery}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Empty,
    Indexing,
    Ready,
    Warn,
    Error,
}

impl IndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Empty => "empty",
            IndexState::Indexing => "indexing",
            IndexState::Ready => "ready",
            IndexState::Warn => "warn",
            IndexState::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "empty" => Some(IndexState::Empty),
            "indexing" => Some(IndexState::Indexing),
            "ready" => Some(IndexState::Ready),
            "warn" => Some(IndexState::Warn),
            "error" => Some(IndexState::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Exactly one record per repo; mutated only at phase boundaries so that
/// readers observe fully written values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatus {
    pub repo_path: String,
    pub state: IndexState,
    /// RFC3339 timestamp of the last completed sync.
    pub last_indexed_at: Option<String>,
    /// Commit id of HEAD at the last completed sync, when the repo is
    /// under version control.
    pub last_indexed_commit: Option<String>,
    pub schema_version: i64,
    pub last_error: Option<String>,
}

/// Relationship between the on-disk files and the persisted index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Ready,
    Stale,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Ready => "ready",
            Freshness::Stale => "stale",
        }
    }
}

// ============================================================================
// Failures
// ============================================================================

/// Per-(span, tier) failure bookkeeping; drives escalation and cooldowns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub span_hash: String,
    pub tier: String,
    pub reason: String,
    pub attempts: u32,
    /// RFC3339; the span is skipped for this tier until then.
    pub cooldown_until: Option<String>,
    /// RFC3339 timestamp of the latest failure.
    pub last_seen_at: String,
}

// ============================================================================
// Stats and health
// ============================================================================

/// Aggregate counts over the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub files: u64,
    pub spans: u64,
    pub enrichments: u64,
    /// Per-profile embedding counts.
    pub embeddings: BTreeMap<String, u64>,
    pub entities: u64,
    pub relations: u64,
    pub pending_enrichments: u64,
    pub pending_embeddings: u64,
    pub orphan_enrichments: u64,
}

/// Health snapshot surfaced to operators and collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: IndexState,
    pub issues: Vec<String>,
    /// At most five file paths with the most pending work.
    pub top_pending_files: Vec<String>,
    pub orphan_enrichments: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_kind_round_trip() {
        for kind in [
            SpanKind::Function,
            SpanKind::Class,
            SpanKind::Method,
            SpanKind::MarkdownSection,
            SpanKind::Block,
        ] {
            assert_eq!(SpanKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SpanKind::parse("widget"), None);
    }

    #[test]
    fn test_edge_type_round_trip() {
        for edge in [
            EdgeType::Calls,
            EdgeType::Extends,
            EdgeType::Imports,
            EdgeType::Reads,
            EdgeType::Writes,
            EdgeType::Defines,
            EdgeType::Returns,
        ] {
            assert_eq!(EdgeType::parse(edge.as_str()), Some(edge));
        }
    }

    #[test]
    fn test_index_state_serde_lowercase() {
        let json = serde_json::to_string(&IndexState::Ready).unwrap();
        assert_eq!(json, "\"ready\"");
        let state: IndexState = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(state, IndexState::Warn);
    }
}
