//! Span extraction: AST-driven chunking of source files into stable,
//! hashable spans plus symbol observations for the graph builder.
//!
//! `extract` dispatches by file extension: supported code languages go
//! through the tree-sitter walker, Markdown through the heading
//! splitter, and everything else through the blank-line block chunker.
//! A file that fails to parse yields zero spans and a `ParseError`; the
//! caller records the warning and retries on the next sync.

pub mod canon;
mod code;
pub mod lang;
mod text;

pub use canon::{canonicalize, content_hash, span_hash};
pub use lang::SupportedLanguage;

use std::path::Path;

use crate::error::Result;
use crate::types::{EntityKind, Span};

/// Maximum lines per block chunk for non-declaration content.
pub const MAX_BLOCK_LINES: usize = 60;

/// A declared symbol observed during extraction.
#[derive(Debug, Clone)]
pub struct SymbolObs {
    pub name: String,
    pub kind: EntityKind,
    pub start_line: u32,
    pub end_line: u32,
    /// Enclosing class/type name for methods.
    pub parent: Option<String>,
}

/// Kinds of unresolved references observed during extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Calls,
    Extends,
    Imports,
    Returns,
    Reads,
    Writes,
}

/// An unresolved reference; the graph builder resolves it against the
/// repo-wide symbol table or drops it (counted).
#[derive(Debug, Clone)]
pub struct RefObs {
    /// Enclosing symbol name; `None` means the module itself.
    pub from: Option<String>,
    pub kind: RefKind,
    /// Raw reference text, e.g. `db.query`, `BaseHandler`, `./utils`.
    pub target: String,
    pub line: u32,
}

/// Everything extraction learned about one file.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Language name stored on the file record.
    pub language: String,
    /// Ordered spans with byte-disjoint line ranges.
    pub spans: Vec<Span>,
    pub symbols: Vec<SymbolObs>,
    pub refs: Vec<RefObs>,
    /// True when the parser recovered around syntax errors; spans are
    /// still usable but coverage may be incomplete.
    pub partial: bool,
}

/// Extract ordered spans (and symbol observations) from one file.
///
/// `path` is the repo-relative path, used for language dispatch only;
/// renaming a file never changes its span hashes.
pub fn extract(path: &Path, source: &str) -> Result<Extraction> {
    if let Some(language) = SupportedLanguage::from_path(path) {
        return code::extract_code(language, path, source);
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some("md") | Some("markdown") => Ok(text::extract_markdown(source)),
        _ => Ok(text::extract_blocks(source)),
    }
}

/// Reject binary payloads before extraction; the sync engine skips them.
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|&b| b == 0)
}

pub(crate) fn make_span(
    kind: crate::types::SpanKind,
    symbol_name: Option<String>,
    start_line: u32,
    end_line: u32,
    raw_text: &str,
    content_type: &str,
    content_language: &str,
) -> Span {
    let content = canonicalize(raw_text);
    let span_hash = span_hash(content_type, content_language, &content);
    Span {
        span_hash,
        kind,
        symbol_name,
        start_line,
        end_line,
        content,
        content_type: content_type.to_string(),
        content_language: content_language.to_string(),
    }
}

/// Slice `lines` (0-based, inclusive bounds) back into text.
pub(crate) fn join_lines(lines: &[&str], start: usize, end: usize) -> String {
    lines[start..=end].join("\n")
}
