//! Text canonicalization and span fingerprinting.
//!
//! Canonicalization normalizes line endings to LF and strips trailing
//! whitespace from every line, nothing else. Indentation and interior
//! blank lines stay significant. The fingerprint is
//! `blake2b-128(content_type ‖ 0x00 ‖ content_language ‖ 0x00 ‖ text)`,
//! so identical spans hash identically across files and cosmetic edits
//! outside the span never touch its hash.

use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};

type Blake2b128 = Blake2b<U16>;

/// Normalize line endings to LF and strip trailing whitespace per line.
///
/// The output never ends with a newline; span boundaries carry the line
/// range, the text carries only content.
pub fn canonicalize(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(normalized.len());
    let mut first = true;
    for line in normalized.split('\n') {
        if !first {
            out.push('\n');
        }
        out.push_str(line.trim_end());
        first = false;
    }
    // Trailing newline in the source produces one empty trailing line;
    // drop it so `"a\n"` and `"a"` canonicalize identically.
    while out.ends_with('\n') {
        out.pop();
    }
    out
}

/// Fingerprint a canonicalized span as 32 hex chars.
pub fn span_hash(content_type: &str, content_language: &str, canonical_text: &str) -> String {
    let mut hasher = Blake2b128::new();
    hasher.update(content_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(content_language.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_text.as_bytes());
    hex(&hasher.finalize())
}

/// SHA-256 of raw file bytes, hex-encoded. Used for file identity and
/// rename detection, not for span fingerprints.
pub fn content_hash(bytes: &[u8]) -> String {
    use sha2::{Digest as _, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
