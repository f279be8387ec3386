//! Markdown and plain-text chunking.
//!
//! Markdown splits on heading lines into `markdown_section` spans
//! (headings inside fenced code blocks are ignored). Plain text is cut
//! into `block` spans of at most [`MAX_BLOCK_LINES`] lines, preferring
//! blank-line boundaries.

use super::{join_lines, make_span, Extraction, MAX_BLOCK_LINES};
use crate::types::SpanKind;

/// Split a Markdown document into heading-delimited sections.
pub(super) fn extract_markdown(source: &str) -> Extraction {
    let lines: Vec<&str> = source.lines().collect();
    let mut spans = Vec::new();

    // Heading line indices, skipping headings inside code fences.
    let mut headings: Vec<usize> = Vec::new();
    let mut in_fence = false;
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence && trimmed.starts_with('#') {
            headings.push(i);
        }
    }

    // Preamble before the first heading becomes block chunks.
    let preamble_end = headings.first().copied().unwrap_or(lines.len());
    chunk_range(&lines, 0, preamble_end, "markdown", "markdown", &mut spans);

    for (n, &start) in headings.iter().enumerate() {
        let end = headings
            .get(n + 1)
            .map(|&next| next - 1)
            .unwrap_or(lines.len().saturating_sub(1));
        if end < start {
            continue;
        }
        let title = lines[start].trim_start().trim_start_matches('#').trim().to_string();
        let symbol = if title.is_empty() { None } else { Some(title) };
        spans.push(make_span(
            SpanKind::MarkdownSection,
            symbol,
            start as u32 + 1,
            end as u32 + 1,
            &join_lines(&lines, start, end),
            "markdown",
            "markdown",
        ));
    }

    Extraction {
        language: "markdown".to_string(),
        spans,
        ..Default::default()
    }
}

/// Chunk an unknown-format file into blocks.
pub(super) fn extract_blocks(source: &str) -> Extraction {
    let lines: Vec<&str> = source.lines().collect();
    let mut spans = Vec::new();
    chunk_range(&lines, 0, lines.len(), "text", "text", &mut spans);
    Extraction {
        language: "text".to_string(),
        spans,
        ..Default::default()
    }
}

/// Chunk `lines[start..end)` (0-based, exclusive end) into block spans of
/// at most [`MAX_BLOCK_LINES`] lines, cutting at the last blank line
/// inside the window when one exists. Blank-only chunks are dropped.
pub(super) fn chunk_range(
    lines: &[&str],
    start: usize,
    end: usize,
    content_type: &str,
    content_language: &str,
    out: &mut Vec<crate::types::Span>,
) {
    let mut cursor = start;
    while cursor < end {
        let window_end = (cursor + MAX_BLOCK_LINES).min(end);
        let mut cut = window_end;
        if window_end < end {
            // Slide back to the last blank-line boundary inside the window.
            if let Some(blank) = (cursor..window_end).rev().find(|&i| lines[i].trim().is_empty())
            {
                if blank > cursor {
                    cut = blank;
                }
            }
        }
        let chunk_end = cut.max(cursor + 1);
        if lines[cursor..chunk_end].iter().any(|l| !l.trim().is_empty()) {
            out.push(make_span(
                SpanKind::Block,
                None,
                cursor as u32 + 1,
                chunk_end as u32, // inclusive end = chunk_end - 1, 1-based
                &join_lines(lines, cursor, chunk_end - 1),
                content_type,
                content_language,
            ));
        }
        cursor = chunk_end;
    }
}
