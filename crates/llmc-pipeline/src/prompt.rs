//! Enrichment prompts and response validation.
//!
//! Single-span prompts ask for one JSON object; batch prompts ask for a
//! JSON array with one element per span in the same order. Responses
//! are funneled through the shared fence-stripping JSON extractor and
//! validated before anything is written: summary at most 120 words,
//! evidence line ranges inside the span.

use serde::Deserialize;
use serde_json::Value;

use llmc_core::store::PendingSpan;
use llmc_core::types::{Enrichment, EvidenceRange};

use crate::error::{PipelineError, Result};

/// Summary word ceiling.
pub const MAX_SUMMARY_WORDS: usize = 120;

const SYSTEM_PROMPT: &str = "You are a precise code documentation assistant. \
Respond with JSON only, no prose around it.";

pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

/// Prompt for one span.
pub fn span_prompt(span: &PendingSpan) -> String {
    format!(
        "Analyze this {kind} from `{path}` and answer as one JSON object with keys: \
summary (<= {words} words), inputs (string array), outputs (string array), \
side_effects (string array), pitfalls (string array), usage_snippet (string or null), \
evidence (array of {{\"start_line\": n, \"end_line\": n}} relative to the shown text, 1-based).\n\
\n\
```{lang}\n{content}\n```",
        kind = span.span.kind,
        path = span.file_path,
        words = MAX_SUMMARY_WORDS,
        lang = span.span.content_language,
        content = span.span.content,
    )
}

/// Prompt for a batch of adjacent spans from one file; the response
/// must be a JSON array with per-span objects in identical order.
pub fn batch_prompt(spans: &[PendingSpan]) -> String {
    let mut sections = String::new();
    for (n, pending) in spans.iter().enumerate() {
        sections.push_str(&format!(
            "--- span {n} ({kind} {symbol}) ---\n```{lang}\n{content}\n```\n",
            kind = pending.span.kind,
            symbol = pending.span.symbol_name.as_deref().unwrap_or("anonymous"),
            lang = pending.span.content_language,
            content = pending.span.content,
        ));
    }
    format!(
        "Analyze these {count} spans from `{path}`. Respond with a JSON array of exactly \
{count} objects, one per span, in the same order. Each object has keys: summary \
(<= {words} words), inputs, outputs, side_effects, pitfalls (string arrays), \
usage_snippet (string or null), evidence (array of {{\"start_line\": n, \"end_line\": n}}).\n\
\n{sections}",
        count = spans.len(),
        path = spans[0].file_path,
        words = MAX_SUMMARY_WORDS,
    )
}

#[derive(Debug, Deserialize)]
struct EnrichmentPayload {
    summary: String,
    #[serde(default)]
    inputs: Vec<String>,
    #[serde(default)]
    outputs: Vec<String>,
    #[serde(default)]
    side_effects: Vec<String>,
    #[serde(default)]
    pitfalls: Vec<String>,
    #[serde(default)]
    usage_snippet: Option<String>,
    #[serde(default)]
    evidence: Vec<EvidencePayload>,
}

#[derive(Debug, Deserialize)]
struct EvidencePayload {
    start_line: u32,
    end_line: u32,
}

/// Validate one parsed object into an enrichment row for `span`.
pub fn validate_enrichment(
    value: &Value,
    span: &PendingSpan,
    model_id: &str,
) -> Result<Enrichment> {
    let payload: EnrichmentPayload = serde_json::from_value(value.clone())
        .map_err(|e| PipelineError::Validation(format!("payload shape: {e}")))?;

    let summary = payload.summary.trim().to_string();
    if summary.is_empty() {
        return Err(PipelineError::Validation("summary is empty".to_string()));
    }
    let words = summary.split_whitespace().count();
    if words > MAX_SUMMARY_WORDS {
        return Err(PipelineError::Validation(format!(
            "summary has {words} words (max {MAX_SUMMARY_WORDS})"
        )));
    }

    let span_lines = span.span.content.lines().count() as u32;
    let mut evidence = Vec::with_capacity(payload.evidence.len());
    for range in payload.evidence {
        if range.start_line == 0 || range.end_line < range.start_line || range.end_line > span_lines
        {
            return Err(PipelineError::Validation(format!(
                "evidence range {}..{} outside span of {span_lines} lines",
                range.start_line, range.end_line
            )));
        }
        evidence.push(EvidenceRange {
            start_line: range.start_line,
            end_line: range.end_line,
        });
    }

    Ok(Enrichment {
        span_hash: span.span.span_hash.clone(),
        summary,
        inputs: payload.inputs,
        outputs: payload.outputs,
        side_effects: payload.side_effects,
        pitfalls: payload.pitfalls,
        usage_snippet: payload.usage_snippet.filter(|s| !s.trim().is_empty()),
        evidence,
        model_id: model_id.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
    })
}

/// Validate a batch response: a JSON array with exactly one object per
/// span, in order.
pub fn validate_batch(
    value: &Value,
    spans: &[PendingSpan],
    model_id: &str,
) -> Result<Vec<Enrichment>> {
    let items = value
        .as_array()
        .ok_or_else(|| PipelineError::Validation("batch response is not an array".to_string()))?;
    if items.len() != spans.len() {
        return Err(PipelineError::Validation(format!(
            "batch returned {} items for {} spans",
            items.len(),
            spans.len()
        )));
    }
    items
        .iter()
        .zip(spans)
        .map(|(item, span)| validate_enrichment(item, span, model_id))
        .collect()
}
