//! Output helpers: every command can print human-readable text or a
//! JSON document, and errors become structured payloads in JSON mode.

use anyhow::Result;
use serde::Serialize;

use llmc_search::{ApiError, SearchError};

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Surface a search-layer error: structured in JSON mode, friendly
/// otherwise. Always returns an `Err` for the process exit code.
pub fn fail(json: bool, err: SearchError) -> Result<()> {
    if json {
        let payload = ApiError::from(&err);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        anyhow::bail!("{}", payload.code);
    }
    match err.remediation() {
        Some(hint) => anyhow::bail!("{err}\n  hint: {hint}"),
        None => anyhow::bail!("{err}"),
    }
}

/// Shorthand for "value in JSON mode, closure for text mode".
pub fn render<T: Serialize>(
    json: bool,
    value: &T,
    text: impl FnOnce(&T) -> String,
) -> Result<()> {
    if json {
        print_json(value)
    } else {
        println!("{}", text(value));
        Ok(())
    }
}
