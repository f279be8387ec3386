//! `llmc status` - index status and counts.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::RepoContext;
use crate::output::{fail, render};
use crate::GlobalOptions;

#[derive(Args, Debug)]
pub struct StatusArgs {}

pub async fn execute(_args: StatusArgs, global: GlobalOptions) -> Result<()> {
    let context = RepoContext::open(&global)?;
    let engine = context.engine()?;

    let status = match engine.index_status() {
        Ok(status) => status,
        Err(e) => return fail(global.json, e),
    };
    let stats = match engine.stats() {
        Ok(stats) => stats,
        Err(e) => return fail(global.json, e),
    };

    render(
        global.json,
        &json!({
            "status": &status,
            "stats": &stats,
        }),
        |_| {
            let embeddings: u64 = stats.embeddings.values().sum();
            format!(
                "state: {}\nlast indexed: {}\ncommit: {}\nfiles: {}  spans: {}  enrichments: {}  embeddings: {}\npending: {} enrichments, {} embeddings, {} orphans",
                status.state,
                status.last_indexed_at.as_deref().unwrap_or("never"),
                status.last_indexed_commit.as_deref().unwrap_or("-"),
                stats.files,
                stats.spans,
                stats.enrichments,
                embeddings,
                stats.pending_enrichments,
                stats.pending_embeddings,
                stats.orphan_enrichments,
            )
        },
    )
}
