//! `llmc embed` - run one embedding cycle over pending pairs.

use anyhow::Result;
use clap::Args;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use llmc_pipeline::{Embedder, EventBus};

use super::RepoContext;
use crate::output::render;
use crate::GlobalOptions;

#[derive(Args, Debug)]
pub struct EmbedArgs {
    /// Cap the number of spans embedded per profile in this run
    #[arg(long)]
    pub limit: Option<usize>,
}

pub async fn execute(args: EmbedArgs, global: GlobalOptions) -> Result<()> {
    let context = RepoContext::open(&global)?;

    let mut embeddings_config = context.config.embeddings.clone();
    if let Some(limit) = args.limit {
        embeddings_config.max_spans_per_cycle = limit;
    }

    let embedder = Embedder::from_config(
        context.store.clone(),
        &embeddings_config,
        EventBus::new(),
        CancellationToken::new(),
    )?;
    let report = embedder.run_cycle().await?;

    render(
        global.json,
        &json!({
            "embedded": report.embedded,
            "invalidated": report.invalidated,
            "profiles_skipped": report.profiles_skipped,
        }),
        |_| {
            format!(
                "embedded {} spans ({} invalidated, {} profiles skipped)",
                report.embedded, report.invalidated, report.profiles_skipped
            )
        },
    )
}
