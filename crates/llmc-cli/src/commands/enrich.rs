//! `llmc enrich` - run one enrichment cycle over pending spans.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use llmc_pipeline::{EnrichmentPipeline, EventBus, MetricsWriter};
use llmc_search::QueryRouter;

use super::RepoContext;
use crate::output::render;
use crate::GlobalOptions;

#[derive(Args, Debug)]
pub struct EnrichArgs {
    /// Cap the number of spans processed in this run
    #[arg(long)]
    pub limit: Option<usize>,
}

pub async fn execute(args: EnrichArgs, global: GlobalOptions) -> Result<()> {
    let context = RepoContext::open(&global)?;
    let cancel = CancellationToken::new();

    let mut enrichment_config = context.config.enrichment.clone();
    if let Some(limit) = args.limit {
        enrichment_config.max_spans_per_cycle = limit;
    }

    let cascade = EnrichmentPipeline::cascade_from_config(&enrichment_config, cancel.clone())?;
    let pipeline = EnrichmentPipeline::new(
        context.store.clone(),
        cascade,
        QueryRouter::new(&context.config)?,
        enrichment_config,
        Arc::new(MetricsWriter::new(
            context.root.join(&context.config.storage.metrics_path),
        )),
        EventBus::new(),
        cancel,
    );

    let report = pipeline.run_cycle().await?;
    render(
        global.json,
        &json!({
            "selected": report.selected,
            "enriched": report.enriched,
            "failed": report.failed,
            "batches_attempted": report.batches_attempted,
            "batch_fallbacks": report.batch_fallbacks,
        }),
        |_| {
            format!(
                "enriched {}/{} spans ({} failed, {} batch fallbacks)",
                report.enriched, report.selected, report.failed, report.batch_fallbacks
            )
        },
    )
}
