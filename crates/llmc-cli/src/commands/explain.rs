//! `llmc explain` - routing observability.

use anyhow::Result;
use clap::Args;

use super::RepoContext;
use crate::output::print_json;
use crate::GlobalOptions;

#[derive(Args, Debug)]
pub struct ExplainArgs {
    /// Query to classify
    pub query: String,
}

pub async fn execute(args: ExplainArgs, global: GlobalOptions) -> Result<()> {
    let context = RepoContext::open(&global)?;
    let engine = context.engine()?;
    let explanation = engine.explain(&args.query);

    if global.json {
        return print_json(&explanation);
    }
    println!(
        "route: profile={} start_tier={} (score {:.1})",
        explanation.decision.target_index_profile,
        explanation.decision.start_tier,
        explanation.score
    );
    println!("reason: {}", explanation.reason);
    println!("alternatives:");
    for (class, score) in &explanation.alternatives {
        println!("  {class}: {score:.1}");
    }
    Ok(())
}
