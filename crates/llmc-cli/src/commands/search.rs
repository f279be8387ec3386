//! `llmc search` - hybrid retrieval.

use anyhow::Result;
use clap::Args;

use super::RepoContext;
use crate::output::{fail, print_json};
use crate::GlobalOptions;

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// The query
    pub query: String,

    /// Maximum results
    #[arg(long, short = 'n', default_value_t = 10)]
    pub limit: usize,
}

pub async fn execute(args: SearchArgs, global: GlobalOptions) -> Result<()> {
    let context = RepoContext::open(&global)?;
    let engine = context.engine()?;

    match engine.search(&args.query, args.limit).await {
        Ok(response) => {
            if global.json {
                return print_json(&response);
            }
            if response.results.is_empty() {
                println!("no results ({})", response.freshness.as_str());
                return Ok(());
            }
            println!(
                "{} results via {} ({})",
                response.results.len(),
                response.source,
                response.freshness.as_str()
            );
            for hit in &response.results {
                println!(
                    "  {:.3}  {}:{}-{}  {}",
                    hit.score,
                    hit.file_path,
                    hit.start_line,
                    hit.end_line,
                    hit.symbol_name.as_deref().unwrap_or("-")
                );
                if let Some(summary) = &hit.summary {
                    println!("         {summary}");
                }
            }
            Ok(())
        }
        Err(e) => fail(global.json, e),
    }
}
