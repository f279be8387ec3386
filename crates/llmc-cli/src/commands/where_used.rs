//! `llmc where-used` - callers of a symbol, materialized as spans.

use anyhow::Result;
use clap::Args;

use super::RepoContext;
use crate::output::{fail, print_json};
use crate::GlobalOptions;

#[derive(Args, Debug)]
pub struct WhereUsedArgs {
    /// Symbol to look up (e.g. `db.query` or `query`)
    pub symbol: String,

    /// Maximum results
    #[arg(long, short = 'n', default_value_t = 20)]
    pub limit: usize,
}

pub async fn execute(args: WhereUsedArgs, global: GlobalOptions) -> Result<()> {
    let context = RepoContext::open(&global)?;
    let engine = context.engine()?;

    match engine.where_used(&args.symbol, args.limit) {
        Ok(response) => {
            if global.json {
                return print_json(&response);
            }
            if response.results.is_empty() {
                println!("no callers found for '{}'", args.symbol);
                return Ok(());
            }
            println!("callers of '{}' ({})", args.symbol, response.freshness.as_str());
            for hit in &response.results {
                println!(
                    "  {}:{}  {}",
                    hit.file_path,
                    hit.start_line,
                    hit.symbol_name.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Err(e) => fail(global.json, e),
    }
}
