//! `llmc lineage` - graph slice around a symbol.

use anyhow::Result;
use clap::Args;

use llmc_search::parse_direction;

use super::RepoContext;
use crate::output::{fail, print_json};
use crate::GlobalOptions;

#[derive(Args, Debug)]
pub struct LineageArgs {
    /// Symbol to start from
    pub symbol: String,

    /// Traversal direction: upstream (who depends on it) or downstream
    /// (what it depends on)
    #[arg(long, default_value = "downstream")]
    pub direction: String,

    /// Hop bound
    #[arg(long, default_value_t = 3)]
    pub depth: u32,
}

pub async fn execute(args: LineageArgs, global: GlobalOptions) -> Result<()> {
    let Some(direction) = parse_direction(&args.direction) else {
        anyhow::bail!("direction must be 'upstream' or 'downstream'");
    };

    let context = RepoContext::open(&global)?;
    let engine = context.engine()?;

    match engine.lineage(&args.symbol, direction, args.depth) {
        Ok(slice) => {
            if global.json {
                return print_json(&slice);
            }
            println!(
                "{} entities, {} relations from {:?}",
                slice.entities.len(),
                slice.relations.len(),
                slice.roots
            );
            for relation in &slice.relations {
                println!(
                    "  {} -{}-> {}",
                    relation.src_id, relation.edge_type, relation.dst_id
                );
            }
            Ok(())
        }
        Err(e) => fail(global.json, e),
    }
}
