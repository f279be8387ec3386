//! `llmc health` - health snapshot.

use anyhow::Result;
use clap::Args;

use super::RepoContext;
use crate::output::{fail, print_json};
use crate::GlobalOptions;

#[derive(Args, Debug)]
pub struct HealthArgs {}

pub async fn execute(_args: HealthArgs, global: GlobalOptions) -> Result<()> {
    let context = RepoContext::open(&global)?;
    let engine = context.engine()?;

    match engine.health() {
        Ok(health) => {
            if global.json {
                return print_json(&health);
            }
            println!("status: {}", health.status);
            if health.issues.is_empty() {
                println!("no issues");
            } else {
                for issue in &health.issues {
                    println!("issue: {issue}");
                }
            }
            if !health.top_pending_files.is_empty() {
                println!("most pending:");
                for path in &health.top_pending_files {
                    println!("  {path}");
                }
            }
            Ok(())
        }
        Err(e) => fail(global.json, e),
    }
}
