//! `llmc sync` - detect changes and update the index.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::RepoContext;
use crate::output::render;
use crate::GlobalOptions;

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Only report what would change, without applying
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn execute(args: SyncArgs, global: GlobalOptions) -> Result<()> {
    let context = RepoContext::open(&global)?;
    let sync = context.sync.clone();

    if args.dry_run {
        let changes = tokio::task::spawn_blocking(move || sync.detect_changes()).await??;
        return render(
            global.json,
            &json!({
                "added": &changes.added,
                "modified": &changes.modified,
                "deleted": &changes.deleted,
                "renamed": &changes.renamed,
            }),
            |_| {
                format!(
                    "would apply: {} added, {} modified, {} deleted, {} renamed",
                    changes.added.len(),
                    changes.modified.len(),
                    changes.deleted.len(),
                    changes.renamed.len()
                )
            },
        );
    }

    let report = tokio::task::spawn_blocking(move || sync.sync()).await??;
    render(
        global.json,
        &json!({
            "files_added": report.files_added,
            "files_modified": report.files_modified,
            "files_deleted": report.files_deleted,
            "files_renamed": report.files_renamed,
            "spans_inserted": report.spans_inserted,
            "spans_removed": report.spans_removed,
            "warnings": &report.warnings,
        }),
        |_| {
            if report.did_work() {
                format!(
                    "synced: +{} ~{} -{} files, +{}/-{} spans",
                    report.files_added,
                    report.files_modified,
                    report.files_deleted,
                    report.spans_inserted,
                    report.spans_removed
                )
            } else {
                "index is up to date".to_string()
            }
        },
    )
}
