//! `llmc init` - create the store and run the first full sync.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::RepoContext;
use crate::output::render;
use crate::GlobalOptions;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Write a starter local config file if none exists
    #[arg(long)]
    pub with_config: bool,
}

pub async fn execute(args: InitArgs, global: GlobalOptions) -> Result<()> {
    let context = RepoContext::open(&global)?;

    if args.with_config {
        let config_path = context.root.join(".llmc/config.toml");
        if !config_path.exists() {
            std::fs::create_dir_all(config_path.parent().expect("has parent"))?;
            std::fs::write(&config_path, STARTER_CONFIG)?;
            tracing::info!("wrote starter config to {:?}", config_path);
        }
    }

    let sync = context.sync.clone();
    let report = tokio::task::spawn_blocking(move || sync.sync()).await??;

    render(
        global.json,
        &json!({
            "files_added": report.files_added,
            "spans_inserted": report.spans_inserted,
            "entities": report.entities,
            "relations": report.relations,
            "warnings": &report.warnings,
        }),
        |_| {
            format!(
                "indexed {} files, {} spans, {} entities, {} relations{}",
                report.files_added,
                report.spans_inserted,
                report.entities,
                report.relations,
                if report.warnings.is_empty() {
                    String::new()
                } else {
                    format!(" ({} warnings)", report.warnings.len())
                }
            )
        },
    )
}

const STARTER_CONFIG: &str = r#"# LLMC local configuration. Every key is optional; these are the defaults
# most worth changing.

[enrichment]
enabled = true
cooldown_seconds = 600
cascade = ["local_small"]

[enrichment.backends.local_small]
kind = "local"
endpoint = "http://localhost:11434"
model = "qwen2.5-coder:7b"
rpm = 120
tpm = 200000

[embeddings.profiles.code]
provider = "openai"
endpoint = "http://localhost:11434/v1"
model = "text-embedding-3-small"
dim = 768
"#;
