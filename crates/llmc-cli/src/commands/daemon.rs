//! `llmc daemon` - background loop for this repository.

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use llmc_pipeline::Daemon;

use crate::GlobalOptions;

#[derive(Args, Debug)]
pub struct DaemonArgs {
    /// Run exactly one tick and exit (for cron-style hosts)
    #[arg(long)]
    pub once: bool,
}

pub async fn execute(args: DaemonArgs, global: GlobalOptions) -> Result<()> {
    let root = global.repo_root()?;
    let config = llmc_config::ConfigLoader::new().load(&root, None)?;
    let cancel = CancellationToken::new();

    let daemon = Daemon::from_config(&root, &config, cancel.clone())?;

    if args.once {
        let did_work = daemon.tick().await?;
        info!(did_work, "single tick complete");
        return Ok(());
    }

    // Ctrl-C cancels cooperatively; in-flight batches finish validation
    // or are discarded, sleeps abort within seconds.
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal_token.cancel();
        }
    });

    daemon.run().await?;
    Ok(())
}
