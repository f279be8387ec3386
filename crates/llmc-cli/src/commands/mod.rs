//! Command implementations.

pub mod daemon;
pub mod embed;
pub mod enrich;
pub mod explain;
pub mod health;
pub mod init;
pub mod lineage;
pub mod search;
pub mod status;
pub mod sync;
pub mod where_used;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use llmc_core::store::IndexStore;
use llmc_core::sync::SyncEngine;
use llmc_search::QueryEngine;

use crate::GlobalOptions;

/// Everything a command needs for one repository.
pub(crate) struct RepoContext {
    pub root: PathBuf,
    pub config: llmc_config::LlmcConfig,
    pub store: Arc<IndexStore>,
    pub sync: Arc<SyncEngine>,
}

impl RepoContext {
    /// Load config and open the store for the selected repo.
    pub fn open(global: &GlobalOptions) -> Result<Self> {
        let root = global.repo_root()?;
        let config = llmc_config::ConfigLoader::new()
            .load(&root, None)
            .context("loading configuration")?;
        let store = Arc::new(
            IndexStore::open(&root.join(&config.storage.index_path), &root.to_string_lossy())
                .context("opening index store")?,
        );
        let sync = Arc::new(SyncEngine::new(root.clone(), store.clone()));
        Ok(Self {
            root,
            config,
            store,
            sync,
        })
    }

    /// Build the query engine over this repo.
    pub fn engine(&self) -> Result<QueryEngine> {
        QueryEngine::from_config(&self.config, self.store.clone(), self.sync.clone())
            .context("building query engine")
    }
}
