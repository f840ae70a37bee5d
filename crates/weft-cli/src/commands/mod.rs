pub mod checkpoints;
pub mod merge;
pub mod prune;
pub mod status;

use anyhow::{Context, Result};
use std::path::PathBuf;
use weft::prelude::*;

/// Store, configuration and checkpoint location a command works against
pub struct Target {
    pub store: StoreId,
    pub config: WeftConfig,
    pub checkpoint_dir: PathBuf,
}

impl Target {
    pub fn resolve(
        dir: PathBuf,
        checkpoints: Option<PathBuf>,
        store: StoreId,
        config: Option<PathBuf>,
    ) -> Result<Self> {
        let config = match config {
            Some(path) => WeftConfig::from_json_file(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => WeftConfig::new(dir.join(store.file_name())),
        };
        let checkpoint_dir = checkpoints.unwrap_or_else(|| dir.join("checkpoints"));

        Ok(Self {
            store,
            config,
            checkpoint_dir,
        })
    }

    pub fn registry(&self) -> Result<Arc<FileCheckpointRegistry>> {
        let registry = FileCheckpointRegistry::open(self.checkpoint_dir.clone()).with_context(|| {
            format!(
                "Failed to open checkpoint directory {}",
                self.checkpoint_dir.display()
            )
        })?;
        Ok(Arc::new(registry))
    }

    /// Direct connection, without a cache or a checkpoint side effect
    pub fn connect(&self) -> Result<weft::StoreConnection> {
        weft::StoreConnection::open(
            self.store,
            ConsumerIdentity::Primary,
            &self.config.store,
            Arc::new(SystemClock),
        )
        .with_context(|| format!("Failed to open store {}", self.config.store.path.display()))
    }
}
