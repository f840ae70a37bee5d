pub mod merger;
pub mod store;
pub mod sync;

pub use merger::MergerConfig;
pub use store::{StoreConfig, SynchronousMode};
pub use sync::{PruneSchedule, SyncConfig};

use crate::error::{Result, WeftError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete configuration for one store handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeftConfig {
    pub store: StoreConfig,

    #[serde(default)]
    pub merger: MergerConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

impl WeftConfig {
    pub fn new(store_path: PathBuf) -> Self {
        Self {
            store: StoreConfig::new(store_path),
            merger: MergerConfig::default(),
            sync: SyncConfig::default(),
        }
    }

    pub fn with_merger(mut self, merger: MergerConfig) -> Self {
        self.merger = merger;
        self
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| {
            WeftError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}
