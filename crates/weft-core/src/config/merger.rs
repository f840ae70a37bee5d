use serde::{Deserialize, Serialize};

/// Configuration for the history merger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergerConfig {
    /// Maximum number of log entries processed per merge pass.
    /// Remaining entries are picked up by the next pass.
    /// Default: 1000
    #[serde(default = "default_batch_entries_max")]
    pub batch_entries_max: usize,
}

fn default_batch_entries_max() -> usize {
    1000
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            batch_entries_max: default_batch_entries_max(),
        }
    }
}

impl MergerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_entries_max(mut self, max: usize) -> Self {
        self.batch_entries_max = max.max(1);
        self
    }
}
