use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use weft_core::error::{MergeError, Result};
use weft_core::traits::CheckpointRegistry;
use weft_core::types::{Checkpoint, ConsumerIdentity, StoreId};

pub struct FileCheckpointRegistry {
    base_dir: PathBuf,
    /// Serializes read-modify-write of this process's own documents
    write_lock: Mutex<()>,
}

impl FileCheckpointRegistry {
    /// Open or create a registry rooted at `base_dir`
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;

        Ok(Self {
            base_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Location of the document for `(store, consumer)`
    pub fn checkpoint_path(&self, store: StoreId, consumer: ConsumerIdentity) -> PathBuf {
        self.base_dir
            .join(store.as_str())
            .join(format!("{}.json", consumer.as_str()))
    }

    /// Every consumer's checkpoint for `store`, `None` for consumers that
    /// never ran
    pub fn list(&self, store: StoreId) -> Result<Vec<(ConsumerIdentity, Option<Checkpoint>)>> {
        self.all_consumers(store)
            .iter()
            .map(|&consumer| Ok((consumer, self.get(store, consumer)?)))
            .collect()
    }

    fn read(&self, store: StoreId, consumer: ConsumerIdentity) -> Result<Option<Checkpoint>> {
        let path = self.checkpoint_path(store, consumer);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MergeError::CheckpointUnavailable {
                    store,
                    consumer,
                    reason: format!("{}: {}", path.display(), e),
                }
                .into())
            }
        };

        serde_json::from_str(&data).map(Some).map_err(|e| {
            MergeError::CheckpointUnavailable {
                store,
                consumer,
                reason: format!("Failed to parse {}: {}", path.display(), e),
            }
            .into()
        })
    }

    fn write(&self, store: StoreId, consumer: ConsumerIdentity, value: &Checkpoint) -> Result<()> {
        let path = self.checkpoint_path(store, consumer);
        let dir = path.parent().unwrap_or(&self.base_dir);
        std::fs::create_dir_all(dir)?;

        let data = serde_json::to_vec(value)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;

        Ok(())
    }
}

impl CheckpointRegistry for FileCheckpointRegistry {
    fn get(&self, store: StoreId, consumer: ConsumerIdentity) -> Result<Option<Checkpoint>> {
        self.read(store, consumer)
    }

    fn set(&self, store: StoreId, consumer: ConsumerIdentity, value: Checkpoint) -> Result<bool> {
        let _guard = self.write_lock.lock();

        if let Some(current) = self.read(store, consumer)? {
            if value.seq < current.seq && value.same_generation(&current) {
                tracing::debug!(
                    store = %store,
                    consumer = %consumer,
                    current = current.seq,
                    rejected = value.seq,
                    "Ignoring backward checkpoint"
                );
                return Ok(false);
            }
            if current == value {
                return Ok(false);
            }
        }

        self.write(store, consumer, &value)?;
        tracing::trace!(store = %store, consumer = %consumer, seq = value.seq, "Checkpoint saved");
        Ok(true)
    }
}
