//! Merge command implementation

use super::Target;
use anyhow::{Context, Result};
use weft::prelude::*;

pub fn execute(target: &Target, consumer: ConsumerIdentity) -> Result<()> {
    let store = WeftStore::open(WeftOptions::new(
        target.store,
        consumer,
        target.config.clone(),
        target.registry()?,
    ))
    .context("Failed to open store")?;

    println!("Merging {} as {}...", target.store, consumer);
    let stats = store.merge_now().wait().context("Merge failed")?;
    store.shutdown();

    if stats.checkpoint_initialized {
        println!("Initialized checkpoint for first run");
    }
    if stats.store_rebuilt {
        println!("Store file was replaced; checkpoint reset to the new log tail");
    }
    println!(
        "✓ Applied {} entries, skipped {} own, {} corrupt in {:?}",
        stats.entries_applied, stats.entries_skipped_own, stats.entries_corrupt, stats.duration
    );
    println!("  Checkpoint: {}", stats.new_checkpoint);

    if stats.entries_corrupt > 0 {
        tracing::warn!(
            corrupt = stats.entries_corrupt,
            "Corrupt log entries were skipped"
        );
    }

    Ok(())
}
