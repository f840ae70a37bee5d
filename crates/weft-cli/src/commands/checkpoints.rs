//! Checkpoints command implementation

use super::Target;
use anyhow::{Context, Result};

pub fn execute(target: &Target) -> Result<()> {
    let registry = target.registry()?;
    let checkpoints = registry
        .list(target.store)
        .context("Failed to read checkpoints")?;

    println!(
        "Checkpoints for {} ({})",
        target.store,
        registry.base_dir().display()
    );
    for (consumer, checkpoint) in checkpoints {
        match checkpoint {
            Some(checkpoint) => println!(
                "  {:<24} {:>8}  committed {}  updated {}",
                consumer.as_str(),
                checkpoint.seq,
                checkpoint
                    .committed_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".into()),
                checkpoint.updated_at.to_rfc3339()
            ),
            None => println!("  {:<24} never ran", consumer.as_str()),
        }
    }

    Ok(())
}
