//! Prune command implementation

use super::Target;
use anyhow::{Context, Result};
use weft::{HistoryPruner, PruneFloor};

pub fn execute(target: &Target, dry_run: bool) -> Result<()> {
    let conn = target.connect()?;
    let pruner = HistoryPruner::new(target.store, target.registry()?);

    if dry_run {
        match pruner.floor(&conn).context("Failed to compute prune floor")? {
            PruneFloor::Ready(floor) => {
                let stats = conn.log_stats().context("Failed to read log bounds")?;
                let doomed = match stats.oldest {
                    Some(oldest) if oldest <= floor => floor - oldest + 1,
                    _ => 0,
                };
                println!("Prune floor: {}", floor);
                println!("Would delete up to {} entries", doomed.min(stats.count));
            }
            PruneFloor::Blocked(consumers) => {
                println!(
                    "Pruning blocked by consumers without a current checkpoint: {:?}",
                    consumers
                );
            }
        }
        return Ok(());
    }

    let stats = pruner.prune(&conn).context("Prune failed")?;
    if stats.is_blocked() {
        println!(
            "⚠️  Pruning blocked by consumers without a current checkpoint: {:?}",
            stats.blocked_by
        );
    } else {
        println!(
            "✓ Deleted {} entries through {} in {:?}",
            stats.deleted,
            stats.floor.unwrap_or(0),
            stats.duration
        );
    }

    Ok(())
}
