//! Status command implementation

use super::Target;
use anyhow::{Context, Result};

pub fn execute(target: &Target, json: bool) -> Result<()> {
    tracing::info!("Checking store status: {}", target.config.store.path.display());

    let conn = target.connect()?;
    let stats = conn.log_stats().context("Failed to read log bounds")?;
    let checkpoints = target
        .registry()?
        .list(target.store)
        .context("Failed to read checkpoints")?;

    if json {
        let consumers: Vec<_> = checkpoints
            .iter()
            .map(|(consumer, checkpoint)| {
                serde_json::json!({
                    "consumer": consumer,
                    "checkpoint": checkpoint,
                    "lag": checkpoint.as_ref().map(|c| stats.tail.saturating_sub(c.seq)),
                    "current": checkpoint
                        .as_ref()
                        .map(|c| c.is_current(conn.generation(), stats.tail)),
                })
            })
            .collect();
        let report = serde_json::json!({
            "store": target.store,
            "path": target.config.store.path,
            "generation": conn.generation(),
            "tail": stats.tail,
            "oldest": stats.oldest,
            "entries": stats.count,
            "consumers": consumers,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\nStore Status");
    println!("{}", "=".repeat(60));
    println!("Store: {}", target.store);
    println!("Path: {}", target.config.store.path.display());
    println!("Generation: {}", conn.generation());

    println!("\nTransaction Log:");
    println!("  Tail: {}", stats.tail);
    match stats.oldest {
        Some(oldest) => println!(
            "  Retained: {} entries ({}..={})",
            stats.count, oldest, stats.tail
        ),
        None => println!("  Retained: none"),
    }

    println!("\nConsumers:");
    let mut blocked = Vec::new();
    for (consumer, checkpoint) in &checkpoints {
        match checkpoint {
            Some(checkpoint) if !checkpoint.is_current(conn.generation(), stats.tail) => {
                println!(
                    "  {:<24} checkpoint {:>8}  from a replaced store file",
                    consumer.as_str(),
                    checkpoint.seq
                );
                blocked.push(*consumer);
            }
            Some(checkpoint) => {
                let lag = stats.tail.saturating_sub(checkpoint.seq);
                println!(
                    "  {:<24} checkpoint {:>8}  lag {:>6}  updated {}",
                    consumer.as_str(),
                    checkpoint.seq,
                    lag,
                    checkpoint.updated_at.to_rfc3339()
                );
            }
            None => {
                println!("  {:<24} never ran", consumer.as_str());
                blocked.push(*consumer);
            }
        }
    }

    if !blocked.is_empty() {
        println!(
            "\n⚠️  Pruning blocked until {} merge against this store file",
            blocked
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    } else if stats.count > 0 {
        println!("\nRun 'weft prune' to drop entries every consumer has merged");
    } else {
        println!("\n✓ Log is fully pruned");
    }

    Ok(())
}
