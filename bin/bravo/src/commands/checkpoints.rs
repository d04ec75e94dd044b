//! Checkpoints command - List checkpoint ids below a base directory.

use std::path::Path;

use anyhow::Result;
use bravo_checkpoint::{CheckpointStorage, FsCheckpointStorage};

pub async fn execute(base: &Path, format: &str) -> Result<()> {
    let ids = FsCheckpointStorage::new().list_checkpoints(base).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&ids)?);
    } else {
        println!("Checkpoints in {} ({})", base.display(), ids.len());
        println!("{}", "=".repeat(40));
        for id in ids {
            println!("chk-{id}");
        }
    }
    Ok(())
}
