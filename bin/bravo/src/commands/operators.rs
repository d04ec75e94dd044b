//! Operators command - List the operators of a checkpoint.

use std::path::Path;

use anyhow::Result;
use bravo_checkpoint::{CheckpointMetadata, FsCheckpointStorage};

use super::clip;

pub async fn execute(location: &Path, format: &str) -> Result<()> {
    let metadata = CheckpointMetadata::load(&FsCheckpointStorage::new(), location).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&to_json(&metadata))?);
    } else {
        print_table(&metadata);
    }
    Ok(())
}

fn print_table(metadata: &CheckpointMetadata) {
    println!(
        "Checkpoint {} ({}), {} operators",
        metadata.checkpoint_id,
        metadata.path().display(),
        metadata.operators().count()
    );
    println!("{}", "=".repeat(80));
    println!(
        "{:<30} {:<12} {:<16} {:<10} {}",
        "UID", "Parallelism", "Max parallelism", "Subtasks", "State size"
    );
    println!("{}", "-".repeat(80));

    for op in metadata.operators() {
        println!(
            "{:<30} {:<12} {:<16} {:<10} {}",
            clip(&op.uid, 30),
            op.parallelism,
            op.max_parallelism,
            op.subtasks.len(),
            op.state_size(),
        );
    }
}

fn to_json(metadata: &CheckpointMetadata) -> serde_json::Value {
    let operators: Vec<serde_json::Value> = metadata
        .operators()
        .map(|op| {
            serde_json::json!({
                "uid": op.uid,
                "parallelism": op.parallelism,
                "max_parallelism": op.max_parallelism,
                "subtasks": op.subtasks.len(),
                "state_size": op.state_size(),
            })
        })
        .collect();

    serde_json::json!({
        "checkpoint_id": metadata.checkpoint_id,
        "timestamp": metadata.timestamp,
        "path": metadata.path().display().to_string(),
        "operators": operators,
    })
}
