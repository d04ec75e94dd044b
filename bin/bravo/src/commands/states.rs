//! States command - Show the registered state of every subtask of an
//! operator.

use std::path::Path;

use anyhow::Result;
use bravo_core::ReaderConfig;
use bravo_reader::{OperatorStateReader, ReconstructedBackend};

pub async fn execute(location: &Path, uid: &str, config: ReaderConfig, format: &str) -> Result<()> {
    let reader = OperatorStateReader::open(location, uid, config).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&to_json(&reader))?);
    } else {
        print_table(&reader);
    }
    Ok(())
}

fn counts(backend: &ReconstructedBackend, names: impl IntoIterator<Item = String>) -> Vec<(String, usize)> {
    names
        .into_iter()
        .map(|name| {
            let count = backend.entry_count(&name).unwrap_or(0);
            (name, count)
        })
        .collect()
}

fn print_table(reader: &OperatorStateReader) {
    let backends = reader.backends();
    println!(
        "Operator {} ({} of {} subtasks readable)",
        backends.uid(),
        backends.len(),
        backends.parallelism()
    );
    println!("{}", "=".repeat(80));
    println!(
        "{:<8} {:<14} {:<10} {:<30} {}",
        "Subtask", "Key groups", "Flavor", "State", "Entries"
    );
    println!("{}", "-".repeat(80));

    for backend in backends.iter() {
        let names = backend.registered_state_names();
        let key_groups = backend
            .key_group_range()
            .map_or_else(|| "-".to_string(), |r| r.to_string());
        let rows = counts(backend, names.keyed)
            .into_iter()
            .map(|row| ("keyed", row))
            .chain(counts(backend, names.operator).into_iter().map(|row| ("list", row)))
            .chain(
                counts(backend, names.broadcast)
                    .into_iter()
                    .map(|row| ("broadcast", row)),
            );

        let mut empty = true;
        for (flavor, (name, count)) in rows {
            empty = false;
            println!(
                "{:<8} {:<14} {:<10} {:<30} {}",
                backend.subtask_index(),
                key_groups,
                flavor,
                super::clip(&name, 30),
                count
            );
        }
        if empty {
            println!("{:<8} {:<14} (no state)", backend.subtask_index(), key_groups);
        }
    }

    for (subtask, error) in backends.failures() {
        println!("{subtask:<8} FAILED: {error}");
    }
}

fn to_json(reader: &OperatorStateReader) -> serde_json::Value {
    let backends = reader.backends();
    let subtasks: Vec<serde_json::Value> = backends
        .iter()
        .map(|backend| {
            let names = backend.registered_state_names();
            let as_object = |rows: Vec<(String, usize)>| -> serde_json::Map<String, serde_json::Value> {
                rows.into_iter().map(|(name, count)| (name, count.into())).collect()
            };
            serde_json::json!({
                "subtask": backend.subtask_index(),
                "key_groups": backend.key_group_range(),
                "keyed": as_object(counts(backend, names.keyed)),
                "list": as_object(counts(backend, names.operator)),
                "broadcast": names.broadcast,
            })
        })
        .collect();
    let failures: Vec<serde_json::Value> = backends
        .failures()
        .iter()
        .map(|(subtask, error)| {
            serde_json::json!({
                "subtask": subtask,
                "error": error.to_string(),
            })
        })
        .collect();

    serde_json::json!({
        "uid": backends.uid(),
        "parallelism": backends.parallelism(),
        "max_parallelism": backends.max_parallelism(),
        "complete": backends.is_complete(),
        "subtasks": subtasks,
        "failures": failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bravo_core::format::WINDOW_CONTENTS;
    use bravo_testkit::fixtures::{
        write_window_reduce_checkpoint, BROADCAST_RULES_STATE, REDUCER_UID, SCENARIO_RECORDS,
        SOURCE_OFFSETS_STATE, SOURCE_UID,
    };

    #[tokio::test]
    async fn test_reducer_states_json() {
        let dir = tempfile::tempdir().unwrap();
        let chk = write_window_reduce_checkpoint(dir.path(), 1, 2, &SCENARIO_RECORDS).unwrap();
        let reader = OperatorStateReader::open(&chk, REDUCER_UID, ReaderConfig::default())
            .await
            .unwrap();

        let json = to_json(&reader);
        assert_eq!(json["complete"], true);
        let subtasks = json["subtasks"].as_array().unwrap();
        assert_eq!(subtasks.len(), 2);
        let total: u64 = subtasks
            .iter()
            .map(|s| s["keyed"][WINDOW_CONTENTS].as_u64().unwrap())
            .sum();
        assert_eq!(total, 2);
        assert_eq!(subtasks[0]["key_groups"]["start"], 0);
    }

    #[tokio::test]
    async fn test_source_states_json() {
        let dir = tempfile::tempdir().unwrap();
        let chk = write_window_reduce_checkpoint(dir.path(), 1, 2, &SCENARIO_RECORDS).unwrap();
        let reader = OperatorStateReader::open(&chk, SOURCE_UID, ReaderConfig::default())
            .await
            .unwrap();

        let json = to_json(&reader);
        let subtask = &json["subtasks"][1];
        assert!(subtask["key_groups"].is_null());
        assert_eq!(subtask["list"][SOURCE_OFFSETS_STATE], 1);
        assert_eq!(subtask["broadcast"][0], BROADCAST_RULES_STATE);
    }
}
