//! Properties every read holds: disjoint subtasks, no dropped entries,
//! repeatable results.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bravo_checkpoint::{CheckpointMetadata, FsCheckpointStorage};
use bravo_core::format::{METADATA_FILE_NAME, WINDOW_CONTENTS};
use bravo_core::{I64Codec, KeyGroupRange, ReadError, ReaderConfig, StringCodec};
use bravo_reader::{
    for_window_state_kv_pairs, for_window_state_values, open_operator_backends, read, read_backend,
    read_iter, registered_state_names, OperatorStateReader,
};
use bravo_testkit::fixtures::{
    string_map_codec, write_window_reduce_checkpoint, BROADCAST_RULES_STATE, REDUCER_UID,
    SOURCE_OFFSETS_STATE, SOURCE_UID,
};
use bravo_testkit::{encode_metadata, OperatorLayout, SubtaskLayout};

fn records(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("k{i},v{i}")).collect()
}

async fn fixture(parallelism: u32, n: usize) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let records = records(n);
    let refs: Vec<&str> = records.iter().map(String::as_str).collect();
    let chk = write_window_reduce_checkpoint(dir.path(), 7, parallelism, &refs).unwrap();
    (dir, chk)
}

#[tokio::test]
async fn test_subtask_key_sets_are_disjoint() {
    let (_dir, chk) = fixture(4, 50).await;
    let backends = open_operator_backends(
        &FsCheckpointStorage::new(),
        &chk,
        REDUCER_UID,
        &ReaderConfig::default(),
    )
    .await
    .unwrap();
    let descriptor = for_window_state_kv_pairs(StringCodec, string_map_codec());

    let mut seen: BTreeMap<String, u32> = BTreeMap::new();
    for backend in backends.iter() {
        for (key, _) in read_backend(backend, &descriptor).unwrap() {
            if let Some(other) = seen.insert(key.clone(), backend.subtask_index()) {
                panic!(
                    "key {key} in subtask {other} and {}",
                    backend.subtask_index()
                );
            }
        }
    }
    assert_eq!(seen.len(), 50);
}

#[tokio::test]
async fn test_subtasks_sharing_key_groups_are_rejected() {
    let (_dir, chk) = fixture(1, 10).await;
    let metadata = CheckpointMetadata::load(&FsCheckpointStorage::new(), &chk)
        .await
        .unwrap();
    let handle = metadata.subtask_handles(REDUCER_UID).unwrap()[&0].clone();
    let keyed = handle.keyed.unwrap();
    assert_eq!(keyed.key_group_range, KeyGroupRange::new(0, 127));

    // Both subtasks of a parallelism-2 operator claim every key group.
    let shared = OperatorLayout {
        uid: REDUCER_UID.to_string(),
        parallelism: 2,
        max_parallelism: 128,
        subtasks: (0..2)
            .map(|subtask_index| SubtaskLayout {
                subtask_index,
                data_file: "test-reducer-0.state".to_string(),
                keyed: Some(keyed),
                operator: None,
            })
            .collect(),
    };
    std::fs::write(
        chk.join(METADATA_FILE_NAME),
        encode_metadata(7, 0, &[shared]).unwrap(),
    )
    .unwrap();

    let err = OperatorStateReader::open(&chk, REDUCER_UID, ReaderConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::CorruptMetadata { .. }), "{err}");
}

#[tokio::test]
async fn test_read_returns_every_entry() {
    let (_dir, chk) = fixture(3, 40).await;
    let reader = OperatorStateReader::open(&chk, REDUCER_UID, ReaderConfig::default())
        .await
        .unwrap();

    let per_subtask: usize = reader
        .backends()
        .iter()
        .map(|b| b.entry_count(WINDOW_CONTENTS).unwrap())
        .sum();
    let values = reader
        .read(&for_window_state_values(string_map_codec()))
        .await
        .unwrap();
    assert_eq!(values.len(), per_subtask);
    assert_eq!(values.len(), 40);

    let lazy: Vec<_> = reader
        .read_iter(&for_window_state_values(string_map_codec()))
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(lazy.len(), per_subtask);
}

#[tokio::test]
async fn test_reads_are_repeatable() {
    let (_dir, chk) = fixture(4, 25).await;
    let backends = open_operator_backends(
        &FsCheckpointStorage::new(),
        &chk,
        REDUCER_UID,
        &ReaderConfig::default().with_max_concurrent_subtasks(2),
    )
    .await
    .unwrap();
    let descriptor = for_window_state_kv_pairs(StringCodec, string_map_codec());

    let as_set = |pairs: Vec<(String, HashMap<String, String>)>| -> BTreeSet<(String, BTreeMap<String, String>)> {
        pairs
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().collect()))
            .collect()
    };
    let first = as_set(read(&backends, &descriptor).await.unwrap());
    let second = as_set(read(&backends, &descriptor).await.unwrap());
    assert_eq!(first, second);
    assert_eq!(first.len(), 25);

    let lazy = as_set(
        read_iter(&backends, &descriptor)
            .collect::<Result<Vec<_>, _>>()
            .unwrap(),
    );
    assert_eq!(first, lazy);
}

#[tokio::test]
async fn test_introspection() {
    let (_dir, chk) = fixture(2, 5).await;
    let reducer = OperatorStateReader::open(&chk, REDUCER_UID, ReaderConfig::default())
        .await
        .unwrap();
    for backend in reducer.backends().iter() {
        let names = registered_state_names(backend);
        assert_eq!(names.keyed, BTreeSet::from([WINDOW_CONTENTS.to_string()]));
        assert!(names.broadcast.is_empty());
    }

    let source = OperatorStateReader::open(&chk, SOURCE_UID, ReaderConfig::default())
        .await
        .unwrap();
    let names = source.registered_state_names();
    assert!(names.keyed.is_empty());
    assert_eq!(names.broadcast, BTreeSet::from([BROADCAST_RULES_STATE.to_string()]));
    assert_eq!(names.operator, BTreeSet::from([SOURCE_OFFSETS_STATE.to_string()]));
}

#[tokio::test]
async fn test_operator_and_broadcast_state() {
    let (_dir, chk) = fixture(3, 4).await;
    let source = OperatorStateReader::open(&chk, SOURCE_UID, ReaderConfig::default())
        .await
        .unwrap();

    // Each subtask stored the record count plus its index.
    let offsets = source
        .read_list_state(SOURCE_OFFSETS_STATE, &I64Codec)
        .unwrap();
    assert_eq!(offsets, vec![4, 5, 6]);

    let rules = source
        .read_broadcast_state(BROADCAST_RULES_STATE, &string_map_codec())
        .unwrap();
    assert_eq!(
        rules,
        HashMap::from([("min".to_string(), "lexicographic".to_string())])
    );

    assert!(source.read_list_state(BROADCAST_RULES_STATE, &I64Codec).is_err());
    assert!(source
        .read_broadcast_state("missing", &string_map_codec())
        .is_err());
}
