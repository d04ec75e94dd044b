//! End-to-end reads of window-reduce state from fixture checkpoints.

use std::collections::{BTreeMap, HashMap};

use bravo_core::format::WINDOW_CONTENTS;
use bravo_core::{
    EntryPart, I64Codec, ReadError, ReaderConfig, StateKind, StringCodec, TimeWindow,
};
use bravo_reader::{
    for_window_state_entries, for_window_state_kv_pairs, for_window_state_values,
    OperatorStateReader, StateDescriptor,
};
use bravo_testkit::fixtures::{
    string_map_codec, write_fired_window_checkpoint, write_window_reduce_checkpoint,
    FIRING_WATERMARK, PENDING_TIMESTAMP, REDUCER_UID, SCENARIO_RECORDS,
};

fn sorted(maps: Vec<HashMap<String, String>>) -> Vec<BTreeMap<String, String>> {
    let mut maps: Vec<_> = maps.into_iter().map(|m| m.into_iter().collect()).collect();
    maps.sort();
    maps
}

fn contents(key: &str, value: &str) -> HashMap<String, String> {
    HashMap::from([(key.to_string(), value.to_string())])
}

async fn open_scenario(parallelism: u32) -> (tempfile::TempDir, OperatorStateReader) {
    let dir = tempfile::tempdir().unwrap();
    let chk = write_window_reduce_checkpoint(dir.path(), 1, parallelism, &SCENARIO_RECORDS).unwrap();
    let reader = OperatorStateReader::open(&chk, REDUCER_UID, ReaderConfig::default())
        .await
        .unwrap();
    (dir, reader)
}

#[tokio::test]
async fn test_window_state_values() {
    for parallelism in [1, 2, 4] {
        let (_dir, reader) = open_scenario(parallelism).await;
        let values = reader
            .read(&for_window_state_values(string_map_codec()))
            .await
            .unwrap();
        assert_eq!(
            sorted(values),
            sorted(vec![contents("1", "1"), contents("2", "3")]),
            "parallelism {parallelism}"
        );
    }
}

#[tokio::test]
async fn test_window_state_kv_pairs() {
    let (_dir, reader) = open_scenario(2).await;
    let pairs = reader
        .read(&for_window_state_kv_pairs(StringCodec, string_map_codec()))
        .await
        .unwrap();
    let by_key: HashMap<_, _> = pairs.into_iter().collect();
    assert_eq!(
        by_key,
        HashMap::from([
            ("2".to_string(), contents("2", "3")),
            ("1".to_string(), contents("1", "1")),
        ])
    );
}

#[tokio::test]
async fn test_window_state_entries_carry_window() {
    let (_dir, reader) = open_scenario(2).await;
    let entries = reader
        .read(&for_window_state_entries(StringCodec, string_map_codec()))
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    for entry in entries {
        assert_eq!(entry.window.start, 0);
        assert_eq!(entry.window.end, 1);
        assert!(entry.contents.contains_key(&entry.key));
    }
}

#[tokio::test]
async fn test_fired_windows_are_not_checkpointed() {
    let dir = tempfile::tempdir().unwrap();
    let (chk, fired) =
        write_fired_window_checkpoint(dir.path(), 1, 2, &SCENARIO_RECORDS, &["1,7", "3,9"])
            .unwrap();
    let mut fired: Vec<_> = fired
        .into_iter()
        .map(|r| (r.window, r.key, r.value))
        .collect();
    fired.sort_by(|l, r| l.1.cmp(&r.1));
    assert_eq!(
        fired,
        vec![
            (TimeWindow::new(0, FIRING_WATERMARK), "1".to_string(), contents("1", "1")),
            (TimeWindow::new(0, FIRING_WATERMARK), "2".to_string(), contents("2", "3")),
        ]
    );

    let reader = OperatorStateReader::open(&chk, REDUCER_UID, ReaderConfig::default())
        .await
        .unwrap();
    let mut entries = reader
        .read(&for_window_state_entries(StringCodec, string_map_codec()))
        .await
        .unwrap();
    entries.sort_by(|l, r| l.key.cmp(&r.key));
    let pending = TimeWindow::new(PENDING_TIMESTAMP, PENDING_TIMESTAMP + 1);
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.window == pending));
    assert_eq!(entries[0].key, "1");
    assert_eq!(entries[0].contents, contents("1", "7"));
    assert_eq!(entries[1].key, "3");
    assert_eq!(entries[1].contents, contents("3", "9"));
}

#[tokio::test]
async fn test_base_directory_resolves_latest_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    write_window_reduce_checkpoint(dir.path(), 1, 2, &["9,9"]).unwrap();
    write_window_reduce_checkpoint(dir.path(), 2, 2, &SCENARIO_RECORDS).unwrap();

    let reader = OperatorStateReader::open(dir.path(), REDUCER_UID, ReaderConfig::default())
        .await
        .unwrap();
    assert_eq!(reader.metadata().checkpoint_id, 2);
    assert_eq!(reader.entry_count(WINDOW_CONTENTS).unwrap(), 2);
}

#[tokio::test]
async fn test_unknown_operator_fails() {
    let dir = tempfile::tempdir().unwrap();
    let chk = write_window_reduce_checkpoint(dir.path(), 1, 2, &SCENARIO_RECORDS).unwrap();
    let err = OperatorStateReader::open(&chk, "no-such-operator", ReaderConfig::default())
        .await
        .unwrap_err();
    match err {
        ReadError::OperatorNotFound { uid, available, .. } => {
            assert_eq!(uid, "no-such-operator");
            assert!(available.contains(&REDUCER_UID.to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unknown_state_fails() {
    let (_dir, reader) = open_scenario(2).await;
    let err = reader
        .read(&StateDescriptor::values("no-such-state", string_map_codec()))
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::StateNotFound { ref state, .. } if state == "no-such-state"));
}

#[tokio::test]
async fn test_wrong_codec_is_a_type_mismatch() {
    let (_dir, reader) = open_scenario(2).await;
    let err = reader
        .read(&for_window_state_values(I64Codec))
        .await
        .unwrap_err();
    match err {
        ReadError::TypeMismatch {
            uid,
            state,
            part,
            offset,
            ..
        } => {
            assert!(offset.is_some());
            assert_eq!(uid, REDUCER_UID);
            assert_eq!(state, WINDOW_CONTENTS);
            assert_eq!(part, EntryPart::Value);
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = reader
        .read(
            &StateDescriptor::values(WINDOW_CONTENTS, string_map_codec())
                .with_expected_kind(StateKind::Value),
        )
        .await
        .unwrap_err();
    match err {
        ReadError::TypeMismatch { offset, ref source, .. } => {
            assert_eq!(offset, None);
            assert!(source.to_string().contains("registered as map, expected value"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_partial_read_skips_corrupt_subtask() {
    let dir = tempfile::tempdir().unwrap();
    let chk = write_window_reduce_checkpoint(dir.path(), 1, 2, &SCENARIO_RECORDS).unwrap();
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(chk.join("test-reducer-1.state"))
        .unwrap();
    file.set_len(5).unwrap();
    drop(file);

    let err = OperatorStateReader::open(&chk, REDUCER_UID, ReaderConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::CorruptState { subtask: 1, .. }));
    assert!(err.is_subtask_scoped());

    let config = ReaderConfig::default().with_allow_partial(true);
    let reader = OperatorStateReader::open(&chk, REDUCER_UID, config)
        .await
        .unwrap();
    assert!(!reader.is_complete());
    let values = reader
        .read(&for_window_state_values(string_map_codec()))
        .await
        .unwrap();
    assert_eq!(
        values.len(),
        reader.backends().get(0).unwrap().entry_count(WINDOW_CONTENTS).unwrap()
    );
}
