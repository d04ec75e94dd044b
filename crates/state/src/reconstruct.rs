//! Rebuilds subtask backends from the byte ranges named in the metadata.
//!
//! Every subtask is reconstructed from its own ranges only, so subtasks are
//! rebuilt concurrently (bounded by [`ReaderConfig::worker_bound`]) and a
//! corrupt range fails that subtask alone.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use bravo_checkpoint::{CheckpointMetadata, CheckpointStorage};
use bravo_core::format::KEYED_SEGMENT_MAGIC;
use bravo_core::keygroup::assign_key_group;
use bravo_core::wire::WireReader;
use bravo_core::{
    DistributionMode, FormatError, KeyedStateHandle, OperatorState, OperatorStateHandle,
    ReadError, ReaderConfig, Result, StateKind, SubtaskStateHandle, WireError,
};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::backend::{
    KeyedEntry, KeyedStateTable, OperatorListState, RawElement, ReconstructedBackend,
    RegisteredStateNames,
};

/// Reconstructed backends of one operator, indexed by subtask.
#[derive(Debug)]
pub struct OperatorBackends {
    uid: String,
    parallelism: u32,
    max_parallelism: u32,
    backends: BTreeMap<u32, Arc<ReconstructedBackend>>,
    failures: BTreeMap<u32, ReadError>,
}

impl OperatorBackends {
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    pub fn max_parallelism(&self) -> u32 {
        self.max_parallelism
    }

    pub fn backends(&self) -> &BTreeMap<u32, Arc<ReconstructedBackend>> {
        &self.backends
    }

    pub fn get(&self, subtask_index: u32) -> Option<&Arc<ReconstructedBackend>> {
        self.backends.get(&subtask_index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ReconstructedBackend>> {
        self.backends.values()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Subtasks skipped in partial mode, with the reason.
    pub fn failures(&self) -> &BTreeMap<u32, ReadError> {
        &self.failures
    }

    /// False if any subtask was skipped. Reads over an incomplete set never
    /// cover the whole operator.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Names over all subtasks.
    pub fn registered_state_names(&self) -> RegisteredStateNames {
        let mut names = RegisteredStateNames::default();
        for backend in self.backends.values() {
            names.merge(backend.registered_state_names());
        }
        names
    }

    /// Sum of per-subtask entry counts of `name`. Subtasks without the
    /// state count as zero; an operator where no subtask has it is an error.
    pub fn entry_count(&self, name: &str) -> Result<usize> {
        let mut total = None;
        for backend in self.backends.values() {
            if let Ok(n) = backend.entry_count(name) {
                *total.get_or_insert(0) += n;
            }
        }
        total.ok_or_else(|| ReadError::StateNotFound {
            uid: self.uid.clone(),
            subtask: self.backends.keys().next().copied().unwrap_or_default(),
            state: name.to_string(),
        })
    }
}

/// Load the metadata under `location` and reconstruct every subtask of
/// operator `uid`.
pub async fn open_operator_backends<S>(
    storage: &S,
    location: &Path,
    uid: &str,
    config: &ReaderConfig,
) -> Result<OperatorBackends>
where
    S: CheckpointStorage + ?Sized,
{
    let metadata = CheckpointMetadata::load(storage, location).await?;
    reconstruct_operator(storage, &metadata, uid, config).await
}

/// Reconstruct every subtask of operator `uid` listed in `metadata`.
///
/// Fails on the first [`ReadError::CorruptState`] unless
/// `config.allow_partial` is set, in which case failed subtasks are recorded
/// in [`OperatorBackends::failures`].
pub async fn reconstruct_operator<S>(
    storage: &S,
    metadata: &CheckpointMetadata,
    uid: &str,
    config: &ReaderConfig,
) -> Result<OperatorBackends>
where
    S: CheckpointStorage + ?Sized,
{
    let operator = metadata.operator(uid)?;

    let mut results = stream::iter(operator.subtasks.values())
        .map(move |handle| async move {
            (
                handle.subtask_index,
                reconstruct_handle(storage, operator, handle, config).await,
            )
        })
        .buffer_unordered(config.worker_bound());

    let mut backends = BTreeMap::new();
    let mut failures = BTreeMap::new();
    while let Some((subtask, result)) = results.next().await {
        match result {
            Ok(backend) => {
                backends.insert(subtask, Arc::new(backend));
            }
            Err(e) if config.allow_partial && e.is_subtask_scoped() => {
                warn!(uid, subtask, error = %e, "Skipping unreadable subtask");
                failures.insert(subtask, e);
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        uid,
        subtasks = backends.len(),
        failed = failures.len(),
        "Reconstructed operator backends"
    );
    Ok(OperatorBackends {
        uid: operator.uid.clone(),
        parallelism: operator.parallelism,
        max_parallelism: operator.max_parallelism,
        backends,
        failures,
    })
}

/// Reconstruct a single subtask on demand. A subtask within the operator's
/// parallelism that persisted nothing yields an empty backend.
pub async fn reconstruct_subtask<S>(
    storage: &S,
    metadata: &CheckpointMetadata,
    uid: &str,
    subtask_index: u32,
    config: &ReaderConfig,
) -> Result<ReconstructedBackend>
where
    S: CheckpointStorage + ?Sized,
{
    let operator = metadata.operator(uid)?;
    if subtask_index >= operator.parallelism {
        return Err(ReadError::SubtaskOutOfRange {
            uid: uid.to_string(),
            subtask: subtask_index,
            parallelism: operator.parallelism,
        });
    }
    match operator.subtasks.get(&subtask_index) {
        Some(handle) => reconstruct_handle(storage, operator, handle, config).await,
        None => Ok(ReconstructedBackend::empty(uid, subtask_index)),
    }
}

async fn reconstruct_handle<S>(
    storage: &S,
    operator: &OperatorState,
    handle: &SubtaskStateHandle,
    config: &ReaderConfig,
) -> Result<ReconstructedBackend>
where
    S: CheckpointStorage + ?Sized,
{
    let corrupt = |reason: String| ReadError::CorruptState {
        uid: operator.uid.clone(),
        subtask: handle.subtask_index,
        path: handle.data_file.clone(),
        reason,
    };
    let mut backend = ReconstructedBackend::empty(&operator.uid, handle.subtask_index);

    if let Some(keyed) = &handle.keyed {
        let bytes = storage
            .read_range(&handle.data_file, keyed.offset, keyed.length)
            .await
            .map_err(|e| corrupt(format!("keyed range {}+{}: {e}", keyed.offset, keyed.length)))?;
        backend.keyed = decode_keyed_segment(
            &bytes,
            keyed,
            operator.max_parallelism,
            config.verify_key_groups,
        )
        .map_err(|e| corrupt(format!("keyed segment: {e}")))?;
        backend.key_group_range = Some(keyed.key_group_range);
    }

    if let Some(op) = &handle.operator {
        let bytes = storage
            .read_range(&handle.data_file, op.offset, op.length)
            .await
            .map_err(|e| corrupt(format!("operator range {}+{}: {e}", op.offset, op.length)))?;
        let (lists, broadcast) =
            decode_operator_segment(&bytes, op).map_err(|e| corrupt(format!("operator segment: {e}")))?;
        backend.operator = lists;
        backend.broadcast = broadcast;
    }

    debug!(
        uid = %operator.uid,
        subtask = handle.subtask_index,
        keyed_states = backend.keyed.len(),
        operator_states = backend.operator.len(),
        broadcast_states = backend.broadcast.len(),
        "Reconstructed subtask backend"
    );
    Ok(backend)
}

/// Split a keyed segment into per-state tables.
///
/// The segment must be consumed exactly, every key group must lie inside the
/// handle's range and every entry must reference a declared state. With
/// `verify_key_groups`, each key must also hash into the group it is stored
/// under.
pub fn decode_keyed_segment(
    bytes: &Bytes,
    handle: &KeyedStateHandle,
    max_parallelism: u32,
    verify_key_groups: bool,
) -> Result<BTreeMap<String, KeyedStateTable>, FormatError> {
    let range = handle.key_group_range;
    let mut r = WireReader::new(bytes);

    let magic = r.read_u32()?;
    if magic != KEYED_SEGMENT_MAGIC {
        return Err(FormatError::invalid(format!(
            "bad magic {magic:#010x}, expected {KEYED_SEGMENT_MAGIC:#010x}"
        )));
    }

    let state_count = r.read_u16()?;
    let mut tables: Vec<KeyedStateTable> = Vec::with_capacity(state_count as usize);
    for _ in 0..state_count {
        let name = r.read_str()?;
        let tag = r.read_u8()?;
        let kind = StateKind::from_tag(tag).ok_or_else(|| {
            FormatError::invalid(format!("unknown kind {tag} for state `{name}`"))
        })?;
        if tables.iter().any(|t| t.name() == name) {
            return Err(FormatError::invalid(format!("state `{name}` declared twice")));
        }
        tables.push(KeyedStateTable::new(name, kind));
    }

    let group_count = r.read_u32()?;
    let mut previous: Option<u32> = None;
    for _ in 0..group_count {
        let key_group = r.read_u32()?;
        if !range.contains(key_group) {
            return Err(FormatError::invalid(format!(
                "key group {key_group} outside {range}"
            )));
        }
        if previous.is_some_and(|p| key_group <= p) {
            return Err(FormatError::invalid(format!(
                "key group {key_group} out of order"
            )));
        }
        previous = Some(key_group);

        let entry_count = r.read_u32()?;
        for _ in 0..entry_count {
            let offset = handle.offset + r.position() as u64;
            let state_id = r.read_u16()?;
            let key = read_blob_slice(&mut r, bytes)?;
            let namespace = read_blob_slice(&mut r, bytes)?;
            let value = read_blob_slice(&mut r, bytes)?;

            let table = tables.get_mut(state_id as usize).ok_or_else(|| {
                FormatError::invalid(format!("undeclared state id {state_id} at offset {offset}"))
            })?;
            if verify_key_groups {
                let actual = assign_key_group(&key, max_parallelism);
                if actual != key_group {
                    return Err(FormatError::invalid(format!(
                        "key at offset {offset} hashes to key group {actual}, stored under {key_group}"
                    )));
                }
            }
            table.push(KeyedEntry {
                key_group,
                key,
                namespace,
                value,
                offset,
            });
        }
    }
    r.finish()?;

    Ok(tables
        .into_iter()
        .map(|t| (t.name().to_string(), t))
        .collect())
}

/// Split an operator segment into list states and broadcast states.
pub fn decode_operator_segment(
    bytes: &Bytes,
    handle: &OperatorStateHandle,
) -> Result<(BTreeMap<String, OperatorListState>, BTreeMap<String, RawElement>), FormatError> {
    let mut lists = BTreeMap::new();
    let mut broadcast = BTreeMap::new();

    for (name, meta) in &handle.states {
        let mut elements = Vec::with_capacity(meta.offsets.len());
        for &offset in &meta.offsets {
            let start = usize::try_from(offset)
                .ok()
                .filter(|start| *start <= bytes.len())
                .ok_or_else(|| {
                    FormatError::invalid(format!(
                        "element of `{name}` at {offset} beyond segment length {}",
                        bytes.len()
                    ))
                })?;
            let tail = bytes.slice(start..);
            let mut r = WireReader::new(&tail);
            let blob = read_blob_slice(&mut r, &tail)?;
            elements.push(RawElement {
                offset: handle.offset + offset + 4,
                bytes: blob,
            });
        }

        match meta.mode {
            DistributionMode::Broadcast => {
                let [value] = <[RawElement; 1]>::try_from(elements).map_err(|elements| {
                    FormatError::invalid(format!(
                        "broadcast state `{name}` has {} values, expected 1",
                        elements.len()
                    ))
                })?;
                broadcast.insert(name.clone(), value);
            }
            mode => {
                lists.insert(name.clone(), OperatorListState { mode, elements });
            }
        }
    }
    Ok((lists, broadcast))
}

fn read_blob_slice(r: &mut WireReader<'_>, bytes: &Bytes) -> Result<Bytes, WireError> {
    let blob = r.read_blob()?;
    let end = r.position();
    Ok(bytes.slice(end - blob.len()..end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bravo_checkpoint::FsCheckpointStorage;
    use bravo_core::wire::WireWrite;
    use bravo_core::KeyGroupRange;
    use bravo_testkit::fixtures::{
        write_window_reduce_checkpoint, BROADCAST_RULES_STATE, REDUCER_UID, SCENARIO_RECORDS,
        SOURCE_OFFSETS_STATE, SOURCE_UID,
    };
    use bravo_testkit::{MemoryKeyedStateStore, WINDOW_CONTENTS};
    use bytes::{BufMut, BytesMut};

    fn fixture(parallelism: u32) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let chk = write_window_reduce_checkpoint(dir.path(), 1, parallelism, &SCENARIO_RECORDS)
            .unwrap();
        (dir, chk)
    }

    #[tokio::test]
    async fn test_open_reducer_backends() {
        let (_dir, chk) = fixture(2);
        let backends = open_operator_backends(
            &FsCheckpointStorage::new(),
            &chk,
            REDUCER_UID,
            &ReaderConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(backends.len(), 2);
        assert_eq!(backends.parallelism(), 2);
        assert!(backends.is_complete());
        assert!(backends
            .registered_state_names()
            .keyed
            .contains(WINDOW_CONTENTS));
        // Two keys, one window each.
        assert_eq!(backends.entry_count(WINDOW_CONTENTS).unwrap(), 2);
        for backend in backends.iter() {
            let table = backend.keyed_state(WINDOW_CONTENTS).unwrap();
            assert_eq!(table.kind(), StateKind::Map);
            let range = backend.key_group_range().unwrap();
            assert!(table.key_groups().all(|kg| range.contains(kg)));
        }
    }

    #[tokio::test]
    async fn test_open_source_backends() {
        let (_dir, chk) = fixture(3);
        let backends = open_operator_backends(
            &FsCheckpointStorage::new(),
            &chk,
            SOURCE_UID,
            &ReaderConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(backends.len(), 3);
        let names = backends.registered_state_names();
        assert!(names.keyed.is_empty());
        assert!(names.operator.contains(SOURCE_OFFSETS_STATE));
        assert!(names.broadcast.contains(BROADCAST_RULES_STATE));
        for backend in backends.iter() {
            let list = backend.list_state(SOURCE_OFFSETS_STATE).unwrap();
            assert_eq!(list.mode, DistributionMode::Union);
            assert_eq!(list.elements.len(), 1);
            assert!(backend.key_group_range().is_none());
        }
        assert_eq!(backends.entry_count(SOURCE_OFFSETS_STATE).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unknown_operator() {
        let (_dir, chk) = fixture(1);
        let err = open_operator_backends(
            &FsCheckpointStorage::new(),
            &chk,
            "missing",
            &ReaderConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReadError::OperatorNotFound { .. }));
    }

    #[tokio::test]
    async fn test_reconstruct_single_subtask() {
        let (_dir, chk) = fixture(2);
        let storage = FsCheckpointStorage::new();
        let metadata = CheckpointMetadata::load(&storage, &chk).await.unwrap();
        let config = ReaderConfig::default();

        let backend = reconstruct_subtask(&storage, &metadata, REDUCER_UID, 1, &config)
            .await
            .unwrap();
        assert_eq!(backend.subtask_index(), 1);
        assert_eq!(backend.operator_uid(), REDUCER_UID);

        let err = reconstruct_subtask(&storage, &metadata, REDUCER_UID, 2, &config)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReadError::SubtaskOutOfRange {
                subtask: 2,
                parallelism: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_truncated_data_file() {
        let (_dir, chk) = fixture(2);
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(chk.join("test-reducer-0.state"))
            .unwrap();
        file.set_len(3).unwrap();
        drop(file);

        let storage = FsCheckpointStorage::new();
        let err = open_operator_backends(&storage, &chk, REDUCER_UID, &ReaderConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReadError::CorruptState { subtask: 0, .. }));

        let partial = ReaderConfig::default().with_allow_partial(true);
        let backends = open_operator_backends(&storage, &chk, REDUCER_UID, &partial)
            .await
            .unwrap();
        assert!(!backends.is_complete());
        assert_eq!(backends.len(), 1);
        assert!(backends.get(1).is_some());
        assert!(backends.failures().contains_key(&0));
    }

    fn segment_with(key_group: u32, key: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32(KEYED_SEGMENT_MAGIC);
        buf.put_u16(1);
        buf.put_str("s").unwrap();
        buf.put_u8(StateKind::Value.tag());
        buf.put_u32(1);
        buf.put_u32(key_group);
        buf.put_u32(1);
        buf.put_u16(0);
        buf.put_blob(key).unwrap();
        buf.put_blob(b"").unwrap();
        buf.put_blob(b"v").unwrap();
        buf.freeze()
    }

    fn handle(range: KeyGroupRange, len: usize) -> KeyedStateHandle {
        KeyedStateHandle {
            key_group_range: range,
            offset: 100,
            length: len as u64,
        }
    }

    #[test]
    fn test_keyed_segment_entries_keep_file_offsets() {
        let kg = assign_key_group(b"k", 8);
        let bytes = segment_with(kg, b"k");
        let tables =
            decode_keyed_segment(&bytes, &handle(KeyGroupRange::new(0, 7), bytes.len()), 8, true)
                .unwrap();
        let entry = tables["s"].entries().next().unwrap();
        assert_eq!(entry.key.as_ref(), b"k");
        assert_eq!(entry.value.as_ref(), b"v");
        assert!(entry.namespace.is_empty());
        // magic(4) + count(2) + "s"(3) + kind(1) + groups(4) + kg(4) + n(4)
        assert_eq!(entry.offset, 100 + 22);
    }

    #[test]
    fn test_keyed_segment_rejects_misplaced_keys() {
        let kg = assign_key_group(b"k", 8);
        let wrong = (kg + 1) % 8;
        let bytes = segment_with(wrong, b"k");
        let full = handle(KeyGroupRange::new(0, 7), bytes.len());
        let err = decode_keyed_segment(&bytes, &full, 8, true).unwrap_err();
        assert!(err.to_string().contains("hashes to key group"));
        assert!(decode_keyed_segment(&bytes, &full, 8, false).is_ok());

        let bytes = segment_with(kg, b"k");
        let narrow = if kg == 0 {
            KeyGroupRange::new(1, 7)
        } else {
            KeyGroupRange::new(0, kg - 1)
        };
        let err = decode_keyed_segment(&bytes, &handle(narrow, bytes.len()), 8, false).unwrap_err();
        assert!(err.to_string().contains("outside"));
    }

    #[test]
    fn test_keyed_segment_rejects_trailing_and_truncated_bytes() {
        let mut store = MemoryKeyedStateStore::new();
        store.register("s", StateKind::Value).unwrap();
        store.set_current_key(b"k");
        store.put("s", b"", Bytes::from_static(b"v")).unwrap();
        let bytes = store.snapshot(KeyGroupRange::new(0, 7), 8).unwrap();
        let full = handle(KeyGroupRange::new(0, 7), bytes.len());
        assert!(decode_keyed_segment(&bytes, &full, 8, true).is_ok());

        let mut padded = BytesMut::from(&bytes[..]);
        padded.put_u8(0);
        assert!(decode_keyed_segment(&padded.freeze(), &full, 8, true).is_err());

        let truncated = bytes.slice(..bytes.len() - 1);
        assert!(decode_keyed_segment(&truncated, &full, 8, true).is_err());
    }

    #[test]
    fn test_broadcast_requires_single_value() {
        let mut states = BTreeMap::new();
        states.insert(
            "rules".to_string(),
            (
                DistributionMode::Broadcast,
                vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")],
            ),
        );
        let (segment, meta) = bravo_testkit::encode_operator_segment(&states).unwrap();
        let handle = OperatorStateHandle {
            offset: 0,
            length: segment.len() as u64,
            states: meta,
        };
        let err = decode_operator_segment(&segment, &handle).unwrap_err();
        assert!(err.to_string().contains("expected 1"));
    }
}
