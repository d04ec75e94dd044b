//! Ready-made checkpoints for reader tests.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bravo_core::{DistributionMode, I64Codec, MapCodec, StateCodec, StringCodec, Timestamp};
use bytes::Bytes;
use tracing::debug;

use crate::window::{WindowReduceOperator, WindowResult};
use crate::writer::{CheckpointWriter, OperatorSnapshot, SubtaskSnapshot};

pub const REDUCER_UID: &str = "test-reducer";
pub const SOURCE_UID: &str = "test-source";
pub const SOURCE_OFFSETS_STATE: &str = "source-offsets";
pub const BROADCAST_RULES_STATE: &str = "rules";
pub const MAX_PARALLELISM: u32 = 128;

/// Records of the reference window-reduce scenario.
pub const SCENARIO_RECORDS: [&str; 4] = ["1,1", "2,3", "1,2", "1,1"];

/// Watermark that fires the window `[0, 1)` holding the first records.
pub const FIRING_WATERMARK: Timestamp = 1;

/// Event time of records arriving after [`FIRING_WATERMARK`].
pub const PENDING_TIMESTAMP: Timestamp = 5;

type ReduceFn = fn(&HashMap<String, String>, &HashMap<String, String>) -> HashMap<String, String>;

pub type StringMapReducer =
    WindowReduceOperator<StringCodec, MapCodec<StringCodec, StringCodec>, ReduceFn>;

pub type FiredWindow = WindowResult<String, HashMap<String, String>>;

pub fn string_map_codec() -> MapCodec<StringCodec, StringCodec> {
    MapCodec::new(StringCodec, StringCodec)
}

/// `"k,v"` into a one-entry map `{k: v}`.
pub fn parse_record(record: &str) -> Result<HashMap<String, String>> {
    let (key, value) = record
        .split_once(',')
        .with_context(|| format!("record `{record}` has no comma"))?;
    Ok(HashMap::from([(key.to_string(), value.to_string())]))
}

/// Keeps the map whose single value is lexicographically smaller.
pub fn keep_smaller(l: &HashMap<String, String>, r: &HashMap<String, String>) -> HashMap<String, String> {
    let left = l.values().next();
    let right = r.values().next();
    if left > right {
        r.clone()
    } else {
        l.clone()
    }
}

/// Keyed 1 ms window reduce keeping the smaller record per key.
pub fn string_map_reducer(parallelism: u32) -> Result<StringMapReducer> {
    WindowReduceOperator::new(
        REDUCER_UID,
        parallelism,
        MAX_PARALLELISM,
        1,
        StringCodec,
        string_map_codec(),
        keep_smaller as ReduceFn,
    )
}

/// Feed `"k,v"` records at `ts`, keyed by the text before the comma.
pub fn process_records(reducer: &mut StringMapReducer, ts: Timestamp, records: &[&str]) -> Result<()> {
    for record in records {
        let value = parse_record(record)?;
        let key = value
            .keys()
            .next()
            .cloned()
            .context("empty record")?;
        reducer.process(ts, &key, value)?;
    }
    Ok(())
}

/// Run `records` through a keyed 1 ms window reduce (key = text before the
/// comma, all records in the same window) and checkpoint it without firing
/// any window. Also writes a source operator carrying a union list state and
/// a broadcast state.
///
/// Returns the checkpoint directory.
pub fn write_window_reduce_checkpoint(
    base: &Path,
    checkpoint_id: u64,
    parallelism: u32,
    records: &[&str],
) -> Result<PathBuf> {
    let mut reducer = string_map_reducer(parallelism)?;
    process_records(&mut reducer, 0, records)?;
    write_with_source(base, checkpoint_id, parallelism, &reducer, records.len())
}

/// Like [`write_window_reduce_checkpoint`], but `fired` records go into the
/// window `[0, 1)`, which [`FIRING_WATERMARK`] fires and purges before
/// `pending` records arrive at [`PENDING_TIMESTAMP`]. Only the pending
/// window is left in the checkpoint.
///
/// Returns the checkpoint directory and the fired windows.
pub fn write_fired_window_checkpoint(
    base: &Path,
    checkpoint_id: u64,
    parallelism: u32,
    fired: &[&str],
    pending: &[&str],
) -> Result<(PathBuf, Vec<FiredWindow>)> {
    let mut reducer = string_map_reducer(parallelism)?;
    process_records(&mut reducer, 0, fired)?;
    let results = reducer.advance_watermark(FIRING_WATERMARK)?;
    process_records(&mut reducer, PENDING_TIMESTAMP, pending)?;
    debug!(
        fired = results.len(),
        pending = reducer.pending_windows(),
        "Checkpointing after watermark"
    );

    let consumed = fired.len() + pending.len();
    let chk = write_with_source(base, checkpoint_id, parallelism, &reducer, consumed)?;
    Ok((chk, results))
}

fn write_with_source(
    base: &Path,
    checkpoint_id: u64,
    parallelism: u32,
    reducer: &StringMapReducer,
    consumed: usize,
) -> Result<PathBuf> {
    let rules = string_map_codec()
        .to_bytes(&HashMap::from([("min".to_string(), "lexicographic".to_string())]))?;
    let source = source_snapshot(parallelism, consumed as i64, rules)?;

    let writer = CheckpointWriter::new(base)?;
    writer.write(checkpoint_id, 0, &[source, reducer.snapshot()?])
}

fn source_snapshot(parallelism: u32, consumed: i64, rules: Bytes) -> Result<OperatorSnapshot> {
    let mut subtasks = Vec::with_capacity(parallelism as usize);
    for index in 0..parallelism {
        let offset = I64Codec.to_bytes(&(consumed + index as i64))?;
        subtasks.push(SubtaskSnapshot {
            subtask_index: index,
            keyed: None,
            operator_states: BTreeMap::from([
                (
                    SOURCE_OFFSETS_STATE.to_string(),
                    (DistributionMode::Union, vec![offset]),
                ),
                (
                    BROADCAST_RULES_STATE.to_string(),
                    (DistributionMode::Broadcast, vec![rules.clone()]),
                ),
            ]),
        });
    }
    Ok(OperatorSnapshot {
        uid: SOURCE_UID.to_string(),
        parallelism,
        max_parallelism: MAX_PARALLELISM,
        subtasks,
    })
}
