//! Checkpoint writer producing data files plus the root descriptor.
//!
//! Produces the same layout the engine writes:
//! ```text
//! base_path/
//!   chk-<id>/
//!     <operator>-<subtask>.state
//!     _metadata
//! ```
//! The descriptor is written last, so a checkpoint without `_metadata` is
//! one that never completed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bravo_core::format::{
    CHECKPOINT_DIR_PREFIX, CURRENT_METADATA_VERSION, METADATA_FILE_NAME, METADATA_MAGIC,
};
use bravo_core::wire::WireWrite;
use bravo_core::{
    DistributionMode, KeyGroupRange, KeyedStateHandle, OperatorStateHandle, StateMetaInfo,
    Timestamp,
};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::info;

/// Snapshot of one operator, ready to be written.
#[derive(Debug, Clone)]
pub struct OperatorSnapshot {
    pub uid: String,
    pub parallelism: u32,
    pub max_parallelism: u32,
    pub subtasks: Vec<SubtaskSnapshot>,
}

/// Snapshot of one subtask: an optional keyed segment plus named operator
/// states.
#[derive(Debug, Clone, Default)]
pub struct SubtaskSnapshot {
    pub subtask_index: u32,
    pub keyed: Option<(KeyGroupRange, Bytes)>,
    pub operator_states: BTreeMap<String, (DistributionMode, Vec<Bytes>)>,
}

/// Descriptor view of an operator: where each subtask's bytes landed.
#[derive(Debug, Clone)]
pub struct OperatorLayout {
    pub uid: String,
    pub parallelism: u32,
    pub max_parallelism: u32,
    pub subtasks: Vec<SubtaskLayout>,
}

#[derive(Debug, Clone)]
pub struct SubtaskLayout {
    pub subtask_index: u32,
    /// Relative to the checkpoint directory.
    pub data_file: String,
    pub keyed: Option<KeyedStateHandle>,
    pub operator: Option<OperatorStateHandle>,
}

/// Encode a root descriptor.
pub fn encode_metadata(
    checkpoint_id: u64,
    timestamp: Timestamp,
    operators: &[OperatorLayout],
) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    buf.put_u32(METADATA_MAGIC);
    buf.put_u32(CURRENT_METADATA_VERSION);
    buf.put_u64(checkpoint_id);
    buf.put_u64(timestamp);
    buf.put_u32(operators.len() as u32);
    for op in operators {
        buf.put_str(&op.uid)
            .with_context(|| format!("operator uid `{}`", op.uid))?;
        buf.put_u32(op.parallelism);
        buf.put_u32(op.max_parallelism);
        buf.put_u32(op.subtasks.len() as u32);
        for subtask in &op.subtasks {
            buf.put_u32(subtask.subtask_index);
            buf.put_str(&subtask.data_file)
                .with_context(|| format!("data file of `{}` subtask {}", op.uid, subtask.subtask_index))?;

            buf.put_bool(subtask.keyed.is_some());
            if let Some(keyed) = &subtask.keyed {
                buf.put_u32(keyed.key_group_range.start);
                buf.put_u32(keyed.key_group_range.end);
                buf.put_u64(keyed.offset);
                buf.put_u64(keyed.length);
            }

            buf.put_bool(subtask.operator.is_some());
            if let Some(operator) = &subtask.operator {
                buf.put_u64(operator.offset);
                buf.put_u64(operator.length);
                buf.put_u32(operator.states.len() as u32);
                for (name, meta) in &operator.states {
                    buf.put_str(name)
                        .with_context(|| format!("operator state `{name}`"))?;
                    buf.put_u8(meta.mode.tag());
                    buf.put_u32(meta.offsets.len() as u32);
                    for offset in &meta.offsets {
                        buf.put_u64(*offset);
                    }
                }
            }
        }
    }
    Ok(buf.freeze())
}

/// Encode operator states as one segment. Returns the segment and the
/// per-state element offsets relative to its start.
pub fn encode_operator_segment(
    states: &BTreeMap<String, (DistributionMode, Vec<Bytes>)>,
) -> Result<(Bytes, BTreeMap<String, StateMetaInfo>)> {
    let mut buf = BytesMut::new();
    let mut meta = BTreeMap::new();
    for (name, (mode, elements)) in states {
        let mut offsets = Vec::with_capacity(elements.len());
        for element in elements {
            offsets.push(buf.len() as u64);
            buf.put_blob(element)
                .with_context(|| format!("element of operator state `{name}`"))?;
        }
        meta.insert(
            name.clone(),
            StateMetaInfo {
                mode: *mode,
                offsets,
            },
        );
    }
    Ok((buf.freeze(), meta))
}

/// Data file name for a subtask. Characters outside `[A-Za-z0-9_-]` in the
/// uid are replaced.
pub fn data_file_name(uid: &str, subtask_index: u32) -> String {
    let safe: String = uid
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{safe}-{subtask_index}.state")
}

/// Writes checkpoints below a base directory.
pub struct CheckpointWriter {
    base_path: PathBuf,
}

impl CheckpointWriter {
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn checkpoint_path(&self, checkpoint_id: u64) -> PathBuf {
        self.base_path
            .join(format!("{}{}", CHECKPOINT_DIR_PREFIX, checkpoint_id))
    }

    /// Write every operator's data files, then the descriptor. Returns the
    /// checkpoint directory.
    pub fn write(
        &self,
        checkpoint_id: u64,
        timestamp: Timestamp,
        operators: &[OperatorSnapshot],
    ) -> Result<PathBuf> {
        let checkpoint_dir = self.checkpoint_path(checkpoint_id);
        std::fs::create_dir_all(&checkpoint_dir)?;

        let mut layouts = Vec::with_capacity(operators.len());
        let mut total_size = 0u64;
        for op in operators {
            let mut subtasks = Vec::with_capacity(op.subtasks.len());
            for snapshot in &op.subtasks {
                let data_file = data_file_name(&op.uid, snapshot.subtask_index);
                let mut content = BytesMut::new();

                let keyed = snapshot.keyed.as_ref().map(|(range, bytes)| {
                    let handle = KeyedStateHandle {
                        key_group_range: *range,
                        offset: content.len() as u64,
                        length: bytes.len() as u64,
                    };
                    content.put_slice(bytes);
                    handle
                });

                let operator = if snapshot.operator_states.is_empty() {
                    None
                } else {
                    let (segment, states) = encode_operator_segment(&snapshot.operator_states)?;
                    let handle = OperatorStateHandle {
                        offset: content.len() as u64,
                        length: segment.len() as u64,
                        states,
                    };
                    content.put_slice(&segment);
                    Some(handle)
                };

                let path = checkpoint_dir.join(&data_file);
                std::fs::write(&path, &content)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                total_size += content.len() as u64;

                subtasks.push(SubtaskLayout {
                    subtask_index: snapshot.subtask_index,
                    data_file,
                    keyed,
                    operator,
                });
            }
            layouts.push(OperatorLayout {
                uid: op.uid.clone(),
                parallelism: op.parallelism,
                max_parallelism: op.max_parallelism,
                subtasks,
            });
        }

        let metadata = encode_metadata(checkpoint_id, timestamp, &layouts)?;
        let metadata_path = checkpoint_dir.join(METADATA_FILE_NAME);
        std::fs::write(&metadata_path, &metadata).context("Failed to write checkpoint metadata")?;

        info!(
            checkpoint_id,
            path = %checkpoint_dir.display(),
            size_bytes = total_size,
            "Checkpoint written"
        );
        Ok(checkpoint_dir)
    }
}
