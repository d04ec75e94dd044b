//! Root descriptor parsing.
//!
//! The descriptor indexes every operator in the checkpoint and, per
//! operator, the state handles of each subtask. Parsing is all-or-nothing:
//! any structural problem fails with [`ReadError::CorruptMetadata`].

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use bravo_core::format::{DistributionMode, METADATA_MAGIC, SUPPORTED_METADATA_VERSIONS};
use bravo_core::wire::WireReader;
use bravo_core::{
    FormatError, KeyGroupRange, KeyedStateHandle, OperatorState, OperatorStateHandle, ReadError,
    Result, StateMetaInfo, SubtaskStateHandle, Timestamp,
};
use tracing::info;

use crate::storage::CheckpointStorage;

/// Parsed root descriptor of one checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointMetadata {
    path: PathBuf,
    pub version: u32,
    pub checkpoint_id: u64,
    pub timestamp: Timestamp,
    operators: BTreeMap<String, OperatorState>,
}

impl CheckpointMetadata {
    /// Resolve `location` and parse its root descriptor.
    pub async fn load<S>(storage: &S, location: &Path) -> Result<Self>
    where
        S: CheckpointStorage + ?Sized,
    {
        let path = storage.resolve_metadata(location).await?;
        let bytes = storage.read_metadata(&path).await?;
        let metadata = Self::parse(&bytes, &path)?;
        info!(
            path = %path.display(),
            checkpoint_id = metadata.checkpoint_id,
            operators = metadata.operators.len(),
            "Loaded checkpoint metadata"
        );
        Ok(metadata)
    }

    /// Parse descriptor bytes read from `path`. Data file names are resolved
    /// against the descriptor's directory.
    pub fn parse(bytes: &[u8], path: &Path) -> Result<Self> {
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        decode(bytes, dir)
            .map(|(version, checkpoint_id, timestamp, operators)| Self {
                path: path.to_path_buf(),
                version,
                checkpoint_id,
                timestamp,
                operators,
            })
            .map_err(|e| ReadError::CorruptMetadata {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Path of the descriptor file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn operator_uids(&self) -> impl Iterator<Item = &str> {
        self.operators.keys().map(String::as_str)
    }

    pub fn operators(&self) -> impl Iterator<Item = &OperatorState> {
        self.operators.values()
    }

    /// State of one operator. An absent UID is an error, never an empty
    /// result.
    pub fn operator(&self, uid: &str) -> Result<&OperatorState> {
        self.operators
            .get(uid)
            .ok_or_else(|| ReadError::OperatorNotFound {
                uid: uid.to_string(),
                path: self.path.clone(),
                available: self.operators.keys().cloned().collect(),
            })
    }

    /// Subtask index to handle mapping for one operator.
    pub fn subtask_handles(&self, uid: &str) -> Result<&BTreeMap<u32, SubtaskStateHandle>> {
        self.operator(uid).map(|op| &op.subtasks)
    }
}

type Decoded = (u32, u64, Timestamp, BTreeMap<String, OperatorState>);

fn decode(bytes: &[u8], dir: &Path) -> Result<Decoded, FormatError> {
    let mut r = WireReader::new(bytes);

    let magic = r.read_u32()?;
    if magic != METADATA_MAGIC {
        return Err(FormatError::invalid(format!(
            "bad magic {magic:#010x}, expected {METADATA_MAGIC:#010x}"
        )));
    }
    let version = r.read_u32()?;
    if !SUPPORTED_METADATA_VERSIONS.contains(&version) {
        return Err(FormatError::invalid(format!(
            "unsupported version {version} (supported: {SUPPORTED_METADATA_VERSIONS:?})"
        )));
    }

    let checkpoint_id = r.read_u64()?;
    let timestamp = r.read_u64()?;
    let operator_count = r.read_u32()?;

    let mut operators = BTreeMap::new();
    for _ in 0..operator_count {
        let operator = decode_operator(&mut r, dir)?;
        if operators.contains_key(&operator.uid) {
            return Err(FormatError::invalid(format!(
                "duplicate operator uid `{}`",
                operator.uid
            )));
        }
        operators.insert(operator.uid.clone(), operator);
    }
    r.finish()?;

    Ok((version, checkpoint_id, timestamp, operators))
}

fn decode_operator(r: &mut WireReader<'_>, dir: &Path) -> Result<OperatorState, FormatError> {
    let uid = r.read_str()?.to_string();
    let parallelism = r.read_u32()?;
    let max_parallelism = r.read_u32()?;
    if parallelism == 0 || parallelism > max_parallelism {
        return Err(FormatError::invalid(format!(
            "operator `{uid}`: parallelism {parallelism} outside 1..={max_parallelism}"
        )));
    }

    let subtask_count = r.read_u32()?;
    let mut subtasks = BTreeMap::new();
    for _ in 0..subtask_count {
        let handle = decode_subtask(r, dir, max_parallelism)?;
        let index = handle.subtask_index;
        if index >= parallelism {
            return Err(FormatError::invalid(format!(
                "operator `{uid}`: subtask {index} >= parallelism {parallelism}"
            )));
        }
        // Ranges follow from the index, which keeps key ownership disjoint.
        if let Some(keyed) = &handle.keyed {
            let owned = KeyGroupRange::for_subtask(max_parallelism, parallelism, index);
            if keyed.key_group_range != owned {
                return Err(FormatError::invalid(format!(
                    "operator `{uid}`: subtask {index} claims key groups {}, owns {owned}",
                    keyed.key_group_range
                )));
            }
        }
        if subtasks.insert(index, handle).is_some() {
            return Err(FormatError::invalid(format!(
                "operator `{uid}`: duplicate subtask {index}"
            )));
        }
    }

    Ok(OperatorState {
        uid,
        parallelism,
        max_parallelism,
        subtasks,
    })
}

fn decode_subtask(
    r: &mut WireReader<'_>,
    dir: &Path,
    max_parallelism: u32,
) -> Result<SubtaskStateHandle, FormatError> {
    let subtask_index = r.read_u32()?;
    let data_file = dir.join(data_file_name(r.read_str()?, subtask_index)?);

    let keyed = if r.read_bool()? {
        let key_group_range = KeyGroupRange::new(r.read_u32()?, r.read_u32()?);
        if !key_group_range.is_empty() && key_group_range.end >= max_parallelism {
            return Err(FormatError::invalid(format!(
                "subtask {subtask_index}: key groups {key_group_range} exceed max parallelism {max_parallelism}"
            )));
        }
        Some(KeyedStateHandle {
            key_group_range,
            offset: r.read_u64()?,
            length: r.read_u64()?,
        })
    } else {
        None
    };

    let operator = if r.read_bool()? {
        let offset = r.read_u64()?;
        let length = r.read_u64()?;
        let state_count = r.read_u32()?;
        let mut states = BTreeMap::new();
        for _ in 0..state_count {
            let name = r.read_str()?.to_string();
            let tag = r.read_u8()?;
            let mode = DistributionMode::from_tag(tag).ok_or_else(|| {
                FormatError::invalid(format!("state `{name}`: unknown distribution mode {tag}"))
            })?;
            let offset_count = r.read_u32()?;
            let mut offsets = Vec::with_capacity((offset_count as usize).min(r.remaining() / 8));
            for _ in 0..offset_count {
                offsets.push(r.read_u64()?);
            }
            if states
                .insert(name.clone(), StateMetaInfo { mode, offsets })
                .is_some()
            {
                return Err(FormatError::invalid(format!(
                    "subtask {subtask_index}: duplicate operator state `{name}`"
                )));
            }
        }
        Some(OperatorStateHandle {
            offset,
            length,
            states,
        })
    } else {
        None
    };

    Ok(SubtaskStateHandle {
        subtask_index,
        data_file,
        keyed,
        operator,
    })
}

/// Data files live directly in the checkpoint directory.
fn data_file_name(name: &str, subtask_index: u32) -> Result<&Path, FormatError> {
    let path = Path::new(name);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(path),
        _ => Err(FormatError::invalid(format!(
            "subtask {subtask_index}: data file `{name}` is not a plain file name"
        ))),
    }
}
