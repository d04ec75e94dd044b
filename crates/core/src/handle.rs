//! State handles recorded in a checkpoint's root descriptor.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::format::DistributionMode;
use crate::keygroup::KeyGroupRange;

/// Everything one operator persisted, indexed by subtask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorState {
    pub uid: String,
    pub parallelism: u32,
    pub max_parallelism: u32,
    pub subtasks: BTreeMap<u32, SubtaskStateHandle>,
}

impl OperatorState {
    /// Total persisted bytes over all subtasks.
    pub fn state_size(&self) -> u64 {
        self.subtasks.values().map(SubtaskStateHandle::state_size).sum()
    }
}

/// Byte ranges holding one subtask's state. Readable without any other
/// subtask's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskStateHandle {
    pub subtask_index: u32,
    /// Data file, already resolved against the checkpoint directory.
    pub data_file: PathBuf,
    pub keyed: Option<KeyedStateHandle>,
    pub operator: Option<OperatorStateHandle>,
}

impl SubtaskStateHandle {
    pub fn state_size(&self) -> u64 {
        self.keyed.as_ref().map_or(0, |h| h.length) + self.operator.as_ref().map_or(0, |h| h.length)
    }
}

/// Keyed segment: entries grouped by key group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedStateHandle {
    pub key_group_range: KeyGroupRange,
    pub offset: u64,
    pub length: u64,
}

/// Operator segment: per state name, offsets of its elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorStateHandle {
    pub offset: u64,
    pub length: u64,
    pub states: BTreeMap<String, StateMetaInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMetaInfo {
    pub mode: DistributionMode,
    /// Element offsets relative to the segment start.
    pub offsets: Vec<u64>,
}
