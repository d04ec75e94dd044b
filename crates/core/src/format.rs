//! Constants and tags of the checkpoint on-disk format.

use serde::{Deserialize, Serialize};

/// Name of the root descriptor inside a checkpoint directory.
pub const METADATA_FILE_NAME: &str = "_metadata";

/// Prefix of checkpoint directories below a checkpoint base directory.
pub const CHECKPOINT_DIR_PREFIX: &str = "chk-";

/// First word of every root descriptor.
pub const METADATA_MAGIC: u32 = 0x4960_672D;

/// Descriptor versions this reader understands.
pub const SUPPORTED_METADATA_VERSIONS: &[u32] = &[1];

/// Version written by the current engine.
pub const CURRENT_METADATA_VERSION: u32 = 1;

/// First word of a keyed-state segment ("KEYD").
pub const KEYED_SEGMENT_MAGIC: u32 = 0x4B45_5944;

/// Map state window operators register for their per-window contents,
/// namespaced by the encoded window.
pub const WINDOW_CONTENTS: &str = "window-contents";

/// Kind of a registered keyed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateKind {
    Value,
    List,
    Map,
}

impl StateKind {
    pub fn tag(self) -> u8 {
        match self {
            StateKind::Value => 0,
            StateKind::List => 1,
            StateKind::Map => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(StateKind::Value),
            1 => Some(StateKind::List),
            2 => Some(StateKind::Map),
            _ => None,
        }
    }
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateKind::Value => f.write_str("value"),
            StateKind::List => f.write_str("list"),
            StateKind::Map => f.write_str("map"),
        }
    }
}

/// How an operator (non-keyed) state is redistributed on restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistributionMode {
    /// List elements are split among the new subtasks.
    SplitDistribute,
    /// Every new subtask receives the union of all elements.
    Union,
    /// One shared value, identical in every subtask.
    Broadcast,
}

impl DistributionMode {
    pub fn tag(self) -> u8 {
        match self {
            DistributionMode::SplitDistribute => 0,
            DistributionMode::Union => 1,
            DistributionMode::Broadcast => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DistributionMode::SplitDistribute),
            1 => Some(DistributionMode::Union),
            2 => Some(DistributionMode::Broadcast),
            _ => None,
        }
    }
}
