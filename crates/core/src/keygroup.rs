//! Key-group assignment.
//!
//! Keyed state is sharded into `max_parallelism` key groups. Each subtask owns
//! one contiguous range of them, so key sets of different subtasks never
//! overlap.

use serde::{Deserialize, Serialize};

/// Inclusive range of key groups owned by one subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyGroupRange {
    pub start: u32,
    pub end: u32,
}

impl KeyGroupRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Range owned by subtask `index` of `parallelism`.
    pub fn for_subtask(max_parallelism: u32, parallelism: u32, index: u32) -> Self {
        let max = max_parallelism as u64;
        let par = parallelism as u64;
        let idx = index as u64;
        let start = (idx * max + par - 1) / par;
        let end = ((idx + 1) * max - 1) / par;
        Self::new(start as u32, end as u32)
    }

    pub fn contains(&self, key_group: u32) -> bool {
        key_group >= self.start && key_group <= self.end
    }

    pub fn len(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> {
        self.start..=self.end
    }
}

impl std::fmt::Display for KeyGroupRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}..={}]", self.start, self.end)
    }
}

/// Key group of a serialized key.
pub fn assign_key_group(key: &[u8], max_parallelism: u32) -> u32 {
    (seahash::hash(key) % max_parallelism as u64) as u32
}

/// Subtask owning `key_group`.
pub fn operator_index_for_key_group(max_parallelism: u32, parallelism: u32, key_group: u32) -> u32 {
    ((key_group as u64 * parallelism as u64) / max_parallelism as u64) as u32
}

/// Subtask owning a serialized key.
pub fn operator_index_for_key(key: &[u8], max_parallelism: u32, parallelism: u32) -> u32 {
    operator_index_for_key_group(
        max_parallelism,
        parallelism,
        assign_key_group(key, max_parallelism),
    )
}
