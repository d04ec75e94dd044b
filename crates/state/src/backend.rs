//! Read-only, in-memory form of one subtask's persisted state.

use std::collections::{BTreeMap, BTreeSet};

use bravo_core::{DistributionMode, KeyGroupRange, ReadError, Result, StateKind};
use bytes::Bytes;
use serde::Serialize;

/// One raw keyed entry. Bytes are slices of the data file read, no copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedEntry {
    pub key_group: u32,
    pub key: Bytes,
    pub namespace: Bytes,
    pub value: Bytes,
    /// Offset of the entry in its data file.
    pub offset: u64,
}

/// All entries of one keyed state, grouped by key group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedStateTable {
    name: String,
    kind: StateKind,
    entries: BTreeMap<u32, Vec<KeyedEntry>>,
}

impl KeyedStateTable {
    pub fn new(name: impl Into<String>, kind: StateKind) -> Self {
        Self {
            name: name.into(),
            kind,
            entries: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub(crate) fn push(&mut self, entry: KeyedEntry) {
        self.entries.entry(entry.key_group).or_default().push(entry);
    }

    /// Number of entries over all key groups.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key groups holding at least one entry, ascending.
    pub fn key_groups(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    pub fn entries_in(&self, key_group: u32) -> &[KeyedEntry] {
        self.entries
            .get(&key_group)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Entries in key-group order.
    pub fn entries(&self) -> impl Iterator<Item = &KeyedEntry> {
        self.entries.values().flatten()
    }
}

/// One element of operator or broadcast state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawElement {
    /// Offset of the element in its data file.
    pub offset: u64,
    pub bytes: Bytes,
}

/// A non-keyed list state: the elements this subtask persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorListState {
    pub mode: DistributionMode,
    pub elements: Vec<RawElement>,
}

/// State names a backend can serve, per flavor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegisteredStateNames {
    pub keyed: BTreeSet<String>,
    pub broadcast: BTreeSet<String>,
    pub operator: BTreeSet<String>,
}

impl RegisteredStateNames {
    /// Union with another backend's names.
    pub fn merge(&mut self, other: RegisteredStateNames) {
        self.keyed.extend(other.keyed);
        self.broadcast.extend(other.broadcast);
        self.operator.extend(other.operator);
    }
}

/// Reconstructed state of one subtask.
///
/// Keyed state is partitioned by key group, operator list state is a plain
/// list of byte blocks, and broadcast state is a single shared value per
/// name. Nothing is decoded beyond the framing: codecs are applied by
/// readers, so one backend serves any number of reads.
#[derive(Debug, Clone)]
pub struct ReconstructedBackend {
    pub(crate) operator_uid: String,
    pub(crate) subtask_index: u32,
    pub(crate) key_group_range: Option<KeyGroupRange>,
    pub(crate) keyed: BTreeMap<String, KeyedStateTable>,
    pub(crate) operator: BTreeMap<String, OperatorListState>,
    pub(crate) broadcast: BTreeMap<String, RawElement>,
}

impl ReconstructedBackend {
    /// Backend of a subtask that persisted nothing.
    pub fn empty(operator_uid: impl Into<String>, subtask_index: u32) -> Self {
        Self {
            operator_uid: operator_uid.into(),
            subtask_index,
            key_group_range: None,
            keyed: BTreeMap::new(),
            operator: BTreeMap::new(),
            broadcast: BTreeMap::new(),
        }
    }

    pub fn operator_uid(&self) -> &str {
        &self.operator_uid
    }

    pub fn subtask_index(&self) -> u32 {
        self.subtask_index
    }

    /// Key groups this subtask owned, if it persisted keyed state.
    pub fn key_group_range(&self) -> Option<KeyGroupRange> {
        self.key_group_range
    }

    fn not_found(&self, name: &str) -> ReadError {
        ReadError::StateNotFound {
            uid: self.operator_uid.clone(),
            subtask: self.subtask_index,
            state: name.to_string(),
        }
    }

    pub fn keyed_state(&self, name: &str) -> Result<&KeyedStateTable> {
        self.keyed.get(name).ok_or_else(|| self.not_found(name))
    }

    pub fn list_state(&self, name: &str) -> Result<&OperatorListState> {
        self.operator.get(name).ok_or_else(|| self.not_found(name))
    }

    pub fn broadcast_state(&self, name: &str) -> Result<&RawElement> {
        self.broadcast.get(name).ok_or_else(|| self.not_found(name))
    }

    pub fn registered_state_names(&self) -> RegisteredStateNames {
        RegisteredStateNames {
            keyed: self.keyed.keys().cloned().collect(),
            broadcast: self.broadcast.keys().cloned().collect(),
            operator: self.operator.keys().cloned().collect(),
        }
    }

    /// Entries (keyed) or elements (list) stored under `name`. Broadcast
    /// states count as one.
    pub fn entry_count(&self, name: &str) -> Result<usize> {
        if let Some(table) = self.keyed.get(name) {
            return Ok(table.len());
        }
        if let Some(list) = self.operator.get(name) {
            return Ok(list.elements.len());
        }
        if self.broadcast.contains_key(name) {
            return Ok(1);
        }
        Err(self.not_found(name))
    }

    /// True if the subtask registered no state at all.
    pub fn is_empty(&self) -> bool {
        self.keyed.is_empty() && self.operator.is_empty() && self.broadcast.is_empty()
    }
}
