//! In-memory keyed state store that snapshots into the keyed segment format.

use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Result};
use bravo_core::format::KEYED_SEGMENT_MAGIC;
use bravo_core::keygroup::assign_key_group;
use bravo_core::wire::WireWrite;
use bravo_core::{KeyGroupRange, StateKind};
use bytes::{BufMut, Bytes, BytesMut};

/// In-memory keyed state store.
///
/// Organizes state by the current key and a namespace (for window state,
/// the encoded window), so an operator keeps separate state per key and
/// per window.
#[derive(Debug, Default)]
pub struct MemoryKeyedStateStore {
    current_key: Option<Vec<u8>>,
    /// Registration order defines the state ids written to the snapshot.
    registered: Vec<(String, StateKind)>,
    states: HashMap<String, HashMap<(Vec<u8>, Vec<u8>), Bytes>>,
}

impl MemoryKeyedStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a state name. Re-registering with the same kind is a no-op.
    pub fn register(&mut self, name: &str, kind: StateKind) -> Result<()> {
        match self.registered.iter().find(|(n, _)| n == name) {
            Some((_, existing)) if *existing == kind => Ok(()),
            Some((_, existing)) => {
                bail!("state `{name}` already registered as {existing}, not {kind}")
            }
            None => {
                self.registered.push((name.to_string(), kind));
                self.states.entry(name.to_string()).or_default();
                Ok(())
            }
        }
    }

    pub fn set_current_key(&mut self, key: &[u8]) {
        self.current_key = Some(key.to_vec());
    }

    fn slot(&self, name: &str, namespace: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let Some(key) = self.current_key.clone() else {
            bail!("No current key set");
        };
        if !self.states.contains_key(name) {
            bail!("state `{name}` is not registered");
        }
        Ok((key, namespace.to_vec()))
    }

    pub fn get(&self, name: &str, namespace: &[u8]) -> Result<Option<&Bytes>> {
        let slot = self.slot(name, namespace)?;
        Ok(self.states.get(name).and_then(|s| s.get(&slot)))
    }

    pub fn put(&mut self, name: &str, namespace: &[u8], value: Bytes) -> Result<()> {
        let slot = self.slot(name, namespace)?;
        if let Some(state) = self.states.get_mut(name) {
            state.insert(slot, value);
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str, namespace: &[u8]) -> Result<Option<Bytes>> {
        let slot = self.slot(name, namespace)?;
        Ok(self.states.get_mut(name).and_then(|s| s.remove(&slot)))
    }

    /// All `(key, namespace)` slots of one state.
    pub fn slots(&self, name: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.states
            .get(name)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn entry_count(&self, name: &str) -> usize {
        self.states.get(name).map_or(0, HashMap::len)
    }

    /// Encode all state as a keyed segment, grouped by key group. Fails if a
    /// key hashes outside `range`.
    pub fn snapshot(&self, range: KeyGroupRange, max_parallelism: u32) -> Result<Bytes> {
        let mut by_key_group: BTreeMap<u32, Vec<(u16, &[u8], &[u8], &Bytes)>> = BTreeMap::new();
        for (state_id, (name, _)) in self.registered.iter().enumerate() {
            let Some(state) = self.states.get(name) else {
                continue;
            };
            for ((key, namespace), value) in state {
                let key_group = assign_key_group(key, max_parallelism);
                if !range.contains(key_group) {
                    bail!("key group {key_group} of state `{name}` outside {range}");
                }
                by_key_group.entry(key_group).or_default().push((
                    state_id as u16,
                    key.as_slice(),
                    namespace.as_slice(),
                    value,
                ));
            }
        }

        let mut buf = BytesMut::new();
        buf.put_u32(KEYED_SEGMENT_MAGIC);
        buf.put_u16(self.registered.len() as u16);
        for (name, kind) in &self.registered {
            buf.put_str(name)?;
            buf.put_u8(kind.tag());
        }
        buf.put_u32(by_key_group.len() as u32);
        for (key_group, entries) in by_key_group {
            buf.put_u32(key_group);
            buf.put_u32(entries.len() as u32);
            for (state_id, key, namespace, value) in entries {
                buf.put_u16(state_id);
                buf.put_blob(key)?;
                buf.put_blob(namespace)?;
                buf.put_blob(value)?;
            }
        }
        Ok(buf.freeze())
    }
}
