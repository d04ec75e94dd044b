//! Keyed tumbling-window reduce that keeps its accumulators in
//! [`MemoryKeyedStateStore`]s, one store per subtask.
//!
//! Window contents live in the map state `window-contents`, namespaced by
//! the encoded window. Elements are routed to the subtask owning their key's
//! key group, and watermarks fire (and purge) every window whose end is at or
//! below the watermark, like the engine's window operators.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use bravo_core::keygroup::operator_index_for_key;
use bravo_core::{
    KeyGroupRange, StateCodec, StateKind, TimeWindow, TimeWindowCodec, Timestamp,
};
use tracing::debug;

use crate::store::MemoryKeyedStateStore;
use crate::writer::{OperatorSnapshot, SubtaskSnapshot};

pub use bravo_core::format::WINDOW_CONTENTS;

/// Result of a fired window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowResult<K, V> {
    pub window: TimeWindow,
    pub key: K,
    pub value: V,
}

/// Keyed tumbling-window reduce.
///
/// # Example
///
/// ```ignore
/// let mut op = WindowReduceOperator::new("test-reducer", 2, 128, 1, StringCodec, value_codec, |l, r| {
///     if l <= r { l.clone() } else { r.clone() }
/// })?;
/// op.process(0, &"1".to_string(), value)?;
/// let snapshot = op.snapshot()?;
/// ```
pub struct WindowReduceOperator<KC, VC, F>
where
    KC: StateCodec,
    VC: StateCodec,
{
    uid: String,
    parallelism: u32,
    max_parallelism: u32,
    size_ms: Timestamp,
    current_wm: Option<Timestamp>,
    key_codec: KC,
    value_codec: VC,
    reduce_fn: F,
    stores: Vec<MemoryKeyedStateStore>,
}

impl<KC, VC, F> WindowReduceOperator<KC, VC, F>
where
    KC: StateCodec,
    VC: StateCodec,
    F: Fn(&VC::Value, &VC::Value) -> VC::Value,
{
    pub fn new(
        uid: impl Into<String>,
        parallelism: u32,
        max_parallelism: u32,
        size_ms: Timestamp,
        key_codec: KC,
        value_codec: VC,
        reduce_fn: F,
    ) -> Result<Self> {
        anyhow::ensure!(
            parallelism >= 1 && parallelism <= max_parallelism,
            "parallelism {parallelism} outside 1..={max_parallelism}"
        );
        anyhow::ensure!(size_ms > 0, "window size must be positive");

        let mut stores = Vec::with_capacity(parallelism as usize);
        for _ in 0..parallelism {
            let mut store = MemoryKeyedStateStore::new();
            store.register(WINDOW_CONTENTS, StateKind::Map)?;
            stores.push(store);
        }

        Ok(Self {
            uid: uid.into(),
            parallelism,
            max_parallelism,
            size_ms,
            current_wm: None,
            key_codec,
            value_codec,
            reduce_fn,
            stores,
        })
    }

    /// Reduce `value` into the window containing `ts` for `key`. Late
    /// elements (at or below the watermark) are dropped.
    pub fn process(&mut self, ts: Timestamp, key: &KC::Value, value: VC::Value) -> Result<()> {
        if self.current_wm.is_some_and(|wm| ts <= wm) {
            debug!(ts, "Dropping late element");
            return Ok(());
        }

        let key_bytes = self.key_codec.to_bytes(key)?;
        let subtask = operator_index_for_key(&key_bytes, self.max_parallelism, self.parallelism);
        let namespace = TimeWindowCodec.to_bytes(&TimeWindow::tumbling(ts, self.size_ms))?;

        let store = &mut self.stores[subtask as usize];
        store.set_current_key(&key_bytes);
        let reduced = match store.get(WINDOW_CONTENTS, &namespace)? {
            Some(existing) => {
                let current = self
                    .value_codec
                    .decode(existing)
                    .context("decode window accumulator")?;
                (self.reduce_fn)(&current, &value)
            }
            None => value,
        };
        let encoded = self.value_codec.to_bytes(&reduced)?;
        store.put(WINDOW_CONTENTS, &namespace, encoded)
    }

    /// Advance the watermark, firing and purging completed windows.
    pub fn advance_watermark(
        &mut self,
        wm: Timestamp,
    ) -> Result<Vec<WindowResult<KC::Value, VC::Value>>> {
        if self.current_wm.is_some_and(|current| wm <= current) {
            return Ok(vec![]);
        }
        self.current_wm = Some(wm);

        let mut fired = Vec::new();
        for store in &mut self.stores {
            for (key, namespace) in store.slots(WINDOW_CONTENTS) {
                let window = TimeWindowCodec.decode(&namespace)?;
                if window.end > wm {
                    continue;
                }
                store.set_current_key(&key);
                if let Some(bytes) = store.remove(WINDOW_CONTENTS, &namespace)? {
                    fired.push(WindowResult {
                        window,
                        key: self.key_codec.decode(&key)?,
                        value: self.value_codec.decode(&bytes)?,
                    });
                }
            }
        }
        debug!(watermark = wm, fired = fired.len(), "Watermark advanced");
        Ok(fired)
    }

    /// Accumulators currently held, over all subtasks.
    pub fn pending_windows(&self) -> usize {
        self.stores
            .iter()
            .map(|s| s.entry_count(WINDOW_CONTENTS))
            .sum()
    }

    /// Snapshot every subtask's keyed state.
    pub fn snapshot(&self) -> Result<OperatorSnapshot> {
        let mut subtasks = Vec::with_capacity(self.stores.len());
        for (index, store) in self.stores.iter().enumerate() {
            let index = index as u32;
            let range = KeyGroupRange::for_subtask(self.max_parallelism, self.parallelism, index);
            subtasks.push(SubtaskSnapshot {
                subtask_index: index,
                keyed: Some((range, store.snapshot(range, self.max_parallelism)?)),
                operator_states: BTreeMap::new(),
            });
        }
        Ok(OperatorSnapshot {
            uid: self.uid.clone(),
            parallelism: self.parallelism,
            max_parallelism: self.max_parallelism,
            subtasks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bravo_core::{I64Codec, StringCodec};

    fn sum_op(parallelism: u32) -> WindowReduceOperator<StringCodec, I64Codec, fn(&i64, &i64) -> i64> {
        WindowReduceOperator::new(
            "sum",
            parallelism,
            16,
            5000,
            StringCodec,
            I64Codec,
            (|a: &i64, b: &i64| a + b) as fn(&i64, &i64) -> i64,
        )
        .unwrap()
    }

    #[test]
    fn test_reduce_per_key_and_window() {
        let mut op = sum_op(2);
        op.process(1000, &"a".to_string(), 1).unwrap();
        op.process(2000, &"a".to_string(), 2).unwrap();
        op.process(6000, &"a".to_string(), 5).unwrap();
        op.process(3000, &"b".to_string(), 7).unwrap();
        assert_eq!(op.pending_windows(), 3);

        let mut fired = op.advance_watermark(5000).unwrap();
        fired.sort_by(|l, r| l.key.cmp(&r.key));
        assert_eq!(
            fired,
            vec![
                WindowResult {
                    window: TimeWindow::new(0, 5000),
                    key: "a".to_string(),
                    value: 3
                },
                WindowResult {
                    window: TimeWindow::new(0, 5000),
                    key: "b".to_string(),
                    value: 7
                },
            ]
        );
        assert_eq!(op.pending_windows(), 1);
    }

    #[test]
    fn test_late_elements_dropped() {
        let mut op = sum_op(1);
        op.advance_watermark(10_000).unwrap();
        op.process(9_000, &"a".to_string(), 1).unwrap();
        assert_eq!(op.pending_windows(), 0);
    }

    #[test]
    fn test_snapshot_covers_all_subtasks() {
        let mut op = sum_op(3);
        for (i, key) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            op.process(i as u64 + 1, &key.to_string(), 1).unwrap();
        }
        let snapshot = op.snapshot().unwrap();
        assert_eq!(snapshot.subtasks.len(), 3);
        let ranges: Vec<_> = snapshot
            .subtasks
            .iter()
            .map(|s| s.keyed.as_ref().unwrap().0)
            .collect();
        assert_eq!(ranges[0].start, 0);
        assert_eq!(ranges[2].end, 15);
    }
}
