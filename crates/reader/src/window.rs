//! Descriptors for window operator state.
//!
//! Window operators keep their per-key accumulators in one map state,
//! [`WINDOW_CONTENTS`], namespaced by the encoded [`TimeWindow`]. The stored
//! value is the window's contents, itself a map from the user's key to the
//! aggregate. These descriptors target that state, check the namespace really
//! is a window, and hand back the contents as decoded by the caller's codec.

use bravo_core::format::WINDOW_CONTENTS;
use bravo_core::{CodecError, EntryPart, StateCodec, StateKind, TimeWindow, TimeWindowCodec};
use bravo_state::KeyedEntry;

use crate::descriptor::{ExtractionMode, StateDescriptor};

/// One window accumulator with its window and partitioning key.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEntry<K, V> {
    pub window: TimeWindow,
    pub key: K,
    pub contents: V,
}

fn window_of(entry: &KeyedEntry) -> Result<TimeWindow, (EntryPart, CodecError)> {
    TimeWindowCodec
        .decode(&entry.namespace)
        .map_err(|e| (EntryPart::Namespace, e))
}

/// The contents of every window, one record per window and key.
///
/// Identical contents from different windows or subtasks are kept as
/// separate records.
pub fn for_window_state_values<C>(value_codec: C) -> StateDescriptor<C::Value>
where
    C: StateCodec,
{
    StateDescriptor::from_fn(WINDOW_CONTENTS, ExtractionMode::ValuesOnly, move |entry| {
        window_of(entry)?;
        value_codec
            .decode(&entry.value)
            .map_err(|e| (EntryPart::Value, e))
    })
    .with_expected_kind(StateKind::Map)
}

/// `(partitioning key, window contents)` pairs. The key is the one the
/// operator was keyed by, decoded with `key_codec`; it is not deduplicated
/// against keys inside the contents.
pub fn for_window_state_kv_pairs<KC, VC>(
    key_codec: KC,
    value_codec: VC,
) -> StateDescriptor<(KC::Value, VC::Value)>
where
    KC: StateCodec,
    VC: StateCodec,
{
    StateDescriptor::from_fn(WINDOW_CONTENTS, ExtractionMode::KeyValuePairs, move |entry| {
        window_of(entry)?;
        let key = key_codec
            .decode(&entry.key)
            .map_err(|e| (EntryPart::Key, e))?;
        let contents = value_codec
            .decode(&entry.value)
            .map_err(|e| (EntryPart::Value, e))?;
        Ok((key, contents))
    })
    .with_expected_kind(StateKind::Map)
}

/// Like [`for_window_state_kv_pairs`], keeping the window each accumulator
/// belongs to.
pub fn for_window_state_entries<KC, VC>(
    key_codec: KC,
    value_codec: VC,
) -> StateDescriptor<WindowEntry<KC::Value, VC::Value>>
where
    KC: StateCodec,
    VC: StateCodec,
{
    StateDescriptor::from_fn(WINDOW_CONTENTS, ExtractionMode::KeyValuePairs, move |entry| {
        Ok(WindowEntry {
            window: window_of(entry)?,
            key: key_codec
                .decode(&entry.key)
                .map_err(|e| (EntryPart::Key, e))?,
            contents: value_codec
                .decode(&entry.value)
                .map_err(|e| (EntryPart::Value, e))?,
        })
    })
    .with_expected_kind(StateKind::Map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use bravo_core::{MapCodec, StringCodec};
    use bytes::Bytes;

    fn window_entry(namespace: Bytes) -> KeyedEntry {
        let contents = MapCodec::new(StringCodec, StringCodec)
            .to_bytes(&HashMap::from([("1".to_string(), "1".to_string())]))
            .unwrap();
        KeyedEntry {
            key_group: 0,
            key: Bytes::from_static(b"1"),
            namespace,
            value: contents,
            offset: 64,
        }
    }

    #[test]
    fn test_window_descriptors_target_window_contents() {
        let values = for_window_state_values(MapCodec::new(StringCodec, StringCodec));
        assert_eq!(values.state_name(), WINDOW_CONTENTS);
        assert_eq!(values.mode(), ExtractionMode::ValuesOnly);
        assert_eq!(values.expected_kind(), Some(StateKind::Map));

        let pairs = for_window_state_kv_pairs(StringCodec, MapCodec::new(StringCodec, StringCodec));
        assert_eq!(pairs.mode(), ExtractionMode::KeyValuePairs);
    }

    #[test]
    fn test_unwraps_contents() {
        let namespace = TimeWindowCodec.to_bytes(&TimeWindow::new(0, 1)).unwrap();
        let entry = window_entry(namespace);
        let expected = HashMap::from([("1".to_string(), "1".to_string())]);

        let values = for_window_state_values(MapCodec::new(StringCodec, StringCodec));
        assert_eq!(values.extract(&entry).unwrap(), expected);

        let pairs = for_window_state_kv_pairs(StringCodec, MapCodec::new(StringCodec, StringCodec));
        assert_eq!(pairs.extract(&entry).unwrap(), ("1".to_string(), expected.clone()));

        let entries = for_window_state_entries(StringCodec, MapCodec::new(StringCodec, StringCodec));
        let window_entry = entries.extract(&entry).unwrap();
        assert_eq!(window_entry.window, TimeWindow::new(0, 1));
        assert_eq!(window_entry.contents, expected);
    }

    #[test]
    fn test_rejects_non_window_namespace() {
        let entry = window_entry(Bytes::from_static(b"not-a-window"));
        let values = for_window_state_values(MapCodec::new(StringCodec, StringCodec));
        let (part, _) = values.extract(&entry).unwrap_err();
        assert_eq!(part, EntryPart::Namespace);
    }
}
