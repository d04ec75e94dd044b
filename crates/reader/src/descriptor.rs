//! What to read and how to decode it.

use std::fmt;
use std::sync::Arc;

use bravo_core::{CodecError, EntryPart, StateCodec, StateKind};
use bravo_state::KeyedEntry;

/// Shape of the records a read produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Decoded values only.
    ValuesOnly,
    /// `(decoded key, decoded value)` pairs.
    KeyValuePairs,
}

type Extractor<O> = dyn Fn(&KeyedEntry) -> Result<O, (EntryPart, CodecError)> + Send + Sync;

/// Caller-supplied contract for one read of a keyed state: the state name,
/// the codecs, and the record shape.
///
/// The reader never picks a codec itself. A codec that disagrees with the
/// persisted bytes fails the read.
pub struct StateDescriptor<O> {
    state_name: String,
    mode: ExtractionMode,
    expected_kind: Option<StateKind>,
    extract: Arc<Extractor<O>>,
}

impl<O> Clone for StateDescriptor<O> {
    fn clone(&self) -> Self {
        Self {
            state_name: self.state_name.clone(),
            mode: self.mode,
            expected_kind: self.expected_kind,
            extract: Arc::clone(&self.extract),
        }
    }
}

impl<O> fmt::Debug for StateDescriptor<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateDescriptor")
            .field("state_name", &self.state_name)
            .field("mode", &self.mode)
            .field("expected_kind", &self.expected_kind)
            .finish_non_exhaustive()
    }
}

impl<O> StateDescriptor<O> {
    /// Descriptor with a custom extraction step. The extractor reports which
    /// part of the entry failed to decode.
    pub fn from_fn<F>(state_name: impl Into<String>, mode: ExtractionMode, extract: F) -> Self
    where
        F: Fn(&KeyedEntry) -> Result<O, (EntryPart, CodecError)> + Send + Sync + 'static,
    {
        Self {
            state_name: state_name.into(),
            mode,
            expected_kind: None,
            extract: Arc::new(extract),
        }
    }

    /// Read the values of `state_name`, decoded with `value_codec`.
    pub fn values<C>(state_name: impl Into<String>, value_codec: C) -> Self
    where
        C: StateCodec<Value = O>,
    {
        Self::from_fn(state_name, ExtractionMode::ValuesOnly, move |entry| {
            value_codec
                .decode(&entry.value)
                .map_err(|e| (EntryPart::Value, e))
        })
    }

    /// Read only the keys of `state_name`, decoded with `key_codec`.
    pub fn keys<C>(state_name: impl Into<String>, key_codec: C) -> Self
    where
        C: StateCodec<Value = O>,
    {
        Self::from_fn(state_name, ExtractionMode::ValuesOnly, move |entry| {
            key_codec.decode(&entry.key).map_err(|e| (EntryPart::Key, e))
        })
    }

    pub fn state_name(&self) -> &str {
        &self.state_name
    }

    pub fn mode(&self) -> ExtractionMode {
        self.mode
    }

    pub fn expected_kind(&self) -> Option<StateKind> {
        self.expected_kind
    }

    /// Same decoding against another state.
    pub fn with_state_name(mut self, state_name: impl Into<String>) -> Self {
        self.state_name = state_name.into();
        self
    }

    /// Fail reads of a state registered with another kind.
    pub fn with_expected_kind(mut self, kind: StateKind) -> Self {
        self.expected_kind = Some(kind);
        self
    }

    /// Decode one raw entry.
    pub fn extract(&self, entry: &KeyedEntry) -> Result<O, (EntryPart, CodecError)> {
        (self.extract)(entry)
    }
}

impl<K, V> StateDescriptor<(K, V)> {
    /// Read `(key, value)` pairs of `state_name`.
    pub fn kv_pairs<KC, VC>(state_name: impl Into<String>, key_codec: KC, value_codec: VC) -> Self
    where
        KC: StateCodec<Value = K>,
        VC: StateCodec<Value = V>,
    {
        Self::from_fn(state_name, ExtractionMode::KeyValuePairs, move |entry| {
            let key = key_codec
                .decode(&entry.key)
                .map_err(|e| (EntryPart::Key, e))?;
            let value = value_codec
                .decode(&entry.value)
                .map_err(|e| (EntryPart::Value, e))?;
            Ok((key, value))
        })
    }
}
