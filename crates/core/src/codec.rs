//! Caller-supplied codecs for state keys, namespaces and values.
//!
//! The reader never infers types from data: every read names the codec for
//! each part it decodes, and a codec that disagrees with the bytes fails with
//! a [`CodecError`] instead of guessing.
//!
//! Codecs decode a complete slice. Bytes left over after decoding are an
//! error, which catches most "wrong codec" mistakes early.

use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;

use bincode::Options;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::CodecError;
use crate::window::TimeWindow;
use crate::wire::{WireReader, WireWrite};

/// Typed encode/decode pair for one state part.
pub trait StateCodec: Send + Sync + 'static {
    type Value: Send + 'static;

    fn encode(&self, value: &Self::Value, out: &mut BytesMut) -> Result<(), CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Value, CodecError>;

    fn to_bytes(&self, value: &Self::Value) -> Result<Bytes, CodecError> {
        let mut out = BytesMut::new();
        self.encode(value, &mut out)?;
        Ok(out.freeze())
    }
}

/// Raw UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl StateCodec for StringCodec {
    type Value = String;

    fn encode(&self, value: &String, out: &mut BytesMut) -> Result<(), CodecError> {
        out.put_slice(value.as_bytes());
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        Ok(std::str::from_utf8(bytes)?.to_owned())
    }
}

/// Big-endian `i64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Codec;

impl StateCodec for I64Codec {
    type Value = i64;

    fn encode(&self, value: &i64, out: &mut BytesMut) -> Result<(), CodecError> {
        out.put_i64(*value);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<i64, CodecError> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| CodecError::Length {
            expected: 8,
            actual: bytes.len(),
        })?;
        Ok(i64::from_be_bytes(raw))
    }
}

/// Bytes as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl StateCodec for BytesCodec {
    type Value = Vec<u8>;

    fn encode(&self, value: &Vec<u8>, out: &mut BytesMut) -> Result<(), CodecError> {
        out.put_slice(value);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}

/// `bincode` 1.x with fixed-width integers, the encoding the engine's
/// memory state backend uses for arbitrary serde types.
pub struct BincodeCodec<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for BincodeCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> StateCodec for BincodeCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Value = T;

    fn encode(&self, value: &T, out: &mut BytesMut) -> Result<(), CodecError> {
        out.put_slice(&bincode::serialize(value)?);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .reject_trailing_bytes()
            .deserialize(bytes)?)
    }
}

/// `u64 start, u64 end`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeWindowCodec;

impl StateCodec for TimeWindowCodec {
    type Value = TimeWindow;

    fn encode(&self, value: &TimeWindow, out: &mut BytesMut) -> Result<(), CodecError> {
        out.put_u64(value.start);
        out.put_u64(value.end);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<TimeWindow, CodecError> {
        if bytes.len() != 16 {
            return Err(CodecError::Length {
                expected: 16,
                actual: bytes.len(),
            });
        }
        let mut reader = WireReader::new(bytes);
        let start = reader.read_u64()?;
        let end = reader.read_u64()?;
        if end < start {
            return Err(CodecError::Invalid(format!(
                "window end {end} precedes start {start}"
            )));
        }
        Ok(TimeWindow::new(start, end))
    }
}

/// `u32 count` followed by `blob key, blob value` pairs.
#[derive(Debug, Clone, Default)]
pub struct MapCodec<K, V> {
    key: K,
    value: V,
}

impl<K, V> MapCodec<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }
}

impl<K, V> StateCodec for MapCodec<K, V>
where
    K: StateCodec,
    K::Value: Eq + Hash,
    V: StateCodec,
{
    type Value = HashMap<K::Value, V::Value>;

    fn encode(&self, map: &Self::Value, out: &mut BytesMut) -> Result<(), CodecError> {
        out.put_u32(map.len() as u32);
        for (key, value) in map {
            out.put_blob(&self.key.to_bytes(key)?)?;
            out.put_blob(&self.value.to_bytes(value)?)?;
        }
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Self::Value, CodecError> {
        let mut reader = WireReader::new(bytes);
        let count = reader.read_u32()? as usize;
        let mut map = HashMap::with_capacity(count.min(reader.remaining() / 8));
        for _ in 0..count {
            let key = self.key.decode(reader.read_blob()?)?;
            let value = self.value.decode(reader.read_blob()?)?;
            if map.insert(key, value).is_some() {
                return Err(CodecError::Invalid("duplicate map key".into()));
            }
        }
        reader.finish()?;
        Ok(map)
    }
}

/// `u32 count` followed by one blob per element.
#[derive(Debug, Clone, Default)]
pub struct ListCodec<C> {
    element: C,
}

impl<C> ListCodec<C> {
    pub fn new(element: C) -> Self {
        Self { element }
    }
}

impl<C: StateCodec> StateCodec for ListCodec<C> {
    type Value = Vec<C::Value>;

    fn encode(&self, items: &Self::Value, out: &mut BytesMut) -> Result<(), CodecError> {
        out.put_u32(items.len() as u32);
        for item in items {
            out.put_blob(&self.element.to_bytes(item)?)?;
        }
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Self::Value, CodecError> {
        let mut reader = WireReader::new(bytes);
        let count = reader.read_u32()? as usize;
        let mut items = Vec::with_capacity(count.min(reader.remaining() / 4));
        for _ in 0..count {
            items.push(self.element.decode(reader.read_blob()?)?);
        }
        reader.finish()?;
        Ok(items)
    }
}
