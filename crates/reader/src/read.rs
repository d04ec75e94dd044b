//! Reading typed records out of reconstructed backends.
//!
//! Subtasks are read independently and their records concatenated. The
//! merged order is unspecified; callers needing a stable order sort.

use std::sync::Arc;

use bravo_core::{CodecError, EntryPart, ReadError, ReaderConfig, Result, StateCodec};
use bravo_state::{KeyedEntry, KeyedStateTable, OperatorBackends, ReconstructedBackend};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::descriptor::StateDescriptor;

/// Read `descriptor` from every backend with the default worker bound.
pub async fn read<O>(backends: &OperatorBackends, descriptor: &StateDescriptor<O>) -> Result<Vec<O>>
where
    O: Send + 'static,
{
    read_with(backends, descriptor, &ReaderConfig::default()).await
}

/// Read `descriptor` from every backend, decoding up to
/// `config.worker_bound()` subtasks at once.
///
/// Fails with [`ReadError::StateNotFound`] if any backend lacks the state
/// and with [`ReadError::TypeMismatch`] on the first entry a codec rejects.
pub async fn read_with<O>(
    backends: &OperatorBackends,
    descriptor: &StateDescriptor<O>,
    config: &ReaderConfig,
) -> Result<Vec<O>>
where
    O: Send + 'static,
{
    if !backends.is_complete() {
        warn!(
            uid = backends.uid(),
            state = descriptor.state_name(),
            skipped = backends.failures().len(),
            "Reading an incomplete set of subtasks"
        );
    }

    let tasks = backends.iter().map(|backend| {
        let backend = Arc::clone(backend);
        let descriptor = descriptor.clone();
        async move {
            let subtask = backend.subtask_index();
            match tokio::task::spawn_blocking(move || read_backend(&backend, &descriptor)).await {
                Ok(result) => result,
                Err(e) => Err(ReadError::Worker(format!("subtask {subtask}: {e}"))),
            }
        }
    });
    let mut parts = stream::iter(tasks).buffer_unordered(config.worker_bound());

    let mut records = Vec::new();
    while let Some(part) = parts.next().await {
        records.extend(part?);
    }

    debug!(
        uid = backends.uid(),
        state = descriptor.state_name(),
        records = records.len(),
        "Read keyed state"
    );
    Ok(records)
}

/// Lazily read `descriptor`, subtask by subtask in index order.
pub fn read_iter<'a, O>(
    backends: &'a OperatorBackends,
    descriptor: &'a StateDescriptor<O>,
) -> impl Iterator<Item = Result<O>> + 'a
where
    O: 'a,
{
    backends
        .iter()
        .flat_map(move |backend| -> Box<dyn Iterator<Item = Result<O>> + 'a> {
            match lookup(backend, descriptor) {
                Ok(table) => Box::new(
                    table
                        .entries()
                        .map(move |entry| extract(backend, descriptor, entry)),
                ),
                Err(e) => Box::new(std::iter::once(Err(e))),
            }
        })
}

/// Records of one backend.
pub fn read_backend<O>(backend: &ReconstructedBackend, descriptor: &StateDescriptor<O>) -> Result<Vec<O>> {
    let table = lookup(backend, descriptor)?;
    table
        .entries()
        .map(|entry| extract(backend, descriptor, entry))
        .collect()
}

fn lookup<'a, O>(
    backend: &'a ReconstructedBackend,
    descriptor: &StateDescriptor<O>,
) -> Result<&'a KeyedStateTable> {
    let table = backend.keyed_state(descriptor.state_name())?;
    match descriptor.expected_kind() {
        Some(kind) if kind != table.kind() => Err(ReadError::TypeMismatch {
            uid: backend.operator_uid().to_string(),
            subtask: backend.subtask_index(),
            state: table.name().to_string(),
            offset: None,
            part: EntryPart::Value,
            source: CodecError::Invalid(format!(
                "state is registered as {}, expected {kind}",
                table.kind()
            )),
        }),
        _ => Ok(table),
    }
}

fn extract<O>(
    backend: &ReconstructedBackend,
    descriptor: &StateDescriptor<O>,
    entry: &KeyedEntry,
) -> Result<O> {
    descriptor
        .extract(entry)
        .map_err(|(part, source)| ReadError::TypeMismatch {
            uid: backend.operator_uid().to_string(),
            subtask: backend.subtask_index(),
            state: descriptor.state_name().to_string(),
            offset: Some(entry.offset),
            part,
            source,
        })
}

/// Elements of list state `name`, concatenated over subtasks in index
/// order. Split and union lists alike: each subtask persisted its own share.
pub fn read_list_state<C: StateCodec>(
    backends: &OperatorBackends,
    name: &str,
    codec: &C,
) -> Result<Vec<C::Value>> {
    let mut values = Vec::new();
    for backend in backends.iter() {
        let list = backend.list_state(name)?;
        for element in &list.elements {
            values.push(decode_element(backend, name, element.offset, &element.bytes, codec)?);
        }
    }
    Ok(values)
}

/// The shared value of broadcast state `name`, taken from the lowest subtask
/// carrying it.
pub fn read_broadcast_state<C: StateCodec>(
    backends: &OperatorBackends,
    name: &str,
    codec: &C,
) -> Result<C::Value> {
    let mut first_missing = None;
    for backend in backends.iter() {
        match backend.broadcast_state(name) {
            Ok(element) => {
                return decode_element(backend, name, element.offset, &element.bytes, codec)
            }
            Err(e) => {
                first_missing.get_or_insert(e);
            }
        }
    }
    Err(first_missing.unwrap_or_else(|| ReadError::StateNotFound {
        uid: backends.uid().to_string(),
        subtask: 0,
        state: name.to_string(),
    }))
}

fn decode_element<C: StateCodec>(
    backend: &ReconstructedBackend,
    name: &str,
    offset: u64,
    bytes: &[u8],
    codec: &C,
) -> Result<C::Value> {
    codec.decode(bytes).map_err(|source| ReadError::TypeMismatch {
        uid: backend.operator_uid().to_string(),
        subtask: backend.subtask_index(),
        state: name.to_string(),
        offset: Some(offset),
        part: EntryPart::Value,
        source,
    })
}
