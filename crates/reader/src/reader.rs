//! Open an operator once, then run any number of reads against it.

use std::path::Path;

use bravo_checkpoint::{CheckpointMetadata, CheckpointStorage, FsCheckpointStorage};
use bravo_core::{OperatorState, ReaderConfig, Result, StateCodec};
use bravo_state::{reconstruct_operator, OperatorBackends, RegisteredStateNames};

use crate::descriptor::StateDescriptor;
use crate::read;

/// Reader over one operator of one checkpoint.
///
/// # Example
///
/// ```ignore
/// let reader = OperatorStateReader::open(path, "test-reducer", ReaderConfig::default()).await?;
/// let windows = reader
///     .read(&for_window_state_values(MapCodec::new(StringCodec, StringCodec)))
///     .await?;
/// ```
#[derive(Debug)]
pub struct OperatorStateReader {
    metadata: CheckpointMetadata,
    backends: OperatorBackends,
    config: ReaderConfig,
}

impl OperatorStateReader {
    /// Open operator `uid` of the checkpoint at `location` on the local
    /// filesystem.
    pub async fn open(location: impl AsRef<Path>, uid: &str, config: ReaderConfig) -> Result<Self> {
        Self::open_with(&FsCheckpointStorage::new(), location.as_ref(), uid, config).await
    }

    pub async fn open_with<S>(
        storage: &S,
        location: &Path,
        uid: &str,
        config: ReaderConfig,
    ) -> Result<Self>
    where
        S: CheckpointStorage + ?Sized,
    {
        let metadata = CheckpointMetadata::load(storage, location).await?;
        let backends = reconstruct_operator(storage, &metadata, uid, &config).await?;
        Ok(Self {
            metadata,
            backends,
            config,
        })
    }

    pub fn metadata(&self) -> &CheckpointMetadata {
        &self.metadata
    }

    pub fn operator(&self) -> Result<&OperatorState> {
        self.metadata.operator(self.backends.uid())
    }

    pub fn backends(&self) -> &OperatorBackends {
        &self.backends
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn is_complete(&self) -> bool {
        self.backends.is_complete()
    }

    pub fn registered_state_names(&self) -> RegisteredStateNames {
        self.backends.registered_state_names()
    }

    pub fn entry_count(&self, state_name: &str) -> Result<usize> {
        self.backends.entry_count(state_name)
    }

    pub async fn read<O>(&self, descriptor: &StateDescriptor<O>) -> Result<Vec<O>>
    where
        O: Send + 'static,
    {
        read::read_with(&self.backends, descriptor, &self.config).await
    }

    pub fn read_iter<'a, O>(
        &'a self,
        descriptor: &'a StateDescriptor<O>,
    ) -> impl Iterator<Item = Result<O>> + 'a
    where
        O: 'a,
    {
        read::read_iter(&self.backends, descriptor)
    }

    pub fn read_list_state<C: StateCodec>(&self, name: &str, codec: &C) -> Result<Vec<C::Value>> {
        read::read_list_state(&self.backends, name, codec)
    }

    pub fn read_broadcast_state<C: StateCodec>(&self, name: &str, codec: &C) -> Result<C::Value> {
        read::read_broadcast_state(&self.backends, name, codec)
    }
}
