//! Read access to checkpoint storage.

mod fs;

pub use fs::FsCheckpointStorage;

use std::path::{Path, PathBuf};

use bravo_core::Result;
use bytes::Bytes;

/// Abstraction over where checkpoint files live.
///
/// Checkpoints are immutable once written, so implementations need no
/// coordination between concurrent readers.
#[async_trait::async_trait]
pub trait CheckpointStorage: Send + Sync {
    /// Resolve a location (descriptor file, checkpoint directory or base
    /// directory) to the path of its root descriptor.
    async fn resolve_metadata(&self, location: &Path) -> Result<PathBuf>;

    /// Read a whole root descriptor.
    async fn read_metadata(&self, path: &Path) -> Result<Bytes>;

    /// Read `length` bytes at `offset`. Short files fail with
    /// `UnexpectedEof`.
    async fn read_range(&self, path: &Path, offset: u64, length: u64) -> std::io::Result<Bytes>;

    /// Checkpoint ids below a base directory, ascending.
    async fn list_checkpoints(&self, base: &Path) -> Result<Vec<u64>>;
}
