//! File-system based checkpoint storage.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bravo_core::format::{CHECKPOINT_DIR_PREFIX, METADATA_FILE_NAME};
use bravo_core::{ReadError, Result};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use super::CheckpointStorage;

/// Reads checkpoints from a local (or mounted) file system.
///
/// Expected layout:
/// ```text
/// base_path/
///   chk-1/
///     _metadata
///     <operator>-0.state
///     <operator>-1.state
///   chk-2/
///     ...
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct FsCheckpointStorage;

impl FsCheckpointStorage {
    pub fn new() -> Self {
        Self
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ReadError {
    ReadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[async_trait::async_trait]
impl CheckpointStorage for FsCheckpointStorage {
    async fn resolve_metadata(&self, location: &Path) -> Result<PathBuf> {
        let meta = match tokio::fs::metadata(location).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReadError::MetadataNotFound {
                    path: location.to_path_buf(),
                })
            }
            Err(e) => return Err(io_error(location, e)),
        };

        if meta.is_file() {
            return Ok(location.to_path_buf());
        }

        let direct = location.join(METADATA_FILE_NAME);
        if is_file(&direct).await {
            return Ok(direct);
        }

        // Base directory: newest checkpoint that finished writing its descriptor.
        for checkpoint_id in self.list_checkpoints(location).await?.into_iter().rev() {
            let candidate = location
                .join(format!("{}{}", CHECKPOINT_DIR_PREFIX, checkpoint_id))
                .join(METADATA_FILE_NAME);
            if is_file(&candidate).await {
                debug!(checkpoint_id, path = %candidate.display(), "Resolved latest checkpoint");
                return Ok(candidate);
            }
        }

        Err(ReadError::MetadataNotFound {
            path: location.to_path_buf(),
        })
    }

    async fn read_metadata(&self, path: &Path) -> Result<Bytes> {
        tokio::fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|e| io_error(path, e))
    }

    async fn read_range(&self, path: &Path, offset: u64, length: u64) -> std::io::Result<Bytes> {
        let mut file = tokio::fs::File::open(path).await?;
        let file_len = file.metadata().await?.len();
        if offset.checked_add(length).map_or(true, |end| end > file_len) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("range {offset}+{length} exceeds file length {file_len}"),
            ));
        }
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn list_checkpoints(&self, base: &Path) -> Result<Vec<u64>> {
        let mut checkpoints = Vec::new();
        let mut entries = tokio::fs::read_dir(base)
            .await
            .map_err(|e| io_error(base, e))?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(base, e))? {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(id) = name_str.strip_prefix(CHECKPOINT_DIR_PREFIX) {
                if let Ok(id) = id.parse::<u64>() {
                    checkpoints.push(id);
                }
            }
        }

        checkpoints.sort_unstable();
        Ok(checkpoints)
    }
}
