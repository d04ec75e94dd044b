//! Checkpoint metadata loading.
//!
//! Locates a checkpoint's root descriptor and parses it into an index of
//! operators and, per operator, the state handles of every subtask:
//!
//! ```ignore
//! use bravo_checkpoint::{CheckpointMetadata, FsCheckpointStorage};
//!
//! let metadata = CheckpointMetadata::load(&FsCheckpointStorage::new(), path).await?;
//! for uid in metadata.operator_uids() {
//!     println!("{uid}");
//! }
//! let handles = metadata.subtask_handles("test-reducer")?;
//! ```

mod metadata;
pub mod storage;

pub use metadata::CheckpointMetadata;
pub use storage::{CheckpointStorage, FsCheckpointStorage};
