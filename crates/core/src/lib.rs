//! Core types shared by the checkpoint reader crates.
//!
//! - [`handle`]: per-operator, per-subtask state handles from the root descriptor
//! - [`keygroup`]: key-group ranges and key-to-subtask assignment
//! - [`codec`]: caller-supplied typed codecs ([`StateCodec`])
//! - [`wire`]: length-checked binary framing
//! - [`format`]: magic numbers, versions and tags of the on-disk format
//! - [`error`]: the [`ReadError`] taxonomy

pub mod codec;
pub mod config;
pub mod error;
pub mod format;
pub mod handle;
pub mod keygroup;
pub mod window;
pub mod wire;

pub use codec::{
    BincodeCodec, BytesCodec, I64Codec, ListCodec, MapCodec, StateCodec, StringCodec,
    TimeWindowCodec,
};
pub use config::ReaderConfig;
pub use error::{CodecError, EntryPart, FormatError, ReadError, Result, WireError};
pub use format::{DistributionMode, StateKind};
pub use handle::{
    KeyedStateHandle, OperatorState, OperatorStateHandle, StateMetaInfo, SubtaskStateHandle,
};
pub use keygroup::KeyGroupRange;
pub use window::{TimeWindow, Timestamp};
