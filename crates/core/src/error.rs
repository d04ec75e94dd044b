//! Error taxonomy for checkpoint reading.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for reader operations.
pub type Result<T, E = ReadError> = std::result::Result<T, E>;

/// Low-level framing errors raised by [`crate::wire::WireReader`].
#[derive(Debug, Error)]
pub enum WireError {
    #[error("truncated at offset {offset}: needed {needed} bytes, {remaining} left")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("{remaining} trailing bytes at offset {offset}")]
    TrailingBytes { offset: usize, remaining: usize },

    #[error("invalid utf-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("{what} of {len} bytes exceeds the {max} byte limit")]
    TooLong {
        what: &'static str,
        len: usize,
        max: usize,
    },

    #[error("invalid {what} tag {value} at offset {offset}")]
    InvalidTag {
        offset: usize,
        what: &'static str,
        value: u32,
    },
}

/// Structural violation in persisted descriptor or segment bytes.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("{0}")]
    Invalid(String),
}

impl FormatError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        FormatError::Invalid(reason.into())
    }
}

/// A caller-supplied codec disagreed with the bytes it was given.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("invalid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("{0}")]
    Invalid(String),
}

/// Which part of a keyed entry failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPart {
    Key,
    Namespace,
    Value,
}

impl fmt::Display for EntryPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryPart::Key => f.write_str("key"),
            EntryPart::Namespace => f.write_str("namespace"),
            EntryPart::Value => f.write_str("value"),
        }
    }
}

/// Errors surfaced by the metadata loader, the backend reconstructor and
/// the state readers.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("operator `{uid}` not found in checkpoint {path} (present: {available:?})")]
    OperatorNotFound {
        uid: String,
        path: PathBuf,
        available: Vec<String>,
    },

    #[error("no checkpoint metadata found under {path}")]
    MetadataNotFound { path: PathBuf },

    #[error("corrupt checkpoint metadata {path}: {reason}")]
    CorruptMetadata { path: PathBuf, reason: String },

    #[error("corrupt state of operator `{uid}` subtask {subtask} in {path}: {reason}")]
    CorruptState {
        uid: String,
        subtask: u32,
        path: PathBuf,
        reason: String,
    },

    #[error("operator `{uid}` has no subtask {subtask} (parallelism {parallelism})")]
    SubtaskOutOfRange {
        uid: String,
        subtask: u32,
        parallelism: u32,
    },

    #[error("state `{state}` is not registered in operator `{uid}` subtask {subtask}")]
    StateNotFound {
        uid: String,
        subtask: u32,
        state: String,
    },

    #[error(
        "cannot decode {part} of state `{state}` (operator `{uid}`, subtask {subtask}{}): {source}",
        at_offset(.offset)
    )]
    TypeMismatch {
        uid: String,
        subtask: u32,
        state: String,
        /// Offset of the offending record in its data file. Absent when the
        /// mismatch concerns the state as a whole.
        offset: Option<u64>,
        part: EntryPart,
        #[source]
        source: CodecError,
    },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid reader config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("reader worker failed: {0}")]
    Worker(String),
}

fn at_offset(offset: &Option<u64>) -> String {
    offset.map_or_else(String::new, |offset| format!(", offset {offset}"))
}

impl ReadError {
    /// True for failures confined to one subtask's byte ranges.
    pub fn is_subtask_scoped(&self) -> bool {
        matches!(self, ReadError::CorruptState { .. })
    }

    /// Subtask index this error is attributed to, if any.
    pub fn subtask(&self) -> Option<u32> {
        match self {
            ReadError::CorruptState { subtask, .. }
            | ReadError::SubtaskOutOfRange { subtask, .. }
            | ReadError::StateNotFound { subtask, .. }
            | ReadError::TypeMismatch { subtask, .. } => Some(*subtask),
            _ => None,
        }
    }
}
