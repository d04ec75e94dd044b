//! Fixture producer for the checkpoint reader.
//!
//! Runs tiny keyed pipelines in memory and writes their state as real
//! checkpoints (data files plus `_metadata`), so reader tests exercise the
//! same bytes a job would leave behind.

pub mod fixtures;
pub mod store;
pub mod window;
pub mod writer;

pub use store::MemoryKeyedStateStore;
pub use window::{WindowReduceOperator, WindowResult, WINDOW_CONTENTS};
pub use writer::{
    data_file_name, encode_metadata, encode_operator_segment, CheckpointWriter, OperatorLayout,
    OperatorSnapshot, SubtaskLayout, SubtaskSnapshot,
};
