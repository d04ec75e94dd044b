//! Typed reading of checkpoint state.
//!
//! A read names a state and the codecs to decode it with
//! ([`StateDescriptor`]), runs over every reconstructed subtask of an
//! operator and returns one unordered collection of records:
//!
//! ```ignore
//! use bravo_core::{MapCodec, ReaderConfig, StringCodec};
//! use bravo_reader::{for_window_state_kv_pairs, OperatorStateReader};
//!
//! let reader = OperatorStateReader::open(path, "test-reducer", ReaderConfig::default()).await?;
//! let pairs = reader
//!     .read(&for_window_state_kv_pairs(StringCodec, MapCodec::new(StringCodec, StringCodec)))
//!     .await?;
//! ```
//!
//! Records of different subtasks arrive in no particular order, and
//! duplicates are kept.

mod descriptor;
mod read;
mod reader;
mod window;

pub use bravo_state::{
    open_operator_backends, reconstruct_operator, reconstruct_subtask, OperatorBackends,
    ReconstructedBackend, RegisteredStateNames,
};
pub use descriptor::{ExtractionMode, StateDescriptor};
pub use read::{read, read_backend, read_broadcast_state, read_iter, read_list_state, read_with};
pub use reader::OperatorStateReader;
pub use window::{
    for_window_state_entries, for_window_state_kv_pairs, for_window_state_values, WindowEntry,
};

/// Keyed and broadcast state names a backend can serve.
pub fn registered_state_names(backend: &ReconstructedBackend) -> RegisteredStateNames {
    backend.registered_state_names()
}
