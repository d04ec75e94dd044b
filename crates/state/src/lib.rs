//! Offline reconstruction of subtask state backends.
//!
//! For one operator, reads the byte ranges the checkpoint metadata names for
//! each subtask and rebuilds a read-only [`ReconstructedBackend`] holding the
//! subtask's three state flavors:
//! - keyed state: raw entries grouped by key group
//! - operator list state: plain byte blocks, no key
//! - broadcast state: one shared value per name
//!
//! No type-specific decoding happens here. Readers apply codecs later, so
//! one reconstruction serves any number of reads.
//!
//! # Example
//!
//! ```ignore
//! use bravo_checkpoint::FsCheckpointStorage;
//! use bravo_state::open_operator_backends;
//!
//! let backends = open_operator_backends(&FsCheckpointStorage::new(), path, "test-reducer", &config).await?;
//! for backend in backends.iter() {
//!     println!("{}: {:?}", backend.subtask_index(), backend.registered_state_names());
//! }
//! ```

mod backend;
mod reconstruct;

pub use backend::{
    KeyedEntry, KeyedStateTable, OperatorListState, RawElement, ReconstructedBackend,
    RegisteredStateNames,
};
pub use reconstruct::{
    decode_keyed_segment, decode_operator_segment, open_operator_backends, reconstruct_operator,
    reconstruct_subtask, OperatorBackends,
};
