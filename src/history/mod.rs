//! Persisted translation results
//!
//! The core only appends to [`HISTORY_STORE`] after a successful text-path
//! round trip; listing, deleting and clearing serve the outer surfaces.

mod store;

pub use store::{
    JsonFileStore, MemoryStore, Utterance, UtteranceIdGenerator, UtteranceStore,
    FAVORITES_STORE, HISTORY_STORE,
};
