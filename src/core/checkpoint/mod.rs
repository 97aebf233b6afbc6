//! Suspended-run persistence: the continuation token and its stores.

mod continuation;
mod store;

pub use continuation::{Continuation, CONTINUATION_VERSION};
pub use store::{FileRunStore, MemoryRunStore, RunStore, RunStoreError};
