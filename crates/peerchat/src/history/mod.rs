//! Local chat history persistence.
//!
//! The history lives in a single JSON file holding the ordered message log.
//! [`HistoryStore`] is the only component allowed to touch that file; the
//! HTTP handler and the sync loop both go through it.

mod error;
mod store;

pub use error::{StoreError, StoreResult};
pub use store::{HistoryConfig, HistoryStore};
