//! Peer-to-peer chat history sync.
//!
//! Each peer keeps an append-only message log on disk, serves it at
//! `GET /history` and periodically pulls a longer log from peers it finds in
//! its own history. [`runtime::PeerRuntime`] wires the pieces together.

pub mod api;
pub mod clock;
pub mod fetch;
pub mod history;
pub mod ledger;
pub mod local;
pub mod runtime;
pub mod sync;

pub use runtime::{NodeConfig, PeerRuntime, RuntimeConfig};
