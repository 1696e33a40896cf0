//! Local chat engine supervision.
//!
//! The chat engine is an external program (the Go node by default) that owns
//! the interactive transport and appends to the history file. This module
//! launches it once with the peer's identity and keeps a handle so the
//! runtime can reap it on shutdown.

mod engine;
mod process;

pub use engine::{ChatEngine, EngineConfig, EngineIdentity, render_args};
pub use process::{EngineHandle, format_exit_status};
