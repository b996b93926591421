//! devenv_core — capture and restore a developer's on-machine working state.
//!
//! The primary interface is the `devenv` CLI binary (in the devenv-cli
//! crate); this crate holds the orchestration logic it wires together.

pub mod agent_sync;
pub mod backup;
pub mod discovery;
pub mod error;
pub mod manifest;
pub mod restore;
pub mod safety;
pub mod settings;
pub mod telemetry;
