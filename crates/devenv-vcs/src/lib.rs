//! jj (Jujutsu) abstraction layer for devenv.
//!
//! This crate defines the [`JjDriver`] trait — the single interface through
//! which all other devenv crates interact with jj. No devenv crate should
//! spawn the `jj` binary directly; instead they depend on `devenv-vcs` and
//! program against the trait.
//!
//! # Crate layout
//!
//! - [`driver`] — the [`JjDriver`] trait definition.
//! - [`jj_cli`] — the real, subprocess-backed implementation.
//! - [`fake`] — an in-memory test double.
//! - [`types`] — value types used in trait signatures.
//! - [`error`] — the [`JjError`] enum returned by all trait methods.

pub mod driver;
pub mod error;
pub mod fake;
pub mod jj_cli;
pub mod parse;
pub mod types;

pub use driver::JjDriver;
pub use error::JjError;
pub use fake::{FakeJjDriver, FakeRepo};
pub use jj_cli::JjCli;
pub use types::{
    BookmarkRecord, ChangeId, CommitId, RemoteRecord, UncommittedRecord, WorkingCopyState,
};
