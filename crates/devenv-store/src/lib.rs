//! Object-store abstraction layer for devenv.
//!
//! Defines the [`ObjectStore`] trait and two implementations: the real
//! [`S3Store`] (backed by `aws-sdk-s3`) and an in-memory [`MemoryStore`]
//! fake used by orchestrator tests.

pub mod error;
pub mod memory;
pub mod retry;
pub mod s3;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use s3::S3Store;
pub use store::{DownloadOutcome, ObjectStore};
pub use types::{ListPage, ObjectMeta};
