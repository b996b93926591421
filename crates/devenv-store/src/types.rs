//! Value types returned by [`crate::store::ObjectStore`] operations.

use chrono::{DateTime, Utc};

/// A single object as returned by [`crate::store::ObjectStore::list`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

/// A page of [`crate::store::ObjectStore::list`] results: the objects found
/// directly under the prefix, and the immediate child "directory" segments
/// (delimited by `/`) — used by `list-backups` to enumerate machine/backup
/// names without listing every object underneath.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectMeta>,
    pub common_prefixes: Vec<String>,
}
