//! The file descriptor shared by both cache shapes: a URL paired with its
//! size in bytes, known up front so fetch planning never has to re-query
//! the remote store.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub url: String,
    pub size: u64,
}

impl FileDescriptor {
    pub fn new(url: impl Into<String>, size: u64) -> Self {
        Self {
            url: url.into(),
            size,
        }
    }

    /// The local basename a cached copy of this descriptor is stored under.
    pub fn basename(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or(&self.url)
    }
}
