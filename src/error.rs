use thiserror::Error;

/// The typed failure surface of the cache engine.
///
/// Callers that need to branch on failure category (e.g. retry on `BusyError`
/// but abort on `StateCorrupt`) match on this directly; everything else in the
/// crate threads `anyhow::Result` the way the rest of the ecosystem does.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no scheme registered for url: {0}")]
    SchemeNotFound(String),

    #[error("mode not supported by this scheme: {0}")]
    InvalidMode(String),

    #[error("operation not supported by this scheme: {0}")]
    Unsupported(String),

    #[error("cache is busy staging the next group/block")]
    BusyError,

    #[error("remote i/o failed: {0}")]
    RemoteIO(#[source] anyhow::Error),

    #[error("cache metadata and filesystem disagree: {0}")]
    StateCorrupt(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::RemoteIO(err.into())
    }
}
