pub mod file;
pub mod gcs;
pub mod s3;

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;

use crate::error::{CacheError, CacheResult};

/// Uniform capability over a remote or local store: validate a URL, open a
/// read or write handle, report size. One instance is bound to exactly one
/// URL for its lifetime, constructed per-URL rather than per-bucket.
#[async_trait]
pub trait Scheme: Send + Sync {
    /// Reads the entire object into memory. The cache only ever moves
    /// whole files, so there is no partial-read API to support.
    async fn open_read(&self) -> CacheResult<Bytes>;

    /// Opens a scoped write handle. The returned [`ScopedWriter`] buffers in
    /// memory; the caller MUST call [`ScopedWriter::finish`] to upload, since
    /// Rust's `Drop` cannot run async code on scope exit.
    async fn open_write(&self) -> CacheResult<ScopedWriter>;

    /// Size of the object in bytes.
    async fn size(&self) -> CacheResult<u64>;
}

type UploadFuture = Pin<Box<dyn Future<Output = CacheResult<()>> + Send>>;
type UploadFn = Box<dyn FnOnce(Vec<u8>) -> UploadFuture + Send>;

/// A write handle that buffers bytes in memory and uploads on an explicit
/// [`finish`](ScopedWriter::finish) call.
pub struct ScopedWriter {
    buffer: Vec<u8>,
    upload: UploadFn,
}

impl ScopedWriter {
    fn new(upload: UploadFn) -> Self {
        Self {
            buffer: Vec::new(),
            upload,
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Uploads the buffered content and consumes the writer. Must be called
    /// exactly once; a writer dropped without calling this never uploads.
    pub async fn finish(self) -> CacheResult<()> {
        (self.upload)(self.buffer).await
    }
}

/// Normalizes a bare path (no `scheme://` prefix) into an absolute `file://`
/// URL; URLs that already carry a scheme pass through unchanged.
pub fn normalize_url(url: &str) -> CacheResult<String> {
    if url.contains("://") {
        return Ok(url.to_string());
    }
    let absolute = std::path::absolute(url).map_err(CacheError::from)?;
    Ok(format!("file://{}", absolute.display()))
}

/// Splits bucket/key (or bucket/name) out of the scheme-stripped remainder of
/// a `s3://` or `gs://` URL: the netloc is the bucket, the rest of the path
/// (leading `/` stripped) is the key.
pub(crate) fn split_bucket_key(rest: &str) -> (String, String) {
    match rest.split_once('/') {
        Some((bucket, key)) => (bucket.to_string(), key.to_string()),
        None => (rest.to_string(), String::new()),
    }
}

/// Per-deployment knobs that individual scheme backends need but that don't
/// belong in a URL: currently just the S3 region, carried from
/// [`crate::config::S3SchemeConfig`] down to [`s3::construct`]. A cache
/// holds one of these for its whole lifetime and passes it to every scheme
/// call it makes.
#[derive(Debug, Clone, Default)]
pub struct SchemeSettings {
    pub s3_region: Option<String>,
}

/// Factory that dispatches on URL scheme. Schemes are tried in declaration
/// order; the first whose predicate accepts the (normalized) URL wins. New
/// schemes register here rather than being discovered via reflection.
pub async fn factory(url: &str, settings: &SchemeSettings) -> CacheResult<Box<dyn Scheme>> {
    let normalized = normalize_url(url)?;

    if file::validate(&normalized) {
        return file::construct(&normalized).map(|s| Box::new(s) as Box<dyn Scheme>);
    }
    if s3::validate(&normalized) {
        return s3::construct(&normalized, settings.s3_region.clone())
            .await
            .map(|s| Box::new(s) as Box<dyn Scheme>);
    }
    if gcs::validate(&normalized) {
        return gcs::construct(&normalized)
            .await
            .map(|s| Box::new(s) as Box<dyn Scheme>);
    }

    Err(CacheError::SchemeNotFound(normalized))
}

/// Convenience wrapper: size of whatever `url` points to.
pub async fn get_size(url: &str, settings: &SchemeSettings) -> CacheResult<u64> {
    factory(url, settings).await?.size().await
}

/// Copies the whole object at `from_url` to `to_url`, going through the
/// scheme layer on both ends so any combination of file/s3/gs is supported.
pub async fn copy_url(from_url: &str, to_url: &str, settings: &SchemeSettings) -> CacheResult<()> {
    let from = factory(from_url, settings).await?;
    let to = factory(to_url, settings).await?;

    debug!("copying {from_url} -> {to_url}");
    let data = from.open_read().await?;
    let mut writer = to.open_write().await?;
    writer.write(&data);
    writer.finish().await
}
