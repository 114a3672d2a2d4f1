use async_trait::async_trait;
use bytes::Bytes;
use log::debug;

use super::{CacheError, CacheResult, Scheme, ScopedWriter};

/// Local filesystem scheme: direct `tokio::fs` reads/writes, size via stat.
pub struct FileScheme {
    path: std::path::PathBuf,
}

impl FileScheme {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

pub(crate) fn validate(url: &str) -> bool {
    url.starts_with("file://")
}

pub(crate) fn construct(url: &str) -> CacheResult<FileScheme> {
    let path = url
        .strip_prefix("file://")
        .ok_or_else(|| CacheError::SchemeNotFound(url.to_string()))?;
    Ok(FileScheme::new(path))
}

#[async_trait]
impl Scheme for FileScheme {
    async fn open_read(&self) -> CacheResult<Bytes> {
        let data = tokio::fs::read(&self.path).await?;
        Ok(Bytes::from(data))
    }

    async fn open_write(&self) -> CacheResult<ScopedWriter> {
        let path = self.path.clone();
        Ok(ScopedWriter::new(Box::new(move |buffer| {
            Box::pin(async move {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                debug!("writing {} bytes to {}", buffer.len(), path.display());
                tokio::fs::write(&path, buffer).await?;
                Ok(())
            })
        })))
    }

    async fn size(&self) -> CacheResult<u64> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        Ok(metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn validates_file_scheme_prefix() {
        assert!(validate("file:///abs/path"));
        assert!(!validate("s3://bucket/key"));
    }

    #[tokio::test]
    async fn roundtrip_read_write_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let scheme = FileScheme::new(&path);

        let mut writer = scheme.open_write().await.unwrap();
        writer.write(b"hello world");
        writer.finish().await.unwrap();

        assert_eq!(scheme.size().await.unwrap(), 11);
        assert_eq!(scheme.open_read().await.unwrap(), bytes::Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn open_write_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deep/f.bin");
        let scheme = FileScheme::new(&path);

        let mut writer = scheme.open_write().await.unwrap();
        writer.write(b"data");
        writer.finish().await.unwrap();

        assert!(path.exists());
    }

    #[tokio::test]
    async fn size_of_missing_file_errors() {
        let dir = tempdir().unwrap();
        let scheme = FileScheme::new(dir.path().join("missing.bin"));
        assert!(scheme.size().await.is_err());
    }
}
