//! Persistence for a cache's on-disk state file, written as
//! `.cache.pkl` in the cache directory. Contents are JSON rather than a
//! pickle; the filename is kept for layout compatibility but the format
//! itself is not part of the external interface.

use std::path::{Path, PathBuf};

use log::debug;
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;

use crate::error::{CacheError, CacheResult};

pub const METADATA_FILENAME: &str = ".cache.pkl";

pub fn metadata_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(METADATA_FILENAME)
}

/// Loads and deserializes the metadata file, if it exists. Returns `Ok(None)`
/// when absent, distinguishing "never initialized" from a read/parse error.
pub async fn load<T: DeserializeOwned>(cache_dir: &Path) -> CacheResult<Option<T>> {
    let path = metadata_path(cache_dir);
    if !fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(None);
    }

    let raw = fs::read(&path).await?;
    let value = serde_json::from_slice(&raw).map_err(|e| {
        CacheError::StateCorrupt(format!("failed to parse {}: {e}", path.display()))
    })?;
    Ok(Some(value))
}

/// Writes metadata atomically: serialize, write to a temp file opened for
/// writing, then rename over the real path, so a half-written file is never
/// observable to a concurrent reader.
pub async fn save<T: Serialize>(cache_dir: &Path, value: &T) -> CacheResult<()> {
    fs::create_dir_all(cache_dir).await?;
    let path = metadata_path(cache_dir);
    let temp_path = path.with_extension("pkl.tmp");

    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| CacheError::StateCorrupt(format!("failed to serialize metadata: {e}")))?;

    fs::write(&temp_path, json).await?;
    fs::rename(&temp_path, &path).await?;

    debug!("saved cache metadata to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        groups: Vec<Vec<String>>,
        current_group: usize,
    }

    #[tokio::test]
    async fn load_returns_none_when_absent() {
        let dir = tempdir().unwrap();
        let loaded: Option<Sample> = load(dir.path()).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn roundtrips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let value = Sample {
            groups: vec![vec!["a.wav".to_string()], vec!["b.wav".to_string()]],
            current_group: 1,
        };

        save(dir.path(), &value).await.unwrap();
        let loaded: Option<Sample> = load(dir.path()).await.unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[tokio::test]
    async fn load_reports_state_corrupt_on_bad_json() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path()).await.unwrap();
        fs::write(metadata_path(dir.path()), b"not json")
            .await
            .unwrap();

        let err = load::<Sample>(dir.path()).await.unwrap_err();
        assert!(matches!(err, CacheError::StateCorrupt(_)));
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file_behind() {
        let dir = tempdir().unwrap();
        let value = Sample {
            groups: vec![],
            current_group: 0,
        };
        save(dir.path(), &value).await.unwrap();
        assert!(!dir.path().join(".cache.pkl.tmp").exists());
        assert!(dir.path().join(".cache.pkl").exists());
    }
}
