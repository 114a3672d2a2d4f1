//! Double-buffered cache: partitions a corpus into roughly equal-sized
//! groups once, then keeps one group "active" in slot A or B while the
//! next group stages into the other slot in the background.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::descriptor::FileDescriptor;
use crate::error::{CacheError, CacheResult};
use crate::metadata;
use crate::scheme::{self, SchemeSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    fn dirname(self) -> &'static str {
        match self {
            Slot::A => "A",
            Slot::B => "B",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    groups: Vec<Vec<FileDescriptor>>,
    current_group: usize,
    current_slot: Slot,
}

struct MutableState {
    current_group: usize,
    current_slot: Slot,
}

/// Double-buffered prefetching cache over a directory of files matching an
/// extension filter.
pub struct DBCache {
    to_dir: PathBuf,
    groups: Vec<Vec<FileDescriptor>>,
    state: Mutex<MutableState>,
    caching: Arc<AtomicBool>,
    scheme_settings: SchemeSettings,
}

impl DBCache {
    /// Loads persisted state if present, otherwise partitions `from_dir`
    /// (filtered by `extension`) into groups targeting `group_size` bytes
    /// each, then kicks off staging the next group.
    pub async fn construct(
        from_dir: &Path,
        to_dir: &Path,
        group_size: u64,
        extension: &str,
        scheme_settings: SchemeSettings,
    ) -> CacheResult<Arc<DBCache>> {
        if let Some(persisted) = metadata::load::<PersistedState>(to_dir).await? {
            let cache = Arc::new(DBCache {
                to_dir: to_dir.to_path_buf(),
                groups: persisted.groups,
                state: Mutex::new(MutableState {
                    current_group: persisted.current_group,
                    current_slot: persisted.current_slot,
                }),
                caching: Arc::new(AtomicBool::new(false)),
                scheme_settings,
            });
            debug!("resumed dbcache from {}", to_dir.display());
            cache.clone().prepare_next().await;
            return Ok(cache);
        }

        let groups = Self::partition(from_dir, group_size, extension).await?;
        let cache = Arc::new(DBCache {
            to_dir: to_dir.to_path_buf(),
            groups,
            state: Mutex::new(MutableState {
                current_group: 0, // sentinel: advanced to 0 by the first prepare_next below
                current_slot: Slot::A,
            }),
            caching: Arc::new(AtomicBool::new(false)),
            scheme_settings,
        });
        // Sentinel index one past the last group, so the first prepare_next
        // targets group 0.
        cache.state.lock().await.current_group = cache.groups.len();

        cache.persist().await?;
        cache.clone().prepare_next().await;
        Ok(cache)
    }

    /// Enumerates `from_dir` for `extension`, computes the target group
    /// count/size, and greedily assigns files to independent groups.
    ///
    /// Sizes accumulate elementwise, every group is its own independent
    /// `Vec`, and the file index advances on every placement. Files left
    /// over once every group has reached its target (a rounding remainder,
    /// since `per_group` is a non-integer average) are dealt out round-robin
    /// across the groups, one file per group per pass, so no single group
    /// absorbs the whole remainder and blows past the per-group size bound.
    async fn partition(
        from_dir: &Path,
        group_size: u64,
        extension: &str,
    ) -> CacheResult<Vec<Vec<FileDescriptor>>> {
        let files = list_files_with_extension(from_dir, extension).await?;

        let mut sizes = Vec::with_capacity(files.len());
        let mut total_size: u64 = 0;
        for path in &files {
            let size = tokio::fs::metadata(path).await?.len();
            total_size += size;
            sizes.push(size);
        }

        let num_groups = if total_size == 0 || group_size == 0 {
            1
        } else {
            ((total_size as f64) / (group_size as f64)).ceil() as usize
        }
        .max(1);
        let per_group = total_size as f64 / num_groups as f64;

        let mut groups: Vec<Vec<FileDescriptor>> = (0..num_groups).map(|_| Vec::new()).collect();
        let mut index = 0usize;
        for group in groups.iter_mut() {
            let mut this_size: u64 = 0;
            while index < files.len() && (this_size as f64 + sizes[index] as f64) < per_group {
                group.push(FileDescriptor::new(
                    files[index].display().to_string(),
                    sizes[index],
                ));
                this_size += sizes[index];
                index += 1;
            }
        }
        // Remainder from rounding: the walk above stops a group once adding
        // the next file would cross `per_group`, which can leave files
        // unassigned once every group has been visited once. Deal them out
        // one per group, cycling, instead of dumping them all on one group.
        let mut next_group = 0usize;
        while index < files.len() {
            groups[next_group % num_groups].push(FileDescriptor::new(
                files[index].display().to_string(),
                sizes[index],
            ));
            next_group += 1;
            index += 1;
        }

        let mut rng = rand::rng();
        for group in groups.iter_mut() {
            group.shuffle(&mut rng);
        }

        Ok(groups)
    }

    pub fn is_caching(&self) -> bool {
        self.caching.load(Ordering::SeqCst)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// The directory currently visible to the consumer.
    pub async fn active_dir(&self) -> PathBuf {
        let state = self.state.lock().await;
        self.to_dir.join(state.current_slot.dirname())
    }

    /// Flips the active slot, advances the group index, and kicks off
    /// staging the group after that. Fails with `BusyError` if a stage is
    /// still in flight.
    pub async fn switch_cache(self: &Arc<Self>) -> CacheResult<()> {
        if self.is_caching() {
            return Err(CacheError::BusyError);
        }
        {
            let mut state = self.state.lock().await;
            state.current_slot = state.current_slot.other();
            state.current_group = (state.current_group + 1) % self.groups.len();
        }
        self.persist().await?;
        self.clone().prepare_next().await;
        Ok(())
    }

    /// Clears and repopulates the opposite slot with the next group, in the
    /// background. Callers observe completion via `is_caching()`.
    async fn prepare_next(self: Arc<Self>) {
        self.caching.store(true, Ordering::SeqCst);

        let (next_index, target_slot) = {
            let state = self.state.lock().await;
            (
                (state.current_group + 1) % self.groups.len(),
                state.current_slot.other(),
            )
        };
        let group = self.groups[next_index].clone();
        let target_dir = self.to_dir.join(target_slot.dirname());
        let scheme_settings = self.scheme_settings.clone();

        tokio::task::spawn(async move {
            match Self::copy_group(&group, &target_dir, &scheme_settings).await {
                Ok(()) => debug!(
                    "staged group {} into {}",
                    next_index,
                    target_dir.display()
                ),
                Err(e) => warn!("failed to stage group {next_index}: {e}"),
            }
            self.caching.store(false, Ordering::SeqCst);
        });
    }

    async fn copy_group(
        group: &[FileDescriptor],
        target_dir: &Path,
        scheme_settings: &SchemeSettings,
    ) -> CacheResult<()> {
        let _ = tokio::fs::remove_dir_all(target_dir).await;
        tokio::fs::create_dir_all(target_dir).await?;
        for desc in group {
            let dest = target_dir.join(desc.basename());
            let dest_url = format!("file://{}", dest.display());
            scheme::copy_url(&desc.url, &dest_url, scheme_settings).await?;
        }
        Ok(())
    }

    async fn persist(&self) -> CacheResult<()> {
        let state = self.state.lock().await;
        let persisted = PersistedState {
            groups: self.groups.clone(),
            current_group: state.current_group,
            current_slot: state.current_slot,
        };
        drop(state);
        metadata::save(&self.to_dir, &persisted).await
    }
}

async fn list_files_with_extension(dir: &Path, extension: &str) -> CacheResult<Vec<PathBuf>> {
    let wanted = extension.trim_start_matches('.');
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(wanted) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;
    use tokio::time::{sleep, Duration};

    async fn write_sample_files(dir: &Path, count: usize, size: usize) {
        for i in 0..count {
            tokio::fs::write(dir.join(format!("f{i:02}.wav")), vec![0u8; size])
                .await
                .unwrap();
        }
    }

    async fn wait_until_idle(cache: &Arc<DBCache>) {
        for _ in 0..200 {
            if !cache.is_caching() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("cache never finished staging");
    }

    #[tokio::test]
    async fn partition_covers_whole_corpus_and_stays_disjoint() {
        let from_dir = tempdir().unwrap();
        write_sample_files(from_dir.path(), 10, 100).await;

        let groups = DBCache::partition(from_dir.path(), 250, "wav").await.unwrap();

        let mut seen = HashSet::new();
        let mut total = 0usize;
        for group in &groups {
            for desc in group {
                assert!(seen.insert(desc.url.clone()), "duplicate across groups");
                total += 1;
            }
        }
        assert_eq!(total, 10);
        assert_eq!(groups.len(), 4);
    }

    #[tokio::test]
    async fn construct_stages_first_group_in_background() {
        let from_dir = tempdir().unwrap();
        let to_dir = tempdir().unwrap();
        write_sample_files(from_dir.path(), 6, 10).await;

        let cache = DBCache::construct(from_dir.path(), to_dir.path(), 30, "wav", SchemeSettings::default())
            .await
            .unwrap();
        wait_until_idle(&cache).await;

        let active = cache.active_dir().await;
        assert!(active.ends_with("A"));

        let staged_dir = to_dir.path().join("B");
        assert!(staged_dir.exists());
        let staged_count = std::fs::read_dir(&staged_dir).unwrap().count();
        assert!(staged_count > 0);
    }

    #[tokio::test]
    async fn switch_cache_rejects_while_busy() {
        let from_dir = tempdir().unwrap();
        let to_dir = tempdir().unwrap();
        write_sample_files(from_dir.path(), 6, 10).await;

        let cache = DBCache::construct(from_dir.path(), to_dir.path(), 30, "wav", SchemeSettings::default())
            .await
            .unwrap();

        // Racing a switch against an in-flight stage should report BusyError
        // at least until the background task finishes.
        if cache.is_caching() {
            let err = cache.switch_cache().await.unwrap_err();
            assert!(matches!(err, CacheError::BusyError));
        }

        wait_until_idle(&cache).await;
        cache.switch_cache().await.unwrap();
        let active = cache.active_dir().await;
        assert!(active.ends_with("B"));
    }

    #[tokio::test]
    async fn resumes_from_persisted_metadata() {
        let from_dir = tempdir().unwrap();
        let to_dir = tempdir().unwrap();
        write_sample_files(from_dir.path(), 4, 10).await;

        let cache = DBCache::construct(from_dir.path(), to_dir.path(), 20, "wav", SchemeSettings::default())
            .await
            .unwrap();
        wait_until_idle(&cache).await;
        cache.switch_cache().await.unwrap();
        wait_until_idle(&cache).await;

        let resumed = DBCache::construct(from_dir.path(), to_dir.path(), 20, "wav", SchemeSettings::default())
            .await
            .unwrap();
        assert_eq!(resumed.group_count(), cache.group_count());
        assert_eq!(resumed.active_dir().await, cache.active_dir().await);
    }
}
