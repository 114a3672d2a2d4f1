//! Rolling-window cache: a single directory that grows by prefetching
//! blocks of files from a corpus of URLs, then shrinks back to budget on
//! a foreground `update()` call. Recycles evicted files once the corpus
//! of not-yet-cached files is exhausted.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

use crate::descriptor::FileDescriptor;
use crate::error::{CacheError, CacheResult};
use crate::metadata;
use crate::scheme::{self, SchemeSettings};

const BLOCK: usize = 20;
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_CACHE_SIZE: u64 = 1024u64.pow(5); // 1 PB, matches the effectively-unbounded default
const DEFAULT_INCREMENT_PAD: u64 = 1024u64.pow(3); // +1 GiB

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Deques {
    uncached: VecDeque<FileDescriptor>,
    staged: VecDeque<FileDescriptor>,
    active: VecDeque<FileDescriptor>,
    evicted: VecDeque<FileDescriptor>,
}

fn sum(deque: &VecDeque<FileDescriptor>) -> u64 {
    deque.iter().map(|d| d.size).sum()
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    deques: Deques,
    cache_size: u64,
    increment_size: u64,
}

/// Rolling-window prefetching cache over an explicit list of source URLs.
pub struct RWCache {
    to_dir: PathBuf,
    cache_size: u64,
    increment_size: u64,
    deques: Mutex<Deques>,
    stop_signal: Arc<AtomicBool>,
    caching: Arc<AtomicBool>,
    scheme_settings: SchemeSettings,
}

impl RWCache {
    /// Loads persisted state if present, otherwise shuffles `from_urls`,
    /// queries each size, and synchronously fills `active` up to
    /// `cache_size`. Starts the background fetcher before returning.
    pub async fn construct(
        from_urls: Vec<String>,
        to_dir: &Path,
        cache_size: Option<u64>,
        increment_size: Option<u64>,
        scheme_settings: SchemeSettings,
    ) -> CacheResult<Arc<RWCache>> {
        if let Some(persisted) = metadata::load::<PersistedState>(to_dir).await? {
            let cache = Arc::new(RWCache {
                to_dir: to_dir.to_path_buf(),
                cache_size: persisted.cache_size,
                increment_size: persisted.increment_size,
                deques: Mutex::new(persisted.deques),
                stop_signal: Arc::new(AtomicBool::new(true)),
                caching: Arc::new(AtomicBool::new(false)),
                scheme_settings,
            });
            debug!("resumed rwcache from {}", to_dir.display());
            cache.clone().start().await;
            return Ok(cache);
        }

        let cache_size = cache_size.unwrap_or(DEFAULT_CACHE_SIZE);
        let increment_size = increment_size.unwrap_or(cache_size.saturating_add(DEFAULT_INCREMENT_PAD));

        let mut urls = from_urls;
        let mut rng = rand::rng();
        urls.shuffle(&mut rng);

        let mut uncached = VecDeque::new();
        for url in urls {
            let size = scheme::get_size(&url, &scheme_settings).await?;
            uncached.push_back(FileDescriptor::new(url, size));
        }

        tokio::fs::create_dir_all(to_dir).await?;

        let mut active = VecDeque::new();
        let mut active_size = 0u64;
        while let Some(front) = uncached.front() {
            if active_size + front.size > cache_size {
                break;
            }
            let desc = uncached.pop_front().expect("front just checked");
            let dest = to_dir.join(desc.basename());
            scheme::copy_url(&desc.url, &format!("file://{}", dest.display()), &scheme_settings).await?;
            active_size += desc.size;
            active.push_back(desc);
        }

        let deques = Deques {
            uncached,
            staged: VecDeque::new(),
            active,
            evicted: VecDeque::new(),
        };

        let cache = Arc::new(RWCache {
            to_dir: to_dir.to_path_buf(),
            cache_size,
            increment_size,
            deques: Mutex::new(deques),
            stop_signal: Arc::new(AtomicBool::new(true)),
            caching: Arc::new(AtomicBool::new(false)),
            scheme_settings,
        });

        cache.persist().await?;
        cache.clone().start().await;
        Ok(cache)
    }

    pub fn is_caching(&self) -> bool {
        self.caching.load(Ordering::SeqCst)
    }

    /// Clears `stop_signal` and launches the background fetch loop.
    pub async fn start(self: Arc<Self>) {
        self.stop_signal.store(false, Ordering::SeqCst);
        self.caching.store(true, Ordering::SeqCst);
        let this = self.clone();
        tokio::task::spawn(async move {
            this.prepare_next_cache_block().await;
        });
    }

    /// Signals the background loop to stop at its next checkpoint. Does not
    /// interrupt a copy already in flight.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Snapshot of `active`'s local paths under the cache directory.
    pub async fn current_files(&self) -> Vec<PathBuf> {
        let deques = self.deques.lock().await;
        deques
            .active
            .iter()
            .map(|d| self.to_dir.join(d.basename()))
            .collect()
    }

    pub async fn size(&self) -> u64 {
        let deques = self.deques.lock().await;
        sum(&deques.active) + sum(&deques.staged)
    }

    pub async fn active_size(&self) -> u64 {
        let deques = self.deques.lock().await;
        sum(&deques.active)
    }

    /// Promotes all of `staged` onto `active`, then evicts from the head of
    /// `active` until back within `cache_size`.
    pub async fn update(&self) -> CacheResult<()> {
        let mut deques = self.deques.lock().await;
        let promoted = deques.staged.len();
        while let Some(desc) = deques.staged.pop_front() {
            deques.active.push_back(desc);
        }

        let mut evicted = 0usize;
        while sum(&deques.active) > self.cache_size {
            let desc = deques
                .active
                .pop_front()
                .expect("active non-empty while over budget");
            let path = self.to_dir.join(desc.basename());
            tokio::fs::remove_file(&path).await.map_err(|_| {
                CacheError::StateCorrupt(format!(
                    "expected cached file missing during eviction: {}",
                    path.display()
                ))
            })?;
            deques.evicted.push_back(desc);
            evicted += 1;
        }

        info!("update: promoted {promoted} file(s), evicted {evicted} file(s)");
        drop(deques);
        self.persist().await
    }

    /// Background fetch loop. Chains itself by looping rather than
    /// re-spawning, so exactly one task is ever in flight for this cache.
    async fn prepare_next_cache_block(self: Arc<Self>) {
        loop {
            let pending = {
                let mut deques = self.deques.lock().await;
                let mut pending: Vec<FileDescriptor> =
                    deques.uncached.iter().take(BLOCK).cloned().collect();
                if pending.is_empty() && !deques.evicted.is_empty() {
                    deques.uncached = std::mem::take(&mut deques.evicted);
                    pending = deques.uncached.iter().take(BLOCK).cloned().collect();
                }
                pending
            };

            if pending.is_empty() {
                self.caching.store(false, Ordering::SeqCst);
                return;
            }

            let new_size: u64 = pending.iter().map(|d| d.size).sum();
            let max_size = self.cache_size + self.increment_size;
            loop {
                let current = {
                    let deques = self.deques.lock().await;
                    sum(&deques.active) + sum(&deques.staged)
                };
                if new_size + current <= max_size {
                    break;
                }
                if self.stop_signal.load(Ordering::SeqCst) {
                    self.caching.store(false, Ordering::SeqCst);
                    return;
                }
                sleep(POLL_INTERVAL).await;
            }

            if self.stop_signal.load(Ordering::SeqCst) {
                self.caching.store(false, Ordering::SeqCst);
                return;
            }

            match self.copy_block(&pending).await {
                Ok(()) => {
                    {
                        let mut deques = self.deques.lock().await;
                        for desc in &pending {
                            let front = deques.uncached.pop_front();
                            debug_assert_eq!(front.as_ref(), Some(desc));
                            deques.staged.push_back(desc.clone());
                        }
                    }
                    if let Err(e) = self.persist().await {
                        warn!("failed to persist rwcache state: {e}");
                    }
                    debug!("staged block of {} file(s)", pending.len());
                    if self.stop_signal.load(Ordering::SeqCst) {
                        self.caching.store(false, Ordering::SeqCst);
                        return;
                    }
                }
                Err(e) => {
                    warn!("block copy failed, stopping background loop: {e}");
                    self.stop_signal.store(true, Ordering::SeqCst);
                    self.caching.store(false, Ordering::SeqCst);
                    return;
                }
            }
        }
    }

    async fn copy_block(&self, pending: &[FileDescriptor]) -> CacheResult<()> {
        for desc in pending {
            let dest = self.to_dir.join(desc.basename());
            let dest_url = format!("file://{}", dest.display());
            scheme::copy_url(&desc.url, &dest_url, &self.scheme_settings).await?;
        }
        Ok(())
    }

    async fn persist(&self) -> CacheResult<()> {
        let deques = self.deques.lock().await;
        let persisted = PersistedState {
            deques: deques.clone(),
            cache_size: self.cache_size,
            increment_size: self.increment_size,
        };
        drop(deques);
        metadata::save(&self.to_dir, &persisted).await
    }
}

#[cfg(test)]
impl RWCache {
    fn from_parts(to_dir: PathBuf, cache_size: u64, increment_size: u64, deques: Deques) -> Arc<Self> {
        Arc::new(RWCache {
            to_dir,
            cache_size,
            increment_size,
            deques: Mutex::new(deques),
            stop_signal: Arc::new(AtomicBool::new(true)),
            caching: Arc::new(AtomicBool::new(false)),
            scheme_settings: SchemeSettings::default(),
        })
    }
}
