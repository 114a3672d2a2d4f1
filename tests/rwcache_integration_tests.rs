use std::time::Duration;

use streamcache::rwcache::RWCache;
use streamcache::scheme::SchemeSettings;
use tempfile::tempdir;
use tokio::time::sleep;

async fn write_corpus(dir: &std::path::Path, count: usize, size: usize) -> Vec<String> {
    let mut urls = Vec::new();
    for i in 0..count {
        let path = dir.join(format!("clip{i:03}.bin"));
        tokio::fs::write(&path, vec![9u8; size]).await.unwrap();
        urls.push(format!("file://{}", path.display()));
    }
    urls
}

async fn wait_until_idle(cache: &std::sync::Arc<RWCache>) {
    for _ in 0..500 {
        if !cache.is_caching() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("rwcache never finished its background pass");
}

#[tokio::test]
async fn full_lifecycle_construct_update_resume() {
    let source = tempdir().unwrap();
    let to_dir = tempdir().unwrap();
    let urls = write_corpus(source.path(), 20, 100).await;

    let cache = RWCache::construct(
        urls.clone(),
        to_dir.path(),
        Some(500),
        Some(1500),
        SchemeSettings::default(),
    )
    .await
    .unwrap();

    // Synchronous fill during construction stays within cache_size.
    assert!(cache.active_size().await <= 500);

    wait_until_idle(&cache).await;
    // Background loop should have staged the remainder of the corpus within
    // cache_size + increment_size.
    assert!(cache.size().await <= 2000);

    cache.update().await.unwrap();
    assert!(cache.active_size().await <= 500);

    cache.stop();

    let resumed = RWCache::construct(
        urls,
        to_dir.path(),
        Some(999),
        Some(999),
        SchemeSettings::default(),
    )
    .await
    .unwrap();
    assert_eq!(
        resumed.current_files().await.len(),
        cache.current_files().await.len()
    );
    resumed.stop();
}
