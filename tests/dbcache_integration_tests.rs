use std::time::Duration;

use streamcache::dbcache::DBCache;
use streamcache::scheme::SchemeSettings;
use tempfile::tempdir;
use tokio::time::sleep;

async fn write_corpus(dir: &std::path::Path, count: usize, size: usize) {
    for i in 0..count {
        tokio::fs::write(dir.join(format!("track{i:03}.wav")), vec![7u8; size])
            .await
            .unwrap();
    }
}

async fn wait_until_idle(cache: &std::sync::Arc<DBCache>) {
    for _ in 0..200 {
        if !cache.is_caching() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("dbcache never finished staging");
}

#[tokio::test]
async fn full_lifecycle_construct_prepare_switch_resume() {
    let from_dir = tempdir().unwrap();
    let to_dir = tempdir().unwrap();
    write_corpus(from_dir.path(), 12, 1000).await;

    let cache = DBCache::construct(from_dir.path(), to_dir.path(), 4000, "wav", SchemeSettings::default())
        .await
        .unwrap();
    wait_until_idle(&cache).await;

    let first_active = cache.active_dir().await;
    assert!(first_active.ends_with("A"));

    cache.switch_cache().await.unwrap();
    wait_until_idle(&cache).await;

    let second_active = cache.active_dir().await;
    assert!(second_active.ends_with("B"));
    assert_ne!(first_active, second_active);

    // A crash-and-restart should resume at the same slot/group without
    // re-enumerating from_dir from scratch.
    let resumed = DBCache::construct(from_dir.path(), to_dir.path(), 4000, "wav", SchemeSettings::default())
        .await
        .unwrap();
    wait_until_idle(&resumed).await;
    assert_eq!(resumed.active_dir().await, second_active);
}
