use store::BlobStore;

use crate::common::{TestCache, fake_image};

mod delete {
    use cache::kvstore::{IMAGE_NAMESPACE, THUMBNAIL_NAMESPACE};

    use super::*;

    #[tokio::test]
    async fn removes_index_entries_and_bytes() {
        let cache = TestCache::spawn().await;
        cache.write_source("100x100.avif", &fake_image(100, 100));

        let first = cache
            .backend
            .get_thumbnail_str("100x100.avif", "27x27")
            .await
            .unwrap();
        let second = cache
            .backend
            .get_thumbnail_str("100x100.avif", "81x81")
            .await
            .unwrap();

        cache.backend.delete("100x100.avif", true).await.unwrap();

        let index = cache.backend.index();
        for entry in [&first, &second] {
            assert!(index.get(&entry.key).await.unwrap().is_none());
            assert!(!cache.store.exists(&entry.storage_path).await.unwrap());
        }
        assert!(index.get_source("100x100.avif").await.unwrap().is_none());
        assert!(
            index
                .keys_for_source("100x100.avif")
                .await
                .unwrap()
                .is_empty()
        );
        assert!(index.namespace_keys(IMAGE_NAMESPACE).await.unwrap().is_empty());
        assert!(
            index
                .namespace_keys(THUMBNAIL_NAMESPACE)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn can_keep_bytes_orphaned() {
        let cache = TestCache::spawn().await;
        cache.write_source("a.avif", &fake_image(100, 100));

        let entry = cache
            .backend
            .get_thumbnail_str("a.avif", "27x27")
            .await
            .unwrap();

        cache.backend.delete("a.avif", false).await.unwrap();

        assert!(
            cache
                .backend
                .index()
                .get(&entry.key)
                .await
                .unwrap()
                .is_none()
        );
        assert!(cache.store.exists(&entry.storage_path).await.unwrap());
        assert_eq!(cache.store.delete_count(), 0);
    }

    #[tokio::test]
    async fn unknown_source_is_a_noop() {
        let cache = TestCache::spawn().await;
        cache.backend.delete("never-seen.avif", true).await.unwrap();
        cache.backend.delete("never-seen.avif", true).await.unwrap();
    }

    #[tokio::test]
    async fn deleting_one_key_leaves_siblings() {
        let cache = TestCache::spawn().await;
        cache.write_source("a.avif", &fake_image(100, 100));

        let first = cache
            .backend
            .get_thumbnail_str("a.avif", "27x27")
            .await
            .unwrap();
        let second = cache
            .backend
            .get_thumbnail_str("a.avif", "81x81")
            .await
            .unwrap();

        cache.backend.index().delete(&first.key).await.unwrap();

        let remaining = cache.backend.index().keys_for_source("a.avif").await.unwrap();
        assert_eq!(remaining, vec![second.key]);
    }

    #[tokio::test]
    async fn regeneration_after_delete_writes_again() {
        let cache = TestCache::spawn().await;
        cache.write_source("a.avif", &fake_image(100, 100));

        let before = cache
            .backend
            .get_thumbnail_str("a.avif", "27x27")
            .await
            .unwrap();
        cache.backend.delete("a.avif", true).await.unwrap();

        let after = cache
            .backend
            .get_thumbnail_str("a.avif", "27x27")
            .await
            .unwrap();
        assert_eq!(before.key, after.key);
        assert_eq!(cache.engine.transform_count(), 2);
        assert!(cache.store.exists(&after.storage_path).await.unwrap());
    }
}

mod cleanup {
    use super::*;

    #[tokio::test]
    async fn reaps_entries_whose_bytes_vanished() {
        let cache = TestCache::spawn().await;
        cache.write_source("a.avif", &fake_image(100, 100));

        let kept = cache
            .backend
            .get_thumbnail_str("a.avif", "27x27")
            .await
            .unwrap();
        let lost = cache
            .backend
            .get_thumbnail_str("a.avif", "81x81")
            .await
            .unwrap();

        // Bytes disappear behind the index's back.
        cache.store.delete(&lost.storage_path).await.unwrap();

        let stats = cache.backend.cleanup().await.unwrap();
        assert_eq!(stats.entries_removed, 1);
        assert_eq!(stats.memberships_removed, 0);

        let index = cache.backend.index();
        assert!(index.get(&lost.key).await.unwrap().is_none());
        assert!(index.get(&kept.key).await.unwrap().is_some());
        assert_eq!(index.keys_for_source("a.avif").await.unwrap(), vec![kept.key]);
    }

    #[tokio::test]
    async fn clean_index_is_untouched() {
        let cache = TestCache::spawn().await;
        cache.write_source("a.avif", &fake_image(100, 100));
        cache
            .backend
            .get_thumbnail_str("a.avif", "27x27")
            .await
            .unwrap();

        let stats = cache.backend.cleanup().await.unwrap();
        assert_eq!(stats.entries_removed, 0);
        assert_eq!(stats.memberships_removed, 0);
    }
}

mod fingerprinting {
    use cache::CacheConfig;

    use super::*;

    #[tokio::test]
    async fn changed_source_bytes_stop_matching_old_thumbnails() {
        let config = CacheConfig {
            fingerprint_sources: true,
            ..CacheConfig::default()
        };
        let cache = TestCache::spawn_with(config).await;
        cache.write_source("a.avif", &fake_image(100, 100));

        let before = cache
            .backend
            .get_thumbnail_str("a.avif", "27x27")
            .await
            .unwrap();

        // Same name, different byte size.
        cache.write_source("a.avif", &fake_image(2000, 2000));

        let after = cache
            .backend
            .get_thumbnail_str("a.avif", "27x27")
            .await
            .unwrap();
        assert_ne!(before.key, after.key);
        assert_eq!(cache.engine.transform_count(), 2);
    }
}
