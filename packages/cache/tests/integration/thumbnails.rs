use crate::common::{TestCache, fake_image};

mod end_to_end {
    use futures::StreamExt;

    use cache::kvstore::{IMAGE_NAMESPACE, THUMBNAIL_NAMESPACE};
    use store::BlobStore;

    use super::*;

    #[tokio::test]
    async fn two_geometries_populate_index_and_reverse_index() {
        let cache = TestCache::spawn().await;
        cache.write_source("100x100.avif", &fake_image(100, 100));

        let first = cache
            .backend
            .get_thumbnail_str("100x100.avif", "27x27")
            .await
            .unwrap();
        assert_eq!((first.width, first.height), (27, 27));
        assert!(first.storage_path.starts_with("cache/"));
        assert!(first.storage_path.ends_with(".avif"));
        assert!(
            cache
                .backend
                .index()
                .get(&first.key)
                .await
                .unwrap()
                .is_some()
        );

        let second = cache
            .backend
            .get_thumbnail_str("100x100.avif", "81x81")
            .await
            .unwrap();
        assert_ne!(first.key, second.key);
        assert_ne!(first.storage_path, second.storage_path);

        let derived: Vec<_> = cache
            .backend
            .index()
            .find_by_source("100x100.avif")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(derived.len(), 2);

        // Source metadata + 2 derived entries; one reverse set.
        let index = cache.backend.index();
        assert_eq!(index.namespace_keys(IMAGE_NAMESPACE).await.unwrap().len(), 3);
        assert_eq!(
            index.namespace_keys(THUMBNAIL_NAMESPACE).await.unwrap().len(),
            1
        );

        let source_entry = index.get_source("100x100.avif").await.unwrap().unwrap();
        assert_eq!((source_entry.width, source_entry.height), (100, 100));

        assert_eq!(cache.engine.transform_count(), 2);
        assert_eq!(cache.store.save_count(), 2);
    }

    #[tokio::test]
    async fn url_is_served_from_the_store() {
        let cache = TestCache::spawn().await;
        cache.write_source("pic.avif", &fake_image(50, 50));

        let entry = cache
            .backend
            .get_thumbnail_str("pic.avif", "10x10")
            .await
            .unwrap();
        let url = cache.backend.url(&entry);
        assert!(url.starts_with("/media/cache/"), "unexpected url: {url}");
        assert!(url.ends_with(".avif"));
    }

    #[tokio::test]
    async fn non_ascii_source_names_work() {
        let cache = TestCache::spawn().await;
        cache.write_source("åäö.avif", &fake_image(666, 666));

        let entry = cache
            .backend
            .get_thumbnail_str("åäö.avif", "200x200")
            .await
            .unwrap();
        assert_eq!((entry.width, entry.height), (200, 200));
        assert!(
            cache
                .store
                .exists(&entry.storage_path)
                .await
                .unwrap()
        );
    }
}

mod caching {
    use super::*;

    #[tokio::test]
    async fn repeated_requests_hit_the_cache() {
        let cache = TestCache::spawn().await;
        cache.write_source("a.avif", &fake_image(100, 100));

        let first = cache
            .backend
            .get_thumbnail_str("a.avif", "27x27")
            .await
            .unwrap();
        let second = cache
            .backend
            .get_thumbnail_str("a.avif", "27x27")
            .await
            .unwrap();

        assert_eq!(first.key, second.key);
        assert_eq!(first.storage_path, second.storage_path);
        assert_eq!(cache.engine.transform_count(), 1);
        assert_eq!(cache.store.save_count(), 1);
    }

    #[tokio::test]
    async fn lookup_never_generates() {
        let cache = TestCache::spawn().await;
        cache.write_source("a.avif", &fake_image(100, 100));

        let options = cache::TransformOptions::parse("27x27").unwrap();
        assert!(
            cache
                .backend
                .lookup("a.avif", options.clone())
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(cache.engine.transform_count(), 0);

        cache
            .backend
            .get_thumbnail("a.avif", options.clone())
            .await
            .unwrap();
        assert!(
            cache
                .backend
                .lookup("a.avif", options)
                .await
                .unwrap()
                .is_some()
        );
        assert_eq!(cache.engine.transform_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_generate_once() {
        let cache = TestCache::spawn().await;
        cache.write_source("a.avif", &fake_image(100, 100));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let backend = cache.backend.clone();
            handles.push(tokio::spawn(async move {
                backend.get_thumbnail_str("a.avif", "27x27").await
            }));
        }

        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap().unwrap().storage_path);
        }

        assert_eq!(cache.engine.transform_count(), 1);
        assert_eq!(cache.store.save_count(), 1);
        assert!(paths.windows(2).all(|pair| pair[0] == pair[1]));
    }
}

mod formats {
    use cache::CacheConfig;

    use super::*;

    #[tokio::test]
    async fn source_extension_decides_output_format() {
        let cache = TestCache::spawn().await;
        cache.write_source("shot.png", &fake_image(64, 64));

        let entry = cache
            .backend
            .get_thumbnail_str("shot.png", "16x16")
            .await
            .unwrap();
        assert!(entry.storage_path.ends_with(".png"));
    }

    #[tokio::test]
    async fn preserve_format_beats_override() {
        let config = CacheConfig {
            format_override: Some("XXX".into()),
            preserve_format: true,
            ..CacheConfig::default()
        };
        let cache = TestCache::spawn_with(config).await;
        cache.write_source("shot.gif", &fake_image(64, 64));

        let entry = cache
            .backend
            .get_thumbnail_str("shot.gif", "16x16")
            .await
            .unwrap();
        assert!(entry.storage_path.ends_with(".gif"));
    }

    #[tokio::test]
    async fn unknown_extension_uses_fallback_token() {
        let config = CacheConfig {
            fallback_format: "XXX".into(),
            ..CacheConfig::default()
        };
        let cache = TestCache::spawn_with(config).await;
        // Valid image bytes behind an unrecognized name.
        cache.write_source("upload.bin", &fake_image(64, 64));

        let entry = cache
            .backend
            .get_thumbnail_str("upload.bin", "16x16")
            .await
            .unwrap();
        assert!(entry.storage_path.ends_with(".xxx"));
    }

    #[tokio::test]
    async fn explicit_request_format_wins() {
        let cache = TestCache::spawn().await;
        cache.write_source("shot.png", &fake_image(64, 64));

        let options = cache::TransformOptions::parse("16x16")
            .unwrap()
            .with_format("WEBP");
        let entry = cache.backend.get_thumbnail("shot.png", options).await.unwrap();
        assert!(entry.storage_path.ends_with(".webp"));
    }
}

mod failures {
    use cache::error::{CacheError, GenerationError};
    use cache::kvstore::IMAGE_NAMESPACE;
    use store::BlobStore;

    use super::*;

    fn generation_cause(err: &CacheError) -> &GenerationError {
        match err {
            CacheError::Generation(cause) => cause.as_ref(),
            other => panic!("expected generation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_source_surfaces_and_leaves_no_trace() {
        let cache = TestCache::spawn().await;

        let err = cache
            .backend
            .get_thumbnail_str("nonexistent.jpeg", "27x27")
            .await
            .unwrap_err();
        assert!(matches!(
            generation_cause(&err),
            GenerationError::MissingSource(_)
        ));

        let index = cache.backend.index();
        assert!(index.namespace_keys(IMAGE_NAMESPACE).await.unwrap().is_empty());
        assert_eq!(cache.store.save_count(), 0);
        assert_eq!(cache.staged_files(), 0);
    }

    #[tokio::test]
    async fn invalid_source_bytes_fail_decode() {
        let cache = TestCache::spawn().await;
        cache.write_source("broken.avif", b"invalidbinaryimage");

        let err = cache
            .backend
            .get_thumbnail_str("broken.avif", "27x27")
            .await
            .unwrap_err();
        assert!(matches!(generation_cause(&err), GenerationError::Decode(_)));
        // Validity gate rejects the bytes before the engine transforms.
        assert_eq!(cache.engine.transform_count(), 0);
        assert_eq!(cache.staged_files(), 0);
    }

    #[tokio::test]
    async fn encode_failure_inserts_nothing_and_allows_retry() {
        let cache = TestCache::spawn().await;
        cache.write_source("a.avif", &fake_image(100, 100));
        cache.engine.set_failing(true);

        let err = cache
            .backend
            .get_thumbnail_str("a.avif", "27x27")
            .await
            .unwrap_err();
        assert!(matches!(generation_cause(&err), GenerationError::Encode(_)));
        assert_eq!(cache.store.save_count(), 0);

        let options = cache::TransformOptions::parse("27x27").unwrap();
        assert!(
            cache
                .backend
                .lookup("a.avif", options)
                .await
                .unwrap()
                .is_none()
        );

        cache.engine.set_failing(false);
        let entry = cache
            .backend
            .get_thumbnail_str("a.avif", "27x27")
            .await
            .unwrap();
        assert_eq!(cache.store.save_count(), 1);
        assert!(cache.store.exists(&entry.storage_path).await.unwrap());
    }

    #[cfg(target_os = "linux")]
    fn open_fd_count() -> usize {
        std::fs::read_dir("/proc/self/fd").unwrap().count()
    }

    /// Failed generations must not leave file descriptors behind.
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn no_descriptors_leak_on_failed_generation() {
        let cache = TestCache::spawn().await;
        cache.write_source("broken.avif", b"invalidbinaryimage");

        let before = open_fd_count();
        let _ = cache
            .backend
            .get_thumbnail_str("nonexistent.jpeg", "27x27")
            .await;
        let _ = cache
            .backend
            .get_thumbnail_str("broken.avif", "27x27")
            .await;
        let after = open_fd_count();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn bad_references_are_rejected_up_front() {
        let cache = TestCache::spawn().await;
        for reference in ["", "../escape.avif"] {
            let err = cache
                .backend
                .get_thumbnail_str(reference, "27x27")
                .await
                .unwrap_err();
            assert!(
                matches!(err, CacheError::InvalidReference(_)),
                "got {err:?} for {reference:?}"
            );
        }
        assert_eq!(cache.engine.transform_count(), 0);
    }
}
