use std::sync::Arc;

use tracing::{debug, info};

use store::{BlobStore, StorageError};

use crate::config::CacheConfig;
use crate::engine::{EncodeEngine, EngineError};
use crate::entry::IndexEntry;
use crate::error::{CacheError, GenerationError};
use crate::format::extension_for_token;
use crate::key::CacheKey;
use crate::kvstore::KvIndex;
use crate::options::TransformOptions;
use crate::source::SourceAsset;

/// Counts from a reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupStats {
    /// Index entries dropped because their bytes were gone.
    pub entries_removed: usize,
    /// Reverse-index memberships dropped because their entry was gone.
    pub memberships_removed: usize,
}

/// Orchestrates lookup, generation, and invalidation.
///
/// Every collaborator is injected at construction; there is no process-wide
/// default instance.
pub struct ThumbnailBackend {
    config: CacheConfig,
    index: KvIndex,
    store: Arc<dyn BlobStore>,
    engine: Arc<dyn EncodeEngine>,
}

impl ThumbnailBackend {
    pub fn new(
        config: CacheConfig,
        index: KvIndex,
        store: Arc<dyn BlobStore>,
        engine: Arc<dyn EncodeEngine>,
    ) -> Self {
        Self {
            config,
            index,
            store,
            engine,
        }
    }

    pub fn index(&self) -> &KvIndex {
        &self.index
    }

    /// Public URL for a cached entry.
    pub fn url(&self, entry: &IndexEntry) -> String {
        self.store.url(&entry.storage_path)
    }

    /// Return the cached thumbnail for `(reference, options)`, generating
    /// it if this is the first request for that combination.
    ///
    /// Generation happens at most once per cache key across concurrent
    /// callers; a hit performs no writes at all.
    pub async fn get_thumbnail(
        &self,
        reference: &str,
        options: TransformOptions,
    ) -> Result<IndexEntry, CacheError> {
        let (source, options, key) = self.resolve_request(reference, options).await?;

        self.index
            .get_or_set(key, || self.generate(&source, &options, key))
            .await
    }

    /// Shortcut taking a geometry string with everything else defaulted.
    pub async fn get_thumbnail_str(
        &self,
        reference: &str,
        geometry: &str,
    ) -> Result<IndexEntry, CacheError> {
        self.get_thumbnail(reference, TransformOptions::parse(geometry)?)
            .await
    }

    /// Cache lookup without generation; a miss is `None`.
    pub async fn lookup(
        &self,
        reference: &str,
        options: TransformOptions,
    ) -> Result<Option<IndexEntry>, CacheError> {
        let (_, _, key) = self.resolve_request(reference, options).await?;
        self.index.get(&key).await
    }

    /// Normalize a request into its source, fully resolved options, and
    /// cache key.
    async fn resolve_request(
        &self,
        reference: &str,
        mut options: TransformOptions,
    ) -> Result<(SourceAsset, TransformOptions, CacheKey), CacheError> {
        let source = SourceAsset::new(reference)?;

        if options.format.is_none() {
            options.format = Some(self.config.format_policy().resolve(source.reference()));
        }
        if options.quality.is_none() {
            options.quality = Some(self.config.default_quality);
        }

        let fingerprint = if self.config.fingerprint_sources {
            self.store
                .size(source.reference())
                .await
                .ok()
                .map(|size| size.to_string())
        } else {
            None
        };

        let key = CacheKey::build(source.identity(), &options, fingerprint.as_deref());
        Ok((source, options, key))
    }

    async fn generate(
        &self,
        source: &SourceAsset,
        options: &TransformOptions,
        key: CacheKey,
    ) -> Result<IndexEntry, CacheError> {
        debug!(identity = source.identity(), key = %key, "cache miss, generating");

        let source_bytes = match self.store.read(source.reference()).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => {
                return Err(
                    GenerationError::MissingSource(source.reference().to_string()).into(),
                );
            }
            Err(e) => return Err(GenerationError::Store(e).into()),
        };

        if !self.engine.is_valid_image(&source_bytes) {
            return Err(GenerationError::Decode(EngineError::InvalidImage(
                source.reference().to_string(),
            ))
            .into());
        }

        // First contact with this source: record its own metadata entry.
        if self.index.get_source(source.identity()).await?.is_none() {
            let info = self
                .engine
                .probe(&source_bytes)
                .await
                .map_err(GenerationError::Decode)?;
            let source_entry = IndexEntry::new(
                CacheKey::source(source.identity()),
                source.reference(),
                source.identity(),
                info.width,
                info.height,
            );
            self.index.set_source(&source_entry).await?;
        }

        let encoded = self
            .engine
            .transform(&source_bytes, options)
            .await
            .map_err(|e| match &e {
                EngineError::InvalidImage(_) => GenerationError::Decode(e),
                _ => GenerationError::Encode(e),
            })?;

        let extension = extension_for_token(options.format.as_deref().unwrap_or_default());
        let storage_path = key.storage_path(&self.config.cache_root, &extension);
        let stored = self
            .store
            .save(&storage_path, &encoded.bytes)
            .await
            .map_err(GenerationError::Store)?;

        info!(
            identity = source.identity(),
            path = %stored,
            width = encoded.width,
            height = encoded.height,
            "thumbnail generated"
        );

        Ok(IndexEntry::new(
            key,
            stored,
            source.identity(),
            encoded.width,
            encoded.height,
        ))
    }

    /// Remove every derived artifact owned by `reference`.
    ///
    /// With `delete_bytes`, backing blobs are deleted too; otherwise only
    /// the index forgets them and the bytes stay orphaned in the store.
    /// Source bytes are never touched. Unknown sources are a no-op.
    pub async fn delete(&self, reference: &str, delete_bytes: bool) -> Result<(), CacheError> {
        let source = SourceAsset::new(reference)?;

        let keys = self.index.keys_for_source(source.identity()).await?;
        for key in keys {
            if delete_bytes {
                if let Some(entry) = self.index.get(&key).await? {
                    self.store.delete(&entry.storage_path).await?;
                }
            }
            self.index.delete(&key).await?;
        }
        self.index.delete_source(source.identity()).await?;

        info!(identity = source.identity(), delete_bytes, "source invalidated");
        Ok(())
    }

    /// Reconcile the index against the blob store: drop derived entries
    /// whose bytes are gone, then memberships whose entries are gone.
    pub async fn cleanup(&self) -> Result<CleanupStats, CacheError> {
        let mut stats = CleanupStats::default();

        for entry in self.index.all_entries().await? {
            // Source metadata entries point at externally-owned bytes.
            if entry.key == CacheKey::source(&entry.source_identity) {
                continue;
            }
            if !self.store.exists(&entry.storage_path).await? {
                self.index.delete(&entry.key).await?;
                stats.entries_removed += 1;
            }
        }

        stats.memberships_removed = self.index.prune_memberships().await?;

        if stats.entries_removed > 0 || stats.memberships_removed > 0 {
            info!(
                entries = stats.entries_removed,
                memberships = stats.memberships_removed,
                "index cleanup finished"
            );
        }
        Ok(stats)
    }
}
