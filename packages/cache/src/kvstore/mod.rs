mod backend;
mod file;
mod memory;

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::entry::IndexEntry;
use crate::error::CacheError;
use crate::key::CacheKey;

pub use backend::{KvBackend, KvError};
pub use file::FileBackend;
pub use memory::MemoryBackend;

/// Namespace for entry records (derived artifacts and source metadata).
pub const IMAGE_NAMESPACE: &str = "image";
/// Namespace for reverse-index sets (source identity -> derived keys).
pub const THUMBNAIL_NAMESPACE: &str = "thumbnails";

/// Outcome slot shared by every caller queued on one key's generation.
#[derive(Default)]
struct Flight {
    outcome: Option<Result<IndexEntry, CacheError>>,
}

/// The key-value index over cached artifacts.
///
/// Entry records and reverse-index sets live in a pluggable [`KvBackend`]
/// under a configurable key prefix. All mutation is internally
/// synchronized: generation is serialized per cache key, reverse-set
/// updates per source identity. Distinct keys and sources never wait on
/// each other.
pub struct KvIndex {
    backend: Arc<dyn KvBackend>,
    prefix: String,
    flights: DashMap<CacheKey, Arc<Mutex<Flight>>>,
    source_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KvIndex {
    pub fn new(backend: Arc<dyn KvBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            flights: DashMap::new(),
            source_locks: DashMap::new(),
        }
    }

    fn entry_key(&self, key: &CacheKey) -> String {
        format!("{}:{IMAGE_NAMESPACE}:{}", self.prefix, key.to_hex())
    }

    fn reverse_key(&self, identity: &str) -> String {
        format!(
            "{}:{THUMBNAIL_NAMESPACE}:{}",
            self.prefix,
            CacheKey::source(identity).to_hex()
        )
    }

    /// Lookup; a miss is `None`, not an error.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<IndexEntry>, CacheError> {
        match self.backend.get(&self.entry_key(key)).await? {
            Some(raw) => {
                let entry = serde_json::from_str(&raw)
                    .map_err(|e| KvError::Corrupt(e.to_string()))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Lookup for callers that must not generate; a miss is `NotFound`.
    pub async fn require(&self, key: &CacheKey) -> Result<IndexEntry, CacheError> {
        self.get(key)
            .await?
            .ok_or_else(|| CacheError::NotFound(key.to_hex()))
    }

    /// Fetch the entry for `key`, generating it at most once across
    /// concurrent callers.
    ///
    /// While one caller runs `compute`, every other caller for the same key
    /// waits, and all of them observe that single attempt's outcome. A
    /// failed attempt inserts nothing; the same error is returned to every
    /// waiter that joined the flight, and a caller arriving after the
    /// flight has drained starts a fresh attempt. Distinct keys proceed
    /// independently.
    pub async fn get_or_set<F, Fut>(&self, key: CacheKey, compute: F) -> Result<IndexEntry, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<IndexEntry, CacheError>>,
    {
        if let Some(entry) = self.get(&key).await? {
            return Ok(entry);
        }

        let flight = self
            .flights
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(Flight::default())))
            .clone();

        let result = {
            let mut slot = flight.lock().await;
            if let Some(outcome) = &slot.outcome {
                debug!(key = %key, "joined finished flight");
                outcome.clone()
            } else {
                match self.get(&key).await {
                    Ok(Some(entry)) => Ok(entry),
                    Ok(None) => {
                        let attempt = match compute().await {
                            Ok(entry) => self.insert(&entry).await.map(|()| entry),
                            Err(e) => Err(e),
                        };
                        slot.outcome = Some(attempt.clone());
                        attempt
                    }
                    Err(e) => Err(e),
                }
            }
        };

        drop(flight);
        self.flights
            .remove_if(&key, |_, slot| Arc::strong_count(slot) == 1);

        result
    }

    /// Record a derived entry and its reverse-index membership.
    ///
    /// Membership is written before the entry: a reader that can see an
    /// entry can always see its membership. The transient opposite state
    /// (membership without entry) is filtered by `find_by_source` and
    /// reaped by `prune_memberships`.
    async fn insert(&self, entry: &IndexEntry) -> Result<(), CacheError> {
        self.add_member(&entry.source_identity, &entry.key).await?;
        self.put_entry(entry).await?;
        Ok(())
    }

    /// Record metadata for a source image itself. Source entries are not
    /// reverse-index members.
    pub async fn set_source(&self, entry: &IndexEntry) -> Result<(), CacheError> {
        self.put_entry(entry).await
    }

    pub async fn get_source(&self, identity: &str) -> Result<Option<IndexEntry>, CacheError> {
        self.get(&CacheKey::source(identity)).await
    }

    /// Remove one entry and its reverse-index membership.
    ///
    /// The entry goes first, so a reader never sees an entry whose
    /// membership is already gone. Deleting an absent key is a no-op.
    pub async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        let Some(entry) = self.get(key).await? else {
            return Ok(());
        };
        self.backend.delete(&self.entry_key(key)).await?;
        self.remove_member(&entry.source_identity, key).await?;
        Ok(())
    }

    /// Remove a source's metadata entry and its reverse-set record.
    pub async fn delete_source(&self, identity: &str) -> Result<(), CacheError> {
        self.backend
            .delete(&self.entry_key(&CacheKey::source(identity)))
            .await?;
        self.backend.delete(&self.reverse_key(identity)).await?;
        Ok(())
    }

    /// Keys of every derived artifact owned by `identity`.
    pub async fn keys_for_source(&self, identity: &str) -> Result<Vec<CacheKey>, CacheError> {
        self.reverse_members(identity).await
    }

    /// Entries owned by a source, as a lazy stream.
    ///
    /// The membership list is read once up front; entries are fetched as
    /// the stream is polled. Memberships whose entry has vanished are
    /// skipped. Calling again restarts from the current index state.
    pub async fn find_by_source<'a>(
        &'a self,
        identity: &str,
    ) -> Result<BoxStream<'a, Result<IndexEntry, CacheError>>, CacheError> {
        let keys = self.reverse_members(identity).await?;
        let stream = stream::iter(keys)
            .then(move |key| async move { self.get(&key).await })
            .filter_map(|fetched| async move {
                match fetched {
                    Ok(Some(entry)) => Some(Ok(entry)),
                    Ok(None) => None,
                    Err(e) => Some(Err(e)),
                }
            });
        Ok(stream.boxed())
    }

    /// Drop every index record under this prefix.
    pub async fn clear(&self) -> Result<(), CacheError> {
        let keys = self
            .backend
            .keys_with_prefix(&format!("{}:", self.prefix))
            .await?;
        for key in keys {
            self.backend.delete(&key).await?;
        }
        Ok(())
    }

    /// Raw backend keys in one namespace. Operational/test hook.
    pub async fn namespace_keys(&self, namespace: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .backend
            .keys_with_prefix(&format!("{}:{namespace}:", self.prefix))
            .await?)
    }

    /// Every entry currently recorded, source metadata included.
    pub async fn all_entries(&self) -> Result<Vec<IndexEntry>, CacheError> {
        let mut entries = Vec::new();
        for raw_key in self.namespace_keys(IMAGE_NAMESPACE).await? {
            let Some(raw) = self.backend.get(&raw_key).await? else {
                continue;
            };
            let entry: IndexEntry =
                serde_json::from_str(&raw).map_err(|e| KvError::Corrupt(e.to_string()))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Drop reverse-index memberships whose entry no longer exists.
    ///
    /// Returns the number of memberships removed.
    pub async fn prune_memberships(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for raw_key in self.namespace_keys(THUMBNAIL_NAMESPACE).await? {
            let Some(raw) = self.backend.get(&raw_key).await? else {
                continue;
            };
            let hexes: Vec<String> =
                serde_json::from_str(&raw).map_err(|e| KvError::Corrupt(e.to_string()))?;
            let mut kept = Vec::with_capacity(hexes.len());
            for hex in &hexes {
                let key = CacheKey::from_hex(hex)
                    .map_err(|_| KvError::Corrupt(format!("bad member key: {hex}")))?;
                if self.get(&key).await?.is_some() {
                    kept.push(hex.clone());
                }
            }
            if kept.len() != hexes.len() {
                removed += hexes.len() - kept.len();
                let raw = serde_json::to_string(&kept)
                    .map_err(|e| KvError::Corrupt(e.to_string()))?;
                self.backend.set(&raw_key, &raw).await?;
            }
        }
        Ok(removed)
    }

    async fn put_entry(&self, entry: &IndexEntry) -> Result<(), CacheError> {
        let raw =
            serde_json::to_string(entry).map_err(|e| KvError::Corrupt(e.to_string()))?;
        self.backend.set(&self.entry_key(&entry.key), &raw).await?;
        Ok(())
    }

    async fn reverse_members(&self, identity: &str) -> Result<Vec<CacheKey>, CacheError> {
        match self.backend.get(&self.reverse_key(identity)).await? {
            Some(raw) => {
                let hexes: Vec<String> =
                    serde_json::from_str(&raw).map_err(|e| KvError::Corrupt(e.to_string()))?;
                hexes
                    .iter()
                    .map(|hex| {
                        CacheKey::from_hex(hex)
                            .map_err(|_| KvError::Corrupt(format!("bad member key: {hex}")).into())
                    })
                    .collect()
            }
            None => Ok(Vec::new()),
        }
    }

    async fn write_reverse(&self, identity: &str, members: &[CacheKey]) -> Result<(), CacheError> {
        let hexes: Vec<String> = members.iter().map(CacheKey::to_hex).collect();
        let raw = serde_json::to_string(&hexes).map_err(|e| KvError::Corrupt(e.to_string()))?;
        self.backend.set(&self.reverse_key(identity), &raw).await?;
        Ok(())
    }

    fn source_lock(&self, identity: &str) -> Arc<Mutex<()>> {
        self.source_locks
            .entry(identity.to_string())
            .or_default()
            .clone()
    }

    fn release_source_lock(&self, identity: &str) {
        self.source_locks
            .remove_if(identity, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn add_member(&self, identity: &str, key: &CacheKey) -> Result<(), CacheError> {
        let lock = self.source_lock(identity);
        let result = {
            let _guard = lock.lock().await;
            self.add_member_locked(identity, key).await
        };
        drop(lock);
        self.release_source_lock(identity);
        result
    }

    async fn add_member_locked(&self, identity: &str, key: &CacheKey) -> Result<(), CacheError> {
        let mut members = self.reverse_members(identity).await?;
        if !members.contains(key) {
            members.push(*key);
            members.sort();
            self.write_reverse(identity, &members).await?;
        }
        Ok(())
    }

    async fn remove_member(&self, identity: &str, key: &CacheKey) -> Result<(), CacheError> {
        let lock = self.source_lock(identity);
        let result = {
            let _guard = lock.lock().await;
            self.remove_member_locked(identity, key).await
        };
        drop(lock);
        self.release_source_lock(identity);
        result
    }

    async fn remove_member_locked(&self, identity: &str, key: &CacheKey) -> Result<(), CacheError> {
        let mut members = self.reverse_members(identity).await?;
        let before = members.len();
        members.retain(|member| member != key);
        if members.len() != before {
            self.write_reverse(identity, &members).await?;
        }
        Ok(())
    }
}
