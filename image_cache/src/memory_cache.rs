use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use common::{
    key::CacheKey,
    object::{CacheEntry, CachedObject},
    options::Priority,
};
use moka::future::Cache;
use tracing::debug;

use crate::{
    engine::{BackingEngine, EngineError, EngineLoad, EngineLookup},
    origin::Origin,
};

/// Process-local engine on top of a moka cache.
///
/// Capacity is counted in payload bytes, entries are evicted by moka's
/// TinyLFU policy once the total goes over it.
pub struct MemoryCache {
    entries: Cache<CacheKey, CacheEntry>,
    origin: Option<Arc<dyn Origin>>,
    time_to_live: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct MemoryCacheBuilder {
    max_bytes: Option<u64>,
    time_to_live: Option<Duration>,
}

impl MemoryCacheBuilder {
    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);

        self
    }

    pub fn time_to_live(mut self, time_to_live: Duration) -> Self {
        self.time_to_live = Some(time_to_live);

        self
    }

    pub fn build(self) -> MemoryCache {
        let mut builder = Cache::builder().weigher(|_key: &CacheKey, entry: &CacheEntry| {
            u32::try_from(entry.size()).unwrap_or(u32::MAX)
        });

        if let Some(max_bytes) = self.max_bytes {
            builder = builder.max_capacity(max_bytes);
        }

        if let Some(time_to_live) = self.time_to_live {
            builder = builder.time_to_live(time_to_live);
        }

        MemoryCache {
            entries: builder.build(),
            origin: None,
            time_to_live: self.time_to_live,
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MemoryCacheBuilder {
        MemoryCacheBuilder::default()
    }

    pub fn with_origin(mut self, origin: Arc<dyn Origin>) -> Self {
        self.origin = Some(origin);

        self
    }

    pub async fn len(&self) -> usize {
        self.entries.run_pending_tasks().await;

        self.entries.iter().count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Payload bytes currently held
    pub async fn size_in_bytes(&self) -> u64 {
        self.entries.run_pending_tasks().await;

        self.entries.weighted_size()
    }
}

#[async_trait]
impl BackingEngine for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn lookup(&self, key: &CacheKey) -> Result<EngineLookup, EngineError> {
        let Some(entry) = self.entries.get(key).await else {
            return Ok(EngineLookup::Miss);
        };

        if entry.is_expired(Utc::now()) {
            debug!("{} expired in memory", key);
            self.entries.invalidate(key).await;

            return Ok(EngineLookup::Miss);
        }

        Ok(EngineLookup::Hit(entry))
    }

    async fn load(&self, key: &CacheKey, priority: Priority) -> Result<EngineLoad, EngineError> {
        let Some(origin) = &self.origin else {
            return Ok(EngineLoad::Missing);
        };

        Ok(match origin.fetch(key, priority).await? {
            Some(object) => EngineLoad::Found(object),
            None => EngineLoad::Missing,
        })
    }

    async fn store(&self, key: &CacheKey, object: CachedObject) -> Result<(), EngineError> {
        let entry = CacheEntry::new(key.clone(), object, self.time_to_live);

        self.entries.insert(key.clone(), entry).await;

        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), EngineError> {
        self.entries.invalidate(key).await;

        Ok(())
    }

    async fn clear(&self) -> Result<(), EngineError> {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;

        Ok(())
    }
}
