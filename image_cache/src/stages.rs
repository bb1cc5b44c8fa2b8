use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use chrono::Utc;
use common::{
    errors::{CacheErrorKind, CacheResult},
    key::CacheKey,
    object::{CachedObject, Fetched},
    options::CacheOptions,
    request::Operation,
};
use tracing::{debug, trace, warn};
use worker::{CancelSignal, Stage};

use crate::{
    engine::{BackingEngine, EngineLoad, EngineLookup},
    mapping::engine_failure,
};

/// Counts clears. A load only lands if no clear ran since it started.
#[derive(Debug, Default)]
pub(crate) struct ClearGeneration(AtomicU64);

impl ClearGeneration {
    pub(crate) fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Returns the new generation
    pub(crate) fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Value threaded through the fetch pipeline
#[derive(Debug, Clone)]
pub struct FetchFlow {
    pub key: CacheKey,
    pub options: CacheOptions,
    pub object: Option<CachedObject>,
    pub from_cache: bool,
    generation: u64,
}

impl FetchFlow {
    pub fn new(key: CacheKey, options: CacheOptions) -> Self {
        Self {
            key,
            options,
            object: None,
            from_cache: false,
            generation: 0,
        }
    }

    pub(crate) fn started_in(mut self, generation: u64) -> Self {
        self.generation = generation;

        self
    }

    pub(crate) fn into_fetched(self) -> CacheResult<Fetched> {
        match self.object {
            Some(object) => Ok(Fetched {
                object,
                from_cache: self.from_cache,
            }),
            None => Err(CacheErrorKind::Unknown(format!(
                "fetch of {} finished without a payload",
                self.key
            ))),
        }
    }
}

/// Serves the stored copy when the caller's policy allows it
pub(crate) struct LookupStage {
    pub(crate) engine: Arc<dyn BackingEngine>,
}

#[async_trait]
impl Stage<FetchFlow, CacheErrorKind> for LookupStage {
    fn name(&self) -> &'static str {
        "lookup"
    }

    async fn run(&self, mut flow: FetchFlow, _signal: &CancelSignal) -> CacheResult<FetchFlow> {
        let policy = flow.options.policy();

        if policy.force_refresh {
            trace!("Refresh forced for {}, not consulting the engine", flow.key);
            return Ok(flow);
        }

        let lookup = self
            .engine
            .lookup(&flow.key)
            .await
            .map_err(|err| engine_failure(Operation::Fetch, err))?;

        let EngineLookup::Hit(entry) = lookup else {
            debug!("Cache miss for {}", flow.key);
            return Ok(flow);
        };

        let now = Utc::now();

        if entry.is_expired(now) || policy.is_stale(entry.stored_at, now) {
            debug!("Cached copy of {} is too old, treating as a miss", flow.key);
            return Ok(flow);
        }

        debug!("Cache hit for {}", flow.key);
        flow.object = Some(entry.object);
        flow.from_cache = true;

        Ok(flow)
    }
}

/// Goes to the source when nothing usable was cached
pub(crate) struct LoadStage {
    pub(crate) engine: Arc<dyn BackingEngine>,
    pub(crate) max_payload_bytes: usize,
}

#[async_trait]
impl Stage<FetchFlow, CacheErrorKind> for LoadStage {
    fn name(&self) -> &'static str {
        "load"
    }

    async fn run(&self, mut flow: FetchFlow, signal: &CancelSignal) -> CacheResult<FetchFlow> {
        if flow.object.is_some() {
            return Ok(flow);
        }

        let loaded = tokio::select! {
            biased;
            _ = signal.cancelled() => return Err(CacheErrorKind::Cancelled),
            loaded = self.engine.load(&flow.key, flow.options.priority) => loaded,
        };

        match loaded.map_err(|err| engine_failure(Operation::Fetch, err))? {
            EngineLoad::Found(object) if object.size() > self.max_payload_bytes => {
                Err(CacheErrorKind::PayloadTooLarge {
                    size: object.size(),
                    limit: self.max_payload_bytes,
                })
            }
            EngineLoad::Found(object) => {
                debug!("Loaded {} bytes for {}", object.size(), flow.key);
                flow.object = Some(object);
                flow.from_cache = false;

                Ok(flow)
            }
            EngineLoad::Missing => Err(CacheErrorKind::NotFound),
        }
    }
}

/// Writes freshly loaded payloads back to the engine, unless a clear ran
/// while they were loading
pub(crate) struct StoreStage {
    pub(crate) engine: Arc<dyn BackingEngine>,
    pub(crate) clears: Arc<ClearGeneration>,
}

#[async_trait]
impl Stage<FetchFlow, CacheErrorKind> for StoreStage {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn run(&self, flow: FetchFlow, _signal: &CancelSignal) -> CacheResult<FetchFlow> {
        if flow.from_cache {
            return Ok(flow);
        }

        let Some(object) = &flow.object else {
            return Ok(flow);
        };

        if self.clears.current() != flow.generation {
            debug!("Cache cleared while {} was loading, not keeping it", flow.key);
            return Ok(flow);
        }

        // the caller still gets the payload, the next fetch just loads again
        if let Err(err) = self.engine.store(&flow.key, object.clone()).await {
            warn!("Could not keep {} after loading it: {}", flow.key, err);
            return Ok(flow);
        }

        // a clear landed between the check and the write
        if self.clears.current() != flow.generation
            && let Err(err) = self.engine.remove(&flow.key).await
        {
            warn!("Could not drop {} loaded before a clear: {}", flow.key, err);
        }

        Ok(flow)
    }
}
