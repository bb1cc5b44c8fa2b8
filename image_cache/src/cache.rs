use std::{collections::BTreeSet, future::Future, sync::Arc, time::Duration};

use common::{
    config::WorkerConfig,
    errors::{CacheErrorKind, CacheResult},
    key::CacheKey,
    object::{CachedObject, Fetched, PrefetchFailure, PrefetchReport},
    options::{CacheOptions, FetchPolicy},
    request::{CacheRequest, Operation},
};
use futures::{StreamExt, stream};
use metrics::{Metrics, put_metric};
use tokio::time::timeout;
use tracing::{debug, info};
use worker::{Coalescer, Dispatcher, FlightRole, Pipeline, Stage};

use crate::{
    engine::BackingEngine,
    mapping::engine_failure,
    stages::{ClearGeneration, FetchFlow, LoadStage, LookupStage, StoreStage},
    traits::{CacheHandle, CacheProtocol},
};

type FetchFlights = Coalescer<CacheKey, FetchPolicy, Fetched, CacheErrorKind>;

struct WorkerCore {
    engine: Arc<dyn BackingEngine>,
    dispatcher: Dispatcher,
    flights: FetchFlights,
    pipeline: Pipeline<FetchFlow, CacheErrorKind>,
    clears: Arc<ClearGeneration>,
    config: WorkerConfig,
}

/// Asynchronous cache in front of a [`BackingEngine`].
///
/// Fetches run `lookup -> load -> store` as one unit per key, so any number of
/// concurrent fetches for a key with the same policy cost at most one load.
/// Clones share the same engine, flights and shutdown state.
#[derive(Clone)]
pub struct CacheWorker {
    core: Arc<WorkerCore>,
}

pub struct CacheWorkerBuilder {
    engine: Arc<dyn BackingEngine>,
    config: WorkerConfig,
    stages: Vec<Arc<dyn Stage<FetchFlow, CacheErrorKind>>>,
}

impl CacheWorkerBuilder {
    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;

        self
    }

    /// Extra stage run on every fetched payload before it is stored, in the
    /// order added. Failing here keeps a freshly loaded payload out of the
    /// engine.
    pub fn with_stage(mut self, stage: impl Stage<FetchFlow, CacheErrorKind> + 'static) -> Self {
        self.stages.push(Arc::new(stage));

        self
    }

    pub fn build(self) -> CacheWorker {
        let clears = Arc::new(ClearGeneration::default());
        let mut pipeline: Pipeline<FetchFlow, CacheErrorKind> = Pipeline::new()
            .with_stage(LookupStage {
                engine: Arc::clone(&self.engine),
            })
            .with_stage(LoadStage {
                engine: Arc::clone(&self.engine),
                max_payload_bytes: self.config.max_payload_bytes,
            });

        for stage in self.stages {
            pipeline.push(stage);
        }

        let pipeline = pipeline.with_stage(StoreStage {
            engine: Arc::clone(&self.engine),
            clears: Arc::clone(&clears),
        });

        info!(
            "Cache worker over the {} engine, fetch stages {:?}",
            self.engine.name(),
            pipeline.stage_names()
        );

        CacheWorker {
            core: Arc::new(WorkerCore {
                dispatcher: Dispatcher::new(self.config.operation_timeout),
                flights: Coalescer::new(),
                pipeline,
                clears,
                engine: self.engine,
                config: self.config,
            }),
        }
    }
}

impl CacheWorker {
    pub fn new(engine: Arc<dyn BackingEngine>) -> Self {
        Self::builder(engine).build()
    }

    pub fn builder(engine: Arc<dyn BackingEngine>) -> CacheWorkerBuilder {
        CacheWorkerBuilder {
            engine,
            config: WorkerConfig::default(),
            stages: Vec::new(),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.core.config
    }

    pub fn engine_name(&self) -> &'static str {
        self.core.engine.name()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.core.pipeline.stage_names()
    }

    /// Keys with a fetch currently in the air
    pub fn in_flight(&self) -> usize {
        self.core.flights.in_flight()
    }

    pub fn is_shut_down(&self) -> bool {
        self.core.dispatcher.is_shut_down()
    }

    /// Cancels everything outstanding. Calls made afterwards fail with
    /// `BackingEngineUnavailable`.
    pub fn shutdown(&self) {
        if !self.core.dispatcher.shutdown() {
            return;
        }

        self.core.flights.cancel_all();

        info!("Cache worker over the {} engine shut down", self.engine_name());
    }

    fn admit(&self) -> CacheResult<()> {
        match self.is_shut_down() {
            true => Err(CacheErrorKind::BackingEngineUnavailable(
                "cache worker has shut down".into(),
            )),
            false => Ok(()),
        }
    }

    fn reject<T>(&self, request: &CacheRequest, err: CacheErrorKind) -> CacheHandle<T> {
        let outcome: CacheResult<T> = Err(err);
        record_outcome(request, &outcome);

        self.core
            .dispatcher
            .settled(request.operation.name(), outcome)
    }

    fn submit<T, F, Fut>(&self, request: CacheRequest, work: F) -> CacheHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<WorkerCore>) -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        self.submit_with(request, self.core.dispatcher.deadline(), work)
    }

    /// Outcomes are recorded however the request ends, cancelled and timed
    /// out ones included
    fn submit_with<T, F, Fut>(
        &self,
        request: CacheRequest,
        deadline: Option<Duration>,
        work: F,
    ) -> CacheHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<WorkerCore>) -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        let core = Arc::clone(&self.core);
        let operation = request.operation.name();
        let observed = request.clone();

        self.core.dispatcher.dispatch_with(
            operation,
            deadline,
            move |_signal| async move {
                debug!("Handling {}", request);

                work(core).await
            },
            move |outcome| record_outcome(&observed, outcome),
        )
    }
}

impl CacheProtocol for CacheWorker {
    fn fetch(&self, key: &str, options: CacheOptions) -> CacheHandle<Fetched> {
        let request = CacheRequest::fetch(key, options);

        let key = match self.admit().and_then(|()| request.cache_key()) {
            Ok(key) => key,
            Err(err) => return self.reject(&request, err),
        };

        self.submit(request, move |core| async move {
            core.fetch_key(key, options).await
        })
    }

    fn store(&self, key: &str, object: CachedObject, options: CacheOptions) -> CacheHandle<()> {
        let request = CacheRequest::store(key, options);
        let limit = self.core.config.max_payload_bytes;

        let admitted = self
            .admit()
            .and_then(|()| request.cache_key())
            .and_then(|key| match object.size() > limit {
                true => Err(CacheErrorKind::PayloadTooLarge {
                    size: object.size(),
                    limit,
                }),
                false => Ok(key),
            });

        let key = match admitted {
            Ok(key) => key,
            Err(err) => return self.reject(&request, err),
        };

        self.submit(request, move |core| async move {
            // never lands underneath a fetch of the same key
            core.flights.settled(&key).await;

            core.engine
                .store(&key, object)
                .await
                .map_err(|err| engine_failure(Operation::Store, err))
        })
    }

    fn remove(&self, key: &str) -> CacheHandle<()> {
        let request = CacheRequest::remove(key);

        let key = match self.admit().and_then(|()| request.cache_key()) {
            Ok(key) => key,
            Err(err) => return self.reject(&request, err),
        };

        self.submit(request, move |core| async move {
            core.flights.settled(&key).await;

            core.engine
                .remove(&key)
                .await
                .map_err(|err| engine_failure(Operation::Remove, err))
        })
    }

    fn clear(&self) -> CacheHandle<()> {
        let request = CacheRequest::clear();

        if let Err(err) = self.admit() {
            return self.reject(&request, err);
        }

        self.submit(request, |core| async move {
            // loads already in the air see the new generation and skip their store
            let generation = core.clears.advance();
            debug!("Clearing the cache, generation {}", generation);

            core.engine
                .clear()
                .await
                .map_err(|err| engine_failure(Operation::Clear, err))
        })
    }

    fn prefetch(&self, keys: Vec<String>, options: CacheOptions) -> CacheHandle<PrefetchReport> {
        let request = CacheRequest::prefetch(options);

        if let Err(err) = self.admit() {
            return self.reject(&request, err);
        }

        // each key gets the operation timeout on its own, the batch has none
        self.submit_with(request, None, move |core| async move {
            Ok(core.prefetch_keys(keys, options).await)
        })
    }
}

impl WorkerCore {
    async fn fetch_key(&self, key: CacheKey, options: CacheOptions) -> CacheResult<Fetched> {
        let pipeline = self.pipeline.clone();
        let clears = Arc::clone(&self.clears);

        let (outcome, role) = self
            .flights
            .run(key.clone(), options.policy(), move |signal| {
                let flow = FetchFlow::new(key, options).started_in(clears.current());

                async move { pipeline.run(flow, &signal).await?.into_fetched() }
            })
            .await;

        if role == FlightRole::Follower {
            put_metric!(Metrics::CacheCoalesced, 1);
        }

        if let Ok(fetched) = &outcome {
            let metric = match fetched.from_cache {
                true => Metrics::CacheHit,
                false => Metrics::CacheMiss,
            };

            put_metric!(metric, 1);
        }

        outcome
    }

    async fn prefetch_keys(self: Arc<Self>, keys: Vec<String>, options: CacheOptions) -> PrefetchReport {
        let mut report = PrefetchReport::default();
        let mut unique = BTreeSet::new();

        for raw in keys {
            match CacheKey::parse(raw.as_str()) {
                Ok(key) => {
                    unique.insert(key);
                }
                Err(error) => report.failed.push(PrefetchFailure { key: raw, error }),
            }
        }

        let deadline = self.config.operation_timeout;

        let outcomes: Vec<(CacheKey, CacheResult<Fetched>)> = stream::iter(unique)
            .map(|key| {
                let core = Arc::clone(&self);

                async move {
                    let fetched = core.fetch_key(key.clone(), options);

                    // dropping a late fetch releases its share of the flight
                    let outcome = match deadline {
                        Some(limit) => timeout(limit, fetched)
                            .await
                            .unwrap_or_else(|_| Err(CacheErrorKind::Timeout)),
                        None => fetched.await,
                    };

                    (key, outcome)
                }
            })
            .buffer_unordered(self.config.prefetch_concurrency)
            .collect()
            .await;

        for (key, outcome) in outcomes {
            match outcome {
                Ok(fetched) if fetched.from_cache => report.already_cached.push(key),
                Ok(_) => report.warmed.push(key),
                Err(error) => report.failed.push(PrefetchFailure {
                    key: key.to_string(),
                    error,
                }),
            }
        }

        report.warmed.sort();
        report.already_cached.sort();
        report.failed.sort_by(|left, right| left.key.cmp(&right.key));

        info!(
            "Prefetched {} keys: {} warmed, {} already cached, {} failed",
            report.total(),
            report.warmed.len(),
            report.already_cached.len(),
            report.failed.len()
        );

        report
    }
}

fn record_outcome<T>(request: &CacheRequest, outcome: &CacheResult<T>) {
    let operation = request.operation;

    match outcome {
        Ok(_) => {
            let metric = match operation {
                Operation::Store => Metrics::CacheStored,
                Operation::Remove => Metrics::CacheRemoved,
                Operation::Clear => Metrics::CacheCleared,
                Operation::Fetch | Operation::Prefetch => return,
            };

            put_metric!(metric, 1);
        }
        Err(err) => {
            debug!("{} failed: {}", request, err);

            put_metric!(
                Metrics::CacheFailure,
                1,
                "operation" => operation.name(),
                "kind" => err.kind_name(),
            );
        }
    }
}
