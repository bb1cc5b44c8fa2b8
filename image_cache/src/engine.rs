use async_trait::async_trait;
use common::{
    key::CacheKey,
    object::{CacheEntry, CachedObject},
    options::Priority,
};
use fetcher::FetcherError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLookup {
    Hit(CacheEntry),
    Miss,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLoad {
    Found(CachedObject),
    /// The source has nothing for this key
    Missing,
}

/// Whatever an engine can fail with. Never leaves this crate, the worker maps
/// it onto a `CacheErrorKind` first.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine unavailable: {0}")]
    Unavailable(String),
    #[error("Engine timed out")]
    TimedOut,
    #[error("Engine rejected {size} bytes, limit is {limit}")]
    Rejected { size: usize, limit: usize },
    #[error("Origin request failed: {0}")]
    Origin(#[from] FetcherError),
    #[error("Engine call was interrupted")]
    Interrupted,
    #[error("{0}")]
    Other(String),
}

/// Storage behind a cache worker.
///
/// `lookup` only ever consults what is stored. `load` goes to the source of
/// truth and does not store what it finds; the worker decides that.
#[async_trait]
pub trait BackingEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, key: &CacheKey) -> Result<EngineLookup, EngineError>;

    async fn load(&self, key: &CacheKey, priority: Priority) -> Result<EngineLoad, EngineError>;

    async fn store(&self, key: &CacheKey, object: CachedObject) -> Result<(), EngineError>;

    /// Removing something that is not stored succeeds
    async fn remove(&self, key: &CacheKey) -> Result<(), EngineError>;

    async fn clear(&self) -> Result<(), EngineError>;
}
