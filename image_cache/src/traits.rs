use common::{
    errors::CacheErrorKind,
    object::{CachedObject, Fetched, PrefetchReport},
    options::CacheOptions,
};
use worker::WorkHandle;

pub type CacheHandle<T> = WorkHandle<T, CacheErrorKind>;

/// Everything a caller can ask of a cache.
///
/// Every method returns immediately. The outcome, success or one
/// [`CacheErrorKind`], is delivered exactly once through the handle, and the
/// handle can cancel the request while it is still pending.
pub trait CacheProtocol: Send + Sync {
    fn fetch(&self, key: &str, options: CacheOptions) -> CacheHandle<Fetched>;

    fn store(&self, key: &str, object: CachedObject, options: CacheOptions) -> CacheHandle<()>;

    fn remove(&self, key: &str) -> CacheHandle<()>;

    fn clear(&self) -> CacheHandle<()>;

    /// Warms every key, returns once each one has been fetched or has failed
    fn prefetch(&self, keys: Vec<String>, options: CacheOptions) -> CacheHandle<PrefetchReport>;
}
