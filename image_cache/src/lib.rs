mod cache;
pub mod engine;
mod mapping;
pub mod memory_cache;
pub mod origin;
pub mod stages;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{CacheWorker, CacheWorkerBuilder};
pub use engine::{BackingEngine, EngineError, EngineLoad, EngineLookup};
pub use memory_cache::{MemoryCache, MemoryCacheBuilder};
pub use origin::{HttpOrigin, Origin};
pub use stages::FetchFlow;
pub use traits::{CacheHandle, CacheProtocol};
