use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use common::{
    key::CacheKey,
    object::CachedObject,
    options::Priority,
};
use tokio::sync::Notify;

use crate::{
    engine::{BackingEngine, EngineError, EngineLoad, EngineLookup},
    origin::Origin,
};

/// Origin serving a fixed set of objects, counting every call
#[derive(Default)]
pub(crate) struct ScriptedOrigin {
    objects: HashMap<String, CachedObject>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl ScriptedOrigin {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_object(mut self, key: &str, data: Vec<u8>) -> Self {
        self.objects.insert(key.to_string(), CachedObject::new(data));

        self
    }

    /// Every call blocks until the gate is notified
    pub(crate) fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);

        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Origin for ScriptedOrigin {
    async fn fetch(
        &self,
        key: &CacheKey,
        _priority: Priority,
    ) -> Result<Option<CachedObject>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        Ok(self.objects.get(key.as_str()).cloned())
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Breakage {
    Unavailable,
    TimedOut,
    Panics,
}

/// Engine that fails every call the same way
pub(crate) struct BrokenEngine {
    pub(crate) breakage: Breakage,
}

impl BrokenEngine {
    fn fail<T>(&self) -> Result<T, EngineError> {
        match self.breakage {
            Breakage::Unavailable => Err(EngineError::Unavailable("connection refused".into())),
            Breakage::TimedOut => Err(EngineError::TimedOut),
            Breakage::Panics => panic!("engine exploded"),
        }
    }
}

#[async_trait]
impl BackingEngine for BrokenEngine {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn lookup(&self, _key: &CacheKey) -> Result<EngineLookup, EngineError> {
        self.fail()
    }

    async fn load(&self, _key: &CacheKey, _priority: Priority) -> Result<EngineLoad, EngineError> {
        self.fail()
    }

    async fn store(&self, _key: &CacheKey, _object: CachedObject) -> Result<(), EngineError> {
        self.fail()
    }

    async fn remove(&self, _key: &CacheKey) -> Result<(), EngineError> {
        self.fail()
    }

    async fn clear(&self) -> Result<(), EngineError> {
        self.fail()
    }
}
