use std::fmt::{Display, Formatter, Result as FmtResult};

use strum_macros::{Display as StrumDisplay, IntoStaticStr};

use crate::{errors::CacheErrorKind, key::CacheKey, options::CacheOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Fetch,
    Store,
    Remove,
    Clear,
    Prefetch,
}

impl Operation {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// One call into a cache worker, before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRequest {
    pub operation: Operation,
    pub key: Option<String>,
    pub options: CacheOptions,
}

impl CacheRequest {
    pub fn fetch(key: impl Into<String>, options: CacheOptions) -> Self {
        Self::keyed(Operation::Fetch, key, options)
    }

    pub fn store(key: impl Into<String>, options: CacheOptions) -> Self {
        Self::keyed(Operation::Store, key, options)
    }

    pub fn remove(key: impl Into<String>) -> Self {
        Self::keyed(Operation::Remove, key, CacheOptions::default())
    }

    pub fn clear() -> Self {
        Self {
            operation: Operation::Clear,
            key: None,
            options: CacheOptions::default(),
        }
    }

    pub fn prefetch(options: CacheOptions) -> Self {
        Self {
            operation: Operation::Prefetch,
            key: None,
            options,
        }
    }

    fn keyed(operation: Operation, key: impl Into<String>, options: CacheOptions) -> Self {
        Self {
            operation,
            key: Some(key.into()),
            options,
        }
    }

    /// Validates the key of a keyed request
    pub fn cache_key(&self) -> Result<CacheKey, CacheErrorKind> {
        match &self.key {
            Some(raw) => CacheKey::parse(raw.as_str()),
            None => Err(CacheErrorKind::KeyInvalid(format!(
                "{} requests carry no key",
                self.operation
            ))),
        }
    }
}

impl Display for CacheRequest {
    fn fmt(&self, format: &mut Formatter) -> FmtResult {
        match &self.key {
            Some(key) => write!(format, "{} {}", self.operation, key),
            None => write!(format, "{}", self.operation),
        }
    }
}
