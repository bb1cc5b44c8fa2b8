use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::{errors::CacheErrorKind, key::CacheKey};

/// A binary payload as callers store and receive it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedObject {
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

impl CachedObject {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            mime_type: None,
            data: data.into(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());

        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// What a backing engine keeps for a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub object: CachedObject,
    pub stored_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn new(key: CacheKey, object: CachedObject, time_to_live: Option<Duration>) -> Self {
        let now = Utc::now();

        let expires_at = time_to_live
            .and_then(|ttl| TimeDelta::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));

        Self {
            key,
            object,
            stored_at: now,
            expires_at,
        }
    }

    pub fn size(&self) -> usize {
        self.object.size()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Successful fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub object: CachedObject,
    /// False when the payload came from the source during this call
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrefetchFailure {
    pub key: String,
    pub error: CacheErrorKind,
}

/// Aggregate outcome of a prefetch, one bucket per key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchReport {
    /// Loaded from the source by this prefetch
    pub warmed: Vec<CacheKey>,
    pub already_cached: Vec<CacheKey>,
    pub failed: Vec<PrefetchFailure>,
}

impl PrefetchReport {
    pub fn total(&self) -> usize {
        self.warmed.len() + self.already_cached.len() + self.failed.len()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}
