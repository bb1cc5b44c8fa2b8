use std::time::Duration;

use serde::Deserialize;
use serde_with::{NoneAsEmptyString, serde_as};

use crate::{
    deserialize_disallow_empty_string::disallow_empty_string,
    options::{CacheOptions, Priority},
};

/// Query string accepted when fetching through the HTTP front-end
#[serde_as]
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FetchParams {
    #[serde(deserialize_with = "disallow_empty_string")]
    pub key: String,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub force_refresh: Option<bool>,
    /// Seconds
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub max_age: Option<u64>,
    #[serde(default)]
    pub priority: Priority,
}

impl FetchParams {
    pub fn options(&self) -> CacheOptions {
        let mut options = CacheOptions::new()
            .force_refresh(self.force_refresh.unwrap_or(false))
            .priority(self.priority);

        if let Some(seconds) = self.max_age {
            options = options.max_age(Duration::from_secs(seconds));
        }

        options
    }
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct KeyParams {
    #[serde(deserialize_with = "disallow_empty_string")]
    pub key: String,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct PrefetchBody {
    pub keys: Vec<String>,
    #[serde(default)]
    pub force_refresh: bool,
    /// Seconds, copies older than this are warmed again
    #[serde(default)]
    pub max_age: Option<u64>,
    #[serde(default)]
    pub priority: Priority,
}

impl PrefetchBody {
    pub fn options(&self) -> CacheOptions {
        let mut options = CacheOptions::new()
            .force_refresh(self.force_refresh)
            .priority(self.priority);

        if let Some(seconds) = self.max_age {
            options = options.max_age(Duration::from_secs(seconds));
        }

        options
    }
}
