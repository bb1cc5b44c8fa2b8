use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Scheduling hint forwarded to the backing engine
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    EnumString,
    Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Skip the cached copy and go back to the source
    pub force_refresh: bool,
    /// Cached copies older than this count as a miss
    pub max_age: Option<Duration>,
    pub priority: Priority,
}

/// The part of [`CacheOptions`] that changes what a fetch returns.
///
/// Two fetches for the same key with an equal policy are interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchPolicy {
    pub force_refresh: bool,
    pub max_age: Option<Duration>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;

        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);

        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;

        self
    }

    pub fn policy(&self) -> FetchPolicy {
        FetchPolicy {
            force_refresh: self.force_refresh,
            max_age: self.max_age,
        }
    }
}

impl FetchPolicy {
    /// True when something stored at `stored_at` is too old for this policy
    pub fn is_stale(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let Some(max_age) = self.max_age else {
            return false;
        };

        // clock going backwards counts as fresh
        let age = (now - stored_at).to_std().unwrap_or(Duration::ZERO);

        age > max_age
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    #[test]
    fn builder_sets_every_field() {
        let options = CacheOptions::new()
            .force_refresh(true)
            .max_age(Duration::from_secs(60))
            .priority(Priority::High);

        assert!(options.force_refresh);
        assert_eq!(options.max_age, Some(Duration::from_secs(60)));
        assert_eq!(options.priority, Priority::High);
    }

    #[test]
    fn priority_is_not_part_of_the_policy() {
        let low = CacheOptions::new().priority(Priority::Low);
        let high = CacheOptions::new().priority(Priority::High);

        assert_eq!(low.policy(), high.policy());
        assert_ne!(low.policy(), low.force_refresh(true).policy());
    }

    #[test]
    fn staleness_follows_max_age() {
        let now = Utc::now();
        let policy = CacheOptions::new().max_age(Duration::from_secs(10)).policy();

        assert!(!policy.is_stale(now - TimeDelta::seconds(5), now));
        assert!(policy.is_stale(now - TimeDelta::seconds(11), now));
        assert!(!policy.is_stale(now + TimeDelta::seconds(5), now));
        assert!(!CacheOptions::new().policy().is_stale(now - TimeDelta::days(365), now));
    }

    #[test]
    fn priority_parses_from_strings() {
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!(Priority::Low.to_string(), "low");
        assert!("urgent".parse::<Priority>().is_err());
    }
}
