use std::{env, fmt::Display, str::FromStr, time::Duration};

use tracing::warn;

const DEFAULT_MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PREFETCH_CONCURRENCY: usize = 8;

const ENV_MAX_PAYLOAD_BYTES: &str = "CACHE_MAX_PAYLOAD_BYTES";
const ENV_OPERATION_TIMEOUT_SECS: &str = "CACHE_OPERATION_TIMEOUT_SECS";
const ENV_PREFETCH_CONCURRENCY: &str = "CACHE_PREFETCH_CONCURRENCY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub max_payload_bytes: usize,
    /// `None` lets operations run for as long as the engine takes
    pub operation_timeout: Option<Duration>,
    pub prefetch_concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            operation_timeout: Some(Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS)),
            prefetch_concurrency: DEFAULT_PREFETCH_CONCURRENCY,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let timeout_secs = parse_or(
            &lookup,
            ENV_OPERATION_TIMEOUT_SECS,
            DEFAULT_OPERATION_TIMEOUT_SECS,
        );

        Self {
            max_payload_bytes: parse_or(&lookup, ENV_MAX_PAYLOAD_BYTES, DEFAULT_MAX_PAYLOAD_BYTES),
            // zero disables the deadline
            operation_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            prefetch_concurrency: parse_or(
                &lookup,
                ENV_PREFETCH_CONCURRENCY,
                DEFAULT_PREFETCH_CONCURRENCY,
            )
            .max(1),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr + Display,
{
    let Some(raw) = lookup(name) else {
        return default;
    };

    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!("Ignoring unparsable {}={:?}, using {}", name, raw, default);
            default
        }
    }
}
