use serde::Serialize;
use strum_macros::IntoStaticStr;
use thiserror::Error;
use worker::ErrorTaxonomy;

pub type CacheResult<T> = Result<T, CacheErrorKind>;

/// Every failure a cache call can settle with. Nothing outside this list
/// crosses the protocol boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, IntoStaticStr)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CacheErrorKind {
    #[error("Cache key is invalid: {0}")]
    KeyInvalid(String),
    #[error("Payload of {size} bytes is over the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("Backing engine unavailable: {0}")]
    BackingEngineUnavailable(String),
    #[error("Cache operation timed out")]
    Timeout,
    #[error("Cache operation was cancelled")]
    Cancelled,
    #[error("Nothing exists for this key at the source")]
    NotFound,
    #[error("Unknown cache error: {0}")]
    Unknown(String),
}

impl CacheErrorKind {
    /// Stable snake_case label, used for metrics and logs
    pub fn kind_name(&self) -> &'static str {
        self.into()
    }
}

impl ErrorTaxonomy for CacheErrorKind {
    fn cancelled() -> Self {
        Self::Cancelled
    }

    fn timed_out() -> Self {
        Self::Timeout
    }

    fn unknown(detail: String) -> Self {
        Self::Unknown(detail)
    }

    fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn kind_names_are_snake_case() {
        assert_eq!(CacheErrorKind::KeyInvalid("x".into()).kind_name(), "key_invalid");
        assert_eq!(
            CacheErrorKind::PayloadTooLarge { size: 2, limit: 1 }.kind_name(),
            "payload_too_large"
        );
        assert_eq!(CacheErrorKind::Timeout.kind_name(), "timeout");
        assert_eq!(CacheErrorKind::Unknown("x".into()).kind_name(), "unknown");
    }

    #[test]
    fn serializes_with_kind_tag() {
        let value = serde_json::to_value(CacheErrorKind::Unknown("broken".into())).unwrap();

        assert_eq!(value, json!({"kind": "unknown", "detail": "broken"}));
    }

    #[test]
    fn taxonomy_constructors() {
        assert!(CacheErrorKind::cancelled().is_cancellation());
        assert!(!CacheErrorKind::timed_out().is_cancellation());
        assert_eq!(
            CacheErrorKind::unknown("detail".into()),
            CacheErrorKind::Unknown("detail".into())
        );
    }
}
