use common::{errors::CacheErrorKind, request::Operation};
use fetcher::FetcherError;
use tracing::warn;

use crate::engine::EngineError;

/// Translates an engine failure, logging the original since only the kind
/// survives past this point
pub(crate) fn engine_failure(operation: Operation, err: EngineError) -> CacheErrorKind {
    warn!("Engine failed during {}: {}", operation, err);

    map_engine_error(err)
}

pub(crate) fn map_engine_error(err: EngineError) -> CacheErrorKind {
    match err {
        EngineError::Unavailable(detail) => CacheErrorKind::BackingEngineUnavailable(detail),
        EngineError::TimedOut => CacheErrorKind::Timeout,
        EngineError::Rejected { size, limit } => CacheErrorKind::PayloadTooLarge { size, limit },
        EngineError::Origin(fetch_err) => map_fetcher_error(fetch_err),
        EngineError::Interrupted => CacheErrorKind::Cancelled,
        EngineError::Other(detail) => CacheErrorKind::Unknown(detail),
    }
}

fn map_fetcher_error(err: FetcherError) -> CacheErrorKind {
    if err.is_timeout() {
        return CacheErrorKind::Timeout;
    }

    if err.is_connect() {
        return CacheErrorKind::BackingEngineUnavailable(err.to_string());
    }

    match err {
        FetcherError::InvalidUrl(url) => {
            CacheErrorKind::KeyInvalid(format!("{url} cannot be fetched from the origin"))
        }
        FetcherError::BodyTooLarge { size, limit } => {
            CacheErrorKind::PayloadTooLarge { size, limit }
        }
        FetcherError::ClientBuildFailed => {
            CacheErrorKind::BackingEngineUnavailable(err.to_string())
        }
        other => CacheErrorKind::Unknown(other.to_string()),
    }
}
