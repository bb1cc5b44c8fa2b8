use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::errors::CacheErrorKind;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub(crate) enum ApiError {
    #[error(transparent)]
    QueryExtractorRejection(#[from] QueryRejection),
    #[error(transparent)]
    JsonExtractorRejection(#[from] JsonRejection),
    #[error(transparent)]
    Cache(#[from] CacheErrorKind),
}

pub(crate) fn status_for(err: &CacheErrorKind) -> StatusCode {
    match err {
        CacheErrorKind::KeyInvalid(_) => StatusCode::BAD_REQUEST,
        CacheErrorKind::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        CacheErrorKind::NotFound => StatusCode::NOT_FOUND,
        CacheErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        CacheErrorKind::BackingEngineUnavailable(_) | CacheErrorKind::Cancelled => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        CacheErrorKind::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::QueryExtractorRejection(rejection) => {
                debug!(
                    "Failed to parse incoming request: {}, {}",
                    rejection.status(),
                    rejection.body_text()
                );

                StatusCode::BAD_REQUEST
            }
            Self::JsonExtractorRejection(rejection) => {
                debug!(
                    "Failed to parse incoming request: {}, {}",
                    rejection.status(),
                    rejection.body_text()
                );

                StatusCode::BAD_REQUEST
            }
            Self::Cache(err) => {
                let status = status_for(&err);

                match status.is_server_error() {
                    true => warn!("Cache call failed with {}: {}", status, err),
                    false => debug!("Cache call refused with {}: {}", status, err),
                }

                status
            }
        };

        // details stay in the logs
        status.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_errors_map_to_statuses() {
        let cases = [
            (CacheErrorKind::KeyInvalid("".into()), StatusCode::BAD_REQUEST),
            (
                CacheErrorKind::PayloadTooLarge { size: 2, limit: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (CacheErrorKind::NotFound, StatusCode::NOT_FOUND),
            (CacheErrorKind::Timeout, StatusCode::GATEWAY_TIMEOUT),
            (
                CacheErrorKind::BackingEngineUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (CacheErrorKind::Cancelled, StatusCode::SERVICE_UNAVAILABLE),
            (
                CacheErrorKind::Unknown("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "{err}");
        }
    }

    #[test]
    fn responses_carry_no_detail() {
        let response = ApiError::from(CacheErrorKind::Unknown("secret path".into())).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
