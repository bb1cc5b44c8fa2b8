use async_trait::async_trait;
use common::{key::CacheKey, object::CachedObject, options::Priority};
use fetcher::{FetchResponse, FetcherConfig, FetcherError, HttpFetcher, Request};
use tracing::debug;

use crate::engine::EngineError;

const ACCEPT: &str = "image/avif,image/webp,image/*,*/*;q=0.8";

/// Where an engine goes on a miss
#[async_trait]
pub trait Origin: Send + Sync {
    /// `Ok(None)` means the origin has nothing for this key
    async fn fetch(
        &self,
        key: &CacheKey,
        priority: Priority,
    ) -> Result<Option<CachedObject>, EngineError>;
}

/// Treats every key as a URL and downloads it
pub struct HttpOrigin {
    fetcher: HttpFetcher,
}

impl HttpOrigin {
    pub fn new(config: FetcherConfig) -> Result<Self, FetcherError> {
        Ok(Self {
            fetcher: HttpFetcher::new(config)?,
        })
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch(
        &self,
        key: &CacheKey,
        priority: Priority,
    ) -> Result<Option<CachedObject>, EngineError> {
        debug!("Downloading {} at {} priority", key, priority);

        let request = Request::builder()
            .set_url(key.as_str())
            .add_header("accept", ACCEPT)
            .build();

        let response = self.fetcher.fetch(request).await?;

        classify(response)
    }
}

fn classify(response: FetchResponse) -> Result<Option<CachedObject>, EngineError> {
    let status = response.status;

    if status.is_success() {
        let mime_type = response.content_type();

        return Ok(Some(CachedObject {
            mime_type,
            data: response.body,
        }));
    }

    match status.as_u16() {
        404 | 410 => Ok(None),
        429 | 500..=599 => Err(EngineError::Unavailable(format!(
            "origin answered {status}"
        ))),
        _ => Err(EngineError::Other(format!("origin answered {status}"))),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::{
        StatusCode,
        header::{CONTENT_TYPE, HeaderMap, HeaderValue},
    };

    use super::*;

    fn response(status: StatusCode, body: &[u8]) -> FetchResponse {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));

        FetchResponse {
            status,
            headers,
            body: body.to_vec(),
        }
    }

    #[test]
    fn success_becomes_an_object() {
        let object = classify(response(StatusCode::OK, &[1, 2, 3]))
            .unwrap()
            .unwrap();

        assert_eq!(object.mime_type.as_deref(), Some("image/png"));
        assert_eq!(object.data, vec![1, 2, 3]);
    }

    #[test]
    fn gone_means_missing() {
        assert!(classify(response(StatusCode::NOT_FOUND, b"")).unwrap().is_none());
        assert!(classify(response(StatusCode::GONE, b"")).unwrap().is_none());
    }

    #[test]
    fn server_trouble_is_unavailable() {
        assert!(matches!(
            classify(response(StatusCode::BAD_GATEWAY, b"")),
            Err(EngineError::Unavailable(_))
        ));
        assert!(matches!(
            classify(response(StatusCode::TOO_MANY_REQUESTS, b"")),
            Err(EngineError::Unavailable(_))
        ));
        assert!(matches!(
            classify(response(StatusCode::FORBIDDEN, b"")),
            Err(EngineError::Other(_))
        ));
    }
}
