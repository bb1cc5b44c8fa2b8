use std::{str::FromStr, time::Duration};

use reqwest::{
    ClientBuilder as BaseClientBuilder, Url,
    header::{CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue},
};
use reqwest_middleware::{ClientBuilder as RetryableClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use tracing::{debug, info, warn};

use crate::{errors::FetcherError, request::Request, response::FetchResponse};

const REQUEST_TIMEOUT_SECONDS: u64 = 30;
const MIN_MILLIS_BACKOFF: u64 = 250;
const MAX_MILLIS_BACKOFF: u64 = 5_000;
const MAX_RETRY: u32 = 3;
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const USER_AGENT: &str = concat!("image-cache/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub max_retries: u32,
    pub max_body_bytes: usize,
    pub https_only: bool,
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECONDS),
            min_backoff: Duration::from_millis(MIN_MILLIS_BACKOFF),
            max_backoff: Duration::from_millis(MAX_MILLIS_BACKOFF),
            max_retries: MAX_RETRY,
            max_body_bytes: MAX_BODY_BYTES,
            https_only: true,
            user_agent: USER_AGENT.into(),
        }
    }
}

/// Downloads raw bytes, retrying transient failures with exponential backoff
#[derive(Clone)]
pub struct HttpFetcher {
    client: ClientWithMiddleware,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetcherError> {
        let base_client = BaseClientBuilder::new()
            .gzip(true)
            .http1_ignore_invalid_headers_in_responses(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .https_only(config.https_only)
            .build()
            .map_err(|err| {
                warn!("Failed to build reqwest client: {err}");
                FetcherError::ClientBuildFailed
            })?;

        let retry_strat = ExponentialBackoff::builder()
            .retry_bounds(config.min_backoff, config.max_backoff)
            .build_with_max_retries(config.max_retries);
        let retry_middleware = RetryTransientMiddleware::new_with_policy(retry_strat);

        let client = RetryableClientBuilder::new(base_client)
            .with(retry_middleware)
            .build();

        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }

    pub async fn fetch(&self, request: Request) -> Result<FetchResponse, FetcherError> {
        let url = Url::parse(&request.url)
            .map_err(|_| FetcherError::InvalidUrl(request.url.clone()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetcherError::InvalidUrl(request.url));
        }

        let mut request_builder = self.client.get(url);

        if let Some(headers) = request.headers {
            let mut header_map = HeaderMap::new();

            for (key, value) in headers.iter() {
                header_map.append(HeaderName::from_str(key)?, HeaderValue::from_str(value)?);
            }

            request_builder = request_builder.headers(header_map);
        }

        info!("Sending request to {}", request.url);

        let mut response = request_builder.send().await?;

        debug!("{response:?}");

        let status = response.status();
        let headers = response.headers().clone();

        if let Some(size) = declared_length(&headers)
            && size > self.max_body_bytes
        {
            return Err(FetcherError::BodyTooLarge {
                size,
                limit: self.max_body_bytes,
            });
        }

        // the declared length can be missing or wrong, count what actually arrives
        let mut body = Vec::new();

        while let Some(chunk) = response.chunk().await? {
            append_within_limit(&mut body, &chunk, self.max_body_bytes)?;
        }

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

fn append_within_limit(body: &mut Vec<u8>, chunk: &[u8], limit: usize) -> Result<(), FetcherError> {
    let size = body.len() + chunk.len();

    if size > limit {
        return Err(FetcherError::BodyTooLarge { size, limit });
    }

    body.extend_from_slice(chunk);

    Ok(())
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse::<usize>()
        .ok()
}
