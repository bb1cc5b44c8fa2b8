use reqwest::header::{InvalidHeaderName, InvalidHeaderValue};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetcherError {
    #[error("HTTP client gave up after retrying")]
    ClientMiddlewareError(#[from] reqwest_middleware::Error),
    #[error("HTTP client error")]
    ClientError(#[from] reqwest::Error),
    #[error("Failed to build HTTP client")]
    ClientBuildFailed,
    #[error("Failed to create header")]
    InvalidHeader,
    #[error("Not a fetchable URL: {0}")]
    InvalidUrl(String),
    #[error("Response body of {size} bytes is over the {limit} byte limit")]
    BodyTooLarge { size: usize, limit: usize },
}

impl FetcherError {
    fn reqwest_error(&self) -> Option<&reqwest::Error> {
        match self {
            Self::ClientError(err) => Some(err),
            Self::ClientMiddlewareError(reqwest_middleware::Error::Reqwest(err)) => Some(err),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.reqwest_error().is_some_and(|err| err.is_timeout())
    }

    /// The remote end could not be reached at all
    pub fn is_connect(&self) -> bool {
        self.reqwest_error().is_some_and(|err| err.is_connect())
    }
}

impl From<InvalidHeaderName> for FetcherError {
    fn from(_err: InvalidHeaderName) -> Self {
        Self::InvalidHeader
    }
}

impl From<InvalidHeaderValue> for FetcherError {
    fn from(_err: InvalidHeaderValue) -> Self {
        Self::InvalidHeader
    }
}
