pub mod client;
pub mod errors;
pub mod request;
pub mod response;

pub use client::{FetcherConfig, HttpFetcher};
pub use errors::FetcherError;
pub use request::{Request, RequestBuilder};
pub use response::FetchResponse;
