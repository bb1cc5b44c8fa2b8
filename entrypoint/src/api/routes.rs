pub(crate) mod cache;
pub(crate) mod error_message_erasure;
pub(crate) mod image;
pub(crate) mod prefetch;
