pub mod config;
pub mod deserialize_disallow_empty_string;
pub mod errors;
pub mod key;
pub mod object;
pub mod options;
pub mod query_params;
pub mod request;
