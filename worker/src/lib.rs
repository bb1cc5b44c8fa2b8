//! Plumbing shared by every worker: request dispatch with exactly-once
//! completion, cooperative cancellation, stage pipelines and coalescing of
//! identical in-flight work.

pub mod cancel;
pub mod coalesce;
pub mod dispatch;
pub mod errors;
pub mod pipeline;
pub mod state;

pub use cancel::CancelSignal;
pub use coalesce::{Coalescer, FlightRole};
pub use dispatch::{Canceller, Dispatcher, WorkHandle};
pub use errors::{ErrorTaxonomy, translate};
pub use pipeline::{Pipeline, Stage};
pub use state::RequestState;
