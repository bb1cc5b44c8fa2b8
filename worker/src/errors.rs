use std::any::Any;

/// A closed error vocabulary a worker reports through.
///
/// The infrastructure only ever needs to produce three kinds of failure on
/// its own: a cancellation, an expired deadline, and anything unexpected.
pub trait ErrorTaxonomy: Sized + Send + 'static {
    fn cancelled() -> Self;
    fn timed_out() -> Self;
    fn unknown(detail: String) -> Self;

    fn is_cancellation(&self) -> bool;
}

/// Wraps an unexpected error into the `unknown` kind of a taxonomy
pub fn translate<E, Err>(err: Err) -> E
where
    E: ErrorTaxonomy,
    Err: std::error::Error,
{
    E::unknown(err.to_string())
}

pub(crate) fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return format!("worker panicked: {message}");
    }

    if let Some(message) = payload.downcast_ref::<String>() {
        return format!("worker panicked: {message}");
    }

    "worker panicked".into()
}
