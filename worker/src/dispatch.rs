use std::{
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use futures::FutureExt;
use tokio::{sync::oneshot, time::timeout};
use tracing::{debug, info, trace};

use crate::{
    cancel::CancelSignal,
    errors::{ErrorTaxonomy, panic_detail},
    state::{RequestState, RequestTracker},
};

/// Runs every request on its own task and hands the caller a [`WorkHandle`].
///
/// Results never come back on the caller's stack: the handle is returned
/// before any work happens and the outcome arrives over a oneshot channel,
/// exactly once.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    shutdown: CancelSignal,
    deadline: Option<Duration>,
    next_id: Arc<AtomicU64>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Dispatcher {
    pub fn new(deadline: Option<Duration>) -> Self {
        Self {
            shutdown: CancelSignal::new(),
            deadline,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Cancels everything in flight and everything dispatched afterwards
    pub fn shutdown(&self) -> bool {
        let first = self.shutdown.cancel();

        if first {
            info!("Dispatcher shutting down, cancelling outstanding requests");
        }

        first
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Hands back a handle whose outcome is already known, without spawning
    pub fn settled<T, E>(&self, operation: &'static str, outcome: Result<T, E>) -> WorkHandle<T, E>
    where
        E: ErrorTaxonomy,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tracker = Arc::new(RequestTracker::new(id));
        let (sender, receiver) = oneshot::channel();

        tracker.advance(RequestState::Created, RequestState::Dispatched);
        tracker.advance(RequestState::Dispatched, RequestState::InFlight);

        match &outcome {
            Err(err) if err.is_cancellation() => {
                tracker.cancel();
            }
            _ => {
                tracker.settle(outcome.is_ok());
            }
        }

        let _ = sender.send(outcome);

        WorkHandle {
            operation,
            tracker,
            signal: CancelSignal::new(),
            receiver,
        }
    }

    pub fn dispatch<T, E, F, Fut>(&self, operation: &'static str, work: F) -> WorkHandle<T, E>
    where
        T: Send + 'static,
        E: ErrorTaxonomy,
        F: FnOnce(CancelSignal) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.dispatch_with(operation, self.deadline, work, |_| {})
    }

    /// Like [`Dispatcher::dispatch`] with its own deadline (`None` runs
    /// unbounded) and an observer that sees every outcome before the handle
    /// does, cancellations and timeouts included.
    pub fn dispatch_with<T, E, F, Fut, O>(
        &self,
        operation: &'static str,
        deadline: Option<Duration>,
        work: F,
        observe: O,
    ) -> WorkHandle<T, E>
    where
        T: Send + 'static,
        E: ErrorTaxonomy,
        F: FnOnce(CancelSignal) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        O: FnOnce(&Result<T, E>) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tracker = Arc::new(RequestTracker::new(id));
        let signal = CancelSignal::new();
        let (sender, receiver) = oneshot::channel();

        tracker.advance(RequestState::Created, RequestState::Dispatched);

        let task_tracker = Arc::clone(&tracker);
        let task_signal = signal.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let outcome =
                run_request(&task_tracker, task_signal, shutdown, deadline, work).await;

            trace!(
                "{} request {} settled as {:?}",
                operation,
                task_tracker.id(),
                task_tracker.state()
            );

            observe(&outcome);

            // the caller is allowed to drop its handle and never look at the result
            let _ = sender.send(outcome);
        });

        WorkHandle {
            operation,
            tracker,
            signal,
            receiver,
        }
    }
}

async fn run_request<T, E, F, Fut>(
    tracker: &RequestTracker,
    signal: CancelSignal,
    shutdown: CancelSignal,
    deadline: Option<Duration>,
    work: F,
) -> Result<T, E>
where
    E: ErrorTaxonomy,
    F: FnOnce(CancelSignal) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if shutdown.is_cancelled() {
        tracker.cancel();
        return Err(E::cancelled());
    }

    if !tracker.advance(RequestState::Dispatched, RequestState::InFlight) {
        return Err(E::cancelled());
    }

    let work_signal = signal.clone();
    let guarded = AssertUnwindSafe(async move { work(work_signal).await }).catch_unwind();

    let bounded = async move {
        let caught = match deadline {
            Some(limit) => match timeout(limit, guarded).await {
                Ok(caught) => caught,
                Err(_) => return Err(E::timed_out()),
            },
            None => guarded.await,
        };

        caught.unwrap_or_else(|payload| Err(E::unknown(panic_detail(&*payload))))
    };

    let outcome = tokio::select! {
        biased;
        _ = signal.cancelled() => Err(E::cancelled()),
        _ = shutdown.cancelled() => Err(E::cancelled()),
        result = bounded => result,
    };

    if let Err(err) = &outcome
        && err.is_cancellation()
    {
        tracker.cancel();
        return outcome;
    }

    if !tracker.settle(outcome.is_ok()) {
        return Err(E::cancelled());
    }

    outcome
}

/// Completion handle for one dispatched request.
///
/// Await it to receive the outcome. Dropping it does not cancel the request.
#[must_use = "the outcome of a request is only observable through its handle"]
#[derive(Debug)]
pub struct WorkHandle<T, E> {
    operation: &'static str,
    tracker: Arc<RequestTracker>,
    signal: CancelSignal,
    receiver: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> WorkHandle<T, E> {
    pub fn id(&self) -> u64 {
        self.tracker.id()
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn state(&self) -> RequestState {
        self.tracker.state()
    }

    /// Returns false if the request had already settled
    pub fn cancel(&self) -> bool {
        cancel_request(&self.tracker, &self.signal)
    }

    pub fn canceller(&self) -> Canceller {
        Canceller {
            tracker: Arc::clone(&self.tracker),
            signal: self.signal.clone(),
        }
    }
}

impl<T, E: ErrorTaxonomy> Future for WorkHandle<T, E> {
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(E::unknown(format!(
                "{} request {} ended without delivering a result",
                self.operation,
                self.tracker.id()
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Detached cancel button for a request whose handle is being awaited elsewhere
#[derive(Clone, Debug)]
pub struct Canceller {
    tracker: Arc<RequestTracker>,
    signal: CancelSignal,
}

impl Canceller {
    pub fn cancel(&self) -> bool {
        cancel_request(&self.tracker, &self.signal)
    }
}

fn cancel_request(tracker: &RequestTracker, signal: &CancelSignal) -> bool {
    if !tracker.cancel() {
        trace!("Request {} already settled, ignoring cancel", tracker.id());
        return false;
    }

    signal.cancel();
    debug!("Cancelled request {}", tracker.id());

    true
}

#[cfg(test)]
mod tests {
    use tokio::{sync::Notify, time::sleep};

    use super::*;
    use crate::errors::tests::TestError;

    async fn wait_until_terminal<T, E>(handle: &WorkHandle<T, E>) {
        while !handle.state().is_terminal() {
            sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn delivers_result_once() {
        let dispatcher = Dispatcher::default();

        let handle = dispatcher.dispatch("test", |_| async { Ok::<_, TestError>(7) });

        assert_eq!(handle.await, Ok(7));
    }

    #[tokio::test]
    async fn failure_settles_as_failed() {
        let dispatcher = Dispatcher::default();

        let handle = dispatcher.dispatch("test", |_| async {
            Err::<(), _>(TestError::Stage("broken"))
        });
        wait_until_terminal(&handle).await;

        assert_eq!(handle.state(), RequestState::Failed);
        assert_eq!(handle.await, Err(TestError::Stage("broken")));
    }

    #[tokio::test]
    async fn cancel_before_completion_settles_cancelled() {
        let dispatcher = Dispatcher::default();
        let gate = Arc::new(Notify::new());
        let work_gate = Arc::clone(&gate);

        let handle = dispatcher.dispatch("test", move |_| async move {
            work_gate.notified().await;
            Ok::<_, TestError>("late")
        });

        assert!(handle.cancel());
        gate.notify_one();

        assert_eq!(handle.state(), RequestState::Cancelled);
        assert_eq!(handle.await, Err(TestError::Cancelled));
    }

    #[tokio::test]
    async fn cancel_after_completion_is_a_noop() {
        let dispatcher = Dispatcher::default();

        let handle = dispatcher.dispatch("test", |_| async { Ok::<_, TestError>(1) });
        wait_until_terminal(&handle).await;

        let canceller = handle.canceller();

        assert!(!canceller.cancel());
        assert_eq!(handle.state(), RequestState::Completed);
        assert_eq!(handle.await, Ok(1));
    }

    #[tokio::test]
    async fn cancel_reaches_running_work() {
        let dispatcher = Dispatcher::default();
        let started = Arc::new(Notify::new());
        let work_started = Arc::clone(&started);

        let handle = dispatcher.dispatch("test", move |signal| async move {
            work_started.notify_one();
            signal.cancelled().await;
            Ok::<_, TestError>(())
        });

        started.notified().await;
        assert_eq!(handle.state(), RequestState::InFlight);
        assert!(handle.cancel());

        assert_eq!(handle.await, Err(TestError::Cancelled));
    }

    #[tokio::test]
    async fn panics_become_unknown() {
        let dispatcher = Dispatcher::default();

        let handle = dispatcher.dispatch("test", |_| async {
            if true {
                panic!("boom");
            }
            Ok::<(), TestError>(())
        });

        match handle.await {
            Err(TestError::Unknown(detail)) => assert!(detail.contains("boom")),
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deadline_settles_as_timeout() {
        let dispatcher = Dispatcher::new(Some(Duration::from_millis(20)));

        let handle = dispatcher.dispatch("test", |_| async {
            sleep(Duration::from_secs(5)).await;
            Ok::<_, TestError>(())
        });

        assert_eq!(handle.await, Err(TestError::TimedOut));
    }

    #[tokio::test]
    async fn unbounded_dispatch_ignores_the_default_deadline() {
        let dispatcher = Dispatcher::new(Some(Duration::from_millis(10)));

        let handle = dispatcher.dispatch_with(
            "test",
            None,
            |_| async {
                sleep(Duration::from_millis(40)).await;
                Ok::<_, TestError>("slow but fine")
            },
            |_| {},
        );

        assert_eq!(handle.await, Ok("slow but fine"));
    }

    #[tokio::test]
    async fn observer_sees_cancelled_and_timed_out_outcomes() {
        let dispatcher = Dispatcher::default();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let record = |seen: &Arc<std::sync::Mutex<Vec<Result<(), TestError>>>>| {
            let seen = Arc::clone(seen);
            move |outcome: &Result<(), TestError>| {
                if let Ok(mut seen) = seen.lock() {
                    seen.push(outcome.clone());
                }
            }
        };

        let cancelled = dispatcher.dispatch_with(
            "test",
            None,
            |signal| async move {
                signal.cancelled().await;
                Ok::<_, TestError>(())
            },
            record(&seen),
        );
        assert!(cancelled.cancel());
        assert_eq!(cancelled.await, Err(TestError::Cancelled));

        let timed_out = dispatcher.dispatch_with(
            "test",
            Some(Duration::from_millis(10)),
            |_| async {
                sleep(Duration::from_secs(5)).await;
                Ok::<_, TestError>(())
            },
            record(&seen),
        );
        assert_eq!(timed_out.await, Err(TestError::TimedOut));

        let seen = seen.lock().map(|seen| seen.clone()).unwrap_or_default();
        assert_eq!(seen, vec![Err(TestError::Cancelled), Err(TestError::TimedOut)]);
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_and_new_requests() {
        let dispatcher = Dispatcher::default();
        let started = Arc::new(Notify::new());
        let work_started = Arc::clone(&started);

        let in_flight = dispatcher.dispatch("test", move |_| async move {
            work_started.notify_one();
            sleep(Duration::from_secs(5)).await;
            Ok::<_, TestError>(())
        });

        started.notified().await;
        assert!(dispatcher.shutdown());
        assert!(!dispatcher.shutdown());

        let late = dispatcher.dispatch("test", |_| async { Ok::<_, TestError>(()) });

        assert_eq!(in_flight.await, Err(TestError::Cancelled));
        assert_eq!(late.await, Err(TestError::Cancelled));
        assert!(dispatcher.is_shut_down());
    }

    #[tokio::test]
    async fn settled_handles_are_terminal() {
        let dispatcher = Dispatcher::default();

        let rejected: WorkHandle<(), TestError> =
            dispatcher.settled("test", Err(TestError::Stage("invalid input")));
        let accepted: WorkHandle<u8, TestError> = dispatcher.settled("test", Ok(3));

        assert_eq!(rejected.state(), RequestState::Failed);
        assert!(!rejected.cancel());
        assert_eq!(rejected.await, Err(TestError::Stage("invalid input")));
        assert_eq!(accepted.state(), RequestState::Completed);
        assert_eq!(accepted.await, Ok(3));
    }

    #[tokio::test]
    async fn request_ids_are_unique() {
        let dispatcher = Dispatcher::default();

        let first = dispatcher.dispatch("test", |_| async { Ok::<_, TestError>(()) });
        let second = dispatcher.dispatch("test", |_| async { Ok::<_, TestError>(()) });

        assert_ne!(first.id(), second.id());
        assert_eq!(first.operation(), "test");

        let _ = first.await;
        let _ = second.await;
    }
}
