use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use tracing::{debug, trace};

use crate::{
    cancel::CancelSignal,
    errors::{ErrorTaxonomy, panic_detail},
};

type Outcome<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;
type Flights<K, P, T, E> = Arc<Mutex<HashMap<K, Flight<P, T, E>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    /// Started the underlying work
    Leader,
    /// Joined work another caller had already started
    Follower,
}

struct Flight<P, T, E> {
    id: u64,
    policy: P,
    outcome: Outcome<T, E>,
    waiters: usize,
    signal: CancelSignal,
}

/// At most one in-flight unit of work per key.
///
/// Callers with the same key and an equal policy share one flight. A caller
/// with the same key and a different policy waits for the current flight to
/// land and then starts its own. Flights run on their own task so a caller
/// going away never tears down work other callers are waiting on; once the
/// last waiter is gone the flight's signal is raised and it is forgotten.
///
/// The map is the only shared state and is guarded by one mutex that is never
/// held across an await point.
pub struct Coalescer<K, P, T, E> {
    flights: Flights<K, P, T, E>,
    next_id: AtomicU64,
}

impl<K, P, T, E> Default for Coalescer<K, P, T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P, T, E> Coalescer<K, P, T, E> {
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.flights).len()
    }

    /// Abandons every flight, used on teardown
    pub fn cancel_all(&self) {
        let abandoned: Vec<Flight<P, T, E>> = lock(&self.flights)
            .drain()
            .map(|(_, flight)| flight)
            .collect();

        for flight in abandoned {
            flight.signal.cancel();
        }
    }
}

impl<K, P, T, E> Coalescer<K, P, T, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    P: PartialEq + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: ErrorTaxonomy + Clone + Sync,
{
    /// Joins the flight for `key` or starts one with `start`.
    ///
    /// `start` is invoked while the map is locked and must only build the
    /// future, not drive it.
    pub async fn run<F, Fut>(&self, key: K, policy: P, start: F) -> (Result<T, E>, FlightRole)
    where
        F: FnOnce(CancelSignal) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (id, outcome, role) = loop {
            let queued = {
                let mut flights = lock(&self.flights);

                match flights.get_mut(&key) {
                    Some(flight) if flight.policy == policy => {
                        flight.waiters += 1;
                        trace!("Joining flight {} ({} waiters)", flight.id, flight.waiters);

                        break (flight.id, flight.outcome.clone(), FlightRole::Follower);
                    }
                    Some(flight) => flight.outcome.clone(),
                    None => {
                        let (id, outcome) = self.launch(&mut flights, key.clone(), policy, start);

                        break (id, outcome, FlightRole::Leader);
                    }
                }
            };

            trace!("Queued behind a flight with a different policy");
            let _ = queued.await;
        };

        let mut waiter = Waiter {
            flights: Arc::clone(&self.flights),
            key,
            id,
            settled: false,
        };

        let result = outcome.await;
        waiter.settled = true;

        (result, role)
    }

    /// Resolves once no flight for `key` is in the air
    pub async fn settled(&self, key: &K) {
        loop {
            let pending = lock(&self.flights)
                .get(key)
                .map(|flight| flight.outcome.clone());

            match pending {
                Some(outcome) => {
                    let _ = outcome.await;
                }
                None => return,
            }
        }
    }

    fn launch<F, Fut>(
        &self,
        flights: &mut HashMap<K, Flight<P, T, E>>,
        key: K,
        policy: P,
        start: F,
    ) -> (u64, Outcome<T, E>)
    where
        F: FnOnce(CancelSignal) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let signal = CancelSignal::new();

        let work = start(signal.clone());

        let landing = Landing {
            flights: Arc::clone(&self.flights),
            key: key.clone(),
            id,
        };
        let task = tokio::spawn(async move {
            // removes the map entry even if the work panics
            let _landing = landing;

            work.await
        });

        let outcome = task
            .map(|joined| match joined {
                Ok(result) => result,
                Err(err) if err.is_panic() => Err(E::unknown(panic_detail(&*err.into_panic()))),
                Err(_) => Err(E::cancelled()),
            })
            .boxed()
            .shared();

        trace!("Launched flight {}", id);

        flights.insert(
            key,
            Flight {
                id,
                policy,
                outcome: outcome.clone(),
                waiters: 1,
                signal,
            },
        );

        (id, outcome)
    }
}

fn lock<K, P, T, E>(flights: &Flights<K, P, T, E>) -> MutexGuard<'_, HashMap<K, Flight<P, T, E>>> {
    flights.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Landing<K: Eq + Hash, P, T, E> {
    flights: Flights<K, P, T, E>,
    key: K,
    id: u64,
}

impl<K: Eq + Hash, P, T, E> Drop for Landing<K, P, T, E> {
    fn drop(&mut self) {
        let mut flights = lock(&self.flights);

        if flights.get(&self.key).is_some_and(|flight| flight.id == self.id) {
            flights.remove(&self.key);
        }
    }
}

struct Waiter<K: Eq + Hash, P, T, E> {
    flights: Flights<K, P, T, E>,
    key: K,
    id: u64,
    settled: bool,
}

impl<K: Eq + Hash, P, T, E> Drop for Waiter<K, P, T, E> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let mut flights = lock(&self.flights);

        let Some(flight) = flights.get_mut(&self.key) else {
            return;
        };

        if flight.id != self.id {
            return;
        }

        flight.waiters -= 1;

        if flight.waiters > 0 {
            return;
        }

        if let Some(abandoned) = flights.remove(&self.key) {
            debug!("Every waiter left flight {}, cancelling it", abandoned.id);
            abandoned.signal.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, time::Duration};

    use tokio::{
        sync::Notify,
        time::{sleep, timeout},
    };

    use super::*;
    use crate::errors::tests::TestError;

    type TestCoalescer = Coalescer<&'static str, u8, u32, TestError>;

    fn waiters(coalescer: &TestCoalescer, key: &'static str) -> usize {
        lock(&coalescer.flights)
            .get(key)
            .map(|flight| flight.waiters)
            .unwrap_or(0)
    }

    async fn until(condition: impl Fn() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !condition() {
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition to become true");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn identical_requests_share_one_flight() {
        let coalescer = Arc::new(TestCoalescer::new());
        let starts = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let mut handles = Vec::new();

        for _ in 0..4 {
            let coalescer = Arc::clone(&coalescer);
            let starts = Arc::clone(&starts);
            let gate = Arc::clone(&gate);

            handles.push(tokio::spawn(async move {
                coalescer
                    .run("img:1", 0, move |_| {
                        starts.fetch_add(1, Ordering::SeqCst);
                        async move {
                            gate.notified().await;
                            Ok(42)
                        }
                    })
                    .await
            }));
        }

        until(|| waiters(&coalescer, "img:1") == 4).await;
        gate.notify_one();

        let mut leaders = 0;
        for handle in handles {
            let (result, role) = handle.await.unwrap();
            assert_eq!(result, Ok(42));

            if role == FlightRole::Leader {
                leaders += 1;
            }
        }

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(leaders, 1);
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn different_policy_waits_for_current_flight() {
        let coalescer = Arc::new(TestCoalescer::new());
        let gate = Arc::new(Notify::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let coalescer = Arc::clone(&coalescer);
            let gate = Arc::clone(&gate);
            let order = Arc::clone(&order);

            tokio::spawn(async move {
                coalescer
                    .run("img:2", 0, move |_| async move {
                        gate.notified().await;
                        order.lock().unwrap().push("first");
                        Ok(1)
                    })
                    .await
            })
        };

        until(|| coalescer.in_flight() == 1).await;

        let second = {
            let coalescer = Arc::clone(&coalescer);
            let order = Arc::clone(&order);

            tokio::spawn(async move {
                coalescer
                    .run("img:2", 1, move |_| async move {
                        order.lock().unwrap().push("second");
                        Ok(2)
                    })
                    .await
            })
        };

        sleep(Duration::from_millis(10)).await;
        assert!(order.lock().unwrap().is_empty());

        gate.notify_one();

        assert_eq!(first.await.unwrap(), (Ok(1), FlightRole::Leader));
        assert_eq!(second.await.unwrap(), (Ok(2), FlightRole::Leader));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn abandoned_flight_is_cancelled() {
        let coalescer = Arc::new(TestCoalescer::new());
        let saw_cancel = Arc::new(Notify::new());

        let caller = {
            let coalescer = Arc::clone(&coalescer);
            let saw_cancel = Arc::clone(&saw_cancel);

            tokio::spawn(async move {
                coalescer
                    .run("img:3", 0, move |signal| async move {
                        signal.cancelled().await;
                        saw_cancel.notify_one();
                        Err(TestError::Cancelled)
                    })
                    .await
            })
        };

        until(|| coalescer.in_flight() == 1).await;
        caller.abort();

        timeout(Duration::from_secs(1), saw_cancel.notified())
            .await
            .expect("flight to observe its cancel signal");

        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn settled_waits_for_landing() {
        let coalescer = Arc::new(TestCoalescer::new());
        let gate = Arc::new(Notify::new());

        let flight = {
            let coalescer = Arc::clone(&coalescer);
            let gate = Arc::clone(&gate);

            tokio::spawn(async move {
                coalescer
                    .run("img:4", 0, move |_| async move {
                        gate.notified().await;
                        Ok(4)
                    })
                    .await
            })
        };

        until(|| coalescer.in_flight() == 1).await;

        let pending = timeout(Duration::from_millis(20), coalescer.settled(&"img:4")).await;
        assert!(pending.is_err());

        gate.notify_one();
        coalescer.settled(&"img:4").await;

        assert_eq!(flight.await.unwrap().0, Ok(4));
    }

    #[tokio::test]
    async fn panicking_flight_reports_unknown() {
        let coalescer = TestCoalescer::new();

        let (result, _) = coalescer
            .run("img:5", 0, |_| async {
                if true {
                    panic!("engine exploded");
                }
                Ok(5)
            })
            .await;

        match result {
            Err(TestError::Unknown(detail)) => assert!(detail.contains("engine exploded")),
            other => panic!("expected unknown, got {other:?}"),
        }
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancel_all_raises_every_signal() {
        let coalescer = Arc::new(TestCoalescer::new());

        let caller = {
            let coalescer = Arc::clone(&coalescer);

            tokio::spawn(async move {
                coalescer
                    .run("img:6", 0, |signal| async move {
                        signal.cancelled().await;
                        Err(TestError::Cancelled)
                    })
                    .await
            })
        };

        until(|| coalescer.in_flight() == 1).await;
        coalescer.cancel_all();

        assert_eq!(caller.await.unwrap().0, Err(TestError::Cancelled));
        assert_eq!(coalescer.in_flight(), 0);
    }
}
