//! Request-scoped key batching.
//!
//! A [`BatchLoader`] collects the keys its callers ask for and hands them to
//! its [`BatchFn`] in one call. Keys are flushed by the [`BatchScheduler`] of
//! the request at each tick: whenever the operation it drives cannot make
//! progress on its own. Because the engine dispatches every sibling field of
//! an object before waiting on any of them, all the keys requested by one
//! level of the response are known by then.
//!
//! Resolvers dispatched by the engine hold the tick back while they can still
//! make progress: from their dispatch until the engine consumed their outcome,
//! except while their future is suspended and not woken. Resolvers running on
//! a worker pool or in another process are not waited for.
//!
//! A loader only makes progress while its scheduler drives an operation, so
//! pass the scheduler along with the request through
//! [`Request::builder().batch_scheduler(..)`](crate::execution::Request).

use std::collections::HashMap;
use std::fmt;
use std::future::poll_fn;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::task::Poll;

use async_trait::async_trait;
use futures::FutureExt;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::task::ArcWake;
use futures::task::AtomicWaker;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::deferred::Deferred;
use crate::deferred::join_all;
use crate::error::FieldError;

/// Loads the values of many keys at once.
#[async_trait]
pub trait BatchFn<K, V>: Send + Sync + 'static {
    /// Returns one value per key, in the order of `keys`.
    async fn load(&self, keys: Vec<K>) -> Result<Vec<V>, FieldError>;
}

trait PendingBatch: Send + Sync {
    /// Takes the queued keys and loads them.
    fn dispatch(self: Arc<Self>) -> BoxFuture<'static, ()>;
}

/// Flushes the loaders of one request at every tick.
#[derive(Clone, Default)]
pub struct BatchScheduler {
    inner: Arc<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    queue: Mutex<Vec<Arc<dyn PendingBatch>>>,
    waker: AtomicWaker,
    /// Dispatched resolvers that may still queue keys without a tick.
    active: AtomicUsize,
}

impl BatchScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn schedule(&self, batch: Arc<dyn PendingBatch>) {
        self.inner.queue.lock().push(batch);
        self.inner.waker.wake();
    }

    fn take_queued(&self) -> Vec<Arc<dyn PendingBatch>> {
        std::mem::take(&mut *self.inner.queue.lock())
    }

    /// Holds the tick back until the returned guard is dropped, or until the
    /// future it tracks is suspended.
    pub(crate) fn dispatch_guard(&self) -> DispatchGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        DispatchGuard {
            state: Arc::new(DispatchState {
                scheduler: self.inner.clone(),
                phase: Mutex::new(Phase::Active),
                woken: AtomicBool::new(false),
                waker: AtomicWaker::new(),
            }),
        }
    }

    /// Polls `future` to completion.
    ///
    /// Every time it returns pending with no dispatched resolver left to run,
    /// the loaders that queued keys since the last tick are dispatched. The
    /// batches in flight are polled along with it.
    pub async fn drive<F: Future>(&self, future: F) -> F::Output {
        let mut future = std::pin::pin!(future);
        let mut in_flight = FuturesUnordered::new();
        poll_fn(|cx| {
            self.inner.waker.register(cx.waker());
            loop {
                if let Poll::Ready(output) = future.as_mut().poll(cx) {
                    return Poll::Ready(output);
                }
                let idle = self.inner.active.load(Ordering::SeqCst) == 0;
                let queued = if idle { self.take_queued() } else { Vec::new() };
                let ticked = !queued.is_empty();
                if ticked {
                    tracing::trace!(batches = queued.len(), "batch tick");
                }
                for batch in queued {
                    in_flight.push(batch.dispatch());
                }
                let mut completed = false;
                while let Poll::Ready(Some(())) = in_flight.poll_next_unpin(cx) {
                    completed = true;
                }
                if !ticked && !completed {
                    return Poll::Pending;
                }
            }
        })
        .await
    }
}

impl fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("queued", &self.inner.queue.lock().len())
            .field("active", &self.inner.active.load(Ordering::SeqCst))
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Active,
    Suspended,
    Released,
}

struct DispatchState {
    scheduler: Arc<SchedulerState>,
    phase: Mutex<Phase>,
    woken: AtomicBool,
    waker: AtomicWaker,
}

impl DispatchState {
    fn transition(&self, to: Phase) {
        let idle = {
            let mut phase = self.phase.lock();
            let idle = match (*phase, to) {
                (Phase::Released, _) => return,
                (Phase::Suspended, Phase::Active) => {
                    self.scheduler.active.fetch_add(1, Ordering::SeqCst);
                    false
                }
                (Phase::Active, Phase::Suspended | Phase::Released) => {
                    self.scheduler.active.fetch_sub(1, Ordering::SeqCst) == 1
                }
                _ => false,
            };
            *phase = to;
            idle
        };
        if idle {
            self.scheduler.waker.wake();
        }
    }
}

impl ArcWake for DispatchState {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.woken.store(true, Ordering::SeqCst);
        arc_self.transition(Phase::Active);
        arc_self.waker.wake();
    }
}

/// One dispatched resolver, as seen by the engine.
///
/// Dropped once the engine consumed the outcome of the resolver.
pub(crate) struct DispatchGuard {
    state: Arc<DispatchState>,
}

impl DispatchGuard {
    /// The handle the backend uses to report the suspensions of the resolver.
    pub(crate) fn tracker(&self) -> DispatchTracker {
        DispatchTracker {
            state: self.state.clone(),
        }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        self.state.transition(Phase::Released);
    }
}

/// Follows the future of one dispatched resolver.
pub(crate) struct DispatchTracker {
    state: Arc<DispatchState>,
}

impl DispatchTracker {
    /// Stops holding the tick back until the resolver is woken.
    pub(crate) fn suspend(&self) {
        self.state.transition(Phase::Suspended);
    }

    /// Polls `future`, suspending the dispatch whenever it is pending and
    /// resuming it when it is woken.
    pub(crate) async fn track<F: Future>(self, future: F) -> F::Output {
        let mut future = std::pin::pin!(future);
        poll_fn(|cx| {
            self.state.waker.register(cx.waker());
            self.state.woken.store(false, Ordering::SeqCst);
            let waker = futures::task::waker_ref(&self.state);
            let poll = future
                .as_mut()
                .poll(&mut std::task::Context::from_waker(&waker));
            if poll.is_pending() {
                self.suspend();
                // woken while it was being polled
                if self.state.woken.load(Ordering::SeqCst) {
                    self.state.transition(Phase::Active);
                }
            }
            poll
        })
        .await
    }
}

impl fmt::Debug for DispatchTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DispatchTracker")
            .field(&*self.state.phase.lock())
            .finish()
    }
}

/// Coalesces the keys requested during one tick into a single [`BatchFn`] call.
///
/// Values are cached for the lifetime of the loader, errors are not.
pub struct BatchLoader<K, V> {
    inner: Arc<LoaderState<K, V>>,
}

struct LoaderState<K, V> {
    batch_fn: Box<dyn BatchFn<K, V>>,
    scheduler: BatchScheduler,
    queue: Mutex<Queue<K, V>>,
}

type Waiter<V> = oneshot::Sender<Result<V, FieldError>>;

struct Queue<K, V> {
    cache: HashMap<K, V>,
    pending: IndexMap<K, Vec<Waiter<V>>>,
    scheduled: bool,
}

impl<K, V> Clone for BatchLoader<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> BatchLoader<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(scheduler: &BatchScheduler, batch_fn: impl BatchFn<K, V>) -> Self {
        Self {
            inner: Arc::new(LoaderState {
                batch_fn: Box::new(batch_fn),
                scheduler: scheduler.clone(),
                queue: Mutex::new(Queue {
                    cache: HashMap::new(),
                    pending: IndexMap::new(),
                    scheduled: false,
                }),
            }),
        }
    }

    /// The value of `key`, from the cache or from the next batch.
    pub fn load(&self, key: K) -> Deferred<V, FieldError> {
        let (tx, rx) = oneshot::channel();
        let schedule = {
            let mut queue = self.inner.queue.lock();
            if let Some(value) = queue.cache.get(&key) {
                return Deferred::ready(value.clone());
            }
            queue.pending.entry(key).or_default().push(tx);
            !std::mem::replace(&mut queue.scheduled, true)
        };
        if schedule {
            self.inner.scheduler.schedule(self.inner.clone());
        }
        Deferred::pending(async move {
            rx.await.unwrap_or_else(|_| {
                Err(FieldError::new("batch was dropped before it completed"))
            })
        })
    }

    /// The values of `keys`, in order. Fails with the first failing key.
    pub fn load_many(&self, keys: impl IntoIterator<Item = K>) -> Deferred<Vec<V>, FieldError> {
        join_all(keys.into_iter().map(|key| self.load(key)))
            .settle(|Ok(outcomes)| outcomes.into_iter().collect())
    }
}

impl<K, V> PendingBatch for LoaderState<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn dispatch(self: Arc<Self>) -> BoxFuture<'static, ()> {
        let pending = {
            let mut queue = self.queue.lock();
            queue.scheduled = false;
            std::mem::take(&mut queue.pending)
        };
        async move {
            if pending.is_empty() {
                return;
            }
            let keys: Vec<K> = pending.keys().cloned().collect();
            let expected = keys.len();
            tracing::debug!(keys = expected, "loading batch");
            match self.batch_fn.load(keys).await {
                Ok(values) if values.len() == expected => {
                    let mut queue = self.queue.lock();
                    for ((key, waiters), value) in pending.into_iter().zip(values) {
                        for waiter in waiters {
                            // Ignore the error if the caller stopped waiting
                            let _ = waiter.send(Ok(value.clone()));
                        }
                        queue.cache.insert(key, value);
                    }
                }
                Ok(values) => fail_all(
                    pending,
                    FieldError::new(format!(
                        "batch function returned {} values for {} keys",
                        values.len(),
                        expected
                    )),
                ),
                Err(error) => fail_all(pending, error),
            }
        }
        .boxed()
    }
}

fn fail_all<K, V>(pending: IndexMap<K, Vec<Waiter<V>>>, error: FieldError) {
    tracing::debug!("batch failed: {error}");
    for waiter in pending.into_values().flatten() {
        let _ = waiter.send(Err(error.clone()));
    }
}

impl<K, V> fmt::Debug for BatchLoader<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.inner.queue.lock();
        f.debug_struct("BatchLoader")
            .field("cached", &queue.cache.len())
            .field("pending", &queue.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Clone, Default)]
    struct Echo {
        calls: Arc<Mutex<Vec<Vec<String>>>>,
    }

    #[async_trait]
    impl BatchFn<String, String> for Echo {
        async fn load(&self, keys: Vec<String>) -> Result<Vec<String>, FieldError> {
            self.calls.lock().push(keys.clone());
            tokio::task::yield_now().await;
            Ok(keys.into_iter().map(|key| format!("value-{key}")).collect())
        }
    }

    struct Short;

    #[async_trait]
    impl BatchFn<u32, u32> for Short {
        async fn load(&self, _keys: Vec<u32>) -> Result<Vec<u32>, FieldError> {
            Ok(vec![1])
        }
    }

    #[tokio::test]
    async fn keys_of_one_tick_share_a_batch() {
        let scheduler = BatchScheduler::new();
        let echo = Echo::default();
        let loader = BatchLoader::new(&scheduler, echo.clone());

        let first = loader.load("1".to_string());
        let second = loader.load("2".to_string());
        let again = loader.load("1".to_string());
        let (first, second, again) = scheduler
            .drive(async { futures::join!(first.into_future(), second.into_future(), again.into_future()) })
            .await;

        assert_eq!(first, Ok("value-1".to_string()));
        assert_eq!(second, Ok("value-2".to_string()));
        assert_eq!(again, Ok("value-1".to_string()));
        assert_eq!(*echo.calls.lock(), vec![vec!["1".to_string(), "2".to_string()]]);

        // cached from now on
        let cached = loader.load("2".to_string());
        assert!(cached.is_settled());
        assert_eq!(echo.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn later_ticks_get_their_own_batch() {
        let scheduler = BatchScheduler::new();
        let echo = Echo::default();
        let loader = BatchLoader::new(&scheduler, echo.clone());

        let chained = {
            let loader = loader.clone();
            loader.clone().load("a".to_string()).then(move |first| {
                let first = match first {
                    Ok(first) => first,
                    Err(error) => return Deferred::failed(error),
                };
                loader
                    .load_many(vec![first, "b".to_string()])
                    .map(|values| values.join(","))
            })
        };
        let outcome = scheduler.drive(chained.into_future()).await;

        assert_eq!(outcome, Ok("value-value-a,value-b".to_string()));
        assert_eq!(
            *echo.calls.lock(),
            vec![
                vec!["a".to_string()],
                vec!["value-a".to_string(), "b".to_string()]
            ]
        );
    }

    #[tokio::test]
    async fn ticks_wait_for_dispatched_resolvers() {
        let scheduler = BatchScheduler::new();
        let echo = Echo::default();
        let loader = BatchLoader::new(&scheduler, echo.clone());

        let dispatched = scheduler.dispatch_guard();
        let first = loader.load("1".to_string());
        let second = {
            let loader = loader.clone();
            async move {
                tokio::task::yield_now().await;
                let second = loader.load("2".to_string());
                drop(dispatched);
                second.await
            }
        };
        let (first, second) = scheduler
            .drive(async { futures::join!(first.into_future(), second) })
            .await;

        assert_eq!(first, Ok("value-1".to_string()));
        assert_eq!(second, Ok("value-2".to_string()));
        assert_eq!(*echo.calls.lock(), vec![vec!["1".to_string(), "2".to_string()]]);
    }

    #[tokio::test]
    async fn suspended_resolvers_let_the_tick_happen() {
        let scheduler = BatchScheduler::new();
        let echo = Echo::default();
        let loader = BatchLoader::new(&scheduler, echo.clone());

        let dispatched = scheduler.dispatch_guard();
        let tracked = dispatched.tracker().track(loader.load("1".to_string()).into_future());
        let outcome = tokio::time::timeout(Duration::from_secs(5), scheduler.drive(tracked))
            .await
            .expect("the tick never happened");

        assert_eq!(outcome, Ok("value-1".to_string()));
        drop(dispatched);
        assert_eq!(scheduler.inner.active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wrong_number_of_values_fails_every_key() {
        let scheduler = BatchScheduler::new();
        let loader = BatchLoader::new(&scheduler, Short);
        let outcome = scheduler.drive(loader.load_many([1, 2]).into_future()).await;
        assert_eq!(
            outcome,
            Err(FieldError::new("batch function returned 1 values for 2 keys"))
        );
    }
}
