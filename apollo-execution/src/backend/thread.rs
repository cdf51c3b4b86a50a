use crossbeam_channel::Sender;
use strum_macros::Display;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing_futures::Instrument;

use super::ExecutorBackend;
use super::ResolverCall;
use crate::deferred::Deferred;
use crate::error::ConfigurationError;
use crate::error::FieldFailure;
use crate::json_ext::Value;

/// Runs resolvers on OS threads, out of the way of the async runtime.
///
/// A dedicated backend starts one thread per resolver call. A pooled backend
/// queues calls to a fixed set of worker threads that live as long as the
/// backend and its clones.
///
/// A resolver that answers with a future is driven to completion on the
/// worker thread, inside the runtime that was current when the backend was
/// created, if any.
#[derive(Clone, Debug)]
pub struct ThreadBackend {
    mode: Mode,
    runtime: Option<Handle>,
}

#[derive(Clone, Debug, Display)]
#[strum(serialize_all = "snake_case")]
enum Mode {
    Dedicated,
    Pooled(WorkerPool),
}

#[derive(Clone, Debug)]
struct WorkerPool {
    sender: Sender<Job>,
    size: usize,
}

struct Job {
    job: Box<dyn FnOnce() + Send + 'static>,
    parent_span: tracing::Span,
}

impl Job {
    fn run(self) {
        let _guard = self.parent_span.enter();
        (self.job)();
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").finish_non_exhaustive()
    }
}

impl ThreadBackend {
    /// One new thread per resolver call.
    pub fn dedicated() -> Self {
        Self {
            mode: Mode::Dedicated,
            runtime: Handle::try_current().ok(),
        }
    }

    /// A pool of `size` worker threads, or one per available core when `size` is 0.
    pub fn pooled(size: usize) -> Result<Self, ConfigurationError> {
        let size = match size {
            0 => std::thread::available_parallelism()
                .map_err(|error| ConfigurationError::WorkerPool(error.to_string()))?
                .get(),
            size => size,
        };
        tracing::info!(pool_size = size, "starting resolver worker pool");

        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        for index in 0..size {
            let receiver = receiver.clone();
            std::thread::Builder::new()
                .name(format!("resolver-worker-{index}"))
                .spawn(move || {
                    // exits once every sender is gone
                    while let Ok(job) = receiver.recv() {
                        job.run();
                    }
                })
                .map_err(|error| ConfigurationError::WorkerPool(error.to_string()))?;
        }
        Ok(Self {
            mode: Mode::Pooled(WorkerPool { sender, size }),
            runtime: Handle::try_current().ok(),
        })
    }

    /// Drives pending resolvers inside `handle`.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Number of worker threads, `None` for a dedicated backend.
    pub fn pool_size(&self) -> Option<usize> {
        match &self.mode {
            Mode::Dedicated => None,
            Mode::Pooled(pool) => Some(pool.size),
        }
    }

    fn dispatch(&self, job: Job) -> Result<(), FieldFailure> {
        match &self.mode {
            Mode::Dedicated => std::thread::Builder::new()
                .name("resolver".to_string())
                .spawn(move || job.run())
                .map(|_| ())
                .map_err(|error| {
                    FieldFailure::BackendTransport(format!(
                        "could not start resolver thread: {error}"
                    ))
                }),
            Mode::Pooled(pool) => pool.sender.send(job).map_err(|_| {
                FieldFailure::BackendTransport("resolver worker pool is shut down".to_string())
            }),
        }
    }
}

impl ExecutorBackend for ThreadBackend {
    fn execute(&self, call: ResolverCall) -> Deferred<Value, FieldFailure> {
        let span = tracing::info_span!(
            "resolver.thread",
            coordinate = %call.info().coordinate(),
            "thread.mode" = %self.mode,
        );
        // a queued call may wait for workers that wait for a batch
        let call = match self.mode {
            Mode::Dedicated => call,
            Mode::Pooled(_) => call.untracked(),
        };
        let runtime = self.runtime.clone();
        let (tx, rx) = oneshot::channel();
        let job = Job {
            job: Box::new(move || {
                // Ignore the error if the oneshot receiver was dropped
                let _ = tx.send(run_to_completion(call, runtime));
            }),
            parent_span: span.clone(),
        };
        if let Err(failure) = self.dispatch(job) {
            return Deferred::failed(failure);
        }
        Deferred::pending(async move {
            rx.instrument(span).await.unwrap_or_else(|_| {
                Err(FieldFailure::BackendTransport(
                    "resolver thread stopped before answering".to_string(),
                ))
            })
        })
    }
}

fn run_to_completion(call: ResolverCall, runtime: Option<Handle>) -> Result<Value, FieldFailure> {
    match call.invoke() {
        Deferred::Settled(result) => result,
        Deferred::Pending(future) => match runtime {
            Some(handle) => handle.block_on(future),
            None => futures::executor::block_on(future),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use serde_json_bytes::json;

    use super::*;
    use crate::backend::tests::call;
    use crate::error::FieldError;
    use crate::schema::ResolveInfo;

    fn current_thread_name(_: ResolveInfo) -> Deferred<Value, FieldError> {
        Deferred::ready(json!(std::thread::current().name().unwrap_or_default()))
    }

    #[tokio::test]
    async fn executes_on_different_thread() {
        let backend = ThreadBackend::dedicated();
        assert_eq!(backend.pool_size(), None);
        let name = backend.execute(call(current_thread_name)).await.unwrap();
        assert_eq!(name, json!("resolver"));

        let backend = ThreadBackend::pooled(2).unwrap();
        assert_eq!(backend.pool_size(), Some(2));
        let name = backend.execute(call(current_thread_name)).await.unwrap();
        assert!(name.as_str().unwrap().starts_with("resolver-worker-"));
    }

    #[tokio::test]
    async fn pending_resolvers_are_driven_on_the_worker() {
        let backend = ThreadBackend::pooled(1).unwrap();
        let value = backend
            .execute(call(|_: ResolveInfo| {
                Deferred::pending(async {
                    tokio::task::yield_now().await;
                    Ok::<_, FieldError>(json!(std::thread::current().name().unwrap_or_default()))
                })
            }))
            .await;
        assert_eq!(value, Ok(json!("resolver-worker-0")));
    }

    #[tokio::test]
    async fn single_worker_runs_one_resolver_at_a_time() {
        let backend = ThreadBackend::pooled(1).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let calls = (0..3).map(|_| {
            let active = active.clone();
            let peak = peak.clone();
            backend.execute(call(move |_: ResolveInfo| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                active.fetch_sub(1, Ordering::SeqCst);
                Deferred::<_, FieldError>::ready(json!(true))
            }))
        });
        let Ok(outcomes) = crate::deferred::join_all(calls).await;
        assert!(outcomes.iter().all(|outcome| outcome == &Ok(json!(true))));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panics_are_reported_not_propagated() {
        let backend = ThreadBackend::pooled(1).unwrap();
        let outcome = backend
            .execute(call(|_: ResolveInfo| -> Deferred<Value, FieldError> {
                panic!("worker panic")
            }))
            .await;
        assert_eq!(
            outcome,
            Err(FieldFailure::FieldResolution(FieldError::new(
                "resolver panicked: worker panic"
            )))
        );
        // the worker survived
        let outcome = backend.execute(call(current_thread_name)).await;
        assert_eq!(outcome, Ok(json!("resolver-worker-0")));
    }
}
