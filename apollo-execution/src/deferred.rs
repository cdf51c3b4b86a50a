//! A value that is either already settled or will settle later.
//!
//! Execution is written entirely against [`Deferred`]: synchronous resolvers
//! produce [`Deferred::Settled`] values and the continuations chained with
//! [`Deferred::then`] run immediately, so a fully synchronous operation never
//! allocates a future. As soon as one resolver answers later, only the part
//! of the tree above it becomes [`Deferred::Pending`].

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::future::IntoFuture;

use futures::FutureExt;
use futures::future;
use futures::future::BoxFuture;
use futures::future::Either;

/// The outcome of a computation that may not have finished yet.
pub enum Deferred<T, E> {
    /// The outcome is known.
    Settled(Result<T, E>),
    /// The outcome is produced by a future.
    Pending(BoxFuture<'static, Result<T, E>>),
}

impl<T, E> Deferred<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// A successful settled value.
    pub fn ready(value: T) -> Self {
        Self::Settled(Ok(value))
    }

    /// A failed settled value.
    pub fn failed(error: E) -> Self {
        Self::Settled(Err(error))
    }

    /// A value produced later by `future`.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::Pending(future.boxed())
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled(_))
    }

    /// Chains `f` on the outcome.
    ///
    /// When `self` is settled, `f` runs right away and its result is returned
    /// as is, so chains of settled values stay settled.
    pub fn then<U, E2, F>(self, f: F) -> Deferred<U, E2>
    where
        U: Send + 'static,
        E2: Send + 'static,
        F: FnOnce(Result<T, E>) -> Deferred<U, E2> + Send + 'static,
    {
        match self {
            Self::Settled(result) => f(result),
            Self::Pending(future) => Deferred::pending(async move { f(future.await).await }),
        }
    }

    /// Transforms the outcome synchronously.
    pub fn settle<U, E2, F>(self, f: F) -> Deferred<U, E2>
    where
        U: Send + 'static,
        E2: Send + 'static,
        F: FnOnce(Result<T, E>) -> Result<U, E2> + Send + 'static,
    {
        match self {
            Self::Settled(result) => Deferred::Settled(f(result)),
            Self::Pending(future) => Deferred::Pending(future.map(f).boxed()),
        }
    }

    pub fn map<U, F>(self, f: F) -> Deferred<U, E>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.settle(|result| result.map(f))
    }

    pub fn map_err<E2, F>(self, f: F) -> Deferred<T, E2>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        self.settle(|result| result.map_err(f))
    }

    /// Gives `handler` a chance to turn a failure into a substitute value.
    pub fn catch<E2, F>(self, handler: F) -> Deferred<T, E2>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> Result<T, E2> + Send + 'static,
    {
        self.settle(|result| match result {
            Ok(value) => Ok(value),
            Err(error) => handler(error),
        })
    }
}

impl<T, E> From<Result<T, E>> for Deferred<T, E> {
    fn from(result: Result<T, E>) -> Self {
        Self::Settled(result)
    }
}

impl<T, E> IntoFuture for Deferred<T, E> {
    type Output = Result<T, E>;
    type IntoFuture = Either<future::Ready<Result<T, E>>, BoxFuture<'static, Result<T, E>>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Self::Settled(result) => Either::Left(future::ready(result)),
            Self::Pending(future) => Either::Right(future),
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Settled(result) => f.debug_tuple("Settled").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// Waits for every item and returns their outcomes in input order.
///
/// Settles immediately when all items already are. Otherwise every pending
/// item is polled concurrently and its outcome lands in the slot it was given,
/// whatever order they complete in.
pub fn join_all<T, E, I>(items: I) -> Deferred<Vec<Result<T, E>>, Infallible>
where
    T: Send + 'static,
    E: Send + 'static,
    I: IntoIterator<Item = Deferred<T, E>>,
{
    let items = items.into_iter();
    let mut outcomes: Vec<Option<Result<T, E>>> = Vec::with_capacity(items.size_hint().0);
    let mut pending = Vec::new();
    for (index, item) in items.enumerate() {
        match item {
            Deferred::Settled(result) => outcomes.push(Some(result)),
            Deferred::Pending(future) => {
                outcomes.push(None);
                pending.push(future.map(move |result| (index, result)));
            }
        }
    }

    if pending.is_empty() {
        return Deferred::ready(outcomes.into_iter().flatten().collect());
    }
    Deferred::pending(async move {
        for (index, result) in future::join_all(pending).await {
            outcomes[index] = Some(result);
        }
        Ok(outcomes.into_iter().flatten().collect())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;

    use tokio::sync::oneshot;

    use super::*;

    #[test]
    fn then_runs_immediately_on_settled_values() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let chained = Deferred::<_, ()>::ready(1).then(move |result| {
            flag.store(true, Ordering::SeqCst);
            Deferred::<_, ()>::from(result.map(|n| n + 1))
        });

        assert!(ran.load(Ordering::SeqCst));
        assert!(matches!(chained, Deferred::Settled(Ok(2))));
    }

    #[test]
    fn catch_substitutes_failures() {
        let caught = Deferred::<i32, &str>::failed("boom").catch::<(), _>(|_| Ok(0));
        assert!(matches!(caught, Deferred::Settled(Ok(0))));

        let rethrown = Deferred::<i32, &str>::failed("boom").catch(|e| Err(e.len()));
        assert!(matches!(rethrown, Deferred::Settled(Err(4))));
    }

    #[test]
    fn join_all_of_settled_values_is_settled() {
        let joined = join_all(vec![
            Deferred::ready(1),
            Deferred::failed("two"),
            Deferred::ready(3),
        ]);
        let Deferred::Settled(Ok(outcomes)) = joined else {
            panic!("expected a settled join");
        };
        assert_eq!(outcomes, vec![Ok(1), Err("two"), Ok(3)]);
    }

    #[tokio::test]
    async fn join_all_keeps_input_order() {
        let (first_tx, first_rx) = oneshot::channel::<i32>();
        let (second_tx, second_rx) = oneshot::channel::<i32>();
        let joined = join_all(vec![
            Deferred::pending(async move { first_rx.await.map_err(|_| "dropped") }),
            Deferred::ready(2),
            Deferred::pending(async move { second_rx.await.map_err(|_| "dropped") }),
        ]);
        assert!(!joined.is_settled());

        // complete in reverse order
        second_tx.send(3).unwrap();
        first_tx.send(1).unwrap();

        let Ok(outcomes) = joined.await;
        assert_eq!(outcomes, vec![Ok(1), Ok(2), Ok(3)]);
    }

    #[tokio::test]
    async fn pending_values_chain_through_then() {
        let deferred = Deferred::<_, ()>::pending(async { Ok(20) })
            .then(|result| Deferred::<_, ()>::ready(result.unwrap_or_default() + 1))
            .map(|n: i32| n * 2);
        assert_eq!(deferred.await, Ok::<_, ()>(42));
    }
}
