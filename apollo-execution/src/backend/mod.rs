//! Where and how resolvers run.
//!
//! The engine hands every resolver invocation to an [`ExecutorBackend`] and
//! gets a [`Deferred`] outcome back. Backends differ in where the resolver
//! body executes:
//!
//! * [`InlineBackend`] on the flow that executes the operation,
//! * [`CooperativeBackend`] on a Tokio task of its own,
//! * [`ThreadBackend`] on a dedicated OS thread or a fixed worker pool,
//! * [`ProcessBackend`] in a separate worker process.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::batch::DispatchTracker;
use crate::deferred::Deferred;
use crate::error::FieldError;
use crate::error::FieldFailure;
use crate::json_ext::Value;
use crate::schema::FieldResolver;
use crate::schema::ResolveInfo;

mod cooperative;
mod inline;
pub mod process;
mod thread;

pub use cooperative::CooperativeBackend;
pub use inline::InlineBackend;
pub use process::ProcessBackend;
pub use thread::ThreadBackend;

/// Runs resolvers on behalf of the engine.
pub trait ExecutorBackend: Send + Sync + 'static {
    /// Runs the resolver of `call`.
    ///
    /// The returned value settles exactly once, with the resolver's value or
    /// with the reason it could not produce one.
    fn execute(&self, call: ResolverCall) -> Deferred<Value, FieldFailure>;
}

impl<T: ExecutorBackend + ?Sized> ExecutorBackend for Arc<T> {
    fn execute(&self, call: ResolverCall) -> Deferred<Value, FieldFailure> {
        (**self).execute(call)
    }
}

/// One resolver invocation: the resolver and everything it receives.
pub struct ResolverCall {
    resolver: Arc<dyn FieldResolver>,
    info: ResolveInfo,
    dispatch: Option<DispatchTracker>,
}

impl ResolverCall {
    pub fn new(resolver: Arc<dyn FieldResolver>, info: ResolveInfo) -> Self {
        Self {
            resolver,
            info,
            dispatch: None,
        }
    }

    /// Reports the suspensions of the resolver future to the batch scheduler.
    pub(crate) fn tracked(mut self, dispatch: DispatchTracker) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Lets batch ticks happen without waiting for this call.
    pub(crate) fn untracked(mut self) -> Self {
        if let Some(dispatch) = self.dispatch.take() {
            dispatch.suspend();
        }
        self
    }

    pub fn info(&self) -> &ResolveInfo {
        &self.info
    }

    /// The resolver arguments, for backends that run the resolver elsewhere.
    pub fn into_info(self) -> ResolveInfo {
        self.untracked().info
    }

    /// Calls the resolver on the current thread.
    ///
    /// A panic in the resolver, or in the future it returns, becomes a field
    /// resolution failure.
    pub fn invoke(self) -> Deferred<Value, FieldFailure> {
        let Self {
            resolver,
            info,
            dispatch,
        } = self;
        let parent_type = info.parent_type.clone();
        let field_name = info.field_name.clone();
        match std::panic::catch_unwind(AssertUnwindSafe(|| resolver.resolve(info))) {
            Ok(Deferred::Settled(result)) => Deferred::Settled(result.map_err(FieldFailure::from)),
            Ok(Deferred::Pending(future)) => Deferred::pending(async move {
                let future = AssertUnwindSafe(future).catch_unwind();
                let outcome = match dispatch {
                    Some(dispatch) => dispatch.track(future).await,
                    None => future.await,
                };
                match outcome {
                    Ok(result) => result.map_err(FieldFailure::from),
                    Err(panic) => Err(panicked(&format!("{parent_type}.{field_name}"), panic)),
                }
            }),
            Err(panic) => Deferred::failed(panicked(&format!("{parent_type}.{field_name}"), panic)),
        }
    }
}

fn panicked(coordinate: &str, panic: Box<dyn Any + Send>) -> FieldFailure {
    let reason = panic
        .downcast_ref::<&str>()
        .map(|reason| reason.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown reason".to_string());
    tracing::error!(coordinate, "resolver panicked: {reason}");
    FieldFailure::FieldResolution(FieldError::new(format!("resolver panicked: {reason}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use apollo_compiler::name;
    use apollo_compiler::schema::Type;
    use serde_json_bytes::json;

    use super::*;
    use crate::json_ext::Object;
    use crate::json_ext::ResponsePath;
    use crate::schema::Context;

    pub(crate) fn call<R: FieldResolver>(resolver: R) -> ResolverCall {
        ResolverCall::new(
            Arc::new(resolver),
            ResolveInfo {
                parent_type: name!("Query"),
                field_name: name!("field"),
                return_type: Type::Named(name!("String")),
                source: Arc::new(Value::Null),
                arguments: Object::new(),
                path: ResponsePath::root().key(&name!("field")),
                context: Context::default(),
            },
        )
    }

    #[test]
    fn panics_become_field_failures() {
        let outcome = call(|_: ResolveInfo| -> Deferred<Value, FieldError> { panic!("oh no") })
            .invoke();
        let Deferred::Settled(Err(failure)) = outcome else {
            panic!("expected a settled failure");
        };
        assert_eq!(failure.to_string(), "resolver panicked: oh no");
    }

    #[tokio::test]
    async fn panics_in_futures_become_field_failures() {
        let outcome = call(|_: ResolveInfo| {
            Deferred::pending(async {
                if true {
                    panic!("later");
                }
                Ok::<_, FieldError>(Value::Null)
            })
        })
        .invoke()
        .await;
        assert_eq!(
            outcome,
            Err(FieldFailure::FieldResolution(FieldError::new(
                "resolver panicked: later"
            )))
        );
    }

    #[test]
    fn resolver_errors_are_field_resolution_failures() {
        let outcome = call(|_: ResolveInfo| Deferred::<Value, _>::failed(FieldError::new("nope"))).invoke();
        assert!(matches!(
            outcome,
            Deferred::Settled(Err(FieldFailure::FieldResolution(_)))
        ));
        let outcome = call(|_: ResolveInfo| Deferred::<_, FieldError>::ready(json!("yes"))).invoke();
        assert!(matches!(outcome, Deferred::Settled(Ok(_))));
    }
}
