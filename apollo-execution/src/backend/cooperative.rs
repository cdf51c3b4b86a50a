use tokio::runtime::Handle;

use super::ExecutorBackend;
use super::ResolverCall;
use crate::deferred::Deferred;
use crate::error::ConfigurationError;
use crate::error::FieldError;
use crate::error::FieldFailure;
use crate::json_ext::Value;

/// Runs every resolver on a Tokio task of its own.
///
/// Sibling fields are resolved concurrently on the runtime, and the operation
/// waits for them without blocking a thread.
#[derive(Clone, Debug)]
pub struct CooperativeBackend {
    handle: Handle,
}

impl CooperativeBackend {
    /// Uses the runtime the caller runs on.
    pub fn new() -> Result<Self, ConfigurationError> {
        let handle =
            Handle::try_current().map_err(|_| ConfigurationError::MissingRuntime("cooperative"))?;
        Ok(Self::with_handle(handle))
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self { handle }
    }
}

impl ExecutorBackend for CooperativeBackend {
    fn execute(&self, call: ResolverCall) -> Deferred<Value, FieldFailure> {
        let task = self.handle.spawn(async move { call.invoke().await });
        Deferred::pending(async move {
            match task.await {
                Ok(result) => result,
                Err(error) => Err(FieldFailure::FieldResolution(FieldError::new(format!(
                    "resolver task failed: {error}"
                )))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json_bytes::json;

    use super::*;
    use crate::backend::tests::call;
    use crate::schema::ResolveInfo;

    #[test]
    fn needs_a_runtime() {
        assert!(matches!(
            CooperativeBackend::new(),
            Err(ConfigurationError::MissingRuntime("cooperative"))
        ));
    }

    #[tokio::test]
    async fn resolvers_run_concurrently() {
        let backend = CooperativeBackend::new().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<Value>();
        // the first resolver can only finish once the second one ran
        let rx = std::sync::Mutex::new(Some(rx));
        let first = backend.execute(call(move |_: ResolveInfo| {
            let rx = rx.lock().unwrap().take();
            Deferred::pending(async move {
                match rx {
                    Some(rx) => rx.await.map_err(|_| FieldError::new("dropped")),
                    None => Err(FieldError::new("called twice")),
                }
            })
        }));
        let tx = std::sync::Mutex::new(Some(tx));
        let second = backend.execute(call(move |_: ResolveInfo| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(json!("from second"));
            }
            Deferred::<_, FieldError>::ready(json!("second"))
        }));

        let (first, second) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(first.into_future(), second.into_future())
        })
        .await
        .unwrap();
        assert_eq!(first, Ok(json!("from second")));
        assert_eq!(second, Ok(json!("second")));
    }
}
