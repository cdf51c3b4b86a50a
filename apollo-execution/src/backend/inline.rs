use super::ExecutorBackend;
use super::ResolverCall;
use crate::deferred::Deferred;
use crate::error::FieldFailure;
use crate::json_ext::Value;

/// Calls resolvers directly on the flow executing the operation.
///
/// Synchronous resolvers settle immediately, so an operation made only of
/// them completes without ever yielding to a scheduler.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineBackend;

impl ExecutorBackend for InlineBackend {
    fn execute(&self, call: ResolverCall) -> Deferred<Value, FieldFailure> {
        call.invoke()
    }
}
