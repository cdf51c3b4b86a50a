use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::validation::Valid;

use super::collect::FieldCollector;
use super::collect::FieldGroup;
use super::errors::ErrorCollector;
use crate::backend::ExecutorBackend;
use crate::batch::BatchScheduler;
use crate::error::FieldFailure;
use crate::json_ext::Object;
use crate::json_ext::ResponsePath;
use crate::schema::Context;
use crate::schema::ExecutableSchema;

/// State shared by every field of one operation run.
pub(crate) struct ExecutionContext {
    pub(crate) schema: Arc<ExecutableSchema>,
    pub(crate) document: Arc<Valid<ExecutableDocument>>,
    pub(crate) variables: Object,
    pub(crate) context: Context,
    pub(crate) errors: ErrorCollector,
    pub(crate) backend: Arc<dyn ExecutorBackend>,
    pub(crate) batch_scheduler: BatchScheduler,
    pub(crate) trampoline_depth: usize,
}

impl ExecutionContext {
    pub(crate) fn collector(&self) -> FieldCollector<'_> {
        FieldCollector {
            schema: self.schema.definition(),
            document: &self.document,
            variables: &self.variables,
        }
    }

    pub(crate) fn record(&self, failure: FieldFailure, group: &FieldGroup, path: &ResponsePath) {
        self.errors.record(failure, group, path, &self.document.sources);
    }

    /// Whether completing an object at `path` should continue on a new task.
    pub(crate) fn should_trampoline(&self, path: &ResponsePath) -> bool {
        self.trampoline_depth > 0 && path.field_depth() % self.trampoline_depth == 0
    }
}
