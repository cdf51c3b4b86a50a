//! Execution of one operation.

use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::OperationType;
use apollo_compiler::validation::Valid;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use tracing_futures::Instrument;

use self::arguments::variable_values;
use self::complete::execute_fields;
use self::complete::execute_fields_serially;
use self::context::ExecutionContext;
use self::errors::ErrorCollector;
use self::errors::PropagateNull;
use crate::backend::ExecutorBackend;
use crate::batch::BatchScheduler;
use crate::configuration::Configuration;
use crate::error::ConfigurationError;
use crate::error::RequestError;
use crate::graphql::Error;
use crate::graphql::Response;
use crate::json_ext::Object;
use crate::json_ext::ResponsePath;
use crate::json_ext::Value;
use crate::schema::Context;
use crate::schema::ExecutableSchema;

mod arguments;
mod collect;
mod complete;
mod context;
mod errors;
mod leaf;

const DEFAULT_TRAMPOLINE_DEPTH: usize = 64;

/// Everything needed to execute one operation.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Request {
    /// The validated document holding the operation.
    pub document: Arc<Valid<ExecutableDocument>>,

    /// The operation to execute, required when the document has several.
    pub operation_name: Option<String>,

    /// Variable values as provided by the client.
    pub variables: Object,

    /// The source value of the root fields.
    pub root_value: Option<Value>,

    /// Caller data passed to every resolver.
    pub context: Context,

    /// Scheduler of the batch loaders used by the resolvers.
    pub batch_scheduler: BatchScheduler,
}

#[buildstructor::buildstructor]
impl Request {
    /// Returns a builder for a [`Request`].
    ///
    /// Only `.document(..)` is required.
    #[builder(visibility = "pub")]
    fn new(
        document: Arc<Valid<ExecutableDocument>>,
        operation_name: Option<String>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        variables: JsonMap<ByteString, Value>,
        root_value: Option<Value>,
        context: Option<Context>,
        batch_scheduler: Option<BatchScheduler>,
    ) -> Self {
        Self {
            document,
            operation_name,
            variables,
            root_value,
            context: context.unwrap_or_default(),
            batch_scheduler: batch_scheduler.unwrap_or_default(),
        }
    }
}

/// Executes operations against an [`ExecutableSchema`], running resolvers on
/// one [`ExecutorBackend`].
///
/// Engines are cheap to clone and hold no per-operation state, so one engine
/// may execute any number of operations concurrently.
#[derive(Clone)]
pub struct ExecutionEngine {
    schema: Arc<ExecutableSchema>,
    backend: Arc<dyn ExecutorBackend>,
    trampoline_depth: usize,
}

impl ExecutionEngine {
    pub fn new(schema: Arc<ExecutableSchema>, backend: Arc<dyn ExecutorBackend>) -> Self {
        Self {
            schema,
            backend,
            trampoline_depth: DEFAULT_TRAMPOLINE_DEPTH,
        }
    }

    /// Builds the configured backend and applies the rest of `configuration`.
    pub fn from_configuration(
        schema: Arc<ExecutableSchema>,
        configuration: &Configuration,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self::new(schema, configuration.backend.build()?)
            .with_trampoline_depth(configuration.trampoline_depth))
    }

    /// Object nesting depth after which completion continues on a fresh task,
    /// bounding stack usage on deeply nested operations. 0 disables it.
    pub fn with_trampoline_depth(mut self, depth: usize) -> Self {
        self.trampoline_depth = depth;
        self
    }

    pub fn schema(&self) -> &Arc<ExecutableSchema> {
        &self.schema
    }

    /// <https://spec.graphql.org/October2021/#sec-Executing-Requests>
    ///
    /// `data` is absent when no operation could be selected, `null` when a
    /// non-null root field failed.
    pub async fn execute(&self, request: Request) -> Response {
        let Request {
            document,
            operation_name,
            variables,
            root_value,
            context,
            batch_scheduler,
        } = request;

        let operation = match select_operation(&document, operation_name.as_deref()) {
            Ok(operation) => operation.clone(),
            Err(error) => return request_error(error),
        };
        let kind = operation_kind(operation.operation_type);
        let Some(root_type) = self
            .schema
            .definition()
            .root_operation(operation.operation_type)
            .cloned()
        else {
            return request_error(RequestError::UnsupportedOperationType(kind.to_string()));
        };

        let ctx = Arc::new(ExecutionContext {
            schema: self.schema.clone(),
            document,
            variables: variable_values(&operation, variables),
            context,
            errors: ErrorCollector::default(),
            backend: self.backend.clone(),
            batch_scheduler: batch_scheduler.clone(),
            trampoline_depth: self.trampoline_depth,
        });
        let span = tracing::info_span!(
            "graphql.execute",
            "graphql.operation.name" = operation.name.as_ref().map_or("", |name| name.as_str()),
            "graphql.operation.type" = kind,
        );

        let groups = ctx
            .collector()
            .collect_fields(&root_type, &operation.selection_set);
        let source = Arc::new(root_value.unwrap_or_default());
        let path = ResponsePath::root();
        let root = match operation.operation_type {
            OperationType::Mutation => execute_fields_serially(&ctx, &source, &path, groups),
            OperationType::Query | OperationType::Subscription => {
                execute_fields(&ctx, &source, &path, groups)
            }
        };
        let data = batch_scheduler
            .drive(root.into_future())
            .instrument(span)
            .await;

        let errors = ctx.errors.take();
        tracing::debug!(errors = errors.len(), "operation executed");
        Response::builder()
            .data(match data {
                Ok(object) => Value::Object(object),
                Err(PropagateNull) => Value::Null,
            })
            .errors(errors)
            .build()
    }
}

/// <https://spec.graphql.org/October2021/#GetOperation()>
fn select_operation<'a>(
    document: &'a ExecutableDocument,
    operation_name: Option<&str>,
) -> Result<&'a Node<Operation>, RequestError> {
    if let Some(name) = operation_name {
        return document
            .operations
            .get(Some(name))
            .map_err(|_| RequestError::UnknownOperation(name.to_string()));
    }
    let mut operations = document.operations.iter();
    match (operations.next(), operations.next()) {
        (Some(operation), None) => Ok(operation),
        (None, _) => Err(RequestError::NoOperation),
        (Some(_), Some(_)) => Err(RequestError::AmbiguousOperation),
    }
}

fn operation_kind(operation_type: OperationType) -> &'static str {
    match operation_type {
        OperationType::Query => "query",
        OperationType::Mutation => "mutation",
        OperationType::Subscription => "subscription",
    }
}

fn request_error(error: RequestError) -> Response {
    tracing::debug!("cannot execute request: {error}");
    Response::builder()
        .error(Error::builder().message(error.to_string()).build())
        .build()
}
