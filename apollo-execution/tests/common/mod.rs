#![allow(dead_code)]

use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::validation::Valid;
use apollo_execution::CooperativeBackend;
use apollo_execution::ExecutableSchema;
use apollo_execution::ExecutionEngine;
use apollo_execution::ExecutorBackend;
use apollo_execution::InlineBackend;
use apollo_execution::ThreadBackend;
use apollo_execution::graphql::Response;

/// The backends every behavior is checked against.
#[derive(Clone, Copy, Debug)]
pub enum Backend {
    Inline,
    Cooperative,
    DedicatedThread,
    PooledThread,
}

impl Backend {
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Arc<dyn ExecutorBackend> {
        match self {
            Backend::Inline => Arc::new(InlineBackend),
            Backend::Cooperative => Arc::new(CooperativeBackend::new().unwrap()),
            Backend::DedicatedThread => Arc::new(ThreadBackend::dedicated()),
            Backend::PooledThread => Arc::new(ThreadBackend::pooled(2).unwrap()),
        }
    }

    pub fn engine(self, schema: ExecutableSchema) -> ExecutionEngine {
        ExecutionEngine::new(Arc::new(schema), self.build())
    }
}

pub fn document(engine: &ExecutionEngine, query: &str) -> Arc<Valid<ExecutableDocument>> {
    Arc::new(
        ExecutableDocument::parse_and_validate(engine.schema().definition(), query, "query.graphql")
            .unwrap(),
    )
}

/// The response as JSON, errors ordered by location since siblings may fail
/// in any order.
pub fn sorted(mut response: Response) -> serde_json_bytes::Value {
    response
        .errors
        .sort_by_key(|error| error.locations.first().copied());
    serde_json_bytes::to_value(&response).unwrap()
}
