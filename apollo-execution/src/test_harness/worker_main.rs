//! Resolver worker spawned by the process backend tests.
//!
//! Serves the resolvers of `worker.graphql` on its standard input and output.

use apollo_execution::ExecutableSchema;
use apollo_execution::FieldError;
use apollo_execution::backend::process::serve_stdio;
use serde_json_bytes::json;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let schema = ExecutableSchema::parse(include_str!("worker.graphql"))?
        .resolve("Query", "greet", |info| {
            let name = info
                .argument("name")
                .and_then(|name| name.as_str())
                .unwrap_or_default();
            Ok(json!(format!("hello {name} from {}", std::process::id())))
        })
        .resolve("Query", "denied", |_| {
            Err(FieldError::new("denied").with_extension("code", "FORBIDDEN"))
        });
    serve_stdio(&schema).await?;
    Ok(())
}
