//! Resolvers executed by a separate worker process.
//!
//! Every call spawns the configured program and exchanges one line of JSON
//! with it: a [`WorkerRequest`] on its standard input, then a
//! [`WorkerResponse`] on its standard output. The program is expected to hold
//! the same schema and resolvers, typically by calling [`serve_stdio`].
//!
//! Only data crosses the process boundary, so the [`Context`] of the
//! operation is not available to resolvers running in a worker.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use apollo_compiler::Name;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tracing_futures::Instrument;

use super::ExecutorBackend;
use super::ResolverCall;
use crate::deferred::Deferred;
use crate::error::FieldError;
use crate::error::FieldFailure;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::ResponsePath;
use crate::json_ext::Value;
use crate::schema::Context;
use crate::schema::ExecutableSchema;
use crate::schema::ResolveInfo;

/// What a worker needs to run one resolver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// `Type.field` of the resolver to run.
    pub coordinate: String,
    /// The value of the parent object.
    pub source: Value,
    /// Coerced argument values.
    pub arguments: Object,
    /// Where the value will appear in the response.
    pub path: Path,
}

/// The outcome a worker reports.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerResponse {
    /// The resolver produced a value.
    Value(Value),
    /// The resolver failed.
    Error(FieldError),
    /// The worker could not run the resolver at all: the request was
    /// malformed or named a field the worker does not know.
    Unavailable(String),
}

/// Runs resolvers in a worker process, one process per call.
#[derive(Clone, Debug)]
pub struct ProcessBackend {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

impl ExecutorBackend for ProcessBackend {
    fn execute(&self, call: ResolverCall) -> Deferred<Value, FieldFailure> {
        let info = call.into_info();
        let span = tracing::info_span!(
            "resolver.process",
            coordinate = %info.coordinate(),
            "process.program" = %self.program.display(),
        );
        let request = WorkerRequest {
            coordinate: info.coordinate(),
            source: info.source().clone(),
            arguments: info.arguments,
            path: info.path.to_path(),
        };
        let command = self.command();
        Deferred::pending(call_worker(command, request).instrument(span))
    }
}

async fn call_worker(mut command: Command, request: WorkerRequest) -> Result<Value, FieldFailure> {
    let mut child = command.spawn().map_err(transport)?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| FieldFailure::BackendTransport("worker process has no stdin".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| FieldFailure::BackendTransport("worker process has no stdout".to_string()))?;

    let mut line = serde_json::to_vec(&request)
        .map_err(|error| FieldFailure::BackendTransport(error.to_string()))?;
    line.push(b'\n');
    stdin.write_all(&line).await.map_err(transport)?;
    // end of input lets a serving worker exit
    drop(stdin);

    let mut reply = String::new();
    BufReader::new(stdout)
        .read_line(&mut reply)
        .await
        .map_err(transport)?;
    let status = child.wait().await.map_err(transport)?;
    tracing::trace!(%status, "worker process exited");

    if reply.trim().is_empty() {
        return Err(FieldFailure::BackendTransport(
            "worker process exited without answering".to_string(),
        ));
    }
    match serde_json::from_str::<WorkerResponse>(&reply) {
        Ok(WorkerResponse::Value(value)) => Ok(value),
        Ok(WorkerResponse::Error(error)) => Err(FieldFailure::FieldResolution(error)),
        Ok(WorkerResponse::Unavailable(reason)) => Err(FieldFailure::BackendTransport(reason)),
        Err(error) => Err(FieldFailure::BackendTransport(format!(
            "malformed worker reply: {error}"
        ))),
    }
}

fn transport(error: io::Error) -> FieldFailure {
    FieldFailure::BackendTransport(format!("worker process: {error}"))
}

/// Answers worker requests read from `reader`, one reply line per request line,
/// until the end of input.
pub async fn serve_worker<R, W>(
    schema: &ExecutableSchema,
    reader: R,
    mut writer: W,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => answer(schema, request).await,
            Err(error) => WorkerResponse::Unavailable(format!("malformed worker request: {error}")),
        };
        let mut reply = serde_json::to_vec(&response).map_err(io::Error::other)?;
        reply.push(b'\n');
        writer.write_all(&reply).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// [`serve_worker`] over the standard input and output of the process.
pub async fn serve_stdio(schema: &ExecutableSchema) -> io::Result<()> {
    serve_worker(
        schema,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}

async fn answer(schema: &ExecutableSchema, request: WorkerRequest) -> WorkerResponse {
    let info = match resolve_info(schema, request) {
        Ok(info) => info,
        Err(reason) => return WorkerResponse::Unavailable(reason),
    };
    let resolver = schema.field_resolver(&info.parent_type, &info.field_name);
    match ResolverCall::new(resolver, info).invoke().await {
        Ok(value) => WorkerResponse::Value(value),
        Err(FieldFailure::FieldResolution(error)) => WorkerResponse::Error(error),
        Err(failure) => WorkerResponse::Error(FieldError::new(failure.to_string())),
    }
}

fn resolve_info(schema: &ExecutableSchema, request: WorkerRequest) -> Result<ResolveInfo, String> {
    let unknown = || format!("unknown field {}", request.coordinate);
    let (type_name, field_name) = request.coordinate.split_once('.').ok_or_else(unknown)?;
    let object = schema
        .definition()
        .get_object(type_name)
        .ok_or_else(unknown)?;
    let (field_name, definition) = object
        .fields
        .get_key_value(field_name)
        .ok_or_else(unknown)?;

    let mut path = ResponsePath::root();
    for element in request.path.iter() {
        path = match element {
            PathElement::Index(index) => path.index(*index),
            PathElement::Key(key) => {
                let key = Name::new(key).map_err(|error| format!("invalid path: {error}"))?;
                path.key(&key)
            }
        };
    }

    Ok(ResolveInfo {
        parent_type: object.name.clone(),
        field_name: field_name.clone(),
        return_type: definition.ty.clone(),
        source: Arc::new(request.source),
        arguments: request.arguments,
        path,
        context: Context::default(),
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;

    fn schema() -> ExecutableSchema {
        ExecutableSchema::parse("type Query { hello(name: String): String }")
            .unwrap()
            .resolve("Query", "hello", |info| {
                let name = info
                    .argument("name")
                    .and_then(|name| name.as_str())
                    .unwrap_or("nobody");
                Ok(json!(format!("hello {name} at {}", info.path())))
            })
    }

    #[tokio::test]
    async fn serves_one_reply_per_request() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let serving = tokio::spawn(async move {
            let schema = schema();
            serve_worker(&schema, BufReader::new(server_read), server_write).await
        });

        let (client_read, mut client_write) = tokio::io::split(client);
        let requests = [
            r#"{"coordinate":"Query.hello","source":null,"arguments":{"name":"Ada"},"path":["hello"]}"#,
            "",
            r#"{"coordinate":"Query.missing","source":null,"arguments":{},"path":["missing"]}"#,
            "not json",
        ];
        for request in requests {
            client_write.write_all(request.as_bytes()).await.unwrap();
            client_write.write_all(b"\n").await.unwrap();
        }
        client_write.shutdown().await.unwrap();

        let mut replies = Vec::new();
        let mut lines = BufReader::new(client_read).lines();
        while let Some(line) = lines.next_line().await.unwrap() {
            replies.push(serde_json::from_str::<WorkerResponse>(&line).unwrap());
        }
        serving.await.unwrap().unwrap();

        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0], WorkerResponse::Value(json!("hello Ada at /hello")));
        assert_eq!(
            replies[1],
            WorkerResponse::Unavailable("unknown field Query.missing".to_string())
        );
        let WorkerResponse::Unavailable(reason) = &replies[2] else {
            panic!("expected an unavailable reply");
        };
        assert!(reason.starts_with("malformed worker request"));
    }

    #[test]
    fn wire_format() {
        assert_eq!(
            serde_json::to_string(&WorkerResponse::Value(json!(1))).unwrap(),
            r#"{"value":1}"#
        );
        assert_eq!(
            serde_json::to_string(&WorkerResponse::Error(FieldError::new("no"))).unwrap(),
            r#"{"error":{"message":"no"}}"#
        );
        assert_eq!(
            serde_json::to_string(&WorkerResponse::Unavailable("gone".to_string())).unwrap(),
            r#"{"unavailable":"gone"}"#
        );
    }

    #[cfg(unix)]
    mod unix {
        use pretty_assertions::assert_eq;

        use super::*;
        use crate::backend::tests::call;
        use crate::schema::FieldResolver;

        fn unreachable_resolver() -> impl FieldResolver {
            |_: ResolveInfo| -> Deferred<Value, FieldError> {
                panic!("resolvers run in the worker")
            }
        }

        fn shell(script: &str) -> ProcessBackend {
            ProcessBackend::new("sh").arg("-c").arg(script)
        }

        #[tokio::test]
        async fn reads_worker_values() {
            let outcome = shell(r#"read request; echo '{"value": {"answer": 42}}'"#)
                .execute(call(unreachable_resolver()))
                .await;
            assert_eq!(outcome, Ok(json!({"answer": 42})));
        }

        #[tokio::test]
        async fn worker_errors_are_field_errors() {
            let outcome = shell(r#"read request; echo '{"error": {"message": "denied"}}'"#)
                .execute(call(unreachable_resolver()))
                .await;
            assert_eq!(
                outcome,
                Err(FieldFailure::FieldResolution(FieldError::new("denied")))
            );
        }

        #[tokio::test]
        async fn unavailable_resolvers_are_transport_failures() {
            let outcome = shell(r#"read request; echo '{"unavailable": "unknown field Query.field"}'"#)
                .execute(call(unreachable_resolver()))
                .await;
            assert_eq!(
                outcome,
                Err(FieldFailure::BackendTransport(
                    "unknown field Query.field".to_string()
                ))
            );
        }

        #[tokio::test]
        async fn broken_workers_are_transport_failures() {
            let outcome = shell("read request; echo garbage")
                .execute(call(unreachable_resolver()))
                .await;
            assert!(matches!(
                outcome,
                Err(FieldFailure::BackendTransport(message)) if message.starts_with("malformed worker reply")
            ));

            let outcome = shell("read request; exit 1")
                .execute(call(unreachable_resolver()))
                .await;
            assert_eq!(
                outcome,
                Err(FieldFailure::BackendTransport(
                    "worker process exited without answering".to_string()
                ))
            );

            let outcome = ProcessBackend::new("/nonexistent/worker")
                .execute(call(unreachable_resolver()))
                .await;
            assert!(matches!(outcome, Err(FieldFailure::BackendTransport(_))));
        }
    }
}
