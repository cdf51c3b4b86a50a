use std::sync::Arc;

use apollo_compiler::parser::SourceMap;
use parking_lot::Mutex;

use super::collect::FieldGroup;
use crate::error::FieldFailure;
use crate::graphql::Error;
use crate::json_ext::ResponsePath;
use crate::json_ext::Value;

/// Marker for a field whose value became `null` because of an error that was
/// already recorded. Carried upwards until a nullable position absorbs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PropagateNull;

/// Append-only list of the located errors of one operation.
#[derive(Clone, Debug, Default)]
pub(crate) struct ErrorCollector {
    errors: Arc<Mutex<Vec<Error>>>,
}

impl ErrorCollector {
    /// Records `failure` as raised by `group` at `path`.
    pub(crate) fn record(
        &self,
        failure: FieldFailure,
        group: &FieldGroup,
        path: &ResponsePath,
        sources: &SourceMap,
    ) {
        let path = path.to_path();
        tracing::debug!(
            code = failure.extension_code(),
            coordinate = %group.coordinate(),
            %path,
            "field error: {failure}"
        );
        let error = Error::builder()
            .message(failure.to_string())
            .locations(group.locations(sources))
            .path(path)
            .extensions(failure.extensions())
            .origin(failure)
            .build();
        self.errors.lock().push(error);
    }

    /// Takes the recorded errors out of the collector.
    pub(crate) fn take(&self) -> Vec<Error> {
        std::mem::take(&mut *self.errors.lock())
    }
}

/// Substitutes `null` for a propagated error when `nullable`, otherwise keeps
/// propagating.
pub(crate) fn try_nullify(nullable: bool, error: PropagateNull) -> Result<Value, PropagateNull> {
    if nullable {
        Ok(Value::Null)
    } else {
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::ExecutableDocument;
    use apollo_compiler::Schema;
    use apollo_compiler::name;
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;
    use crate::error::FieldError;
    use crate::execution::collect::FieldCollector;
    use crate::json_ext::Object;

    #[test]
    fn records_located_errors() {
        let schema =
            Schema::parse_and_validate("type Query { a: String }", "schema.graphql").unwrap();
        let document =
            ExecutableDocument::parse_and_validate(&schema, "{\n  a\n  a\n}", "query.graphql")
                .unwrap();
        let variables = Object::new();
        let collector = FieldCollector {
            schema: &schema,
            document: &document,
            variables: &variables,
        };
        let operation = document.operations.iter().next().unwrap();
        let groups = collector.collect_fields(&name!("Query"), &operation.selection_set);

        let errors = ErrorCollector::default();
        let shared = errors.clone();
        shared.record(
            FieldFailure::FieldResolution(FieldError::new("boom").with_extension("code", "BOOM")),
            &groups["a"],
            &ResponsePath::root().key(&name!("a")),
            &document.sources,
        );
        let recorded = errors.take();
        assert_eq!(
            serde_json_bytes::to_value(&recorded).unwrap(),
            json!([{
                "message": "boom",
                "locations": [{"line": 2, "column": 3}, {"line": 3, "column": 3}],
                "path": ["a"],
                "extensions": {"code": "BOOM"},
            }])
        );
        assert!(errors.take().is_empty());
    }

    #[test]
    fn nullify_only_nullable_positions() {
        assert_eq!(try_nullify(true, PropagateNull), Ok(Value::Null));
        assert_eq!(try_nullify(false, PropagateNull), Err(PropagateNull));
    }
}
