//! Argument and variable values as JSON.

use apollo_compiler::executable::Field;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::Value as Literal;
use serde_json_bytes::ByteString;

use crate::json_ext::Object;
use crate::json_ext::Value;

/// <https://spec.graphql.org/October2021/#CoerceArgumentValues()>
///
/// Arguments missing from the field, or bound to a variable without a value,
/// take the default of their definition. Without a default they are left out.
pub(crate) fn coerce_argument_values(field: &Field, variables: &Object) -> Object {
    let mut coerced = Object::new();
    for definition in &field.definition.arguments {
        let provided = field
            .arguments
            .iter()
            .find(|argument| argument.name == definition.name)
            .map(|argument| &argument.value);
        let value = match provided {
            Some(value) => match value.as_ref() {
                Literal::Variable(variable) => variables.get(variable.as_str()).cloned(),
                literal => Some(literal_to_json(literal, variables)),
            },
            None => None,
        };
        let value = value.or_else(|| {
            definition
                .default_value
                .as_ref()
                .map(|default| literal_to_json(default, &Object::new()))
        });
        if let Some(value) = value {
            coerced.insert(ByteString::from(definition.name.as_str()), value);
        }
    }
    coerced
}

/// Provided variable values, plus the defaults of the variables that were not provided.
pub(crate) fn variable_values(operation: &Operation, provided: Object) -> Object {
    let mut variables = provided;
    for definition in &operation.variables {
        if variables.contains_key(definition.name.as_str()) {
            continue;
        }
        if let Some(default) = &definition.default_value {
            variables.insert(
                ByteString::from(definition.name.as_str()),
                literal_to_json(default, &Object::new()),
            );
        }
    }
    variables
}

/// Converts a document literal, substituting variables. Missing variables become `null`.
pub(crate) fn literal_to_json(literal: &Literal, variables: &Object) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Enum(name) => Value::from(name.as_str()),
        Literal::Variable(name) => variables.get(name.as_str()).cloned().unwrap_or_default(),
        Literal::String(value) => Value::from(value.as_str()),
        Literal::Float(value) => value.try_to_f64().map(Value::from).unwrap_or_default(),
        Literal::Int(value) => match value.try_to_i32() {
            Ok(value) => Value::from(value),
            Err(_) => value.try_to_f64().map(Value::from).unwrap_or_default(),
        },
        Literal::Boolean(value) => Value::Bool(*value),
        Literal::List(items) => Value::Array(
            items
                .iter()
                .map(|item| literal_to_json(item, variables))
                .collect(),
        ),
        Literal::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, value)| {
                    (
                        ByteString::from(name.as_str()),
                        literal_to_json(value, variables),
                    )
                })
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::ExecutableDocument;
    use apollo_compiler::Node;
    use apollo_compiler::Schema;
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;

    const SCHEMA: &str = r#"
        type Query {
            search(text: String, limit: Int = 10, filter: Filter, kind: Kind): [String]
        }
        input Filter { tags: [String] exact: Boolean }
        enum Kind { ALL SOME }
    "#;

    fn first_field(document: &ExecutableDocument) -> Node<Field> {
        document
            .operations
            .iter()
            .next()
            .unwrap()
            .selection_set
            .selections[0]
            .as_field()
            .unwrap()
            .clone()
    }

    #[test]
    fn literals_variables_and_defaults() {
        let schema = Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap();
        let document = ExecutableDocument::parse_and_validate(
            &schema,
            r#"query($text: String, $exact: Boolean = true) {
                search(text: $text, filter: {tags: ["a", "b"], exact: $exact}, kind: SOME)
            }"#,
            "query.graphql",
        )
        .unwrap();
        let operation = document.operations.iter().next().unwrap();
        let variables = variable_values(operation, Object::new());
        assert_eq!(Value::Object(variables.clone()), json!({"exact": true}));

        let arguments = coerce_argument_values(&first_field(&document), &variables);
        assert_eq!(
            Value::Object(arguments),
            json!({
                "limit": 10,
                "filter": {"tags": ["a", "b"], "exact": true},
                "kind": "SOME",
            })
        );

        let provided = json!({"text": "hello", "exact": false});
        let variables = variable_values(operation, provided.as_object().unwrap().clone());
        let arguments = coerce_argument_values(&first_field(&document), &variables);
        assert_eq!(
            Value::Object(arguments),
            json!({
                "text": "hello",
                "limit": 10,
                "filter": {"tags": ["a", "b"], "exact": false},
                "kind": "SOME",
            })
        );
    }

    #[test]
    fn explicit_null_is_kept() {
        let schema = Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap();
        let document = ExecutableDocument::parse_and_validate(
            &schema,
            "{ search(limit: null) }",
            "query.graphql",
        )
        .unwrap();
        let arguments = coerce_argument_values(&first_field(&document), &Object::new());
        assert_eq!(Value::Object(arguments), json!({"limit": null}));
    }
}
