//! Execution errors.
use displaydoc::Display;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Value;
use thiserror::Error;

use crate::json_ext::Object;

/// An error returned by a resolver.
///
/// The message becomes the message of the located GraphQL error, the extensions
/// are copied to it verbatim.
#[derive(Error, Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
#[serde(default)]
pub struct FieldError {
    /// The error message.
    pub message: String,

    /// Extensions added to the GraphQL error.
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extensions: Object::new(),
        }
    }

    /// Adds one extension entry.
    pub fn with_extension(mut self, key: impl Into<ByteString>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }
}

impl From<String> for FieldError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for FieldError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Why a field could not produce a value.
///
/// Every recorded GraphQL error originates from exactly one of these.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[ignore_extra_doc_attributes]
#[non_exhaustive]
pub enum FieldFailure {
    /// {0}
    FieldResolution(FieldError),

    /// Cannot return null for non-nullable field {type_name}.{field_name}.
    NonNullViolation {
        /// The parent object type.
        type_name: String,
        /// The field that resolved to null.
        field_name: String,
    },

    /// {0}
    TypeCompletion(String),

    /// {0}
    Serialization(String),

    /// {0}
    BackendTransport(String),
}

impl FieldFailure {
    /// A stable code naming the kind of failure.
    pub fn extension_code(&self) -> &'static str {
        match self {
            FieldFailure::FieldResolution(_) => "FIELD_RESOLUTION_ERROR",
            FieldFailure::NonNullViolation { .. } => "NON_NULL_VIOLATION",
            FieldFailure::TypeCompletion(_) => "TYPE_COMPLETION_ERROR",
            FieldFailure::Serialization(_) => "SERIALIZATION_ERROR",
            FieldFailure::BackendTransport(_) => "BACKEND_TRANSPORT_ERROR",
        }
    }

    /// Extensions the located error should carry.
    pub(crate) fn extensions(&self) -> Object {
        match self {
            FieldFailure::FieldResolution(error) => error.extensions.clone(),
            _ => Object::new(),
        }
    }
}

impl From<FieldError> for FieldFailure {
    fn from(error: FieldError) -> Self {
        FieldFailure::FieldResolution(error)
    }
}

/// Errors preventing an operation from being executed at all.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
pub(crate) enum RequestError {
    /// Unknown operation named "{0}".
    UnknownOperation(String),

    /// Must provide operation name if query contains multiple operations.
    AmbiguousOperation,

    /// Must provide an operation.
    NoOperation,

    /// Schema is not configured for {0}s.
    UnsupportedOperationType(String),
}

/// Errors while setting up an execution engine.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not parse configuration: {0}
    InvalidConfiguration(String),

    /// the {0} backend needs a running Tokio runtime
    MissingRuntime(&'static str),

    /// could not start resolver worker pool: {0}
    WorkerPool(String),
}

impl From<serde_yaml::Error> for ConfigurationError {
    fn from(error: serde_yaml::Error) -> Self {
        ConfigurationError::InvalidConfiguration(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_null_violation_message() {
        let failure = FieldFailure::NonNullViolation {
            type_name: "DataType".to_string(),
            field_name: "nonNullSync".to_string(),
        };
        assert_eq!(
            failure.to_string(),
            "Cannot return null for non-nullable field DataType.nonNullSync."
        );
        assert_eq!(failure.extension_code(), "NON_NULL_VIOLATION");
    }

    #[test]
    fn resolver_message_is_kept() {
        let failure = FieldFailure::from(FieldError::new("UNIÇODÉ!").with_extension("code", "X"));
        assert_eq!(failure.to_string(), "UNIÇODÉ!");
        assert_eq!(failure.extensions().get("code"), Some(&Value::from("X")));
    }
}
