//! Schema with attached resolvers and type hooks.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::schema::Type;
use apollo_compiler::validation::Valid;
use displaydoc::Display;
use thiserror::Error;

use crate::deferred::Deferred;
use crate::error::FieldError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::ResponsePath;
use crate::json_ext::Value;

/// Caller data made available to every resolver of one operation.
#[derive(Clone, Default)]
pub struct Context(Option<Arc<dyn Any + Send + Sync>>);

impl Context {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    /// Returns the value if it is a `T`.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_deref()?.downcast_ref()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Context")
            .field(&self.0.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Everything a resolver knows about the field it resolves.
#[derive(Clone, Debug)]
pub struct ResolveInfo {
    pub(crate) parent_type: Name,
    pub(crate) field_name: Name,
    pub(crate) return_type: Type,
    pub(crate) source: Arc<Value>,
    pub(crate) arguments: Object,
    pub(crate) path: ResponsePath,
    pub(crate) context: Context,
}

impl ResolveInfo {
    /// The object type the field belongs to.
    pub fn parent_type(&self) -> &Name {
        &self.parent_type
    }

    pub fn field_name(&self) -> &Name {
        &self.field_name
    }

    /// The declared type of the field.
    pub fn return_type(&self) -> &Type {
        &self.return_type
    }

    /// The value of the parent object.
    pub fn source(&self) -> &Value {
        &self.source
    }

    /// Argument values, with variables substituted and defaults applied.
    pub fn arguments(&self) -> &Object {
        &self.arguments
    }

    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }

    /// Where the value will appear in the response.
    pub fn path(&self) -> Path {
        self.path.to_path()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// `Type.field`
    pub fn coordinate(&self) -> String {
        format!("{}.{}", self.parent_type, self.field_name)
    }
}

/// Produces the value of one field.
pub trait FieldResolver: Send + Sync + 'static {
    fn resolve(&self, info: ResolveInfo) -> Deferred<Value, FieldError>;
}

impl<F> FieldResolver for F
where
    F: Fn(ResolveInfo) -> Deferred<Value, FieldError> + Send + Sync + 'static,
{
    fn resolve(&self, info: ResolveInfo) -> Deferred<Value, FieldError> {
        self(info)
    }
}

/// Reads the property named like the field from the parent object.
///
/// Used for every field without a registered resolver.
#[derive(Clone, Copy, Debug, Default)]
pub struct PropertyResolver;

impl FieldResolver for PropertyResolver {
    fn resolve(&self, info: ResolveInfo) -> Deferred<Value, FieldError> {
        let value = info
            .source
            .as_object()
            .and_then(|object| object.get(info.field_name.as_str()))
            .cloned()
            .unwrap_or_default();
        Deferred::ready(value)
    }
}

/// Converts a leaf value to its response representation.
pub type ScalarSerializer = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;
/// Names the object type of a value returned for an interface or union.
pub type TypeResolver = Arc<dyn Fn(&Value, &Context) -> Option<String> + Send + Sync>;
/// Tells whether a value belongs to an object type.
pub type IsTypeOf = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Error building an [`ExecutableSchema`].
#[derive(Error, Display, Debug)]
pub enum SchemaError {
    /// invalid schema: {0}
    Invalid(String),
}

/// A validated schema together with the code that produces its values.
pub struct ExecutableSchema {
    definition: Valid<Schema>,
    resolvers: HashMap<String, HashMap<String, Arc<dyn FieldResolver>>>,
    default_resolver: Arc<dyn FieldResolver>,
    serializers: HashMap<String, ScalarSerializer>,
    type_resolvers: HashMap<String, TypeResolver>,
    is_type_of: HashMap<String, IsTypeOf>,
}

impl ExecutableSchema {
    pub fn new(definition: Valid<Schema>) -> Self {
        Self {
            definition,
            resolvers: HashMap::new(),
            default_resolver: Arc::new(PropertyResolver),
            serializers: HashMap::new(),
            type_resolvers: HashMap::new(),
            is_type_of: HashMap::new(),
        }
    }

    /// Parses and validates SDL.
    pub fn parse(sdl: impl Into<String>) -> Result<Self, SchemaError> {
        let definition = Schema::parse_and_validate(sdl, "schema.graphql")
            .map_err(|invalid| SchemaError::Invalid(invalid.errors.to_string()))?;
        Ok(Self::new(definition))
    }

    pub fn definition(&self) -> &Valid<Schema> {
        &self.definition
    }

    /// Registers the resolver of `type_name.field_name`.
    pub fn resolver(
        mut self,
        type_name: &str,
        field_name: &str,
        resolver: impl FieldResolver,
    ) -> Self {
        self.resolvers
            .entry(type_name.to_string())
            .or_default()
            .insert(field_name.to_string(), Arc::new(resolver));
        self
    }

    /// Registers a resolver answering right away.
    pub fn resolve<F>(self, type_name: &str, field_name: &str, resolve: F) -> Self
    where
        F: Fn(ResolveInfo) -> Result<Value, FieldError> + Send + Sync + 'static,
    {
        self.resolver(type_name, field_name, move |info: ResolveInfo| {
            Deferred::from(resolve(info))
        })
    }

    /// Registers a resolver answering later.
    pub fn resolve_async<F, Fut>(self, type_name: &str, field_name: &str, resolve: F) -> Self
    where
        F: Fn(ResolveInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FieldError>> + Send + 'static,
    {
        self.resolver(type_name, field_name, move |info: ResolveInfo| {
            Deferred::pending(resolve(info))
        })
    }

    /// Replaces the resolver used for fields without one.
    pub fn default_resolver(mut self, resolver: impl FieldResolver) -> Self {
        self.default_resolver = Arc::new(resolver);
        self
    }

    /// Registers how values of a scalar or enum type are serialized.
    pub fn scalar_serializer<F>(mut self, type_name: &str, serialize: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.serializers
            .insert(type_name.to_string(), Arc::new(serialize));
        self
    }

    /// Registers how the object type of an interface or union value is found.
    pub fn type_resolver<F>(mut self, abstract_type: &str, resolve: F) -> Self
    where
        F: Fn(&Value, &Context) -> Option<String> + Send + Sync + 'static,
    {
        self.type_resolvers
            .insert(abstract_type.to_string(), Arc::new(resolve));
        self
    }

    /// Registers a membership check for an object type.
    pub fn is_type_of<F>(mut self, object_type: &str, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.is_type_of
            .insert(object_type.to_string(), Arc::new(check));
        self
    }

    pub(crate) fn field_resolver(&self, type_name: &str, field_name: &str) -> Arc<dyn FieldResolver> {
        self.resolvers
            .get(type_name)
            .and_then(|fields| fields.get(field_name))
            .unwrap_or(&self.default_resolver)
            .clone()
    }

    pub(crate) fn serializer(&self, type_name: &str) -> Option<&ScalarSerializer> {
        self.serializers.get(type_name)
    }

    pub(crate) fn type_resolver_for(&self, abstract_type: &str) -> Option<&TypeResolver> {
        self.type_resolvers.get(abstract_type)
    }

    pub(crate) fn is_type_of_for(&self, object_type: &str) -> Option<&IsTypeOf> {
        self.is_type_of.get(object_type)
    }
}

impl fmt::Debug for ExecutableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableSchema")
            .field("resolvers", &self.resolvers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
