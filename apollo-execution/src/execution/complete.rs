//! Resolving fields and completing their values.
//!
//! <https://spec.graphql.org/October2021/#sec-Value-Completion>
//!
//! Every step returns a [`Deferred`] failing with [`PropagateNull`] when the
//! value it was computing became `null` in a non-null position. The error
//! behind it is recorded once, where it happened; the nearest nullable
//! position on the way up turns the propagation back into a `null`.

use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::Type;
use indexmap::IndexMap;
use serde_json_bytes::ByteString;
use tokio::runtime::Handle;
use tracing_futures::WithSubscriber;

use super::arguments::coerce_argument_values;
use super::collect::FieldGroup;
use super::context::ExecutionContext;
use super::errors::PropagateNull;
use super::errors::try_nullify;
use super::leaf::serialize_enum;
use super::leaf::serialize_scalar;
use crate::backend::ResolverCall;
use crate::deferred::Deferred;
use crate::deferred::join_all;
use crate::error::FieldFailure;
use crate::json_ext::Object;
use crate::json_ext::ResponsePath;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::schema::ResolveInfo;

type Completion = Deferred<Value, PropagateNull>;

/// Resolves every group concurrently and assembles them in key order.
///
/// All the resolvers are dispatched before any of them is waited on.
pub(crate) fn execute_fields(
    ctx: &Arc<ExecutionContext>,
    source: &Arc<Value>,
    path: &ResponsePath,
    groups: IndexMap<Name, FieldGroup>,
) -> Deferred<Object, PropagateNull> {
    let mut keys = Vec::with_capacity(groups.len());
    let mut completions = Vec::with_capacity(groups.len());
    for (key, group) in groups {
        let nullable = !group.return_type().is_non_null();
        let field_path = path.key(&key);
        completions.push(
            resolve_field(ctx, source, group, field_path)
                .catch(move |propagate| try_nullify(nullable, propagate)),
        );
        keys.push(key);
    }

    join_all(completions).settle(move |Ok(outcomes)| {
        let mut object = Object::new();
        for (key, outcome) in keys.into_iter().zip(outcomes) {
            object.insert(ByteString::from(key.as_str()), outcome?);
        }
        Ok(object)
    })
}

/// Resolves the groups one after the other, each field starting once the
/// previous one completed.
///
/// A failing field does not stop the following ones.
pub(crate) fn execute_fields_serially(
    ctx: &Arc<ExecutionContext>,
    source: &Arc<Value>,
    path: &ResponsePath,
    groups: IndexMap<Name, FieldGroup>,
) -> Deferred<Object, PropagateNull> {
    // (fields so far, whether a non-null field propagated)
    let mut chain = Deferred::<_, PropagateNull>::ready((Object::new(), false));
    for (key, group) in groups {
        let ctx = ctx.clone();
        let source = source.clone();
        let field_path = path.key(&key);
        chain = chain.then(move |so_far| {
            let (mut object, propagated) = match so_far {
                Ok(so_far) => so_far,
                Err(propagate) => return Deferred::failed(propagate),
            };
            let nullable = !group.return_type().is_non_null();
            resolve_field(&ctx, &source, group, field_path).settle(move |outcome| {
                match outcome.or_else(|propagate| try_nullify(nullable, propagate)) {
                    Ok(value) => {
                        object.insert(ByteString::from(key.as_str()), value);
                        Ok((object, propagated))
                    }
                    Err(PropagateNull) => Ok((object, true)),
                }
            })
        });
    }
    chain.settle(|outcome| match outcome? {
        (_, true) => Err(PropagateNull),
        (object, false) => Ok(object),
    })
}

/// <https://spec.graphql.org/October2021/#ExecuteField()>
fn resolve_field(
    ctx: &Arc<ExecutionContext>,
    source: &Arc<Value>,
    group: FieldGroup,
    path: ResponsePath,
) -> Completion {
    if group.field_name().as_str() == "__typename" {
        return Deferred::ready(Value::from(group.parent_type().as_str()));
    }

    let info = ResolveInfo {
        parent_type: group.parent_type().clone(),
        field_name: group.field_name().clone(),
        return_type: group.return_type().clone(),
        source: source.clone(),
        arguments: coerce_argument_values(group.first(), &ctx.variables),
        path: path.clone(),
        context: ctx.context.clone(),
    };
    let resolver = ctx
        .schema
        .field_resolver(group.parent_type(), group.field_name());
    tracing::trace!(coordinate = %group.coordinate(), "resolving field");

    let dispatch = ctx.batch_scheduler.dispatch_guard();
    let call = ResolverCall::new(resolver, info).tracked(dispatch.tracker());
    let ctx = ctx.clone();
    ctx.backend.execute(call).then(move |outcome| {
        let completion = match outcome {
            Ok(value) => complete_value(&ctx, &group, group.return_type(), &path, value),
            Err(failure) => {
                ctx.record(failure, &group, &path);
                Deferred::failed(PropagateNull)
            }
        };
        // the sub-fields are dispatched by now
        drop(dispatch);
        completion
    })
}

/// <https://spec.graphql.org/October2021/#CompleteValue()>
fn complete_value(
    ctx: &Arc<ExecutionContext>,
    group: &FieldGroup,
    ty: &Type,
    path: &ResponsePath,
    value: Value,
) -> Completion {
    let nullable = match ty {
        Type::NonNullNamed(name) => Some(Type::Named(name.clone())),
        Type::NonNullList(item) => Some(Type::List(item.clone())),
        Type::Named(_) | Type::List(_) => None,
    };
    if let Some(nullable) = nullable {
        let ctx = ctx.clone();
        let group = group.clone();
        let path = path.clone();
        return complete_value(&ctx, &group, &nullable, &path, value).settle(move |outcome| {
            match outcome {
                Ok(Value::Null) => {
                    let failure = FieldFailure::NonNullViolation {
                        type_name: group.parent_type().to_string(),
                        field_name: group.field_name().to_string(),
                    };
                    ctx.record(failure, &group, &path);
                    Err(PropagateNull)
                }
                outcome => outcome,
            }
        });
    }

    if value.is_null() {
        return Deferred::ready(Value::Null);
    }

    match ty {
        Type::List(item_type) => complete_list_value(ctx, group, item_type, path, value),
        Type::Named(name) => match ctx.schema.definition().types.get(name) {
            Some(definition @ (ExtendedType::Scalar(_) | ExtendedType::Enum(_))) => {
                complete_leaf_value(ctx, group, name, definition, path, value)
            }
            Some(ExtendedType::Object(_)) => complete_object_value(ctx, group, name, path, value),
            Some(ExtendedType::Interface(_) | ExtendedType::Union(_)) => {
                complete_abstract_value(ctx, group, name, path, value)
            }
            _ => fail(
                ctx,
                group,
                path,
                FieldFailure::TypeCompletion(format!(
                    "Field \"{}\" has no output type \"{name}\".",
                    group.coordinate()
                )),
            ),
        },
        Type::NonNullNamed(_) | Type::NonNullList(_) => Deferred::ready(value),
    }
}

fn complete_list_value(
    ctx: &Arc<ExecutionContext>,
    group: &FieldGroup,
    item_type: &Type,
    path: &ResponsePath,
    value: Value,
) -> Completion {
    let Value::Array(items) = value else {
        return fail(
            ctx,
            group,
            path,
            FieldFailure::TypeCompletion(format!(
                "Expected Iterable, but did not find one for field \"{}\".",
                group.coordinate()
            )),
        );
    };

    let item_nullable = !item_type.is_non_null();
    let completions = items.into_iter().enumerate().map(|(index, item)| {
        complete_value(ctx, group, item_type, &path.index(index), item)
            .catch(move |propagate| try_nullify(item_nullable, propagate))
    });
    join_all(completions).settle(|Ok(outcomes)| {
        outcomes
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    })
}

fn complete_leaf_value(
    ctx: &Arc<ExecutionContext>,
    group: &FieldGroup,
    type_name: &Name,
    definition: &ExtendedType,
    path: &ResponsePath,
    value: Value,
) -> Completion {
    let serialized = match ctx.schema.serializer(type_name) {
        Some(serialize) => serialize(&value).and_then(|serialized| {
            if serialized.is_null() {
                Err(format!(
                    "Expected `{type_name}.serialize({})` to return non-nullable value, returned: null",
                    value.inspect()
                ))
            } else {
                Ok(serialized)
            }
        }),
        None => match definition {
            ExtendedType::Enum(definition) => serialize_enum(definition, value),
            _ => serialize_scalar(type_name, value),
        },
    };
    match serialized {
        Ok(serialized) => Deferred::ready(serialized),
        Err(message) => fail(ctx, group, path, FieldFailure::Serialization(message)),
    }
}

fn complete_abstract_value(
    ctx: &Arc<ExecutionContext>,
    group: &FieldGroup,
    abstract_type: &Name,
    path: &ResponsePath,
    value: Value,
) -> Completion {
    let schema = ctx.schema.definition();
    let runtime_type = match resolve_runtime_type(ctx, abstract_type, &value) {
        None => Err(format!(
            "Abstract type \"{abstract_type}\" must resolve to an Object type at runtime for field \"{}\". \
             Either the \"{abstract_type}\" type should provide a type resolver or each possible type should provide an \"is_type_of\" function.",
            group.coordinate()
        )),
        Some(name) => match schema.types.get(name.as_str()) {
            None => Err(format!(
                "Abstract type \"{abstract_type}\" was resolved to a type \"{name}\" that does not exist inside the schema."
            )),
            Some(ExtendedType::Object(object)) if schema.is_subtype(abstract_type, &object.name) => {
                Ok(object.name.clone())
            }
            Some(ExtendedType::Object(_)) => Err(format!(
                "Runtime Object type \"{name}\" is not a possible type for \"{abstract_type}\"."
            )),
            Some(_) => Err(format!(
                "Abstract type \"{abstract_type}\" was resolved to a non-object type \"{name}\"."
            )),
        },
    };
    match runtime_type {
        Ok(object_type) => complete_object_value(ctx, group, &object_type, path, value),
        Err(message) => fail(ctx, group, path, FieldFailure::TypeCompletion(message)),
    }
}

/// The registered type resolver, then a `__typename` key of the value, then
/// the first possible type whose `is_type_of` accepts the value.
fn resolve_runtime_type(
    ctx: &ExecutionContext,
    abstract_type: &Name,
    value: &Value,
) -> Option<String> {
    if let Some(resolve) = ctx.schema.type_resolver_for(abstract_type) {
        return resolve(value, &ctx.context);
    }
    if let Some(typename) = value
        .as_object()
        .and_then(|object| object.get("__typename"))
        .and_then(|typename| typename.as_str())
    {
        return Some(typename.to_string());
    }
    let schema = ctx.schema.definition();
    schema
        .types
        .iter()
        .filter(|(name, definition)| {
            matches!(definition, ExtendedType::Object(_)) && schema.is_subtype(abstract_type, name)
        })
        .find(|(name, _)| {
            ctx.schema
                .is_type_of_for(name)
                .is_some_and(|is_type_of| is_type_of(value))
        })
        .map(|(name, _)| name.to_string())
}

fn complete_object_value(
    ctx: &Arc<ExecutionContext>,
    group: &FieldGroup,
    object_type: &Name,
    path: &ResponsePath,
    value: Value,
) -> Completion {
    if let Some(is_type_of) = ctx.schema.is_type_of_for(object_type)
        && !is_type_of(&value)
    {
        return fail(
            ctx,
            group,
            path,
            FieldFailure::TypeCompletion(format!(
                "Expected value of type \"{object_type}\" but got: {}.",
                value.inspect()
            )),
        );
    }

    let groups = ctx.collector().collect_subfields(object_type, group);
    let source = Arc::new(value);

    if ctx.should_trampoline(path)
        && let Ok(handle) = Handle::try_current()
    {
        tracing::trace!(
            depth = path.field_depth(),
            "continuing completion on a new task"
        );
        let dispatch = ctx.batch_scheduler.dispatch_guard();
        let completion = {
            let ctx = ctx.clone();
            let path = path.clone();
            async move {
                let fields = execute_fields(&ctx, &source, &path, groups);
                drop(dispatch);
                fields.await
            }
        };
        let task = handle.spawn(completion.with_current_subscriber());
        let ctx = ctx.clone();
        let group = group.clone();
        let path = path.clone();
        return Deferred::pending(async move {
            match task.await {
                Ok(outcome) => outcome.map(Value::Object),
                Err(error) => {
                    let failure =
                        FieldFailure::TypeCompletion(format!("completion task failed: {error}"));
                    ctx.record(failure, &group, &path);
                    Err(PropagateNull)
                }
            }
        });
    }

    execute_fields(ctx, &source, path, groups).map(Value::Object)
}

fn fail(
    ctx: &ExecutionContext,
    group: &FieldGroup,
    path: &ResponsePath,
    failure: FieldFailure,
) -> Completion {
    ctx.record(failure, group, path);
    Deferred::failed(PropagateNull)
}
