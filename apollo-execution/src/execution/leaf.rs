//! Result coercion of scalars and enums.
//!
//! <https://spec.graphql.org/October2021/#sec-Scalars.Result-Coercion-and-Serialization>

use apollo_compiler::schema::EnumType;

use crate::json_ext::Value;
use crate::json_ext::ValueExt;

/// Serializes a value of a built-in scalar. Custom scalars are left untouched.
pub(crate) fn serialize_scalar(type_name: &str, value: Value) -> Result<Value, String> {
    match type_name {
        "Int" => serialize_int(value),
        "Float" => serialize_float(value),
        "String" => serialize_string(value),
        "Boolean" => serialize_boolean(value),
        "ID" => serialize_id(value),
        _ => Ok(value),
    }
}

/// Enum values are serialized as the name of one of the values of the enum.
pub(crate) fn serialize_enum(definition: &EnumType, value: Value) -> Result<Value, String> {
    let known = value
        .as_str()
        .is_some_and(|name| definition.values.contains_key(name));
    if known {
        Ok(value)
    } else {
        Err(format!(
            "Enum \"{}\" cannot represent value: {}",
            definition.name,
            value.inspect()
        ))
    }
}

fn serialize_int(value: Value) -> Result<Value, String> {
    let number = match &value {
        Value::Bool(boolean) => Some(i64::from(*boolean)),
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.is_finite() && float.fract() == 0.0)
                .map(|float| float as i64)
        }),
        Value::String(string) => string.as_str().parse::<i64>().ok(),
        _ => None,
    };
    let Some(number) = number else {
        return Err(format!(
            "Int cannot represent non-integer value: {}",
            value.inspect()
        ));
    };
    i32::try_from(number)
        .map(Value::from)
        .map_err(|_| {
            format!(
                "Int cannot represent non 32-bit signed integer value: {}",
                value.inspect()
            )
        })
}

fn serialize_float(value: Value) -> Result<Value, String> {
    match &value {
        Value::Number(_) => Ok(value),
        Value::Bool(boolean) => Ok(Value::from(if *boolean { 1.0 } else { 0.0 })),
        Value::String(string) => match string.as_str().parse::<f64>() {
            Ok(float) if float.is_finite() => Ok(Value::from(float)),
            _ => Err(format!(
                "Float cannot represent non numeric value: {}",
                value.inspect()
            )),
        },
        _ => Err(format!(
            "Float cannot represent non numeric value: {}",
            value.inspect()
        )),
    }
}

fn serialize_string(value: Value) -> Result<Value, String> {
    match &value {
        Value::String(_) => Ok(value),
        Value::Bool(boolean) => Ok(Value::from(boolean.to_string())),
        Value::Number(number) => Ok(Value::from(number.to_string())),
        _ => Err(format!("String cannot represent value: {}", value.inspect())),
    }
}

fn serialize_boolean(value: Value) -> Result<Value, String> {
    match &value {
        Value::Bool(_) => Ok(value),
        Value::Number(number) => match number.as_f64() {
            Some(float) if float.is_finite() => Ok(Value::Bool(float != 0.0)),
            _ => Err(format!(
                "Boolean cannot represent a non boolean value: {}",
                value.inspect()
            )),
        },
        _ => Err(format!(
            "Boolean cannot represent a non boolean value: {}",
            value.inspect()
        )),
    }
}

fn serialize_id(value: Value) -> Result<Value, String> {
    match &value {
        Value::String(_) => Ok(value),
        Value::Number(number) if number.is_i64() || number.is_u64() => {
            Ok(Value::from(number.to_string()))
        }
        _ => Err(format!("ID cannot represent value: {}", value.inspect())),
    }
}
