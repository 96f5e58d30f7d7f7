use serde_json::{Map, Number, Value};

use super::{Record, ScalarKind, TypeSpec};
use crate::error::{Error, Result};

/// Check `value` against `spec`, returning it with lax coercions applied.
pub fn validate(spec: &TypeSpec, value: &Value) -> Result<Value> {
    check(spec, value, "$")
}

fn check(spec: &TypeSpec, value: &Value, path: &str) -> Result<Value> {
    match spec {
        TypeSpec::Optional(inner) => match value {
            Value::Null => Ok(Value::Null),
            other => check(inner, other, path),
        },
        _ if value.is_null() => Err(Error::validation(path, "unexpected null")),
        TypeSpec::Scalar(kind) => scalar(*kind, value, path),
        TypeSpec::Enum(labels) => match value {
            Value::String(s) if labels.iter().any(|l| l == s) => Ok(value.clone()),
            other => Err(Error::validation(
                path,
                format!("expected one of {labels:?}, got {other}"),
            )),
        },
        TypeSpec::Record(record) => self::record(record, value, path),
        TypeSpec::List(inner) => match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| check(inner, item, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Err(Error::validation(path, format!("expected list, got {other}"))),
        },
        TypeSpec::Map(inner) => match value {
            Value::Object(entries) => {
                let mut out = Map::new();
                for (key, item) in entries {
                    out.insert(key.clone(), check(inner, item, &format!("{path}.{key}"))?);
                }
                Ok(Value::Object(out))
            }
            other => Err(Error::validation(path, format!("expected map, got {other}"))),
        },
    }
}

fn scalar(kind: ScalarKind, value: &Value, path: &str) -> Result<Value> {
    let fail = || {
        let expected = match kind {
            ScalarKind::String => "string",
            ScalarKind::Integer => "integer",
            ScalarKind::Number => "number",
            ScalarKind::Boolean => "boolean",
        };
        Error::validation(path, format!("expected {expected}, got {value}"))
    };
    match (kind, value) {
        (ScalarKind::String, Value::String(_)) => Ok(value.clone()),
        (ScalarKind::Integer, Value::Number(n)) => {
            if n.is_i64() || n.is_u64() {
                Ok(value.clone())
            } else {
                n.as_f64().and_then(integral).ok_or_else(fail)
            }
        }
        (ScalarKind::Integer, Value::String(s)) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                Ok(Value::from(i))
            } else {
                s.parse::<f64>().ok().and_then(integral).ok_or_else(fail)
            }
        }
        (ScalarKind::Number, Value::Number(_)) => Ok(value.clone()),
        (ScalarKind::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(fail),
        (ScalarKind::Boolean, Value::Bool(_)) => Ok(value.clone()),
        (ScalarKind::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(fail()),
        },
        _ => Err(fail()),
    }
}

fn integral(f: f64) -> Option<Value> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(Value::from(f as i64))
    } else {
        None
    }
}

fn record(record: &Record, value: &Value, path: &str) -> Result<Value> {
    let Value::Object(entries) = value else {
        return Err(Error::validation(path, format!("expected object, got {value}")));
    };
    let mut out = Map::new();
    for field in &record.fields {
        let at = format!("{path}.{}", field.name);
        match entries.get(&field.name) {
            Some(item) => {
                out.insert(field.name.clone(), check(&field.spec, item, &at)?);
            }
            None if field.spec.is_optional() => {}
            None => return Err(Error::validation(at, "missing required field")),
        }
    }
    Ok(Value::Object(out))
}
