//! Update-operator application for `update(id, patch)`.
//!
//! A patch is a JSON object. Plain nested objects deep-merge by field
//! path; `$set` replaces the subtree at its path; the remaining operators
//! transform the existing value and are typed -- a mismatch with the
//! field's runtime type is a validation error.

use serde_json::{Map, Value};

use folio_core::entity::{type_name, Entity};
use folio_core::error::{FolioError, Result};

/// Applies a whole patch document to an entity in place.
pub fn apply_patch(entity: &mut Entity, patch: &Map<String, Value>) -> Result<()> {
    for (field, value) in patch {
        apply_at(entity, field, value)?;
    }
    Ok(())
}

fn apply_at(entity: &mut Entity, path: &str, value: &Value) -> Result<()> {
    match value {
        Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
            for (op, arg) in map {
                if op.starts_with('$') {
                    apply_operator(entity, path, op, arg)?;
                } else {
                    apply_at(entity, &format!("{path}.{op}"), arg)?;
                }
            }
            Ok(())
        }
        Value::Object(map) => {
            // Nested partial update: deep-merge by field path.
            for (field, nested) in map {
                apply_at(entity, &format!("{path}.{field}"), nested)?;
            }
            Ok(())
        }
        other => {
            entity.set_path(path, other.clone());
            Ok(())
        }
    }
}

fn type_error(path: &str, op: &str, found: &Value) -> FolioError {
    FolioError::validation(format!(
        "{op} cannot apply to {path:?}: incompatible value of type {}",
        type_name(found)
    ))
}

fn current(entity: &Entity, path: &str) -> Value {
    entity.get_path(path).present().cloned().unwrap_or(Value::Null)
}

fn number_op(entity: &mut Entity, path: &str, op: &str, arg: &Value, f: impl Fn(f64, f64) -> f64) -> Result<()> {
    let existing = current(entity, path);
    let (Some(base), Some(delta)) = (existing.as_f64(), arg.as_f64()) else {
        return Err(type_error(path, op, &existing));
    };
    let result = f(base, delta);
    let number = serde_json::Number::from_f64(result)
        .ok_or_else(|| FolioError::validation(format!("{op} on {path:?} produced a non-finite number")))?;
    // Keep integers integral when both operands were.
    let value = if existing.is_i64() && arg.is_i64() && result.fract() == 0.0 {
        Value::from(result as i64)
    } else {
        Value::Number(number)
    };
    entity.set_path(path, value);
    Ok(())
}

fn apply_operator(entity: &mut Entity, path: &str, op: &str, arg: &Value) -> Result<()> {
    match op {
        "$set" => {
            entity.set_path(path, arg.clone());
            Ok(())
        }

        "$increment" => number_op(entity, path, op, arg, |a, b| a + b),
        "$decrement" => number_op(entity, path, op, arg, |a, b| a - b),
        "$multiply" => number_op(entity, path, op, arg, |a, b| a * b),

        "$toggle" => {
            let existing = current(entity, path);
            let Some(flag) = existing.as_bool() else {
                return Err(type_error(path, op, &existing));
            };
            entity.set_path(path, Value::Bool(!flag));
            Ok(())
        }

        "$append" => concat(entity, path, op, arg, false),
        "$prepend" => concat(entity, path, op, arg, true),

        "$remove" => {
            let existing = current(entity, path);
            let Value::Array(items) = existing else {
                return Err(type_error(path, op, &existing));
            };
            let filtered: Vec<Value> = items.into_iter().filter(|v| v != arg).collect();
            entity.set_path(path, Value::Array(filtered));
            Ok(())
        }

        other => Err(FolioError::validation(format!(
            "unknown update operator {other:?}"
        ))),
    }
}

/// `$append`/`$prepend`: string concatenation or array push.
fn concat(entity: &mut Entity, path: &str, op: &str, arg: &Value, front: bool) -> Result<()> {
    let existing = current(entity, path);
    match (existing, arg) {
        (Value::String(s), Value::String(extra)) => {
            let combined = if front {
                format!("{extra}{s}")
            } else {
                format!("{s}{extra}")
            };
            entity.set_path(path, Value::String(combined));
            Ok(())
        }
        (Value::Array(mut items), element) => {
            if front {
                items.insert(0, element.clone());
            } else {
                items.push(element.clone());
            }
            entity.set_path(path, Value::Array(items));
            Ok(())
        }
        (found, _) => Err(type_error(path, op, &found)),
    }
}
