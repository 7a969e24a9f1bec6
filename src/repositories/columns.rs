// src/repositories/columns.rs
//! Typed column descriptions: payload casting, SQL binding and row decoding.

use serde_json::{Map, Number, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column as _, QueryBuilder, Row, Sqlite, TypeInfo, ValueRef};

use crate::clock::{DATE_FORMAT, TIMESTAMP_FORMAT};
use crate::error::{ApiError, ApiResult};
use crate::input::{value_text, InputMap};
use crate::validator::{capitalize, humanize, FieldValidator};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnKind {
    Text,
    Integer,
    IntRange(i64, i64),
    Real,
    NonNegative,
    Bool,
    Date,
    DateTime,
    Enum(&'static [&'static str]),
    Email,
    Phone,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

pub const fn col(name: &'static str, kind: ColumnKind) -> Column {
    Column { name, kind }
}

impl Column {
    /// Casts one payload value. Blank input becomes NULL; the caller decides whether that is allowed.
    pub fn cast(&self, value: &Value) -> ApiResult<Value> {
        let text = match value_text(value) {
            Some(text) => text,
            None => return Ok(Value::Null),
        };
        let field = humanize(self.name);

        match self.kind {
            ColumnKind::Text => Ok(Value::String(text)),
            ColumnKind::Integer => parse_int(&text, &field).map(Value::from),
            ColumnKind::IntRange(min, max) => {
                let n = parse_int(&text, &field)?;
                FieldValidator::range(n, self.name, Some(min), Some(max)).map_err(ApiError::BadRequest)?;
                Ok(Value::from(n))
            }
            ColumnKind::Real => parse_real(&text, &field).map(real_value),
            ColumnKind::NonNegative => {
                let n = parse_real(&text, &field)?;
                if n < 0.0 {
                    return Err(ApiError::BadRequest(format!(
                        "{} must not be negative",
                        capitalize(&field)
                    )));
                }
                Ok(real_value(n))
            }
            ColumnKind::Bool => FieldValidator::boolean(&text)
                .map(Value::Bool)
                .ok_or_else(|| ApiError::BadRequest(format!("Invalid {}: expected true or false", field))),
            ColumnKind::Date => FieldValidator::date(&text)
                .map(|d| Value::String(d.format(DATE_FORMAT).to_string()))
                .ok_or_else(|| ApiError::BadRequest(format!("Invalid {}: expected YYYY-MM-DD", field))),
            ColumnKind::DateTime => FieldValidator::datetime(&text)
                .map(|dt| Value::String(dt.format(TIMESTAMP_FORMAT).to_string()))
                .ok_or_else(|| {
                    ApiError::BadRequest(format!("Invalid {}: expected YYYY-MM-DD HH:MM:SS", field))
                }),
            ColumnKind::Enum(allowed) => {
                let lowered = text.to_lowercase();
                let dashed = lowered.replace('_', "-");
                allowed
                    .iter()
                    .find(|a| **a == lowered || **a == dashed)
                    .map(|a| Value::String(a.to_string()))
                    .ok_or_else(|| {
                        ApiError::BadRequest(format!(
                            "Invalid {} '{}': must be one of {}",
                            field,
                            text,
                            allowed.join(", ")
                        ))
                    })
            }
            ColumnKind::Email => FieldValidator::email(&text)
                .map(|_| Value::String(text.to_lowercase()))
                .map_err(ApiError::BadRequest),
            ColumnKind::Phone => FieldValidator::phone(&text)
                .map(|_| Value::String(text))
                .map_err(ApiError::BadRequest),
        }
    }

    /// Value as a bound text parameter for equality filters.
    pub fn filter_param(&self, raw: &str) -> ApiResult<String> {
        Ok(match self.cast(&Value::String(raw.to_string()))? {
            Value::Bool(b) => if b { "1".to_string() } else { "0".to_string() },
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}

fn parse_int(text: &str, field: &str) -> ApiResult<i64> {
    text.parse::<i64>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {}: expected a whole number", field)))
}

fn parse_real(text: &str, field: &str) -> ApiResult<f64> {
    text.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid {}: expected a number", field)))
}

fn real_value(n: f64) -> Value {
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

/// Numeric view of a record field (typed or textual).
pub fn number(record: &InputMap, key: &str) -> Option<f64> {
    match record.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

// ==================== BINDING ====================

pub fn push_value(qb: &mut QueryBuilder<'_, Sqlite>, value: &Value) {
    match value {
        Value::Null => {
            qb.push_bind(Option::<String>::None);
        }
        Value::Bool(b) => {
            qb.push_bind(i64::from(*b));
        }
        Value::Number(n) => match n.as_i64() {
            Some(i) => {
                qb.push_bind(i);
            }
            None => {
                qb.push_bind(n.as_f64().unwrap_or(0.0));
            }
        },
        Value::String(s) => {
            qb.push_bind(s.clone());
        }
        other => {
            qb.push_bind(other.to_string());
        }
    }
}

// ==================== DECODING ====================

/// Decodes a row by its runtime storage class; `bool_columns` come back as JSON booleans.
pub fn row_to_map(row: &SqliteRow, bool_columns: &[&str]) -> ApiResult<InputMap> {
    let mut map = Map::new();
    for column in row.columns() {
        let index = column.ordinal();
        let name = column.name();
        let storage = {
            let raw = row.try_get_raw(index)?;
            if raw.is_null() {
                None
            } else {
                Some(raw.type_info().name().to_string())
            }
        };

        let value = match storage.as_deref() {
            None => Value::Null,
            Some("INTEGER") => {
                let n: i64 = row.try_get(index)?;
                if bool_columns.contains(&name) {
                    Value::Bool(n != 0)
                } else {
                    Value::from(n)
                }
            }
            Some("REAL") => real_value(row.try_get::<f64, _>(index)?),
            Some("TEXT") => Value::String(row.try_get::<String, _>(index)?),
            Some(_) => Value::Null,
        };
        map.insert(name.to_string(), value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn casts_by_kind() {
        assert_eq!(col("age", ColumnKind::Integer).cast(&json!("42")).unwrap(), json!(42));
        assert_eq!(col("price", ColumnKind::Real).cast(&json!("12.5")).unwrap(), json!(12.5));
        assert_eq!(col("is_active", ColumnKind::Bool).cast(&json!("yes")).unwrap(), json!(true));
        assert_eq!(
            col("expiry_date", ColumnKind::Date).cast(&json!("2025-01-31T00:00:00")).unwrap(),
            json!("2025-01-31")
        );
        assert_eq!(
            col("arrival_time", ColumnKind::DateTime).cast(&json!("2025-01-31T08:15")).unwrap(),
            json!("2025-01-31 08:15:00")
        );
        assert_eq!(col("notes", ColumnKind::Text).cast(&json!("  ")).unwrap(), Value::Null);
    }

    #[test]
    fn rejects_out_of_range_and_unknown_enum() {
        let err = col("triage_level", ColumnKind::IntRange(1, 5)).cast(&json!(9)).unwrap_err();
        assert!(err.to_string().contains("Triage level"));

        let status = col("status", ColumnKind::Enum(&["open", "in-progress", "closed"]));
        assert_eq!(status.cast(&json!("IN_PROGRESS")).unwrap(), json!("in-progress"));
        assert!(status.cast(&json!("archived")).is_err());

        let qty = col("quantity", ColumnKind::NonNegative);
        assert!(qty.cast(&json!(-1)).is_err());
    }

    #[test]
    fn filter_params_normalize_booleans() {
        let active = col("is_active", ColumnKind::Bool);
        assert_eq!(active.filter_param("true").unwrap(), "1");
        assert!(active.filter_param("maybe").is_err());
    }
}
