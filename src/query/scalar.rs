//! Typed field values: query literals and stored values cast by field kind.

use crate::config::FieldKind;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Null,
    Text(String),
    Number(f64),
    Integer(i64),
    Bool(bool),
    Date(DateTime<Utc>),
    Id(Uuid),
    Json(Value),
}

impl Scalar {
    /// Cast a JSON value (usually a query-string literal) to the field's kind.
    pub fn parse(kind: FieldKind, value: &Value) -> Result<Scalar, String> {
        if value.is_null() {
            return Ok(Scalar::Null);
        }
        let fail = || format!("cannot read {} as {}", value, kind.pg_type());
        match kind {
            FieldKind::String => match value {
                Value::String(s) => Ok(Scalar::Text(s.clone())),
                Value::Number(n) => Ok(Scalar::Text(n.to_string())),
                Value::Bool(b) => Ok(Scalar::Text(b.to_string())),
                _ => Err(fail()),
            },
            FieldKind::Number => match value {
                Value::Number(n) => n.as_f64().map(Scalar::Number).ok_or_else(fail),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .map(Scalar::Number)
                    .ok_or_else(fail),
                _ => Err(fail()),
            },
            FieldKind::Integer => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15).map(|f| f as i64))
                    .map(Scalar::Integer)
                    .ok_or_else(fail),
                Value::String(s) => s.trim().parse::<i64>().map(Scalar::Integer).map_err(|_| fail()),
                _ => Err(fail()),
            },
            FieldKind::Boolean => match value {
                Value::Bool(b) => Ok(Scalar::Bool(*b)),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "t" | "yes" | "on" | "1" => Ok(Scalar::Bool(true)),
                    "false" | "f" | "no" | "off" | "0" => Ok(Scalar::Bool(false)),
                    _ => Err(fail()),
                },
                _ => Err(fail()),
            },
            FieldKind::Date => match value {
                Value::String(s) => parse_date(s.trim()).map(Scalar::Date).ok_or_else(fail),
                _ => Err(fail()),
            },
            FieldKind::Id => match value {
                Value::String(s) => Uuid::parse_str(s.trim()).map(Scalar::Id).map_err(|_| fail()),
                _ => Err(fail()),
            },
            FieldKind::Json => match value {
                Value::String(s) => serde_json::from_str(s).map(Scalar::Json).map_err(|_| fail()),
                other => Ok(Scalar::Json(other.clone())),
            },
        }
    }

    /// Canonical JSON form, as records carry it.
    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Text(s) => Value::String(s.clone()),
            Scalar::Number(n) => serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
            Scalar::Integer(i) => Value::from(*i),
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Date(d) => Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Scalar::Id(u) => Value::String(u.to_string()),
            Scalar::Json(v) => v.clone(),
        }
    }

    /// Text bound as a query parameter and cast server-side; None binds NULL.
    pub fn to_sql_text(&self) -> Option<String> {
        match self {
            Scalar::Null => None,
            Scalar::Text(s) => Some(s.clone()),
            Scalar::Number(n) => Some(n.to_string()),
            Scalar::Integer(i) => Some(i.to_string()),
            Scalar::Bool(b) => Some(b.to_string()),
            Scalar::Date(d) => Some(d.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Scalar::Id(u) => Some(u.to_string()),
            Scalar::Json(v) => Some(v.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Ordering between two values of the same kind. Nulls and JSON do not compare.
    pub fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Text(a), Scalar::Text(b)) => Some(a.cmp(b)),
            (Scalar::Number(a), Scalar::Number(b)) => a.partial_cmp(b),
            (Scalar::Integer(a), Scalar::Integer(b)) => Some(a.cmp(b)),
            (Scalar::Integer(a), Scalar::Number(b)) => (*a as f64).partial_cmp(b),
            (Scalar::Number(a), Scalar::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
            (Scalar::Date(a), Scalar::Date(b)) => Some(a.cmp(b)),
            (Scalar::Id(a), Scalar::Id(b)) => Some(a.cmp(b)),
            (Scalar::Json(a), Scalar::Json(b)) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(d) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(d.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_strings_cast_by_kind() {
        assert_eq!(Scalar::parse(FieldKind::Number, &json!(" 4.5 ")), Ok(Scalar::Number(4.5)));
        assert_eq!(Scalar::parse(FieldKind::Integer, &json!("12")), Ok(Scalar::Integer(12)));
        assert_eq!(Scalar::parse(FieldKind::Boolean, &json!("true")), Ok(Scalar::Bool(true)));
        assert!(matches!(Scalar::parse(FieldKind::Date, &json!("2021-03-21")), Ok(Scalar::Date(_))));
        assert_eq!(Scalar::parse(FieldKind::Json, &json!("[1]")), Ok(Scalar::Json(json!([1]))));
    }

    #[test]
    fn bad_literals_are_rejected() {
        assert!(Scalar::parse(FieldKind::Number, &json!("cheap")).is_err());
        assert!(Scalar::parse(FieldKind::Number, &json!("inf")).is_err());
        assert!(Scalar::parse(FieldKind::Integer, &json!("1.5")).is_err());
        assert!(Scalar::parse(FieldKind::Id, &json!("not-a-uuid")).is_err());
        assert!(Scalar::parse(FieldKind::Date, &json!("yesterday")).is_err());
        assert!(Scalar::parse(FieldKind::Number, &json!({"gte": "1"})).is_err());
    }

    #[test]
    fn mixed_numeric_kinds_compare() {
        assert_eq!(Scalar::Integer(3).compare(&Scalar::Number(2.5)), Some(Ordering::Greater));
        assert_eq!(Scalar::Null.compare(&Scalar::Integer(1)), None);
    }

    #[test]
    fn dates_render_canonically() {
        let d = Scalar::parse(FieldKind::Date, &json!("2021-03-21T10:00:00+02:00")).unwrap();
        assert_eq!(d.to_json(), json!("2021-03-21T08:00:00.000Z"));
    }
}
