//! Request validation from catalog rules.

use crate::config::ValidationRule;
use crate::error::AppError;
use crate::store::Record;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

pub struct RequestValidator;

impl RequestValidator {
    /// Validate a full body against per-field rules. All required fields must be present.
    pub fn validate(body: &Record, rules: &HashMap<String, ValidationRule>) -> Result<(), AppError> {
        let mut names: Vec<&String> = rules.keys().collect();
        names.sort();
        for name in names {
            let rule = &rules[name];
            let val = body.get(name.as_str());
            if rule.required == Some(true) && val.map_or(true, Value::is_null) {
                return Err(AppError::invalid(name.as_str(), format!("{} is required", name)));
            }
            if let Some(v) = val {
                validate_field(name, v, rule, body)?;
            }
        }
        Ok(())
    }

    /// Validate only the fields present in `changes` (for PATCH). Required fields may not be nulled.
    /// Cross-field rules read the other field from `changes`, then from `current`.
    pub fn validate_partial(
        changes: &Record,
        rules: &HashMap<String, ValidationRule>,
        current: &Record,
    ) -> Result<(), AppError> {
        let mut merged = current.clone();
        merged.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
        let mut names: Vec<&String> = changes.keys().collect();
        names.sort();
        for name in names {
            let Some(rule) = rules.get(name.as_str()) else {
                continue;
            };
            let v = &changes[name.as_str()];
            if rule.required == Some(true) && v.is_null() {
                return Err(AppError::invalid(name.as_str(), format!("{} is required", name)));
            }
            validate_field(name, v, rule, &merged)?;
        }
        Ok(())
    }
}

fn email_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex"))
}

fn validate_field(col: &str, v: &Value, rule: &ValidationRule, record: &Record) -> Result<(), AppError> {
    if v.is_null() {
        return Ok(());
    }
    if let Some(format) = &rule.format {
        validate_format(col, v, format)?;
    }
    if let Some(max) = rule.max_length {
        if let Some(s) = v.as_str() {
            if s.chars().count() > max as usize {
                return Err(AppError::invalid(col, format!("{} must be at most {} characters", col, max)));
            }
        }
    }
    if let Some(min) = rule.min_length {
        if let Some(s) = v.as_str() {
            if s.chars().count() < min as usize {
                return Err(AppError::invalid(col, format!("{} must be at least {} characters", col, min)));
            }
        }
    }
    if let Some(ref pattern) = rule.pattern {
        let re = Regex::new(pattern).map_err(|_| AppError::Internal(format!("invalid pattern for {}", col)))?;
        if let Some(s) = v.as_str() {
            if !re.is_match(s) {
                return Err(AppError::invalid(col, format!("{} does not match required pattern", col)));
            }
        }
    }
    if let Some(ref allowed) = rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            let shown: Vec<String> = allowed.iter().take(5).map(|a| a.to_string()).collect();
            return Err(AppError::invalid(col, format!("{} must be one of: {}", col, shown.join(", "))));
        }
    }
    if let Some(min) = rule.minimum {
        if let Some(n) = v.as_f64() {
            if n < min {
                return Err(AppError::invalid(col, format!("{} must be at least {}", col, min)));
            }
        }
    }
    if let Some(max) = rule.maximum {
        if let Some(n) = v.as_f64() {
            if n > max {
                return Err(AppError::invalid(col, format!("{} must be at most {}", col, max)));
            }
        }
    }
    if let Some(ref other) = rule.below_field {
        if let (Some(n), Some(limit)) = (v.as_f64(), record.get(other).and_then(Value::as_f64)) {
            if n >= limit {
                return Err(AppError::invalid(col, format!("{} ({}) should be below {}", col, n, other)));
            }
        }
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(s), Value::String(t)) => s == t,
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn validate_format(col: &str, v: &Value, format: &str) -> Result<(), AppError> {
    match format.to_lowercase().as_str() {
        "email" => {
            if let Some(s) = v.as_str() {
                if !email_pattern().is_match(s) {
                    return Err(AppError::invalid(col, format!("{} must be a valid email", col)));
                }
            }
        }
        "uuid" => {
            if let Some(s) = v.as_str() {
                if uuid::Uuid::parse_str(s).is_err() {
                    return Err(AppError::invalid(col, format!("{} must be a valid UUID", col)));
                }
            }
        }
        _ => {}
    }
    Ok(())
}
