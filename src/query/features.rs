//! Query pipeline stages: filter, sort, field projection, pagination.
//!
//! Each stage is a pure transformation of a [`RetrievalRequest`]; nothing is executed here.
//! Invalid filter syntax passes through untouched and is rejected by the store.

use crate::config::CREATED_AT_FIELD;
use crate::query::params::{ParamValue, RawParams};
use crate::query::request::{CompareOp, Predicate, Projection, RetrievalRequest, SortKey};
use serde_json::Value;

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;
pub const MAX_LIMIT: u64 = 1000;

pub struct QueryFeatures<'a> {
    request: RetrievalRequest,
    params: &'a RawParams,
}

impl<'a> QueryFeatures<'a> {
    pub fn new(request: RetrievalRequest, params: &'a RawParams) -> Self {
        QueryFeatures { request, params }
    }

    /// Every non-reserved key becomes a predicate: text is equality, a list is membership,
    /// `key[op]` pairs become range comparisons (or unrecognized operators).
    pub fn filter(mut self) -> Self {
        for (key, value) in self.params.filters() {
            match value {
                ParamValue::Text(s) => self.request.predicates.push(Predicate::eq(key, s.as_str())),
                ParamValue::List(items) => self
                    .request
                    .predicates
                    .push(Predicate::one_of(key, items.iter().map(|s| Value::String(s.clone())).collect())),
                ParamValue::Operators(ops) => {
                    for (op, v) in ops {
                        self.request.predicates.push(Predicate {
                            field: key.to_string(),
                            op: CompareOp::from_token(op),
                            value: param_to_value(v),
                        });
                    }
                }
            }
        }
        self
    }

    /// `sort=price,-ratingsAverage`; newest first when absent.
    pub fn sort(mut self) -> Self {
        let keys = self.params.text("sort").map(|s| parse_sort(&s)).unwrap_or_default();
        self.request.sort = if keys.is_empty() {
            vec![SortKey {
                field: CREATED_AT_FIELD.to_string(),
                descending: true,
            }]
        } else {
            keys
        };
        self
    }

    /// `fields=name,price` selects; absent, everything but the version field.
    pub fn limit_fields(mut self) -> Self {
        let fields = self.params.text("fields").map(|s| split_list(&s)).unwrap_or_default();
        self.request.projection = if fields.is_empty() {
            Projection::Default
        } else {
            Projection::Fields(fields)
        };
        self
    }

    /// `skip = (page - 1) * limit`, page and limit falling back to 1 and 10.
    pub fn paginate(mut self) -> Self {
        let page = self.params.text("page").and_then(|s| positive_integer(&s)).unwrap_or(DEFAULT_PAGE);
        let limit = self
            .params
            .text("limit")
            .and_then(|s| positive_integer(&s))
            .unwrap_or(DEFAULT_LIMIT)
            .min(MAX_LIMIT);
        self.request.skip = (page - 1).saturating_mul(limit);
        self.request.limit = Some(limit);
        self
    }

    pub fn into_request(self) -> RetrievalRequest {
        self.request
    }
}

fn param_to_value(v: &ParamValue) -> Value {
    match v {
        ParamValue::Text(s) => Value::String(s.clone()),
        ParamValue::List(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
        ParamValue::Operators(ops) => Value::Object(ops.iter().map(|(k, v)| (k.clone(), param_to_value(v))).collect()),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_sort(raw: &str) -> Vec<SortKey> {
    split_list(raw)
        .into_iter()
        .filter_map(|k| match k.strip_prefix('-') {
            Some(rest) if rest.is_empty() => None,
            Some(rest) => Some(SortKey {
                field: rest.to_string(),
                descending: true,
            }),
            None => Some(SortKey {
                field: k,
                descending: false,
            }),
        })
        .collect()
}

/// Numeric coercion the way a JavaScript `Number(value)` reads a query string:
/// surrounding whitespace ignored, empty is zero, `0x`/`0o`/`0b` prefixes, `Infinity`.
/// Anything else unparseable is NaN.
pub fn coerce_number(raw: &str) -> f64 {
    let s = raw.trim();
    if s.is_empty() {
        return 0.0;
    }
    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    let radix = match s.get(..2) {
        Some("0x") | Some("0X") => Some(16),
        Some("0o") | Some("0O") => Some(8),
        Some("0b") | Some("0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        return u64::from_str_radix(&s[2..], radix).map(|n| n as f64).unwrap_or(f64::NAN);
    }
    if !s.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')) {
        return f64::NAN;
    }
    s.parse::<f64>().unwrap_or(f64::NAN)
}

/// Coerced value when it is a positive integer; zero, NaN, negatives and fractions yield None.
fn positive_integer(raw: &str) -> Option<u64> {
    let n = coerce_number(raw);
    if n.is_finite() && n >= 1.0 && n.fract() == 0.0 && n <= u64::MAX as f64 {
        Some(n as u64)
    } else {
        None
    }
}
