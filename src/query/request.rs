//! The retrieval request threaded through the pipeline and handed to a store.

use serde_json::Value;

/// Visibility of records flagged hidden by their resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Scope {
    /// Hidden records are excluded.
    #[default]
    Default,
    IncludeHidden,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CompareOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    /// Carried through verbatim; the store rejects it when executed.
    Unrecognized(String),
}

impl CompareOp {
    pub fn from_token(token: &str) -> Self {
        match token {
            "gt" => CompareOp::Gt,
            "gte" => CompareOp::Gte,
            "lt" => CompareOp::Lt,
            "lte" => CompareOp::Lte,
            other => CompareOp::Unrecognized(other.to_string()),
        }
    }

    pub fn sql(&self) -> Option<&'static str> {
        match self {
            CompareOp::Eq => Some("="),
            CompareOp::Gt => Some(">"),
            CompareOp::Gte => Some(">="),
            CompareOp::Lt => Some("<"),
            CompareOp::Lte => Some("<="),
            CompareOp::In => Some("IN"),
            CompareOp::Unrecognized(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub op: CompareOp,
    /// A string for scalar comparisons, an array of strings for `In`.
    pub value: Value,
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate {
            field: field.into(),
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    pub fn one_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Predicate {
            field: field.into(),
            op: CompareOp::In,
            value: Value::Array(values),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Projection {
    /// Every readable field except the internal version field.
    Default,
    /// Explicit field list. Entries prefixed with `-` exclude.
    Fields(Vec<String>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetrievalRequest {
    pub resource: String,
    pub predicates: Vec<Predicate>,
    pub sort: Vec<SortKey>,
    pub projection: Projection,
    pub skip: u64,
    pub limit: Option<u64>,
    pub scope: Scope,
}

impl RetrievalRequest {
    /// Unconstrained request over one resource: no predicates, natural order, no limit.
    pub fn new(resource: impl Into<String>) -> Self {
        RetrievalRequest {
            resource: resource.into(),
            predicates: Vec::new(),
            sort: Vec::new(),
            projection: Projection::Default,
            skip: 0,
            limit: None,
            scope: Scope::Default,
        }
    }

    pub fn with_predicate(mut self, p: Predicate) -> Self {
        self.predicates.push(p);
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }
}
