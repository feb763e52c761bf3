//! Raw catalog types matching `catalog/resources.json`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Operations a resource may expose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    List,
    Read,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Date,
    Id,
    Json,
}

impl FieldKind {
    /// PostgreSQL type used for the column and for casting bound text parameters.
    pub fn pg_type(&self) -> &'static str {
        match self {
            FieldKind::String => "text",
            FieldKind::Number => "double precision",
            FieldKind::Integer => "bigint",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "timestamptz",
            FieldKind::Id => "uuid",
            FieldKind::Json => "jsonb",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldKind::Number | FieldKind::Integer)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub trim: bool,
    /// Derive this field as a slug of another string field on every write that sets the source.
    #[serde(default)]
    pub slug_from: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
    /// Value must be strictly lower than this other field when both are supplied.
    #[serde(default)]
    pub below_field: Option<String>,
}

/// Default scope: records whose `field` equals `when` are hidden from ordinary reads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HiddenConfig {
    pub field: String,
    pub when: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    One,
    Many,
}

/// When a relation is expanded into read results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expand {
    #[default]
    Never,
    Read,
    Always,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationConfig {
    pub name: String,
    pub resource: String,
    pub local_field: String,
    pub foreign_field: String,
    pub kind: RelationKind,
    #[serde(default)]
    pub select: Vec<String>,
    #[serde(default)]
    pub expand: Expand,
    #[serde(default)]
    pub on_delete: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParentConfig {
    pub resource: String,
    pub field: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregateConfig {
    pub score_field: String,
    pub count_field: String,
    pub average_field: String,
    pub default_average: f64,
    #[serde(default)]
    pub precision: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl MetricOp {
    pub fn sql(&self) -> &'static str {
        match self {
            MetricOp::Count => "COUNT",
            MetricOp::Sum => "SUM",
            MetricOp::Avg => "AVG",
            MetricOp::Min => "MIN",
            MetricOp::Max => "MAX",
        }
    }
}

/// One output value per group. `count` without a field counts records.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    pub op: MetricOp,
    #[serde(default)]
    pub field: Option<String>,
}

/// Grouped summary served at `/:resource/stats`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatsConfig {
    pub group_by: String,
    /// Upper-case the group key (string fields only).
    #[serde(default)]
    pub upper_case: bool,
    /// Applied before grouping, written as query parameters, e.g. `"ratingsAverage[gte]": "2.5"`.
    #[serde(default)]
    pub filter: BTreeMap<String, String>,
    pub metrics: Vec<MetricConfig>,
    /// Metric name to order groups by; `-` prefix for descending.
    #[serde(default)]
    pub sort: Option<String>,
}

impl StatsConfig {
    /// `(metric, descending)`.
    pub fn sort_key(&self) -> Option<(&str, bool)> {
        let raw = self.sort.as_deref()?.trim();
        Some(match raw.strip_prefix('-') {
            Some(name) => (name, true),
            None => (raw, false),
        })
    }
}

fn default_plan_limit() -> u32 {
    12
}

/// Starts per month of one year, from an array of dates; served at `/:resource/monthly-plan/:year`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonthlyPlanConfig {
    pub date_field: String,
    /// Field listed for every start, e.g. the tour name.
    pub label_field: String,
    pub count_as: String,
    pub labels_as: String,
    #[serde(default = "default_plan_limit")]
    pub limit: u32,
}

/// Read-only value derived on every read: `from / divide_by`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComputedConfig {
    pub name: String,
    pub from: String,
    pub divide_by: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    pub operations: Vec<Operation>,
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub unique: Vec<Vec<String>>,
    #[serde(default)]
    pub hidden: Option<HiddenConfig>,
    /// Fields that must never be exposed in responses (e.g. password hashes).
    #[serde(default)]
    pub sensitive_fields: Vec<String>,
    #[serde(default)]
    pub validation: HashMap<String, ValidationRule>,
    #[serde(default)]
    pub relations: Vec<RelationConfig>,
    #[serde(default)]
    pub parent: Option<ParentConfig>,
    #[serde(default)]
    pub owner_field: Option<String>,
    #[serde(default)]
    pub aggregate: Option<AggregateConfig>,
    #[serde(default)]
    pub aliases: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub stats: Option<StatsConfig>,
    #[serde(default)]
    pub monthly_plan: Option<MonthlyPlanConfig>,
    #[serde(default)]
    pub computed: Vec<ComputedConfig>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub resources: Vec<ResourceConfig>,
}
