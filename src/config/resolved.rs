//! Resolved resource model: catalog validated and flattened for runtime use.

use crate::config::{
    ComputedConfig, Expand, FieldKind, MonthlyPlanConfig, Operation, RelationKind, StatsConfig, ValidationRule,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Server-assigned identifier present on every resource.
pub const ID_FIELD: &str = "id";
/// Server-assigned creation timestamp; default sort key.
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Internal version counter; excluded from listings unless asked for.
pub const VERSION_FIELD: &str = "version";

/// Month number (1-12) on monthly plan rows.
pub const MONTH_FIELD: &str = "month";

pub const IMPLICIT_FIELDS: [&str; 3] = [ID_FIELD, CREATED_AT_FIELD, VERSION_FIELD];

#[derive(Clone, Debug)]
pub struct ResolvedField {
    /// API name (camelCase).
    pub name: String,
    /// Column name (snake_case).
    pub column: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub unique: bool,
    pub default: Option<Value>,
    pub trim: bool,
    pub slug_from: Option<String>,
    /// One of `id`, `createdAt`, `version`.
    pub implicit: bool,
}

#[derive(Clone, Debug)]
pub struct HiddenScope {
    pub field: String,
    pub column: String,
    pub when: bool,
}

#[derive(Clone, Debug)]
pub struct RelationSpec {
    pub name: String,
    pub resource: String,
    pub local_field: String,
    pub foreign_field: String,
    pub kind: RelationKind,
    pub select: Vec<String>,
    pub expand: Expand,
    pub on_delete: String,
}

#[derive(Clone, Debug)]
pub struct ParentSpec {
    pub resource: String,
    pub field: String,
}

/// Cached count/average a dependent resource maintains on its parent.
#[derive(Clone, Debug)]
pub struct AggregateSpec {
    pub parent: String,
    /// Field on the dependent resource holding the parent id.
    pub foreign_key: String,
    pub score_field: String,
    pub count_field: String,
    pub average_field: String,
    pub default_average: f64,
    pub precision: Option<u32>,
}

impl AggregateSpec {
    pub fn round(&self, value: f64) -> f64 {
        match self.precision {
            Some(p) => {
                let factor = 10f64.powi(p as i32);
                (value * factor).round() / factor
            }
            None => value,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResolvedResource {
    pub name: String,
    pub schema_name: String,
    pub table_name: String,
    pub fields: Vec<ResolvedField>,
    pub operations: HashSet<Operation>,
    pub unique: Vec<Vec<String>>,
    pub hidden: Option<HiddenScope>,
    pub sensitive_fields: HashSet<String>,
    pub validation: HashMap<String, ValidationRule>,
    pub relations: Vec<RelationSpec>,
    pub parent: Option<ParentSpec>,
    pub owner_field: Option<String>,
    pub aggregate: Option<AggregateSpec>,
    pub aliases: BTreeMap<String, BTreeMap<String, String>>,
    pub stats: Option<StatsConfig>,
    pub monthly_plan: Option<MonthlyPlanConfig>,
    pub computed: Vec<ComputedConfig>,
}

impl ResolvedResource {
    pub fn field(&self, name: &str) -> Option<&ResolvedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn allows(&self, op: Operation) -> bool {
        self.operations.contains(&op)
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.sensitive_fields.contains(name)
    }

    /// Fields a read may return.
    pub fn readable_fields(&self) -> impl Iterator<Item = &ResolvedField> {
        self.fields.iter().filter(|f| !self.sensitive_fields.contains(&f.name))
    }

    /// True when the default scope hides this record.
    pub fn is_hidden(&self, record: &serde_json::Map<String, Value>) -> bool {
        match &self.hidden {
            Some(h) => record.get(&h.field) == Some(&Value::Bool(h.when)),
            None => false,
        }
    }

    /// Add computed values to a record that carries their source field.
    pub fn add_computed(&self, record: &mut serde_json::Map<String, Value>) {
        for c in &self.computed {
            let Some(source) = record.get(&c.from).and_then(Value::as_f64) else {
                continue;
            };
            record.insert(c.name.clone(), Value::from(source / c.divide_by));
        }
    }

    pub fn relation(&self, name: &str) -> Option<&RelationSpec> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Composite and single-field uniqueness sets.
    pub fn unique_sets(&self) -> Vec<Vec<String>> {
        let mut sets: Vec<Vec<String>> = self
            .fields
            .iter()
            .filter(|f| f.unique)
            .map(|f| vec![f.name.clone()])
            .collect();
        sets.extend(self.unique.iter().cloned());
        sets
    }

    fn column_of<'a>(&'a self, name: &'a str) -> &'a str {
        self.field(name).map_or(name, |f| f.column.as_str())
    }

    /// Default PostgreSQL name of the constraint enforcing a uniqueness set.
    pub fn unique_constraint(&self, set: &[String]) -> String {
        let columns: Vec<&str> = set.iter().map(|n| self.column_of(n)).collect();
        format!("{}_{}_key", self.table_name, columns.join("_"))
    }

    /// Default PostgreSQL name of the foreign key on `local_field`.
    pub fn foreign_key_constraint(&self, local_field: &str) -> String {
        format!("{}_{}_fkey", self.table_name, self.column_of(local_field))
    }

    /// API field name(s) behind a constraint of this table, comma-joined for composite keys.
    pub fn constraint_fields(&self, constraint: &str) -> Option<String> {
        if let Some(set) = self.unique_sets().into_iter().find(|s| self.unique_constraint(s) == constraint) {
            return Some(set.join(","));
        }
        self.relations
            .iter()
            .find(|r| self.foreign_key_constraint(&r.local_field) == constraint)
            .map(|r| r.local_field.clone())
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedModel {
    pub resources: Vec<ResolvedResource>,
    pub resource_by_name: HashMap<String, usize>,
}

impl ResolvedModel {
    pub fn resource(&self, name: &str) -> Option<&ResolvedResource> {
        self.resource_by_name.get(name).and_then(|i| self.resources.get(*i))
    }

    /// Dependent resources whose aggregate targets `parent`.
    pub fn dependents_of<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a ResolvedResource> + 'a {
        self.resources
            .iter()
            .filter(move |r| r.aggregate.as_ref().map(|a| a.parent.as_str()) == Some(parent))
    }
}
