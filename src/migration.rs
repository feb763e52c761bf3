//! Apply the resolved model to the database: schema, tables, parent indexes, and foreign keys.

use crate::config::{
    FieldKind, RelationKind, ResolvedField, ResolvedModel, ResolvedResource, CREATED_AT_FIELD, ID_FIELD, VERSION_FIELD,
};
use crate::error::AppError;
use crate::sql::{qualified_table, quoted};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::BTreeSet;

/// Create everything the model needs. Idempotent: tables and indexes use `IF NOT EXISTS`,
/// foreign keys that already exist are skipped.
pub async fn apply_migrations(pool: &PgPool, model: &ResolvedModel) -> Result<(), AppError> {
    for sql in ddl_statements(model) {
        tracing::debug!(sql = %sql, "migration");
        sqlx::query(&sql).execute(pool).await?;
    }
    for sql in foreign_key_statements(model) {
        if let Err(e) = sqlx::query(&sql).execute(pool).await {
            tracing::debug!(sql = %sql, error = %e, "foreign key not added");
        }
    }
    tracing::info!(resources = model.resources.len(), "migrations applied");
    Ok(())
}

/// Schemas, tables and parent indexes, in dependency order.
pub fn ddl_statements(model: &ResolvedModel) -> Vec<String> {
    let schemas: BTreeSet<&str> = model.resources.iter().map(|r| r.schema_name.as_str()).collect();
    let mut out: Vec<String> = schemas
        .into_iter()
        .map(|s| format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(s)))
        .collect();
    for r in &model.resources {
        out.push(create_table(r));
        if let Some(parent) = &r.parent {
            if let Some(f) = r.field(&parent.field) {
                out.push(format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    quoted(&format!("{}_{}_idx", r.table_name, f.column)),
                    qualified_table(r),
                    quoted(&f.column)
                ));
            }
        }
    }
    out
}

/// One `ALTER TABLE ... ADD CONSTRAINT` per `one` relation.
pub fn foreign_key_statements(model: &ResolvedModel) -> Vec<String> {
    let mut out = Vec::new();
    for r in &model.resources {
        for rel in r.relations.iter().filter(|rel| rel.kind == RelationKind::One) {
            let (Some(local), Some(target)) = (r.field(&rel.local_field), model.resource(&rel.resource)) else {
                continue;
            };
            let Some(foreign) = target.field(&rel.foreign_field) else {
                continue;
            };
            out.push(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
                qualified_table(r),
                quoted(&r.foreign_key_constraint(&local.name)),
                quoted(&local.column),
                qualified_table(target),
                quoted(&foreign.column),
                referential_action(&rel.on_delete)
            ));
        }
    }
    out
}

fn referential_action(raw: &str) -> &'static str {
    match raw.trim().to_ascii_uppercase().as_str() {
        "CASCADE" => "CASCADE",
        "SET NULL" => "SET NULL",
        "RESTRICT" => "RESTRICT",
        _ => "NO ACTION",
    }
}

fn create_table(r: &ResolvedResource) -> String {
    let mut defs: Vec<String> = r.fields.iter().map(column_def).collect();
    defs.push(format!("PRIMARY KEY ({})", quoted("id")));
    for set in &r.unique {
        let cols: Vec<String> = set
            .iter()
            .filter_map(|name| r.field(name))
            .map(|f| quoted(&f.column))
            .collect();
        defs.push(format!("UNIQUE ({})", cols.join(", ")));
    }
    format!("CREATE TABLE IF NOT EXISTS {} (\n  {}\n)", qualified_table(r), defs.join(",\n  "))
}

fn column_def(f: &ResolvedField) -> String {
    let mut def = format!("{} {}", quoted(&f.column), f.kind.pg_type());
    if !f.nullable {
        def.push_str(" NOT NULL");
    }
    let default = match f.name.as_str() {
        ID_FIELD => Some("gen_random_uuid()".to_string()),
        CREATED_AT_FIELD => Some("now()".to_string()),
        VERSION_FIELD => Some("0".to_string()),
        _ => f.default.as_ref().and_then(|d| default_literal(f.kind, d)),
    };
    if let Some(d) = default {
        def.push_str(" DEFAULT ");
        def.push_str(&d);
    }
    if f.unique {
        def.push_str(" UNIQUE");
    }
    def
}

fn string_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// SQL literal for a catalog default, cast to the column type.
fn default_literal(kind: FieldKind, value: &Value) -> Option<String> {
    match (kind, value) {
        (_, Value::Null) => None,
        (FieldKind::Json, v) => Some(format!("{}::jsonb", string_literal(&v.to_string()))),
        (FieldKind::Boolean, Value::Bool(b)) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        (FieldKind::Number | FieldKind::Integer, Value::Number(n)) => Some(n.to_string()),
        (_, Value::String(s)) => Some(format!("{}::{}", string_literal(s), kind.pg_type())),
        (_, other) => Some(format!("{}::{}", string_literal(&other.to_string()), kind.pg_type())),
    }
}
