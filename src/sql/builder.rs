//! Builds parameterized SELECT, INSERT, UPDATE, DELETE, aggregate and summary statements for a resource.
//! Rows are returned as one `jsonb` column keyed by API field names.

use crate::config::{
    AggregateSpec, FieldKind, MetricConfig, MetricOp, MonthlyPlanConfig, ResolvedField, ResolvedResource, StatsConfig,
    ID_FIELD, MONTH_FIELD, VERSION_FIELD,
};
use crate::query::plan::{Condition, Test};
use crate::query::{QueryPlan, Scalar, Scope};

/// Output column carrying the row object.
pub const ROW_COLUMN: &str = "row";

/// jsonb_build_object takes at most 100 arguments.
const PAIRS_PER_OBJECT: usize = 50;

/// Quote identifier for PostgreSQL (safe: only from config).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(resource: &ResolvedResource) -> String {
    format!("{}.{}", quoted(&resource.schema_name), quoted(&resource.table_name))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    /// Text parameters, each cast in SQL; None binds NULL.
    pub params: Vec<Option<String>>,
}

impl QueryBuf {
    fn new() -> Self {
        Self::default()
    }

    /// Bind a value and return its cast placeholder, e.g. `$2::uuid`.
    fn push_param(&mut self, value: Option<String>, kind: FieldKind) -> String {
        self.params.push(value);
        format!("${}::{}", self.params.len(), kind.pg_type())
    }

    fn push_scalar(&mut self, value: &Scalar, kind: FieldKind) -> String {
        self.push_param(value.to_sql_text(), kind)
    }
}

/// `jsonb_build_object('key', expr, ...)`, chunked and concatenated for wide objects.
fn object_sql(pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return "'{}'::jsonb".into();
    }
    pairs
        .chunks(PAIRS_PER_OBJECT)
        .map(|chunk| {
            let args: Vec<String> = chunk
                .iter()
                .map(|(key, expr)| format!("'{}', {}", key.replace('\'', "''"), expr))
                .collect();
            format!("jsonb_build_object({})", args.join(", "))
        })
        .collect::<Vec<_>>()
        .join(" || ")
}

/// Row object keyed by API field names.
fn row_object(fields: &[&ResolvedField]) -> String {
    let pairs: Vec<(String, String)> = fields.iter().map(|f| (f.name.clone(), quoted(&f.column))).collect();
    object_sql(&pairs)
}

fn column_of(resource: &ResolvedResource, name: &str) -> String {
    quoted(&resource.field(name).map_or_else(|| name.to_string(), |f| f.column.clone()))
}

fn returning(fields: &[&ResolvedField]) -> String {
    format!("{} AS {}", row_object(fields), quoted(ROW_COLUMN))
}

fn hidden_clause(resource: &ResolvedResource, scope: Scope) -> Option<String> {
    match (&resource.hidden, scope) {
        (Some(h), Scope::Default) => Some(format!(
            "({} IS DISTINCT FROM {})",
            quoted(&h.column),
            if h.when { "TRUE" } else { "FALSE" }
        )),
        _ => None,
    }
}

fn condition_sql(q: &mut QueryBuf, cond: &Condition<'_>) -> String {
    let col = quoted(&cond.field.column);
    match &cond.test {
        Test::IsNull => format!("{} IS NULL", col),
        Test::Compare(cmp, value) => {
            let ph = q.push_scalar(value, cond.field.kind);
            format!("{} {} {}", col, cmp.sql(), ph)
        }
        Test::In(items) if items.is_empty() => "1 = 0".into(),
        Test::In(items) => {
            let phs: Vec<String> = items.iter().map(|v| q.push_scalar(v, cond.field.kind)).collect();
            format!("{} IN ({})", col, phs.join(", "))
        }
    }
}

fn where_clause(q: &mut QueryBuf, resource: &ResolvedResource, conditions: &[Condition<'_>], scope: Scope) -> String {
    let mut parts: Vec<String> = conditions.iter().map(|c| condition_sql(q, c)).collect();
    parts.extend(hidden_clause(resource, scope));
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

fn id_kind(resource: &ResolvedResource) -> FieldKind {
    resource.field(ID_FIELD).map(|f| f.kind).unwrap_or(FieldKind::Id)
}

/// `WHERE "id" = $n::uuid` plus the scope predicate.
fn where_id(q: &mut QueryBuf, resource: &ResolvedResource, id: &str, scope: Scope) -> String {
    let ph = q.push_param(Some(id.to_string()), id_kind(resource));
    let mut clause = format!(" WHERE {} = {}", quoted(ID_FIELD), ph);
    if let Some(h) = hidden_clause(resource, scope) {
        clause.push_str(" AND ");
        clause.push_str(&h);
    }
    clause
}

/// SELECT for an executed retrieval plan: WHERE, ORDER BY, LIMIT, OFFSET.
pub fn select(plan: &QueryPlan<'_>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, plan.resource, &plan.conditions, plan.scope);
    let order: Vec<String> = plan
        .order
        .iter()
        .map(|(f, desc)| format!("{} {}", quoted(&f.column), if *desc { "DESC" } else { "ASC" }))
        .collect();
    let order_sql = if order.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", order.join(", "))
    };
    let limit_sql = plan.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_sql = if plan.skip > 0 {
        format!(" OFFSET {}", plan.skip)
    } else {
        String::new()
    };
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}{}",
        returning(&plan.fields),
        qualified_table(plan.resource),
        where_sql,
        order_sql,
        limit_sql,
        offset_sql
    );
    q
}

pub fn count(resource: &ResolvedResource, conditions: &[Condition<'_>], scope: Scope) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, resource, conditions, scope);
    q.sql = format!("SELECT COUNT(*)::bigint FROM {}{}", qualified_table(resource), where_sql);
    q
}

/// SELECT by primary key.
pub fn select_by_id(resource: &ResolvedResource, fields: &[&ResolvedField], id: &str, scope: Scope) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_id(&mut q, resource, id, scope);
    q.sql = format!("SELECT {} FROM {}{}", returning(fields), qualified_table(resource), where_sql);
    q
}

/// INSERT the supplied columns; omitted columns take their DB default.
pub fn insert(resource: &ResolvedResource, values: &[(&ResolvedField, Scalar)], fields: &[&ResolvedField]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(resource);
    if values.is_empty() {
        q.sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, returning(fields));
        return q;
    }
    let mut cols = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());
    for (f, v) in values {
        cols.push(quoted(&f.column));
        placeholders.push(q.push_scalar(v, f.kind));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        table,
        cols.join(", "),
        placeholders.join(", "),
        returning(fields)
    );
    q
}

/// UPDATE by id: SET the supplied columns and bump `version`.
pub fn update(
    resource: &ResolvedResource,
    id: &str,
    values: &[(&ResolvedField, Scalar)],
    fields: &[&ResolvedField],
    scope: Scope,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets: Vec<String> = values
        .iter()
        .map(|(f, v)| {
            let ph = q.push_scalar(v, f.kind);
            format!("{} = {}", quoted(&f.column), ph)
        })
        .collect();
    let version = quoted(VERSION_FIELD);
    sets.push(format!("{} = {} + 1", version, version));
    let where_sql = where_id(&mut q, resource, id, scope);
    q.sql = format!(
        "UPDATE {} SET {}{} RETURNING {}",
        qualified_table(resource),
        sets.join(", "),
        where_sql,
        returning(fields)
    );
    q
}

/// DELETE by id, returning the removed row.
pub fn delete(resource: &ResolvedResource, id: &str, fields: &[&ResolvedField], scope: Scope) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_id(&mut q, resource, id, scope);
    q.sql = format!("DELETE FROM {}{} RETURNING {}", qualified_table(resource), where_sql, returning(fields));
    q
}

/// Count and average of the score over one parent's dependents. No scope: every dependent counts.
pub fn aggregate(dependent: &ResolvedResource, spec: &AggregateSpec, parent_id: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let column = |name: &str| dependent.field(name).map(|f| f.column.clone()).unwrap_or_else(|| name.to_string());
    let ph = q.push_param(Some(parent_id.to_string()), FieldKind::Id);
    q.sql = format!(
        "SELECT COUNT(*)::bigint AS \"count\", AVG({})::float8 AS \"average\" FROM {} WHERE {} = {}",
        quoted(&column(&spec.score_field)),
        qualified_table(dependent),
        quoted(&column(&spec.foreign_key)),
        ph
    );
    q
}

/// Overwrite the parent's cached aggregate. Ignores the hidden scope and leaves `version` alone.
pub fn write_aggregate(parent: &ResolvedResource, spec: &AggregateSpec, parent_id: &str, count: u64, average: f64) -> QueryBuf {
    let mut q = QueryBuf::new();
    let (count_col, count_kind) = parent
        .field(&spec.count_field)
        .map(|f| (f.column.clone(), f.kind))
        .unwrap_or_else(|| (spec.count_field.clone(), FieldKind::Integer));
    let (avg_col, avg_kind) = parent
        .field(&spec.average_field)
        .map(|f| (f.column.clone(), f.kind))
        .unwrap_or_else(|| (spec.average_field.clone(), FieldKind::Number));
    let count_ph = q.push_param(Some(count.to_string()), count_kind);
    let avg_ph = q.push_param(Some(average.to_string()), avg_kind);
    let id_ph = q.push_param(Some(parent_id.to_string()), id_kind(parent));
    q.sql = format!(
        "UPDATE {} SET {} = {}, {} = {} WHERE {} = {}",
        qualified_table(parent),
        quoted(&count_col),
        count_ph,
        quoted(&avg_col),
        avg_ph,
        quoted(ID_FIELD),
        id_ph
    );
    q
}

fn group_key_sql(resource: &ResolvedResource, stats: &StatsConfig) -> String {
    let column = column_of(resource, &stats.group_by);
    if stats.upper_case {
        format!("upper({})", column)
    } else {
        column
    }
}

fn metric_sql(resource: &ResolvedResource, metric: &MetricConfig) -> String {
    match &metric.field {
        None => "COUNT(*)".into(),
        Some(f) => {
            let expr = format!("{}({})", metric.op.sql(), column_of(resource, f));
            match metric.op {
                MetricOp::Avg => format!("{}::float8", expr),
                _ => expr,
            }
        }
    }
}

/// One row per group: the group key plus each metric. Ordered by the sort metric, then the key.
pub fn group_stats(
    resource: &ResolvedResource,
    stats: &StatsConfig,
    conditions: &[Condition<'_>],
    scope: Scope,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, resource, conditions, scope);
    let key = group_key_sql(resource, stats);
    let mut pairs = vec![(stats.group_by.clone(), key.clone())];
    pairs.extend(stats.metrics.iter().map(|m| (m.name.clone(), metric_sql(resource, m))));

    let mut order = Vec::new();
    if let Some((name, descending)) = stats.sort_key() {
        if let Some(metric) = stats.metrics.iter().find(|m| m.name == name) {
            order.push(format!(
                "{} {} NULLS LAST",
                metric_sql(resource, metric),
                if descending { "DESC" } else { "ASC" }
            ));
        }
    }
    order.push(format!("{} ASC", key));
    q.sql = format!(
        "SELECT {} AS {} FROM {}{} GROUP BY {} ORDER BY {}",
        object_sql(&pairs),
        quoted(ROW_COLUMN),
        qualified_table(resource),
        where_sql,
        key,
        order.join(", ")
    );
    q
}

/// Unnest the date array, keep starts inside `year` (UTC), count and list labels per month, latest first.
pub fn monthly_plan(resource: &ResolvedResource, plan: &MonthlyPlanConfig, year: i32, scope: Scope) -> QueryBuf {
    let mut q = QueryBuf::new();
    let from = q.push_param(Some(format!("{:04}-01-01T00:00:00Z", year)), FieldKind::Date);
    let to = q.push_param(Some(format!("{:04}-01-01T00:00:00Z", year + 1)), FieldKind::Date);
    let where_sql = where_clause(&mut q, resource, &[], scope);
    let dates = column_of(resource, &plan.date_field);
    let starts = format!(
        "SELECT d.\"value\"::timestamptz AS \"start\", {} AS \"label\" FROM {} \
         CROSS JOIN LATERAL jsonb_array_elements_text(\
         CASE WHEN jsonb_typeof({}) = 'array' THEN {} ELSE '[]'::jsonb END) AS d(\"value\"){}",
        column_of(resource, &plan.label_field),
        qualified_table(resource),
        dates,
        dates,
        where_sql
    );
    let pairs = vec![
        (MONTH_FIELD.to_string(), quoted(MONTH_FIELD)),
        (plan.count_as.clone(), "COUNT(*)".to_string()),
        (plan.labels_as.clone(), "jsonb_agg(\"label\" ORDER BY \"label\")".to_string()),
    ];
    q.sql = format!(
        "SELECT {} AS {} FROM (\
         SELECT EXTRACT(MONTH FROM s.\"start\" AT TIME ZONE 'UTC')::int AS {}, s.\"label\" FROM ({}) s \
         WHERE s.\"start\" >= {} AND s.\"start\" < {}) m \
         GROUP BY {} ORDER BY {} DESC LIMIT {}",
        object_sql(&pairs),
        quoted(ROW_COLUMN),
        quoted(MONTH_FIELD),
        starts,
        from,
        to,
        quoted(MONTH_FIELD),
        quoted(MONTH_FIELD),
        plan.limit
    );
    q
}
