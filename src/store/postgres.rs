//! Resource store over PostgreSQL.

use super::{lookup, AggregateStats, Record, ResourceStore};
use crate::config::{
    AggregateSpec, FieldKind, MonthlyPlanConfig, ResolvedField, ResolvedModel, ResolvedResource, StatsConfig,
};
use crate::error::AppError;
use crate::query::plan::{resolve_conditions, resolve_projection};
use crate::query::{Predicate, Projection, QueryPlan, RetrievalRequest, Scalar, Scope};
use crate::sql::{self, QueryBuf, ROW_COLUMN};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use std::sync::Arc;
use uuid::Uuid;

pub struct PgStore {
    pool: PgPool,
    model: Arc<ResolvedModel>,
}

impl PgStore {
    pub fn new(pool: PgPool, model: Arc<ResolvedModel>) -> Self {
        PgStore { pool, model }
    }

    async fn fetch_rows(&self, resource: &ResolvedResource, q: &QueryBuf) -> Result<Vec<Record>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = bind_all(&q.sql, &q.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| api_error(resource, e))?;
        rows.iter().map(row_to_record).collect()
    }

    async fn fetch_row(&self, resource: &ResolvedResource, q: &QueryBuf) -> Result<Option<Record>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = bind_all(&q.sql, &q.params)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| api_error(resource, e))?;
        row.as_ref().map(row_to_record).transpose()
    }
}

fn bind_all<'q>(sql: &'q str, params: &'q [Option<String>]) -> Query<'q, Postgres, PgArguments> {
    params.iter().fold(sqlx::query(sql), |query, p| query.bind(p.as_deref()))
}

fn row_to_record(row: &PgRow) -> Result<Record, AppError> {
    match row.try_get::<Value, _>(ROW_COLUMN)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::Internal(format!("expected row object, got {}", other))),
    }
}

/// Classify a database error and report column and constraint failures under the API field name.
fn api_error(resource: &ResolvedResource, err: sqlx::Error) -> AppError {
    match AppError::from(err) {
        AppError::Validation { field: Some(name), message } => {
            let field = resource
                .fields
                .iter()
                .find(|f| f.column == name)
                .map(|f| f.name.clone())
                .or_else(|| resource.constraint_fields(&name))
                .unwrap_or(name);
            AppError::Validation {
                field: Some(field),
                message,
            }
        }
        other => other,
    }
}

fn check_id(id: &str) -> Result<String, AppError> {
    Uuid::parse_str(id.trim())
        .map(|u| u.to_string())
        .map_err(|_| AppError::MalformedQuery(format!("Invalid id: {}", id)))
}

/// Cast a write body to typed column values; unknown and server-assigned fields are skipped.
fn column_values<'r>(resource: &'r ResolvedResource, body: &Record) -> Result<Vec<(&'r ResolvedField, Scalar)>, AppError> {
    resource
        .fields
        .iter()
        .filter(|f| !f.implicit)
        .filter_map(|f| body.get(&f.name).map(|v| (f, v)))
        .map(|(f, v)| {
            let value = if f.kind == FieldKind::Json && !v.is_null() {
                Scalar::Json(v.clone())
            } else {
                Scalar::parse(f.kind, v).map_err(|e| AppError::invalid(f.name.clone(), e))?
            };
            Ok((f, value))
        })
        .collect()
}

#[async_trait]
impl ResourceStore for PgStore {
    async fn find(&self, request: &RetrievalRequest) -> Result<Vec<Record>, AppError> {
        let resource = lookup(&self.model, &request.resource)?;
        let plan = QueryPlan::build(resource, request)?;
        self.fetch_rows(resource, &sql::select(&plan)).await
    }

    async fn count(&self, resource: &str, predicates: &[Predicate], scope: Scope) -> Result<u64, AppError> {
        let resource = lookup(&self.model, resource)?;
        let conditions = resolve_conditions(resource, predicates)?;
        let q = sql::count(resource, &conditions, scope);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let n: i64 = bind_all(&q.sql, &q.params)
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get(0))
            .map_err(|e| api_error(resource, e))?;
        Ok(n.max(0) as u64)
    }

    async fn find_by_id(&self, resource: &str, id: &str, scope: Scope) -> Result<Option<Record>, AppError> {
        let resource = lookup(&self.model, resource)?;
        let id = check_id(id)?;
        let fields = resolve_projection(resource, &Projection::Default)?;
        self.fetch_row(resource, &sql::select_by_id(resource, &fields, &id, scope)).await
    }

    async fn insert(&self, resource: &str, body: &Record) -> Result<Record, AppError> {
        let resource = lookup(&self.model, resource)?;
        let values = column_values(resource, body)?;
        let fields = resolve_projection(resource, &Projection::Default)?;
        self.fetch_row(resource, &sql::insert(resource, &values, &fields))
            .await?
            .ok_or_else(|| AppError::Internal("insert returned no row".into()))
    }

    async fn update_by_id(
        &self,
        resource: &str,
        id: &str,
        changes: &Record,
        scope: Scope,
    ) -> Result<Option<Record>, AppError> {
        let resource = lookup(&self.model, resource)?;
        let id = check_id(id)?;
        let values = column_values(resource, changes)?;
        let fields = resolve_projection(resource, &Projection::Default)?;
        self.fetch_row(resource, &sql::update(resource, &id, &values, &fields, scope)).await
    }

    async fn delete_by_id(&self, resource: &str, id: &str, scope: Scope) -> Result<Option<Record>, AppError> {
        let resource = lookup(&self.model, resource)?;
        let id = check_id(id)?;
        let fields = resolve_projection(resource, &Projection::Default)?;
        self.fetch_row(resource, &sql::delete(resource, &id, &fields, scope)).await
    }

    async fn aggregate_by_parent(
        &self,
        dependent: &str,
        spec: &AggregateSpec,
        parent_id: &str,
    ) -> Result<AggregateStats, AppError> {
        let resource = lookup(&self.model, dependent)?;
        let parent_id = check_id(parent_id)?;
        let q = sql::aggregate(resource, spec, &parent_id);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = bind_all(&q.sql, &q.params)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| api_error(resource, e))?;
        let count: i64 = row.try_get("count")?;
        let average: Option<f64> = row.try_get("average")?;
        Ok(AggregateStats {
            count: count.max(0) as u64,
            average,
        })
    }

    async fn write_aggregate(
        &self,
        spec: &AggregateSpec,
        parent_id: &str,
        count: u64,
        average: f64,
    ) -> Result<bool, AppError> {
        let parent = lookup(&self.model, &spec.parent)?;
        let parent_id = check_id(parent_id)?;
        let q = sql::write_aggregate(parent, spec, &parent_id, count, average);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let result = bind_all(&q.sql, &q.params)
            .execute(&self.pool)
            .await
            .map_err(|e| api_error(parent, e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn group_stats(
        &self,
        resource: &str,
        stats: &StatsConfig,
        predicates: &[Predicate],
        scope: Scope,
    ) -> Result<Vec<Record>, AppError> {
        let resource = lookup(&self.model, resource)?;
        let conditions = resolve_conditions(resource, predicates)?;
        self.fetch_rows(resource, &sql::group_stats(resource, stats, &conditions, scope)).await
    }

    async fn monthly_plan(
        &self,
        resource: &str,
        plan: &MonthlyPlanConfig,
        year: i32,
        scope: Scope,
    ) -> Result<Vec<Record>, AppError> {
        let resource = lookup(&self.model, resource)?;
        self.fetch_rows(resource, &sql::monthly_plan(resource, plan, year, scope)).await
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
