//! Process-local store with the same semantics as the Postgres one.

use super::{lookup, AggregateStats, Record, ResourceStore};
use crate::config::{
    AggregateSpec, FieldKind, MetricConfig, MetricOp, MonthlyPlanConfig, RelationKind, ResolvedField, ResolvedModel,
    ResolvedResource, StatsConfig, CREATED_AT_FIELD, ID_FIELD, MONTH_FIELD, VERSION_FIELD,
};
use crate::error::AppError;
use crate::query::plan::{self, admits, resolve_conditions, resolve_projection};
use crate::query::{Predicate, Projection, QueryPlan, RetrievalRequest, Scalar, Scope};
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

type Tables = HashMap<String, Vec<Record>>;

pub struct MemoryStore {
    model: Arc<ResolvedModel>,
    tables: RwLock<Tables>,
}

#[derive(Default)]
struct DeletePlan {
    deletes: Vec<(String, String)>,
    nulls: Vec<(String, String, String)>,
}

impl MemoryStore {
    pub fn new(model: Arc<ResolvedModel>) -> Self {
        MemoryStore {
            model,
            tables: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, AppError> {
        self.tables
            .read()
            .map_err(|_| AppError::Internal("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, AppError> {
        self.tables
            .write()
            .map_err(|_| AppError::Internal("memory store lock poisoned".into()))
    }

    /// Validate the constraints a table declares: not-null, uniqueness, foreign keys.
    fn check_constraints(
        &self,
        tables: &Tables,
        resource: &ResolvedResource,
        record: &Record,
    ) -> Result<(), AppError> {
        for f in &resource.fields {
            if !f.nullable && record.get(&f.name).map_or(true, Value::is_null) {
                return Err(AppError::Validation {
                    field: Some(f.name.clone()),
                    message: format!("{} is required", f.name),
                });
            }
        }

        let id = record.get(ID_FIELD);
        let rows = tables.get(&resource.name).map(Vec::as_slice).unwrap_or_default();
        for set in resource.unique_sets() {
            let values: Vec<&Value> = set.iter().filter_map(|f| record.get(f)).collect();
            if values.len() != set.len() || values.iter().any(|v| v.is_null()) {
                continue;
            }
            let clash = rows
                .iter()
                .filter(|r| r.get(ID_FIELD) != id)
                .any(|r| set.iter().zip(&values).all(|(f, v)| r.get(f) == Some(*v)));
            if clash {
                return Err(AppError::Validation {
                    message: format!(
                        "duplicate value: duplicate key value violates unique constraint \"{}\"",
                        resource.unique_constraint(&set)
                    ),
                    field: Some(set.join(",")),
                });
            }
        }

        for rel in resource.relations.iter().filter(|r| r.kind == RelationKind::One) {
            let Some(key) = record.get(&rel.local_field).filter(|v| !v.is_null()) else {
                continue;
            };
            let exists = tables
                .get(&rel.resource)
                .is_some_and(|rows| rows.iter().any(|r| r.get(&rel.foreign_field) == Some(key)));
            if !exists {
                return Err(foreign_key_violation(resource, &rel.local_field, "insert or update on"));
            }
        }
        Ok(())
    }

    fn plan_delete(
        &self,
        tables: &Tables,
        resource: &ResolvedResource,
        record: &Record,
        plan: &mut DeletePlan,
    ) -> Result<(), AppError> {
        for other in &self.model.resources {
            for rel in other
                .relations
                .iter()
                .filter(|r| r.kind == RelationKind::One && r.resource == resource.name)
            {
                let Some(key) = record.get(&rel.foreign_field).filter(|v| !v.is_null()) else {
                    continue;
                };
                let Some(rows) = tables.get(&other.name) else {
                    continue;
                };
                for row in rows.iter().filter(|r| r.get(&rel.local_field) == Some(key)) {
                    let row_id = record_id(row);
                    match rel.on_delete.to_ascii_uppercase().as_str() {
                        "CASCADE" => {
                            let entry = (other.name.clone(), row_id);
                            if !plan.deletes.contains(&entry) {
                                plan.deletes.push(entry);
                                self.plan_delete(tables, other, row, plan)?;
                            }
                        }
                        "SET NULL" => plan.nulls.push((other.name.clone(), row_id, rel.local_field.clone())),
                        _ => return Err(foreign_key_violation(other, &rel.local_field, "update or delete on")),
                    }
                }
            }
        }
        Ok(())
    }
}

fn record_id(record: &Record) -> String {
    record.get(ID_FIELD).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn foreign_key_violation(resource: &ResolvedResource, local_field: &str, action: &str) -> AppError {
    AppError::Validation {
        message: format!(
            "{} table \"{}\" violates foreign key constraint \"{}\"",
            action,
            resource.table_name,
            resource.foreign_key_constraint(local_field)
        ),
        field: Some(local_field.to_string()),
    }
}

fn parse_id(id: &str) -> Result<Value, AppError> {
    Uuid::parse_str(id.trim())
        .map(|u| Value::String(u.to_string()))
        .map_err(|_| AppError::MalformedQuery(format!("Invalid id: {}", id)))
}

/// Canonical stored form of a written value.
fn normalize(field: &ResolvedField, value: &Value) -> Result<Value, AppError> {
    if field.kind == FieldKind::Json {
        return Ok(value.clone());
    }
    Scalar::parse(field.kind, value)
        .map(|s| s.to_json())
        .map_err(|e| AppError::invalid(field.name.clone(), e))
}

fn position(rows: &[Record], resource: &ResolvedResource, id: &Value, scope: Scope) -> Option<usize> {
    rows.iter()
        .position(|r| r.get(ID_FIELD) == Some(id) && admits(resource, scope, &[], r))
}

fn default_fields(resource: &ResolvedResource) -> Result<Vec<&ResolvedField>, AppError> {
    resolve_projection(resource, &Projection::Default)
}

fn stored(field: &ResolvedField, record: &Record) -> Scalar {
    record
        .get(&field.name)
        .map(|v| Scalar::parse(field.kind, v).unwrap_or(Scalar::Null))
        .unwrap_or(Scalar::Null)
}

fn number(value: &Scalar) -> Option<f64> {
    match value {
        Scalar::Number(n) => Some(*n),
        Scalar::Integer(i) => Some(*i as f64),
        _ => None,
    }
}

/// SQL ordering: nulls sort after every value in either direction.
fn nulls_last(a: &Scalar, b: &Scalar, descending: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ord = a.compare(b).unwrap_or(Ordering::Equal);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        }
    }
}

/// SQL aggregate semantics: nulls are skipped, and an all-null group yields null except for counts.
fn metric(resource: &ResolvedResource, m: &MetricConfig, members: &[&Record]) -> Scalar {
    let Some(field) = m.field.as_deref().and_then(|f| resource.field(f)) else {
        return Scalar::Integer(members.len() as i64);
    };
    let values: Vec<Scalar> = members
        .iter()
        .map(|r| stored(field, r))
        .filter(|v| !v.is_null())
        .collect();
    if m.op == MetricOp::Count {
        return Scalar::Integer(values.len() as i64);
    }
    if values.is_empty() {
        return Scalar::Null;
    }
    match m.op {
        MetricOp::Sum if field.kind == FieldKind::Integer => Scalar::Integer(
            values
                .iter()
                .filter_map(|v| match v {
                    Scalar::Integer(i) => Some(*i),
                    _ => None,
                })
                .sum(),
        ),
        MetricOp::Sum => Scalar::Number(values.iter().filter_map(number).sum()),
        MetricOp::Avg => Scalar::Number(values.iter().filter_map(number).sum::<f64>() / values.len() as f64),
        MetricOp::Min => values
            .into_iter()
            .min_by(|a, b| a.compare(b).unwrap_or(Ordering::Equal))
            .unwrap_or(Scalar::Null),
        MetricOp::Max => values
            .into_iter()
            .max_by(|a, b| a.compare(b).unwrap_or(Ordering::Equal))
            .unwrap_or(Scalar::Null),
        MetricOp::Count => Scalar::Null,
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn find(&self, request: &RetrievalRequest) -> Result<Vec<Record>, AppError> {
        tokio::task::yield_now().await;
        let resource = lookup(&self.model, &request.resource)?;
        let query_plan = QueryPlan::build(resource, request)?;
        let tables = self.read()?;
        let mut rows: Vec<&Record> = tables
            .get(&resource.name)
            .map(|rows| rows.iter().filter(|r| query_plan.admits(r)).collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| query_plan.compare(a, b));
        let skip = usize::try_from(query_plan.skip).unwrap_or(usize::MAX);
        let take = query_plan.limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        let out: Vec<Record> = rows
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|r| plan::project(r, &query_plan.fields))
            .collect();
        tracing::debug!(resource = %resource.name, rows = out.len(), "memory find");
        Ok(out)
    }

    async fn count(&self, resource: &str, predicates: &[Predicate], scope: Scope) -> Result<u64, AppError> {
        tokio::task::yield_now().await;
        let resource = lookup(&self.model, resource)?;
        let conditions = resolve_conditions(resource, predicates)?;
        let tables = self.read()?;
        let n = tables
            .get(&resource.name)
            .map(|rows| rows.iter().filter(|r| admits(resource, scope, &conditions, r)).count())
            .unwrap_or(0);
        Ok(n as u64)
    }

    async fn find_by_id(&self, resource: &str, id: &str, scope: Scope) -> Result<Option<Record>, AppError> {
        tokio::task::yield_now().await;
        let resource = lookup(&self.model, resource)?;
        let id = parse_id(id)?;
        let fields = default_fields(resource)?;
        let tables = self.read()?;
        let rows = tables.get(&resource.name).map(Vec::as_slice).unwrap_or_default();
        Ok(position(rows, resource, &id, scope).map(|i| plan::project(&rows[i], &fields)))
    }

    async fn insert(&self, resource: &str, body: &Record) -> Result<Record, AppError> {
        tokio::task::yield_now().await;
        let resource = lookup(&self.model, resource)?;
        let mut record = Record::new();
        record.insert(ID_FIELD.into(), Value::String(Uuid::new_v4().to_string()));
        record.insert(CREATED_AT_FIELD.into(), Scalar::Date(Utc::now()).to_json());
        record.insert(VERSION_FIELD.into(), Value::from(0));
        for f in resource.fields.iter().filter(|f| !f.implicit) {
            let raw = match body.get(&f.name) {
                Some(v) => v.clone(),
                None => f.default.clone().unwrap_or(Value::Null),
            };
            record.insert(f.name.clone(), normalize(f, &raw)?);
        }
        let fields = default_fields(resource)?;
        let mut tables = self.write()?;
        self.check_constraints(&tables, resource, &record)?;
        let out = plan::project(&record, &fields);
        tables.entry(resource.name.clone()).or_default().push(record);
        Ok(out)
    }

    async fn update_by_id(
        &self,
        resource: &str,
        id: &str,
        changes: &Record,
        scope: Scope,
    ) -> Result<Option<Record>, AppError> {
        tokio::task::yield_now().await;
        let resource = lookup(&self.model, resource)?;
        let id = parse_id(id)?;
        let fields = default_fields(resource)?;
        let mut tables = self.write()?;
        let rows = tables.get(&resource.name).map(Vec::as_slice).unwrap_or_default();
        let Some(index) = position(rows, resource, &id, scope) else {
            return Ok(None);
        };
        let mut updated = rows[index].clone();
        for (name, value) in changes {
            let Some(f) = resource.field(name).filter(|f| !f.implicit) else {
                continue;
            };
            updated.insert(f.name.clone(), normalize(f, value)?);
        }
        let version = updated.get(VERSION_FIELD).and_then(Value::as_i64).unwrap_or(0);
        updated.insert(VERSION_FIELD.into(), Value::from(version + 1));
        self.check_constraints(&tables, resource, &updated)?;
        let out = plan::project(&updated, &fields);
        if let Some(rows) = tables.get_mut(&resource.name) {
            rows[index] = updated;
        }
        Ok(Some(out))
    }

    async fn delete_by_id(&self, resource: &str, id: &str, scope: Scope) -> Result<Option<Record>, AppError> {
        tokio::task::yield_now().await;
        let resource = lookup(&self.model, resource)?;
        let id = parse_id(id)?;
        let fields = default_fields(resource)?;
        let mut tables = self.write()?;
        let rows = tables.get(&resource.name).map(Vec::as_slice).unwrap_or_default();
        let Some(index) = position(rows, resource, &id, scope) else {
            return Ok(None);
        };
        let record = rows[index].clone();
        let mut cascade = DeletePlan::default();
        self.plan_delete(&tables, resource, &record, &mut cascade)?;

        if let Some(rows) = tables.get_mut(&resource.name) {
            rows.retain(|r| r.get(ID_FIELD) != Some(&id));
        }
        for (name, row_id) in &cascade.deletes {
            if let Some(rows) = tables.get_mut(name) {
                rows.retain(|r| record_id(r) != *row_id);
            }
        }
        for (name, row_id, field) in &cascade.nulls {
            if let Some(row) = tables.get_mut(name).and_then(|rows| rows.iter_mut().find(|r| record_id(r) == *row_id)) {
                row.insert(field.clone(), Value::Null);
            }
        }
        if !cascade.deletes.is_empty() {
            tracing::debug!(resource = %resource.name, cascaded = cascade.deletes.len(), "memory cascade delete");
        }
        Ok(Some(plan::project(&record, &fields)))
    }

    async fn aggregate_by_parent(
        &self,
        dependent: &str,
        spec: &AggregateSpec,
        parent_id: &str,
    ) -> Result<AggregateStats, AppError> {
        tokio::task::yield_now().await;
        let resource = lookup(&self.model, dependent)?;
        let parent_id = parse_id(parent_id)?;
        let tables = self.read()?;
        let rows = tables.get(&resource.name).map(Vec::as_slice).unwrap_or_default();
        let group: Vec<&Record> = rows
            .iter()
            .filter(|r| r.get(&spec.foreign_key) == Some(&parent_id))
            .collect();
        let scores: Vec<f64> = group
            .iter()
            .filter_map(|r| r.get(&spec.score_field).and_then(Value::as_f64))
            .collect();
        let average = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        };
        Ok(AggregateStats {
            count: group.len() as u64,
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
        tokio::task::yield_now().await;
        let parent = lookup(&self.model, &spec.parent)?;
        let parent_id = parse_id(parent_id)?;
        let count_value = match parent.field(&spec.count_field) {
            Some(f) => normalize(f, &Value::from(count))?,
            None => Value::from(count),
        };
        let average_value = match parent.field(&spec.average_field) {
            Some(f) => normalize(f, &Value::from(average))?,
            None => Value::from(average),
        };
        let mut tables = self.write()?;
        let Some(row) = tables
            .get_mut(&parent.name)
            .and_then(|rows| rows.iter_mut().find(|r| r.get(ID_FIELD) == Some(&parent_id)))
        else {
            return Ok(false);
        };
        row.insert(spec.count_field.clone(), count_value);
        row.insert(spec.average_field.clone(), average_value);
        Ok(true)
    }

    async fn group_stats(
        &self,
        resource: &str,
        stats: &StatsConfig,
        predicates: &[Predicate],
        scope: Scope,
    ) -> Result<Vec<Record>, AppError> {
        tokio::task::yield_now().await;
        let resource = lookup(&self.model, resource)?;
        let conditions = resolve_conditions(resource, predicates)?;
        let key_field = resource
            .field(&stats.group_by)
            .ok_or_else(|| AppError::Internal(format!("unknown group field {}", stats.group_by)))?;
        let tables = self.read()?;
        let rows = tables.get(&resource.name).map(Vec::as_slice).unwrap_or_default();

        let mut groups: Vec<(Scalar, Vec<&Record>)> = Vec::new();
        for row in rows.iter().filter(|r| admits(resource, scope, &conditions, r)) {
            let key = match stored(key_field, row) {
                Scalar::Text(s) if stats.upper_case => Scalar::Text(s.to_uppercase()),
                other => other,
            };
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(row),
                None => groups.push((key, vec![row])),
            }
        }

        let mut summaries: Vec<(Scalar, Vec<Scalar>)> = groups
            .into_iter()
            .map(|(key, members)| {
                let values = stats.metrics.iter().map(|m| metric(resource, m, &members)).collect();
                (key, values)
            })
            .collect();
        let sort = stats
            .sort_key()
            .and_then(|(name, desc)| stats.metrics.iter().position(|m| m.name == name).map(|i| (i, desc)));
        summaries.sort_by(|(ka, va), (kb, vb)| {
            let by_metric = sort.map_or(Ordering::Equal, |(i, desc)| nulls_last(&va[i], &vb[i], desc));
            by_metric.then_with(|| nulls_last(ka, kb, false))
        });

        Ok(summaries
            .into_iter()
            .map(|(key, values)| {
                let mut record = Record::new();
                record.insert(stats.group_by.clone(), key.to_json());
                for (m, v) in stats.metrics.iter().zip(values) {
                    record.insert(m.name.clone(), v.to_json());
                }
                record
            })
            .collect())
    }

    async fn monthly_plan(
        &self,
        resource: &str,
        plan: &MonthlyPlanConfig,
        year: i32,
        scope: Scope,
    ) -> Result<Vec<Record>, AppError> {
        tokio::task::yield_now().await;
        let resource = lookup(&self.model, resource)?;
        let tables = self.read()?;
        let rows = tables.get(&resource.name).map(Vec::as_slice).unwrap_or_default();

        let mut months: BTreeMap<u32, Vec<Value>> = BTreeMap::new();
        for row in rows.iter().filter(|r| admits(resource, scope, &[], r)) {
            let Some(Value::Array(dates)) = row.get(&plan.date_field) else {
                continue;
            };
            let label = row.get(&plan.label_field).cloned().unwrap_or(Value::Null);
            for date in dates {
                let Ok(Scalar::Date(start)) = Scalar::parse(FieldKind::Date, date) else {
                    continue;
                };
                if start.year() == year {
                    months.entry(start.month()).or_default().push(label.clone());
                }
            }
        }

        let limit = usize::try_from(plan.limit).unwrap_or(usize::MAX);
        Ok(months
            .into_iter()
            .rev()
            .take(limit)
            .map(|(month, mut labels)| {
                labels.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
                let mut record = Record::new();
                record.insert(MONTH_FIELD.into(), Value::from(month));
                record.insert(plan.count_as.clone(), Value::from(labels.len() as u64));
                record.insert(plan.labels_as.clone(), Value::Array(labels));
                record
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.read().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin_catalog, resolve};
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new(Arc::new(resolve(&builtin_catalog().unwrap(), "public").unwrap()))
    }

    fn obj(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    fn tour(name: &str) -> Record {
        obj(json!({
            "name": name, "duration": 5, "maxGroupSize": 10, "difficulty": "easy",
            "price": 100, "description": "d", "imageCover": "c.jpg"
        }))
    }

    #[tokio::test]
    async fn insert_assigns_server_fields_and_defaults() {
        let s = store();
        let t = s.insert("tours", &tour("The Forest Hiker")).await.unwrap();
        assert!(Uuid::parse_str(t["id"].as_str().unwrap()).is_ok());
        assert_eq!(t["ratingsAverage"], json!(4.5));
        assert_eq!(t["ratingsQuantity"], json!(0));
        assert!(t.contains_key("createdAt"));
        assert!(!t.contains_key("version"));
    }

    #[tokio::test]
    async fn unique_and_not_null_are_validation_errors() {
        let s = store();
        s.insert("tours", &tour("The Forest Hiker")).await.unwrap();
        let dup = s.insert("tours", &tour("The Forest Hiker")).await.unwrap_err();
        assert!(matches!(dup, AppError::Validation { field: Some(ref f), .. } if f == "name"));

        let mut missing = tour("The Sea Explorer");
        missing.remove("price");
        let err = s.insert("tours", &missing).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "price"));
    }

    #[tokio::test]
    async fn hidden_records_need_explicit_scope() {
        let s = store();
        let mut secret = tour("The Secret Valley");
        secret.insert("secretTour".into(), json!(true));
        let t = s.insert("tours", &secret).await.unwrap();
        let id = t["id"].as_str().unwrap();
        assert!(s.find_by_id("tours", id, Scope::Default).await.unwrap().is_none());
        assert!(s.find_by_id("tours", id, Scope::IncludeHidden).await.unwrap().is_some());
        assert_eq!(s.count("tours", &[], Scope::Default).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_bumps_version() {
        let s = store();
        let t = s.insert("tours", &tour("The Forest Hiker")).await.unwrap();
        let id = t["id"].as_str().unwrap();
        s.update_by_id("tours", id, &obj(json!({"price": "250"})), Scope::Default)
            .await
            .unwrap()
            .unwrap();
        let mut req = RetrievalRequest::new("tours");
        req.projection = Projection::Fields(vec!["price".into(), "version".into()]);
        let rows = s.find(&req).await.unwrap();
        assert_eq!(rows[0]["price"], json!(250.0));
        assert_eq!(rows[0]["version"], json!(1));
    }

    #[tokio::test]
    async fn deleting_a_parent_cascades_to_dependents() {
        let s = store();
        let t = s.insert("tours", &tour("The Forest Hiker")).await.unwrap();
        let u = s
            .insert("users", &obj(json!({"name": "Ann", "email": "ann@example.com"})))
            .await
            .unwrap();
        s.insert(
            "reviews",
            &obj(json!({"review": "ok", "rating": 4, "tour": t["id"], "user": u["id"]})),
        )
        .await
        .unwrap();
        s.delete_by_id("tours", t["id"].as_str().unwrap(), Scope::Default)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(s.count("reviews", &[], Scope::Default).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dangling_references_are_rejected() {
        let s = store();
        let err = s
            .insert(
                "reviews",
                &obj(json!({"review": "ok", "tour": Uuid::new_v4().to_string(), "user": Uuid::new_v4().to_string()})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn stats_follow_sql_aggregate_rules() {
        let s = store();
        let tours = s.model.resource("tours").unwrap().clone();
        let mut stats = tours.stats.clone().unwrap();
        stats.metrics.push(MetricConfig {
            name: "discounts".into(),
            op: MetricOp::Count,
            field: Some("priceDiscount".into()),
        });
        stats.metrics.push(MetricConfig {
            name: "avgDiscount".into(),
            op: MetricOp::Avg,
            field: Some("priceDiscount".into()),
        });
        s.insert("tours", &tour("The Forest Hiker")).await.unwrap();

        let rows = s.group_stats("tours", &stats, &[], Scope::Default).await.unwrap();
        assert_eq!(rows[0]["difficulty"], json!("EASY"));
        assert_eq!(rows[0]["numTours"], json!(1));
        assert_eq!(rows[0]["discounts"], json!(0));
        assert_eq!(rows[0]["avgDiscount"], json!(null));
    }

    #[tokio::test]
    async fn monthly_plan_skips_other_years() {
        let s = store();
        let mut t = tour("The Forest Hiker");
        t.insert(
            "startDates".into(),
            json!(["2021-04-25T09:00:00Z", "2021-07-20T09:00:00Z", "2022-04-01T09:00:00Z"]),
        );
        s.insert("tours", &t).await.unwrap();
        let plan = s.model.resource("tours").unwrap().monthly_plan.clone().unwrap();

        let rows = s.monthly_plan("tours", &plan, 2021, Scope::Default).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["month"], json!(7));
        assert_eq!(rows[1]["month"], json!(4));
        assert_eq!(rows[1]["tours"], json!(["The Forest Hiker"]));
        assert!(s.monthly_plan("tours", &plan, 2020, Scope::Default).await.unwrap().is_empty());
    }
}
