//! Generic list/read/create/update/delete over any catalog resource.

use crate::case::slugify;
use crate::config::{
    Expand, FieldKind, Operation, RelationKind, RelationSpec, ResolvedModel, ResolvedResource, ID_FIELD,
};
use crate::error::AppError;
use crate::query::{Predicate, Projection, QueryFeatures, RawParams, RetrievalRequest, Scalar, Scope};
use crate::service::consistency::ConsistencyEngine;
use crate::service::validation::RequestValidator;
use crate::store::{Record, ResourceStore};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

pub const NOT_FOUND_MESSAGE: &str = "No document found with that ID";
pub const PAGE_NOT_FOUND_MESSAGE: &str = "This page does not exist";

/// What the route layer hands over besides parameters and body.
#[derive(Clone, Debug, Default)]
pub struct RouteContext {
    /// Parent id from a nested route, e.g. `/tours/:id/reviews`.
    pub parent_id: Option<String>,
    /// Authenticated caller, used to fill the owner field.
    pub caller_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Listing {
    pub results: usize,
    pub data: Vec<Record>,
}

#[derive(Clone)]
pub struct ResourceFactory {
    store: Arc<dyn ResourceStore>,
    model: Arc<ResolvedModel>,
    engine: ConsistencyEngine,
    resource: String,
    strict_pages: bool,
}

fn check_id(field: &str, id: &str) -> Result<String, AppError> {
    uuid::Uuid::parse_str(id.trim())
        .map(|u| u.to_string())
        .map_err(|_| AppError::invalid(field, format!("Invalid {}: {}", field, id)))
}

impl ResourceFactory {
    pub fn new(store: Arc<dyn ResourceStore>, model: Arc<ResolvedModel>, resource: &str) -> Result<Self, AppError> {
        if model.resource(resource).is_none() {
            return Err(AppError::NotFound(format!("Unknown resource: {}", resource)));
        }
        Ok(ResourceFactory {
            engine: ConsistencyEngine::new(store.clone(), model.clone()),
            store,
            model,
            resource: resource.to_string(),
            strict_pages: false,
        })
    }

    /// Report out-of-range pages as not found instead of an empty list.
    pub fn with_strict_pages(mut self, strict: bool) -> Self {
        self.strict_pages = strict;
        self
    }

    fn resource(&self) -> Result<&ResolvedResource, AppError> {
        self.model
            .resource(&self.resource)
            .ok_or_else(|| AppError::NotFound(format!("Unknown resource: {}", self.resource)))
    }

    fn gate(&self, op: Operation) -> Result<&ResolvedResource, AppError> {
        let resource = self.resource()?;
        if !resource.allows(op) {
            return Err(AppError::BadRequest(format!("{} not allowed on {}", op.as_str(), resource.name)));
        }
        Ok(resource)
    }

    /// Filter, sort, project and paginate; parent-scoped when the route carries a parent id.
    pub async fn list(&self, params: &RawParams, ctx: &RouteContext) -> Result<Listing, AppError> {
        let resource = self.gate(Operation::List)?;
        let mut base = RetrievalRequest::new(resource.name.clone());
        if let Some(parent_id) = &ctx.parent_id {
            let parent = resource
                .parent
                .as_ref()
                .ok_or_else(|| AppError::BadRequest(format!("{} has no parent resource", resource.name)))?;
            base = base.with_predicate(Predicate::eq(parent.field.clone(), check_id(&parent.field, parent_id)?));
        }
        let request = QueryFeatures::new(base, params)
            .filter()
            .sort()
            .limit_fields()
            .paginate()
            .into_request();

        if self.strict_pages && params.contains("page") && request.skip > 0 {
            let total = self.store.count(&resource.name, &request.predicates, request.scope).await?;
            if request.skip >= total {
                return Err(AppError::NotFound(PAGE_NOT_FOUND_MESSAGE.into()));
            }
        }

        let mut rows = self.store.find(&request).await?;
        self.expand(resource, &mut rows, false).await?;
        rows.iter_mut().for_each(|r| resource.add_computed(r));
        tracing::debug!(resource = %resource.name, results = rows.len(), "list");
        Ok(Listing {
            results: rows.len(),
            data: rows,
        })
    }

    /// List with a named preset overriding the caller's parameters (e.g. `top-5-cheap`).
    pub async fn list_alias(&self, alias: &str, params: &RawParams, ctx: &RouteContext) -> Result<Listing, AppError> {
        let resource = self.gate(Operation::List)?;
        let preset = resource
            .aliases
            .get(alias)
            .ok_or_else(|| AppError::NotFound(format!("Unknown alias: {}", alias)))?;
        let mut params = params.clone();
        for (key, value) in preset {
            params.set(key, value);
        }
        self.list(&params, ctx).await
    }

    pub async fn get_one(&self, id: &str) -> Result<Record, AppError> {
        let resource = self.gate(Operation::Read)?;
        let id = check_id(ID_FIELD, id)?;
        let record = self
            .store
            .find_by_id(&resource.name, &id, Scope::Default)
            .await?
            .ok_or_else(|| AppError::NotFound(NOT_FOUND_MESSAGE.into()))?;
        let mut rows = vec![record];
        self.expand(resource, &mut rows, true).await?;
        let mut record = rows.pop().ok_or_else(|| AppError::Internal("expansion dropped the record".into()))?;
        resource.add_computed(&mut record);
        Ok(record)
    }

    /// Grouped summary configured for the resource, e.g. tour stats by difficulty.
    pub async fn stats(&self) -> Result<Listing, AppError> {
        let resource = self.gate(Operation::List)?;
        let stats = resource
            .stats
            .as_ref()
            .ok_or_else(|| AppError::NotFound(format!("No stats for {}", resource.name)))?;
        let params = RawParams::from_pairs(stats.filter.iter());
        let predicates = QueryFeatures::new(RetrievalRequest::new(resource.name.clone()), &params)
            .filter()
            .into_request()
            .predicates;
        let rows = self
            .store
            .group_stats(&resource.name, stats, &predicates, Scope::Default)
            .await?;
        Ok(Listing {
            results: rows.len(),
            data: rows,
        })
    }

    /// Starts per month of `year`, latest month first.
    pub async fn monthly_plan(&self, year: &str) -> Result<Listing, AppError> {
        let resource = self.gate(Operation::List)?;
        let plan = resource
            .monthly_plan
            .as_ref()
            .ok_or_else(|| AppError::NotFound(format!("No monthly plan for {}", resource.name)))?;
        let year = parse_year(year)?;
        let rows = self
            .store
            .monthly_plan(&resource.name, plan, year, Scope::Default)
            .await?;
        tracing::debug!(resource = %resource.name, year, months = rows.len(), "monthly plan");
        Ok(Listing {
            results: rows.len(),
            data: rows,
        })
    }

    pub async fn create(&self, body: Record, ctx: &RouteContext) -> Result<Record, AppError> {
        let resource = self.gate(Operation::Create)?;
        let mut body = prepare_write(resource, body)?;
        if let (Some(parent), Some(parent_id)) = (&resource.parent, &ctx.parent_id) {
            if body.get(&parent.field).map_or(true, Value::is_null) {
                body.insert(parent.field.clone(), Value::String(check_id(&parent.field, parent_id)?));
            }
        }
        if let (Some(owner), Some(caller)) = (&resource.owner_field, &ctx.caller_id) {
            if body.get(owner).map_or(true, Value::is_null) {
                body.insert(owner.clone(), Value::String(check_id(owner, caller)?));
            }
        }
        RequestValidator::validate(&body, &resource.validation)?;

        let mut created = self.store.insert(&resource.name, &body).await?;
        if let Some(parent_id) = self.parent_of(resource, &created) {
            self.engine.recompute(&resource.name, &parent_id).await?;
        }
        resource.add_computed(&mut created);
        Ok(created)
    }

    pub async fn update(&self, id: &str, body: Record) -> Result<Record, AppError> {
        let resource = self.gate(Operation::Update)?;
        let id = check_id(ID_FIELD, id)?;
        let changes = prepare_write(resource, body)?;

        let current = self
            .store
            .find_by_id(&resource.name, &id, Scope::Default)
            .await?
            .ok_or_else(|| AppError::NotFound(NOT_FOUND_MESSAGE.into()))?;
        if let Some(parent) = &resource.parent {
            if let Some(next) = changes.get(&parent.field) {
                if current.get(&parent.field) != Some(next) {
                    return Err(AppError::invalid(
                        parent.field.as_str(),
                        format!("{} cannot be changed", parent.field),
                    ));
                }
            }
        }
        RequestValidator::validate_partial(&changes, &resource.validation, &current)?;

        // parent captured before the write; the write itself does not expose it
        let parent_id = self.parent_of(resource, &current);
        let mut updated = self
            .store
            .update_by_id(&resource.name, &id, &changes, Scope::Default)
            .await?
            .ok_or_else(|| AppError::NotFound(NOT_FOUND_MESSAGE.into()))?;
        if let Some(parent_id) = parent_id {
            self.engine.recompute(&resource.name, &parent_id).await?;
        }
        resource.add_computed(&mut updated);
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        let resource = self.gate(Operation::Delete)?;
        let id = check_id(ID_FIELD, id)?;

        let parent_id = match &resource.aggregate {
            Some(_) => {
                let current = self
                    .store
                    .find_by_id(&resource.name, &id, Scope::Default)
                    .await?
                    .ok_or_else(|| AppError::NotFound(NOT_FOUND_MESSAGE.into()))?;
                self.parent_of(resource, &current)
            }
            None => None,
        };
        let cascaded = self.cascaded_parents(resource, &id).await?;

        self.store
            .delete_by_id(&resource.name, &id, Scope::Default)
            .await?
            .ok_or_else(|| AppError::NotFound(NOT_FOUND_MESSAGE.into()))?;

        if let Some(parent_id) = parent_id {
            self.engine.recompute(&resource.name, &parent_id).await?;
        }
        for (dependent, parent_id) in cascaded {
            self.engine.recompute(&dependent, &parent_id).await?;
        }
        Ok(())
    }

    /// Parent id a dependent record contributes to, when the resource maintains an aggregate.
    fn parent_of(&self, resource: &ResolvedResource, record: &Record) -> Option<String> {
        let spec = resource.aggregate.as_ref()?;
        record.get(&spec.foreign_key)?.as_str().map(str::to_string)
    }

    /// Parents whose aggregates lose members when deleting `id` cascades into their dependents.
    async fn cascaded_parents(&self, resource: &ResolvedResource, id: &str) -> Result<Vec<(String, String)>, AppError> {
        let mut out = Vec::new();
        for dependent in &self.model.resources {
            let Some(spec) = &dependent.aggregate else {
                continue;
            };
            if spec.parent == resource.name {
                continue;
            }
            for rel in dependent.relations.iter().filter(|r| {
                r.kind == RelationKind::One
                    && r.resource == resource.name
                    && r.foreign_field == ID_FIELD
                    && r.on_delete.eq_ignore_ascii_case("CASCADE")
            }) {
                let mut request = RetrievalRequest::new(dependent.name.clone())
                    .with_predicate(Predicate::eq(rel.local_field.clone(), id))
                    .with_scope(Scope::IncludeHidden);
                request.projection = Projection::Fields(vec![spec.foreign_key.clone()]);
                let rows = self.store.find(&request).await?;
                let parents: BTreeSet<String> = rows
                    .iter()
                    .filter_map(|r| r.get(&spec.foreign_key).and_then(Value::as_str).map(str::to_string))
                    .collect();
                out.extend(parents.into_iter().map(|p| (dependent.name.clone(), p)));
            }
        }
        Ok(out)
    }

    /// Replace relation keys with related records: `always` relations everywhere, `read` ones on get-one.
    /// Related records get their own `always` relations expanded one level.
    async fn expand(&self, resource: &ResolvedResource, rows: &mut [Record], single: bool) -> Result<(), AppError> {
        let wanted = |e: Expand| e == Expand::Always || (single && e == Expand::Read);
        for rel in resource.relations.iter().filter(|r| wanted(r.expand)) {
            let mut docs = self.load_related(rel, rows).await?;
            if let Some(target) = self.model.resource(&rel.resource) {
                for nested in target.relations.iter().filter(|r| r.expand == Expand::Always) {
                    let nested_docs = self.load_related(nested, &docs).await?;
                    attach(&mut docs, nested, nested_docs);
                }
            }
            attach(rows, rel, docs);
            if !rel.select.is_empty() && !rel.select.contains(&rel.foreign_field) && rel.foreign_field != ID_FIELD {
                strip_field(rows, rel, &rel.foreign_field);
            }
        }
        Ok(())
    }

    /// Fetch the records a relation points at for all rows, in one membership query.
    async fn load_related(&self, rel: &RelationSpec, rows: &[Record]) -> Result<Vec<Record>, AppError> {
        let keys: BTreeSet<String> = rows
            .iter()
            .filter_map(|r| r.get(&rel.local_field))
            .flat_map(relation_keys)
            .collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut request = RetrievalRequest::new(rel.resource.clone())
            .with_predicate(Predicate::one_of(rel.foreign_field.clone(), keys.into_iter().map(Value::String).collect()));
        if !rel.select.is_empty() {
            let mut fields = rel.select.clone();
            if !fields.contains(&rel.foreign_field) {
                fields.push(rel.foreign_field.clone());
            }
            request.projection = Projection::Fields(fields);
        }
        self.store.find(&request).await
    }
}

/// Keys a row holds for a relation: a single id, or an array of ids.
fn relation_keys(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

/// Put related records in place: an object (or null) for `one`, an array for `many`.
/// Array keys keep their stored order.
fn attach(rows: &mut [Record], rel: &RelationSpec, docs: Vec<Record>) {
    let mut grouped: HashMap<String, Vec<Record>> = HashMap::new();
    for doc in docs {
        if let Some(key) = doc.get(&rel.foreign_field).and_then(Value::as_str).map(str::to_string) {
            grouped.entry(key).or_default().push(doc);
        }
    }
    for row in rows.iter_mut() {
        let Some(keys) = row.get(&rel.local_field).map(relation_keys) else {
            continue;
        };
        let matched: Vec<Record> = keys
            .iter()
            .filter_map(|k| grouped.get(k))
            .flat_map(|docs| docs.iter().cloned())
            .collect();
        let value = match rel.kind {
            RelationKind::One => matched.into_iter().next().map(Value::Object).unwrap_or(Value::Null),
            RelationKind::Many => Value::Array(matched.into_iter().map(Value::Object).collect()),
        };
        row.insert(rel.name.clone(), value);
    }
}

/// Drop the grouping key from expanded records when the relation did not select it.
fn strip_field(rows: &mut [Record], rel: &RelationSpec, field: &str) {
    for row in rows.iter_mut() {
        match row.get_mut(&rel.name) {
            Some(Value::Object(doc)) => {
                doc.remove(field);
            }
            Some(Value::Array(docs)) => {
                for doc in docs.iter_mut().filter_map(Value::as_object_mut) {
                    doc.remove(field);
                }
            }
            _ => {}
        }
    }
}

/// Shape a write body: drop server-assigned, sensitive and unknown fields, trim, cast by kind,
/// derive slugs.
fn prepare_write(resource: &ResolvedResource, body: Record) -> Result<Record, AppError> {
    let mut out = Record::new();
    for (name, value) in body {
        let Some(field) = resource.field(&name) else {
            continue;
        };
        if field.implicit || resource.is_sensitive(&name) {
            continue;
        }
        let value = match value {
            Value::String(s) if field.trim => Value::String(s.trim().to_string()),
            other => other,
        };
        let value = match (field.kind, array_kind(resource, &name)) {
            (FieldKind::Json, Some(kind)) => typed_array(&name, kind, value)?,
            (FieldKind::Json, None) => value,
            _ => Scalar::parse(field.kind, &value)
                .map(|s| s.to_json())
                .map_err(|e| AppError::invalid(name.as_str(), format!("{}: {}", name, e)))?,
        };
        out.insert(name, value);
    }
    for field in &resource.fields {
        let Some(source) = &field.slug_from else {
            continue;
        };
        if let Some(Value::String(s)) = out.get(source) {
            let slug = slugify(s);
            out.insert(field.name.clone(), Value::String(slug));
        }
    }
    Ok(out)
}

/// Element kind of a json array field: relation keys (e.g. a tour's `guides`) or plan dates.
fn array_kind(resource: &ResolvedResource, field: &str) -> Option<FieldKind> {
    if resource.relations.iter().any(|r| r.local_field == field) {
        return Some(FieldKind::Id);
    }
    match &resource.monthly_plan {
        Some(plan) if plan.date_field == field => Some(FieldKind::Date),
        _ => None,
    }
}

fn typed_array(field: &str, kind: FieldKind, value: Value) -> Result<Value, AppError> {
    let not_an_array = || AppError::invalid(field, format!("{} must be an array of {}", field, kind.pg_type()));
    let items = match value {
        Value::Null => return Ok(Value::Null),
        Value::Array(items) => items,
        _ => return Err(not_an_array()),
    };
    items
        .iter()
        .map(|item| match Scalar::parse(kind, item) {
            Ok(Scalar::Null) => Err(not_an_array()),
            Ok(v) => Ok(v.to_json()),
            Err(e) => Err(AppError::invalid(field, format!("{}: {}", field, e))),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

fn parse_year(raw: &str) -> Result<i32, AppError> {
    raw.trim()
        .parse::<i32>()
        .ok()
        .filter(|y| (1..=9999).contains(y))
        .ok_or_else(|| AppError::invalid("year", format!("Invalid year: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin_catalog, resolve};
    use serde_json::json;

    fn obj(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn writes_drop_server_and_unknown_fields() {
        let model = resolve(&builtin_catalog().unwrap(), "public").unwrap();
        let tours = model.resource("tours").unwrap();
        let out = prepare_write(
            tours,
            obj(json!({
                "id": "x", "version": 9, "createdAt": "2020-01-01",
                "name": "  The Forest Hiker ", "price": "497", "colour": "green"
            })),
        )
        .unwrap();
        assert_eq!(
            out,
            obj(json!({"name": "The Forest Hiker", "slug": "the-forest-hiker", "price": 497.0}))
        );
    }

    #[test]
    fn type_mismatch_names_the_field() {
        let model = resolve(&builtin_catalog().unwrap(), "public").unwrap();
        let tours = model.resource("tours").unwrap();
        let err = prepare_write(tours, obj(json!({"maxGroupSize": "many"}))).unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "maxGroupSize"));
    }

    #[test]
    fn sensitive_fields_are_not_writable() {
        let model = resolve(&builtin_catalog().unwrap(), "public").unwrap();
        let users = model.resource("users").unwrap();
        let out = prepare_write(users, obj(json!({"name": "Ann", "password": "hunter2"}))).unwrap();
        assert!(!out.contains_key("password"));
    }

    #[test]
    fn typed_arrays_are_checked_and_canonical() {
        let model = resolve(&builtin_catalog().unwrap(), "public").unwrap();
        let tours = model.resource("tours").unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        let out = prepare_write(tours, obj(json!({"guides": [id.to_uppercase()]}))).unwrap();
        assert_eq!(out["guides"], json!([id]));
        let out = prepare_write(tours, obj(json!({"startDates": ["2021-06-19", "2021-07-20T09:00:00+02:00"]}))).unwrap();
        assert_eq!(out["startDates"], json!(["2021-06-19T00:00:00.000Z", "2021-07-20T07:00:00.000Z"]));

        let err = prepare_write(tours, obj(json!({"guides": ["nobody"]}))).unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "guides"));
        let err = prepare_write(tours, obj(json!({"guides": "nobody"}))).unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "guides"));
    }

    #[test]
    fn array_keys_attach_in_stored_order() {
        let model = resolve(&builtin_catalog().unwrap(), "public").unwrap();
        let rel = model.resource("tours").unwrap().relation("guides").unwrap();
        let mut rows = vec![
            obj(json!({"id": "t1", "guides": ["b", "a", "missing"]})),
            obj(json!({"id": "t2", "guides": []})),
        ];
        let docs = vec![obj(json!({"id": "a", "name": "Ann"})), obj(json!({"id": "b", "name": "Bo"}))];
        attach(&mut rows, rel, docs);
        assert_eq!(rows[0]["guides"], json!([{"id": "b", "name": "Bo"}, {"id": "a", "name": "Ann"}]));
        assert_eq!(rows[1]["guides"], json!([]));
    }
}
