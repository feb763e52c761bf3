#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tour_access::config::{AggregateSpec, MonthlyPlanConfig, StatsConfig};
use tour_access::query::{Predicate, RetrievalRequest, Scope};
use tour_access::store::AggregateStats;
use tour_access::{
    builtin_catalog, resolve, AppError, MemoryStore, Record, ResolvedModel, ResourceFactory, ResourceStore,
    RouteContext,
};

pub fn model() -> Arc<ResolvedModel> {
    Arc::new(resolve(&builtin_catalog().unwrap(), "public").unwrap())
}

pub fn memory() -> (Arc<dyn ResourceStore>, Arc<ResolvedModel>) {
    let model = model();
    (Arc::new(MemoryStore::new(model.clone())), model)
}

pub fn obj(v: Value) -> Record {
    v.as_object().cloned().unwrap()
}

pub fn tour_body(name: &str, price: f64) -> Record {
    obj(json!({
        "name": name,
        "duration": 5,
        "maxGroupSize": 10,
        "difficulty": "easy",
        "price": price,
        "summary": "A walk",
        "description": "A long walk in the hills",
        "imageCover": "cover.jpg"
    }))
}

pub fn factory(store: &Arc<dyn ResourceStore>, model: &Arc<ResolvedModel>, resource: &str) -> ResourceFactory {
    ResourceFactory::new(store.clone(), model.clone(), resource).unwrap()
}

pub fn id_of(record: &Record) -> String {
    record["id"].as_str().unwrap().to_string()
}

pub async fn create_tour(store: &Arc<dyn ResourceStore>, model: &Arc<ResolvedModel>, name: &str, price: f64) -> String {
    let created = factory(store, model, "tours")
        .create(tour_body(name, price), &RouteContext::default())
        .await
        .unwrap();
    id_of(&created)
}

/// Users have no create operation; seed them through the store.
pub async fn create_user(store: &Arc<dyn ResourceStore>, name: &str) -> String {
    let email = format!("{}@example.com", name.to_lowercase().replace(' ', "."));
    let created = store
        .insert("users", &obj(json!({"name": name, "email": email, "password": "secret"})))
        .await
        .unwrap();
    id_of(&created)
}

pub async fn create_review(
    store: &Arc<dyn ResourceStore>,
    model: &Arc<ResolvedModel>,
    tour_id: &str,
    user_id: &str,
    rating: f64,
) -> Result<Record, AppError> {
    let ctx = RouteContext {
        parent_id: Some(tour_id.to_string()),
        caller_id: Some(user_id.to_string()),
    };
    factory(store, model, "reviews")
        .create(obj(json!({"review": "Lovely", "rating": rating})), &ctx)
        .await
}

/// Tour as stored, hidden or not.
pub async fn stored_tour(store: &Arc<dyn ResourceStore>, id: &str) -> Record {
    store.find_by_id("tours", id, Scope::IncludeHidden).await.unwrap().unwrap()
}

pub fn aggregate_of(tour: &Record) -> (u64, f64) {
    (
        tour["ratingsQuantity"].as_u64().unwrap(),
        tour["ratingsAverage"].as_f64().unwrap(),
    )
}

/// Memory store whose aggregate writes can be switched to fail.
pub struct FailingStore {
    inner: MemoryStore,
    pub fail_aggregate_writes: AtomicBool,
    pub fail_reads: AtomicBool,
}

impl FailingStore {
    pub fn new(model: Arc<ResolvedModel>) -> Self {
        FailingStore {
            inner: MemoryStore::new(model),
            fail_aggregate_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        }
    }

    fn unavailable() -> AppError {
        AppError::Internal("connection refused on 10.0.0.3:5432".into())
    }

    fn check_reads(&self) -> Result<(), AppError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for FailingStore {
    async fn find(&self, request: &RetrievalRequest) -> Result<Vec<Record>, AppError> {
        self.check_reads()?;
        self.inner.find(request).await
    }

    async fn count(&self, resource: &str, predicates: &[Predicate], scope: Scope) -> Result<u64, AppError> {
        self.check_reads()?;
        self.inner.count(resource, predicates, scope).await
    }

    async fn find_by_id(&self, resource: &str, id: &str, scope: Scope) -> Result<Option<Record>, AppError> {
        self.check_reads()?;
        self.inner.find_by_id(resource, id, scope).await
    }

    async fn insert(&self, resource: &str, body: &Record) -> Result<Record, AppError> {
        self.inner.insert(resource, body).await
    }

    async fn update_by_id(
        &self,
        resource: &str,
        id: &str,
        changes: &Record,
        scope: Scope,
    ) -> Result<Option<Record>, AppError> {
        self.inner.update_by_id(resource, id, changes, scope).await
    }

    async fn delete_by_id(&self, resource: &str, id: &str, scope: Scope) -> Result<Option<Record>, AppError> {
        self.inner.delete_by_id(resource, id, scope).await
    }

    async fn aggregate_by_parent(
        &self,
        dependent: &str,
        spec: &AggregateSpec,
        parent_id: &str,
    ) -> Result<AggregateStats, AppError> {
        self.inner.aggregate_by_parent(dependent, spec, parent_id).await
    }

    async fn write_aggregate(
        &self,
        spec: &AggregateSpec,
        parent_id: &str,
        count: u64,
        average: f64,
    ) -> Result<bool, AppError> {
        if self.fail_aggregate_writes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.write_aggregate(spec, parent_id, count, average).await
    }

    async fn group_stats(
        &self,
        resource: &str,
        stats: &StatsConfig,
        predicates: &[Predicate],
        scope: Scope,
    ) -> Result<Vec<Record>, AppError> {
        self.check_reads()?;
        self.inner.group_stats(resource, stats, predicates, scope).await
    }

    async fn monthly_plan(
        &self,
        resource: &str,
        plan: &MonthlyPlanConfig,
        year: i32,
        scope: Scope,
    ) -> Result<Vec<Record>, AppError> {
        self.check_reads()?;
        self.inner.monthly_plan(resource, plan, year, scope).await
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.check_reads()?;
        self.inner.ping().await
    }
}
