//! Storage accessors. Records travel as JSON objects keyed by API field names.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::config::{AggregateSpec, MonthlyPlanConfig, ResolvedModel, ResolvedResource, StatsConfig};
use crate::error::AppError;
use crate::query::{Predicate, RetrievalRequest, Scope};
use async_trait::async_trait;
use serde_json::{Map, Value};

pub type Record = Map<String, Value>;

/// Count and mean of a dependent collection's score for one parent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AggregateStats {
    pub count: u64,
    /// Mean over non-null scores; None when there are none.
    pub average: Option<f64>,
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Execute a retrieval request.
    async fn find(&self, request: &RetrievalRequest) -> Result<Vec<Record>, AppError>;

    async fn count(&self, resource: &str, predicates: &[Predicate], scope: Scope) -> Result<u64, AppError>;

    async fn find_by_id(&self, resource: &str, id: &str, scope: Scope) -> Result<Option<Record>, AppError>;

    /// Insert a record; the store assigns `id`, `createdAt`, `version` and column defaults.
    async fn insert(&self, resource: &str, body: &Record) -> Result<Record, AppError>;

    /// Apply `changes` and bump `version`. None when no record matches.
    async fn update_by_id(
        &self,
        resource: &str,
        id: &str,
        changes: &Record,
        scope: Scope,
    ) -> Result<Option<Record>, AppError>;

    /// Remove a record, returning it. None when no record matches.
    async fn delete_by_id(&self, resource: &str, id: &str, scope: Scope) -> Result<Option<Record>, AppError>;

    /// Group the dependent collection by parent and aggregate its score.
    async fn aggregate_by_parent(
        &self,
        dependent: &str,
        spec: &AggregateSpec,
        parent_id: &str,
    ) -> Result<AggregateStats, AppError>;

    /// Overwrite the parent's cached count and average. Ignores the hidden scope.
    /// Returns false when the parent does not exist.
    async fn write_aggregate(
        &self,
        spec: &AggregateSpec,
        parent_id: &str,
        count: u64,
        average: f64,
    ) -> Result<bool, AppError>;

    /// One row per group of the records matching `predicates`: the group key and each metric.
    async fn group_stats(
        &self,
        resource: &str,
        stats: &StatsConfig,
        predicates: &[Predicate],
        scope: Scope,
    ) -> Result<Vec<Record>, AppError>;

    /// Starts per month within `year`, latest month first.
    async fn monthly_plan(
        &self,
        resource: &str,
        plan: &MonthlyPlanConfig,
        year: i32,
        scope: Scope,
    ) -> Result<Vec<Record>, AppError>;

    async fn ping(&self) -> Result<(), AppError>;
}

pub(crate) fn lookup<'m>(model: &'m ResolvedModel, name: &str) -> Result<&'m ResolvedResource, AppError> {
    model
        .resource(name)
        .ok_or_else(|| AppError::NotFound(format!("Unknown resource: {}", name)))
}
