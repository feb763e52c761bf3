//! Keeps a parent's cached count/average in step with its dependent collection.
//!
//! Every recompute reads the whole group and overwrites both fields, so running it twice
//! stores the same values and concurrent writers converge on the last read.

use crate::config::{AggregateSpec, ResolvedModel, ID_FIELD};
use crate::error::AppError;
use crate::query::{Projection, RetrievalRequest, Scope};
use crate::store::{AggregateStats, ResourceStore};
use serde_json::Value;
use std::sync::Arc;

/// Values written onto a parent by one recompute.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AggregateValues {
    pub count: u64,
    pub average: f64,
}

impl AggregateValues {
    /// Full replacement for the parent: the rounded mean, or the default when nothing scores.
    pub fn from_stats(spec: &AggregateSpec, stats: AggregateStats) -> Self {
        match (stats.count, stats.average) {
            (0, _) => AggregateValues {
                count: 0,
                average: spec.default_average,
            },
            (count, Some(avg)) => AggregateValues {
                count,
                average: spec.round(avg),
            },
            (count, None) => AggregateValues {
                count,
                average: spec.default_average,
            },
        }
    }
}

#[derive(Clone)]
pub struct ConsistencyEngine {
    store: Arc<dyn ResourceStore>,
    model: Arc<ResolvedModel>,
}

impl ConsistencyEngine {
    pub fn new(store: Arc<dyn ResourceStore>, model: Arc<ResolvedModel>) -> Self {
        ConsistencyEngine { store, model }
    }

    fn spec(&self, dependent: &str) -> Result<&AggregateSpec, AppError> {
        self.model
            .resource(dependent)
            .and_then(|r| r.aggregate.as_ref())
            .ok_or_else(|| AppError::Internal(format!("{} maintains no aggregate", dependent)))
    }

    /// Recompute the aggregate for one parent from the current state of the dependent collection.
    pub async fn recompute(&self, dependent: &str, parent_id: &str) -> Result<AggregateValues, AppError> {
        let spec = self.spec(dependent)?;
        self.recompute_with(dependent, spec, parent_id)
            .await
            .map_err(|source| AppError::Consistency {
                parent_id: parent_id.to_string(),
                source: Box::new(source),
            })
    }

    async fn recompute_with(
        &self,
        dependent: &str,
        spec: &AggregateSpec,
        parent_id: &str,
    ) -> Result<AggregateValues, AppError> {
        let stats = self.store.aggregate_by_parent(dependent, spec, parent_id).await?;
        let values = AggregateValues::from_stats(spec, stats);
        let written = self
            .store
            .write_aggregate(spec, parent_id, values.count, values.average)
            .await?;
        if written {
            tracing::info!(
                parent = %spec.parent,
                parent_id = %parent_id,
                count = values.count,
                average = values.average,
                "aggregate recomputed"
            );
        } else {
            tracing::warn!(parent = %spec.parent, parent_id = %parent_id, "aggregate target missing");
        }
        Ok(values)
    }

    /// Recompute every parent of `dependent`, hidden parents included. Returns how many were visited.
    pub async fn recompute_all(&self, dependent: &str) -> Result<usize, AppError> {
        let spec = self.spec(dependent)?;
        let mut request = RetrievalRequest::new(spec.parent.clone()).with_scope(Scope::IncludeHidden);
        request.projection = Projection::Fields(vec![ID_FIELD.to_string()]);
        let parents = self.store.find(&request).await?;
        let mut visited = 0;
        for parent in parents {
            let Some(Value::String(id)) = parent.get(ID_FIELD) else {
                continue;
            };
            self.recompute(dependent, id).await?;
            visited += 1;
        }
        tracing::info!(dependent = %dependent, parents = visited, "aggregates rebuilt");
        Ok(visited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> AggregateSpec {
        AggregateSpec {
            parent: "tours".into(),
            foreign_key: "tour".into(),
            score_field: "rating".into(),
            count_field: "ratingsQuantity".into(),
            average_field: "ratingsAverage".into(),
            default_average: 4.5,
            precision: Some(1),
        }
    }

    #[test]
    fn empty_group_resets_to_default() {
        let v = AggregateValues::from_stats(&spec(), AggregateStats { count: 0, average: None });
        assert_eq!(v, AggregateValues { count: 0, average: 4.5 });
    }

    #[test]
    fn average_is_rounded_to_precision() {
        let v = AggregateValues::from_stats(
            &spec(),
            AggregateStats {
                count: 3,
                average: Some(14.0 / 3.0),
            },
        );
        assert_eq!(v, AggregateValues { count: 3, average: 4.7 });
    }

    #[test]
    fn unscored_group_keeps_count_with_default_average() {
        let v = AggregateValues::from_stats(&spec(), AggregateStats { count: 2, average: None });
        assert_eq!(v, AggregateValues { count: 2, average: 4.5 });
    }
}
