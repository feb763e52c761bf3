//! Catalog validation: referential integrity and aggregate consistency.

use crate::config::resolved::{IMPLICIT_FIELDS, MONTH_FIELD};
use crate::config::{CatalogConfig, FieldKind, MetricOp, RelationKind, ResourceConfig};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

/// Kind of a field by name, including the implicit ones.
fn field_kind(resource: &ResourceConfig, name: &str) -> Option<FieldKind> {
    match name {
        "id" => Some(FieldKind::Id),
        "createdAt" => Some(FieldKind::Date),
        "version" => Some(FieldKind::Integer),
        _ => resource.fields.iter().find(|f| f.name == name).map(|f| f.kind),
    }
}

fn require_field(resource: &ResourceConfig, name: &str) -> Result<FieldKind, ConfigError> {
    field_kind(resource, name).ok_or_else(|| ConfigError::MissingReference {
        kind: "field",
        id: format!("{}.{}", resource.name, name),
    })
}

pub fn validate(catalog: &CatalogConfig) -> Result<(), ConfigError> {
    let mut by_name: HashMap<&str, &ResourceConfig> = HashMap::new();
    for r in &catalog.resources {
        if by_name.insert(r.name.as_str(), r).is_some() {
            return Err(ConfigError::DuplicateResource(r.name.clone()));
        }
    }

    for r in &catalog.resources {
        let mut seen = HashSet::new();
        for f in &r.fields {
            if IMPLICIT_FIELDS.contains(&f.name.as_str()) {
                return Err(ConfigError::ReservedField {
                    resource: r.name.clone(),
                    field: f.name.clone(),
                });
            }
            if !seen.insert(f.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate field {}.{}",
                    r.name, f.name
                )));
            }
            if let Some(src) = &f.slug_from {
                if require_field(r, src)? != FieldKind::String {
                    return Err(ConfigError::Validation(format!(
                        "{}.{} slug source must be a string field",
                        r.name, f.name
                    )));
                }
            }
        }

        for set in &r.unique {
            for name in set {
                require_field(r, name)?;
            }
        }
        if let Some(h) = &r.hidden {
            if require_field(r, &h.field)? != FieldKind::Boolean {
                return Err(ConfigError::Validation(format!(
                    "{}.{} hidden flag must be boolean",
                    r.name, h.field
                )));
            }
        }
        for name in &r.sensitive_fields {
            require_field(r, name)?;
        }
        for (name, rule) in &r.validation {
            require_field(r, name)?;
            if let Some(other) = &rule.below_field {
                require_field(r, other)?;
            }
        }
        if let Some(owner) = &r.owner_field {
            require_field(r, owner)?;
        }

        for rel in &r.relations {
            let target = by_name.get(rel.resource.as_str()).ok_or_else(|| ConfigError::MissingReference {
                kind: "resource",
                id: rel.resource.clone(),
            })?;
            require_field(r, &rel.local_field)?;
            require_field(target, &rel.foreign_field)?;
            for name in &rel.select {
                require_field(target, name)?;
            }
            if require_field(r, &rel.local_field)? == FieldKind::Json && rel.kind != RelationKind::Many {
                return Err(ConfigError::Validation(format!(
                    "{}.{}: an array of keys needs a 'many' relation",
                    r.name, rel.name
                )));
            }
            if rel.kind == RelationKind::Many && rel.on_delete.is_some() {
                return Err(ConfigError::Validation(format!(
                    "{}.{}: on_delete applies to 'one' relations only",
                    r.name, rel.name
                )));
            }
        }

        validate_analytics(r)?;

        if let Some(p) = &r.parent {
            let parent = by_name.get(p.resource.as_str()).ok_or_else(|| ConfigError::MissingReference {
                kind: "resource",
                id: p.resource.clone(),
            })?;
            if require_field(r, &p.field)? != FieldKind::Id {
                return Err(ConfigError::Validation(format!(
                    "{}.{} parent field must be an id",
                    r.name, p.field
                )));
            }
            if parent.name == r.name {
                return Err(ConfigError::Validation(format!("{} cannot be its own parent", r.name)));
            }
        }

        if let Some(agg) = &r.aggregate {
            let invalid = |reason: String| ConfigError::InvalidAggregate {
                resource: r.name.clone(),
                reason,
            };
            let parent_cfg = r
                .parent
                .as_ref()
                .ok_or_else(|| invalid("aggregate requires a parent".into()))?;
            let parent = by_name
                .get(parent_cfg.resource.as_str())
                .ok_or_else(|| invalid(format!("unknown parent {}", parent_cfg.resource)))?;
            if !require_field(r, &agg.score_field)?.is_numeric() {
                return Err(invalid(format!("score field {} must be numeric", agg.score_field)));
            }
            if !require_field(parent, &agg.count_field)?.is_numeric() {
                return Err(invalid(format!("count field {} must be numeric", agg.count_field)));
            }
            if require_field(parent, &agg.average_field)? != FieldKind::Number {
                return Err(invalid(format!("average field {} must be a number", agg.average_field)));
            }
            if !agg.default_average.is_finite() {
                return Err(invalid("default average must be finite".into()));
            }
        }
    }

    Ok(())
}

/// Stats, monthly plan and computed values name real fields of the right kind.
fn validate_analytics(r: &ResourceConfig) -> Result<(), ConfigError> {
    let invalid = |what: &str, reason: String| ConfigError::Validation(format!("{} {}: {}", r.name, what, reason));

    if let Some(stats) = &r.stats {
        let kind = require_field(r, &stats.group_by)?;
        if stats.upper_case && kind != FieldKind::String {
            return Err(invalid("stats", format!("{} is not a string field", stats.group_by)));
        }
        if stats.metrics.is_empty() {
            return Err(invalid("stats", "no metrics".into()));
        }
        let mut names = HashSet::new();
        for m in &stats.metrics {
            if m.name == stats.group_by || !names.insert(m.name.as_str()) {
                return Err(invalid("stats", format!("duplicate output {}", m.name)));
            }
            match (&m.field, m.op) {
                (None, MetricOp::Count) => {}
                (None, _) => return Err(invalid("stats", format!("{} needs a field", m.name))),
                (Some(f), op) => {
                    if r.sensitive_fields.contains(f) {
                        return Err(invalid("stats", format!("{} reads a sensitive field", m.name)));
                    }
                    let kind = require_field(r, f)?;
                    if op != MetricOp::Count && !kind.is_numeric() {
                        return Err(invalid("stats", format!("{} must read a numeric field", m.name)));
                    }
                }
            }
        }
        if let Some((name, _)) = stats.sort_key() {
            if !names.contains(name) {
                return Err(invalid("stats", format!("sort names unknown metric {}", name)));
            }
        }
        for key in stats.filter.keys() {
            let base = key.split('[').next().unwrap_or(key);
            require_field(r, base)?;
        }
    }

    if let Some(plan) = &r.monthly_plan {
        if require_field(r, &plan.date_field)? != FieldKind::Json {
            return Err(invalid("monthly_plan", format!("{} must be an array field", plan.date_field)));
        }
        require_field(r, &plan.label_field)?;
        if plan.count_as == plan.labels_as || plan.count_as == MONTH_FIELD || plan.labels_as == MONTH_FIELD {
            return Err(invalid("monthly_plan", "output names must differ".into()));
        }
    }

    for c in &r.computed {
        if !require_field(r, &c.from)?.is_numeric() {
            return Err(invalid("computed", format!("{} must derive from a numeric field", c.name)));
        }
        if field_kind(r, &c.name).is_some() {
            return Err(invalid("computed", format!("{} shadows a field", c.name)));
        }
        if !c.divide_by.is_finite() || c.divide_by == 0.0 {
            return Err(invalid("computed", format!("{} needs a non-zero divisor", c.name)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::builtin_catalog;

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = builtin_catalog().expect("catalog parses");
        validate(&catalog).expect("catalog validates");
    }

    #[test]
    fn reserved_field_names_are_rejected() {
        let mut catalog = builtin_catalog().unwrap();
        let tours = catalog.resources.iter_mut().find(|r| r.name == "tours").unwrap();
        tours.fields[0].name = "version".into();
        assert!(matches!(validate(&catalog), Err(ConfigError::ReservedField { .. })));
    }

    #[test]
    fn aggregate_needs_numeric_score() {
        let mut catalog = builtin_catalog().unwrap();
        let reviews = catalog.resources.iter_mut().find(|r| r.name == "reviews").unwrap();
        reviews.aggregate.as_mut().unwrap().score_field = "review".into();
        assert!(matches!(validate(&catalog), Err(ConfigError::InvalidAggregate { .. })));
    }

    #[test]
    fn unknown_relation_target_is_a_missing_reference() {
        let mut catalog = builtin_catalog().unwrap();
        let reviews = catalog.resources.iter_mut().find(|r| r.name == "reviews").unwrap();
        reviews.relations[0].resource = "guides".into();
        assert!(matches!(
            validate(&catalog),
            Err(ConfigError::MissingReference { kind: "resource", .. })
        ));
    }

    #[test]
    fn key_arrays_need_many_relations() {
        let mut catalog = builtin_catalog().unwrap();
        let tours = catalog.resources.iter_mut().find(|r| r.name == "tours").unwrap();
        let guides = tours.relations.iter_mut().find(|r| r.name == "guides").unwrap();
        guides.kind = RelationKind::One;
        assert!(matches!(validate(&catalog), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn stats_must_sort_by_a_metric() {
        let mut catalog = builtin_catalog().unwrap();
        let tours = catalog.resources.iter_mut().find(|r| r.name == "tours").unwrap();
        tours.stats.as_mut().unwrap().sort = Some("-price".into());
        assert!(matches!(validate(&catalog), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn computed_values_need_a_numeric_source() {
        let mut catalog = builtin_catalog().unwrap();
        let tours = catalog.resources.iter_mut().find(|r| r.name == "tours").unwrap();
        tours.computed[0].from = "name".into();
        assert!(matches!(validate(&catalog), Err(ConfigError::Validation(_))));
    }
}
