//! Load the resource catalog (built-in or from a JSON file) and resolve it for runtime use.

use crate::case::to_snake_case;
use crate::config::resolved::{
    AggregateSpec, HiddenScope, ParentSpec, RelationSpec, ResolvedField, ResolvedModel, ResolvedResource,
    CREATED_AT_FIELD, ID_FIELD, VERSION_FIELD,
};
use crate::config::{validate, CatalogConfig, FieldKind, ResourceConfig};
use crate::error::ConfigError;
use std::collections::HashMap;
use std::path::Path;

const BUILTIN_CATALOG: &str = include_str!("../../catalog/resources.json");

/// The catalog shipped with the crate: tours, reviews, users.
pub fn builtin_catalog() -> Result<CatalogConfig, ConfigError> {
    serde_json::from_str(BUILTIN_CATALOG).map_err(|e| ConfigError::Load(format!("built-in catalog: {}", e)))
}

/// Read a catalog from a JSON file.
pub async fn load_catalog(path: &Path) -> Result<CatalogConfig, ConfigError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}

/// Build resolved model from catalog. Tables live in `schema`.
pub fn resolve(catalog: &CatalogConfig, schema: &str) -> Result<ResolvedModel, ConfigError> {
    validate(catalog)?;

    let mut resources = Vec::with_capacity(catalog.resources.len());
    let mut resource_by_name = HashMap::new();
    for r in &catalog.resources {
        resource_by_name.insert(r.name.clone(), resources.len());
        resources.push(resolve_resource(r, schema));
    }
    Ok(ResolvedModel {
        resources,
        resource_by_name,
    })
}

fn implicit_field(name: &str, kind: FieldKind) -> ResolvedField {
    ResolvedField {
        name: name.to_string(),
        column: to_snake_case(name),
        kind,
        nullable: false,
        unique: false,
        default: None,
        trim: false,
        slug_from: None,
        implicit: true,
    }
}

fn resolve_resource(r: &ResourceConfig, schema: &str) -> ResolvedResource {
    let mut fields = vec![
        implicit_field(ID_FIELD, FieldKind::Id),
        implicit_field(CREATED_AT_FIELD, FieldKind::Date),
        implicit_field(VERSION_FIELD, FieldKind::Integer),
    ];
    fields.extend(r.fields.iter().map(|f| ResolvedField {
        name: f.name.clone(),
        column: to_snake_case(&f.name),
        kind: f.kind,
        nullable: f.nullable,
        unique: f.unique,
        default: f.default.clone(),
        trim: f.trim,
        slug_from: f.slug_from.clone(),
        implicit: false,
    }));

    let hidden = r.hidden.as_ref().map(|h| HiddenScope {
        field: h.field.clone(),
        column: to_snake_case(&h.field),
        when: h.when,
    });
    let relations = r
        .relations
        .iter()
        .map(|rel| RelationSpec {
            name: rel.name.clone(),
            resource: rel.resource.clone(),
            local_field: rel.local_field.clone(),
            foreign_field: rel.foreign_field.clone(),
            kind: rel.kind,
            select: rel.select.clone(),
            expand: rel.expand,
            on_delete: rel.on_delete.clone().unwrap_or_else(|| "NO ACTION".into()),
        })
        .collect();
    let parent = r.parent.as_ref().map(|p| ParentSpec {
        resource: p.resource.clone(),
        field: p.field.clone(),
    });
    // validate() guarantees an aggregate always comes with a parent
    let aggregate = r.aggregate.as_ref().zip(r.parent.as_ref()).map(|(a, p)| AggregateSpec {
        parent: p.resource.clone(),
        foreign_key: p.field.clone(),
        score_field: a.score_field.clone(),
        count_field: a.count_field.clone(),
        average_field: a.average_field.clone(),
        default_average: a.default_average,
        precision: a.precision,
    });

    ResolvedResource {
        name: r.name.clone(),
        schema_name: schema.to_string(),
        table_name: r.table.clone().unwrap_or_else(|| to_snake_case(&r.name)),
        fields,
        operations: r.operations.iter().copied().collect(),
        unique: r.unique.clone(),
        hidden,
        sensitive_fields: r.sensitive_fields.iter().cloned().collect(),
        validation: r.validation.clone(),
        relations,
        parent,
        owner_field: r.owner_field.clone(),
        aggregate,
        aliases: r.aliases.clone(),
        stats: r.stats.clone(),
        monthly_plan: r.monthly_plan.clone(),
        computed: r.computed.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Operation;

    #[test]
    fn builtin_catalog_resolves_with_implicit_fields() {
        let model = resolve(&builtin_catalog().unwrap(), "public").unwrap();
        let tours = model.resource("tours").unwrap();
        assert_eq!(tours.schema_name, "public");
        assert!(tours.field("id").is_some_and(|f| f.implicit && f.kind == FieldKind::Id));
        assert_eq!(tours.field("ratingsAverage").unwrap().column, "ratings_average");
        assert!(tours.allows(Operation::List));

        let reviews = model.resource("reviews").unwrap();
        let agg = reviews.aggregate.as_ref().unwrap();
        assert_eq!(agg.parent, "tours");
        assert_eq!(agg.foreign_key, "tour");
        assert_eq!(model.dependents_of("tours").count(), 1);
    }

    #[test]
    fn users_hide_inactive_and_password() {
        let model = resolve(&builtin_catalog().unwrap(), "public").unwrap();
        let users = model.resource("users").unwrap();
        assert!(users.is_sensitive("password"));
        let mut record = serde_json::Map::new();
        record.insert("active".into(), serde_json::Value::Bool(false));
        assert!(users.is_hidden(&record));
        record.insert("active".into(), serde_json::Value::Bool(true));
        assert!(!users.is_hidden(&record));
    }

    #[test]
    fn constraint_names_map_back_to_api_fields() {
        let model = resolve(&builtin_catalog().unwrap(), "public").unwrap();
        let tours = model.resource("tours").unwrap();
        assert_eq!(tours.constraint_fields("tours_name_key").as_deref(), Some("name"));
        let reviews = model.resource("reviews").unwrap();
        assert_eq!(reviews.unique_constraint(&["tour".into(), "user".into()]), "reviews_tour_user_key");
        assert_eq!(reviews.constraint_fields("reviews_tour_user_key").as_deref(), Some("tour,user"));
        assert_eq!(reviews.constraint_fields("reviews_user_fkey").as_deref(), Some("user"));
        assert_eq!(reviews.constraint_fields("reviews_pkey"), None);
    }
}
