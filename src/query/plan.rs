//! A retrieval request checked against one resource: every field resolved, every literal cast.
//! Both stores execute plans, so both reject the same malformed queries the same way.

use crate::config::{ResolvedField, ResolvedResource, ID_FIELD, VERSION_FIELD};
use crate::error::AppError;
use crate::query::request::{CompareOp, Predicate, Projection, RetrievalRequest, Scope};
use crate::query::scalar::Scalar;
use serde_json::{Map, Value};
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }

    pub fn holds(&self, ord: Ordering) -> bool {
        match self {
            Comparison::Eq => ord == Ordering::Equal,
            Comparison::Gt => ord == Ordering::Greater,
            Comparison::Gte => ord != Ordering::Less,
            Comparison::Lt => ord == Ordering::Less,
            Comparison::Lte => ord != Ordering::Greater,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Test {
    IsNull,
    Compare(Comparison, Scalar),
    In(Vec<Scalar>),
}

#[derive(Clone, Debug)]
pub struct Condition<'r> {
    pub field: &'r ResolvedField,
    pub test: Test,
}

impl Condition<'_> {
    /// Evaluate against a stored record (SQL semantics: NULL never matches a comparison).
    pub fn matches(&self, record: &Map<String, Value>) -> bool {
        let stored = record
            .get(&self.field.name)
            .map(|v| Scalar::parse(self.field.kind, v).unwrap_or(Scalar::Null))
            .unwrap_or(Scalar::Null);
        match &self.test {
            Test::IsNull => stored.is_null(),
            Test::Compare(cmp, literal) => stored.compare(literal).is_some_and(|o| cmp.holds(o)),
            Test::In(items) => items.iter().any(|i| stored.compare(i) == Some(Ordering::Equal)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueryPlan<'r> {
    pub resource: &'r ResolvedResource,
    pub conditions: Vec<Condition<'r>>,
    /// `(field, descending)`; always ends with `id` ascending.
    pub order: Vec<(&'r ResolvedField, bool)>,
    pub fields: Vec<&'r ResolvedField>,
    pub skip: u64,
    pub limit: Option<u64>,
    pub scope: Scope,
}

impl<'r> QueryPlan<'r> {
    pub fn build(resource: &'r ResolvedResource, request: &RetrievalRequest) -> Result<Self, AppError> {
        let conditions = resolve_conditions(resource, &request.predicates)?;
        let mut order = Vec::with_capacity(request.sort.len() + 1);
        for key in &request.sort {
            order.push((readable_field(resource, &key.field)?, key.descending));
        }
        if !order.iter().any(|(f, _)| f.name == ID_FIELD) {
            if let Some(id) = resource.field(ID_FIELD) {
                order.push((id, false));
            }
        }
        Ok(QueryPlan {
            resource,
            conditions,
            order,
            fields: resolve_projection(resource, &request.projection)?,
            skip: request.skip,
            limit: request.limit,
            scope: request.scope,
        })
    }

    /// True when the record passes the scope and every condition.
    pub fn admits(&self, record: &Map<String, Value>) -> bool {
        admits(self.resource, self.scope, &self.conditions, record)
    }

    /// Order two records by the plan's sort keys; nulls sort last ascending, first descending.
    pub fn compare(&self, a: &Map<String, Value>, b: &Map<String, Value>) -> Ordering {
        for (field, descending) in &self.order {
            let x = a.get(&field.name).map(|v| Scalar::parse(field.kind, v).unwrap_or(Scalar::Null));
            let y = b.get(&field.name).map(|v| Scalar::parse(field.kind, v).unwrap_or(Scalar::Null));
            let x = x.unwrap_or(Scalar::Null);
            let y = y.unwrap_or(Scalar::Null);
            let ord = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => x.compare(&y).unwrap_or(Ordering::Equal),
            };
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

pub fn admits(resource: &ResolvedResource, scope: Scope, conditions: &[Condition<'_>], record: &Map<String, Value>) -> bool {
    if scope == Scope::Default && resource.is_hidden(record) {
        return false;
    }
    conditions.iter().all(|c| c.matches(record))
}

/// Fields a caller may name in a query: known and not sensitive.
fn readable_field<'r>(resource: &'r ResolvedResource, name: &str) -> Result<&'r ResolvedField, AppError> {
    resource
        .field(name)
        .filter(|f| !resource.is_sensitive(&f.name))
        .ok_or_else(|| AppError::MalformedQuery(format!("Invalid field: {}", name)))
}

fn cast(field: &ResolvedField, value: &Value) -> Result<Scalar, AppError> {
    Scalar::parse(field.kind, value)
        .map_err(|e| AppError::MalformedQuery(format!("Invalid {}: {}", field.name, e)))
}

pub fn resolve_conditions<'r>(
    resource: &'r ResolvedResource,
    predicates: &[Predicate],
) -> Result<Vec<Condition<'r>>, AppError> {
    predicates
        .iter()
        .map(|p| {
            let field = readable_field(resource, &p.field)?;
            let cmp = match &p.op {
                CompareOp::Eq => Comparison::Eq,
                CompareOp::Gt => Comparison::Gt,
                CompareOp::Gte => Comparison::Gte,
                CompareOp::Lt => Comparison::Lt,
                CompareOp::Lte => Comparison::Lte,
                CompareOp::In => {
                    let Value::Array(items) = &p.value else {
                        return Err(AppError::MalformedQuery(format!("Invalid {}: expected a list", p.field)));
                    };
                    let items = items.iter().map(|v| cast(field, v)).collect::<Result<Vec<_>, _>>()?;
                    return Ok(Condition {
                        field,
                        test: Test::In(items),
                    });
                }
                CompareOp::Unrecognized(op) => {
                    return Err(AppError::MalformedQuery(format!("Unknown operator '{}' on {}", op, p.field)));
                }
            };
            let literal = cast(field, &p.value)?;
            let test = match (cmp, literal.is_null()) {
                (Comparison::Eq, true) => Test::IsNull,
                (_, true) => {
                    return Err(AppError::MalformedQuery(format!("Invalid {}: null is not ordered", p.field)));
                }
                (cmp, false) => Test::Compare(cmp, literal),
            };
            Ok(Condition { field, test })
        })
        .collect()
}

pub fn resolve_projection<'r>(
    resource: &'r ResolvedResource,
    projection: &Projection,
) -> Result<Vec<&'r ResolvedField>, AppError> {
    let entries = match projection {
        Projection::Default => {
            return Ok(resource.readable_fields().filter(|f| f.name != VERSION_FIELD).collect());
        }
        Projection::Fields(entries) => entries,
    };
    let mut include = Vec::new();
    let mut exclude = Vec::new();
    for entry in entries {
        match entry.strip_prefix('-') {
            Some(name) => exclude.push(readable_field(resource, name)?.name.as_str()),
            None => include.push(readable_field(resource, entry)?.name.as_str()),
        }
    }
    match (include.is_empty(), exclude.is_empty()) {
        (false, false) => Err(AppError::MalformedQuery(
            "Projection cannot mix inclusion and exclusion".into(),
        )),
        (true, _) => Ok(resource.readable_fields().filter(|f| !exclude.contains(&f.name.as_str())).collect()),
        (false, true) => Ok(resource
            .readable_fields()
            .filter(|f| f.name == ID_FIELD || include.contains(&f.name.as_str()))
            .collect()),
    }
}

/// Copy only the projected fields of a stored record.
pub fn project(record: &Map<String, Value>, fields: &[&ResolvedField]) -> Map<String, Value> {
    fields
        .iter()
        .map(|f| (f.name.clone(), record.get(&f.name).cloned().unwrap_or(Value::Null)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin_catalog, resolve, ResolvedModel};
    use crate::query::request::SortKey;
    use serde_json::json;

    fn model() -> ResolvedModel {
        resolve(&builtin_catalog().unwrap(), "public").unwrap()
    }

    #[test]
    fn unknown_fields_and_operators_are_malformed() {
        let m = model();
        let tours = m.resource("tours").unwrap();
        let bad_field = RetrievalRequest::new("tours").with_predicate(Predicate::eq("colour", "red"));
        assert!(matches!(QueryPlan::build(tours, &bad_field), Err(AppError::MalformedQuery(_))));

        let bad_op = RetrievalRequest::new("tours").with_predicate(Predicate {
            field: "price".into(),
            op: CompareOp::Unrecognized("regex".into()),
            value: json!("1"),
        });
        assert!(matches!(QueryPlan::build(tours, &bad_op), Err(AppError::MalformedQuery(_))));

        let bad_literal = RetrievalRequest::new("tours").with_predicate(Predicate::eq("price", "cheap"));
        assert!(matches!(QueryPlan::build(tours, &bad_literal), Err(AppError::MalformedQuery(_))));
    }

    #[test]
    fn sensitive_fields_cannot_be_queried() {
        let m = model();
        let users = m.resource("users").unwrap();
        let req = RetrievalRequest::new("users").with_predicate(Predicate::eq("password", "x"));
        assert!(QueryPlan::build(users, &req).is_err());
        let fields = resolve_projection(users, &Projection::Default).unwrap();
        assert!(fields.iter().all(|f| f.name != "password" && f.name != "version"));
    }

    #[test]
    fn inclusion_adds_id_and_mixing_fails() {
        let m = model();
        let tours = m.resource("tours").unwrap();
        let names: Vec<&str> = resolve_projection(tours, &Projection::Fields(vec!["name".into(), "price".into()]))
            .unwrap()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, ["id", "name", "price"]);

        let excluded = resolve_projection(tours, &Projection::Fields(vec!["-description".into()])).unwrap();
        assert!(excluded.iter().any(|f| f.name == "version"));
        assert!(excluded.iter().all(|f| f.name != "description"));

        let mixed = Projection::Fields(vec!["name".into(), "-price".into()]);
        assert!(matches!(resolve_projection(tours, &mixed), Err(AppError::MalformedQuery(_))));
    }

    #[test]
    fn id_is_the_final_tie_breaker() {
        let m = model();
        let tours = m.resource("tours").unwrap();
        let mut req = RetrievalRequest::new("tours");
        req.sort = vec![SortKey {
            field: "price".into(),
            descending: false,
        }];
        let plan = QueryPlan::build(tours, &req).unwrap();
        let keys: Vec<(&str, bool)> = plan.order.iter().map(|(f, d)| (f.name.as_str(), *d)).collect();
        assert_eq!(keys, [("price", false), ("id", false)]);
    }

    #[test]
    fn conditions_follow_sql_null_semantics() {
        let m = model();
        let tours = m.resource("tours").unwrap();
        let conds = resolve_conditions(
            tours,
            &[Predicate {
                field: "priceDiscount".into(),
                op: CompareOp::Lt,
                value: json!("50"),
            }],
        )
        .unwrap();
        let mut rec = Map::new();
        rec.insert("priceDiscount".into(), Value::Null);
        assert!(!conds[0].matches(&rec));
        rec.insert("priceDiscount".into(), json!(20));
        assert!(conds[0].matches(&rec));
    }
}
