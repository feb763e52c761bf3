//! Resource handlers: list, read, create, update, delete, parent-scoped and alias listings, summaries.

use crate::error::AppError;
use crate::extractors::CallerId;
use crate::query::RawParams;
use crate::response::{success_created, success_many, success_one};
use crate::service::RouteContext;
use crate::state::AppState;
use crate::store::Record;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::Value;

type Pairs = Query<Vec<(String, String)>>;

fn body_to_record(body: Result<Json<Value>, JsonRejection>) -> Result<Record, AppError> {
    match body {
        Ok(Json(Value::Object(m))) => Ok(m),
        Ok(_) => Err(AppError::BadRequest("body must be a JSON object".into())),
        Err(rejection) => Err(AppError::BadRequest(rejection.body_text())),
    }
}

/// The nested resource must name `resource` as its parent.
fn check_nesting(state: &AppState, resource: &str, nested: &str) -> Result<(), AppError> {
    let child = state
        .model
        .resource(nested)
        .ok_or_else(|| AppError::NotFound(format!("Unknown resource: {}", nested)))?;
    match &child.parent {
        Some(p) if p.resource == resource => Ok(()),
        _ => Err(AppError::NotFound(format!("{} is not nested under {}", nested, resource))),
    }
}

pub async fn list(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(pairs): Pairs,
) -> Result<impl IntoResponse, AppError> {
    let params = RawParams::from_pairs(pairs);
    let listing = state.factory(&resource)?.list(&params, &RouteContext::default()).await?;
    Ok(success_many(listing.data))
}

pub async fn list_alias(
    State(state): State<AppState>,
    Path((resource, alias)): Path<(String, String)>,
    Query(pairs): Pairs,
) -> Result<impl IntoResponse, AppError> {
    let params = RawParams::from_pairs(pairs);
    let listing = state
        .factory(&resource)?
        .list_alias(&alias, &params, &RouteContext::default())
        .await?;
    Ok(success_many(listing.data))
}

pub async fn stats(
    State(state): State<AppState>,
    Path(resource): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let listing = state.factory(&resource)?.stats().await?;
    Ok(success_many(listing.data))
}

pub async fn monthly_plan(
    State(state): State<AppState>,
    Path((resource, year)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let listing = state.factory(&resource)?.monthly_plan(&year).await?;
    Ok(success_many(listing.data))
}

pub async fn create(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    CallerId(caller_id): CallerId,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let body = body_to_record(body)?;
    let ctx = RouteContext {
        parent_id: None,
        caller_id,
    };
    let created = state.factory(&resource)?.create(body, &ctx).await?;
    Ok(success_created(created))
}

pub async fn read(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let record = state.factory(&resource)?.get_one(&id).await?;
    Ok(success_one(record))
}

pub async fn update(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let body = body_to_record(body)?;
    let record = state.factory(&resource)?.update(&id, body).await?;
    Ok(success_one(record))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    state.factory(&resource)?.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_nested(
    State(state): State<AppState>,
    Path((resource, id, nested)): Path<(String, String, String)>,
    Query(pairs): Pairs,
) -> Result<impl IntoResponse, AppError> {
    check_nesting(&state, &resource, &nested)?;
    let params = RawParams::from_pairs(pairs);
    let ctx = RouteContext {
        parent_id: Some(id),
        caller_id: None,
    };
    let listing = state.factory(&nested)?.list(&params, &ctx).await?;
    Ok(success_many(listing.data))
}

pub async fn create_nested(
    State(state): State<AppState>,
    Path((resource, id, nested)): Path<(String, String, String)>,
    CallerId(caller_id): CallerId,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    check_nesting(&state, &resource, &nested)?;
    let body = body_to_record(body)?;
    let ctx = RouteContext {
        parent_id: Some(id),
        caller_id,
    };
    let created = state.factory(&nested)?.create(body, &ctx).await?;
    Ok(success_created(created))
}
