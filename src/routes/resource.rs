//! Resource routes. Paths are parameterized; handlers resolve the resource by name.

use crate::handlers::resource::{
    create, create_nested, delete as delete_handler, list, list_alias, list_nested, monthly_plan, read, stats, update,
};
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn resource_routes(state: AppState) -> Router {
    Router::new()
        .route("/:resource", get(list).post(create))
        .route("/:resource/aliases/:alias", get(list_alias))
        .route("/:resource/stats", get(stats))
        .route("/:resource/monthly-plan/:year", get(monthly_plan))
        .route("/:resource/:id", get(read).patch(update).delete(delete_handler))
        .route("/:resource/:id/:nested", get(list_nested).post(create_nested))
        .with_state(state)
}
