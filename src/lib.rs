//! Tour access: catalog-driven resource access layer for a tour-booking REST backend.
//!
//! A URL query string becomes a filtered, sorted, projected and paginated retrieval request;
//! dependent writes keep their parent's cached count and average in step.

pub mod case;
pub mod config;
pub mod database;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod migration;
pub mod query;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;
pub mod telemetry;

pub use config::{builtin_catalog, load_catalog, resolve, ResolvedModel, ResolvedResource, Settings};
pub use database::{connect, ensure_database_exists};
pub use error::{AppError, ConfigError};
pub use migration::apply_migrations;
pub use routes::{app, common_routes, resource_routes};
pub use service::{ConsistencyEngine, ResourceFactory, RouteContext};
pub use state::AppState;
pub use store::{MemoryStore, PgStore, Record, ResourceStore};
pub use telemetry::init_tracing;
