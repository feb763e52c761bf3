//! Resource services: generic CRUD, request validation and aggregate maintenance.

pub mod consistency;
pub mod factory;
mod validation;

pub use consistency::{AggregateValues, ConsistencyEngine};
pub use factory::{Listing, ResourceFactory, RouteContext};
pub use validation::RequestValidator;
