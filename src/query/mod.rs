//! URL query string to retrieval request, and retrieval request to an executable plan.

pub mod features;
pub mod params;
pub mod plan;
pub mod request;
pub mod scalar;

pub use features::*;
pub use params::*;
pub use plan::{project, QueryPlan};
pub use request::*;
pub use scalar::Scalar;
