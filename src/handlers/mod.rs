//! HTTP handlers for catalog resources.

pub mod resource;
pub use resource::*;
