//! Shared application state for all routes.

use crate::config::{ResolvedModel, Settings};
use crate::error::AppError;
use crate::service::ResourceFactory;
use crate::store::ResourceStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ResourceStore>,
    pub model: Arc<ResolvedModel>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(store: Arc<dyn ResourceStore>, model: Arc<ResolvedModel>, settings: Settings) -> Self {
        AppState {
            store,
            model,
            settings: Arc::new(settings),
        }
    }

    /// Factory for one resource, configured from settings. Unknown resources are not found.
    pub fn factory(&self, resource: &str) -> Result<ResourceFactory, AppError> {
        Ok(ResourceFactory::new(self.store.clone(), self.model.clone(), resource)?
            .with_strict_pages(self.settings.strict_pagination))
    }
}
