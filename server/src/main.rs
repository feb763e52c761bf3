//! Tour server: loads settings and the resource catalog, prepares storage, serves the API.
//!
//! Run from repo root: `cargo run -p tour-server`
//! `STORE_BACKEND=memory` runs without a database.

use std::sync::Arc;
use tokio::net::TcpListener;
use tour_access::config::StoreBackend;
use tour_access::{
    app, apply_migrations, builtin_catalog, connect, ensure_database_exists, init_tracing, load_catalog, resolve,
    AppState, ConsistencyEngine, MemoryStore, PgStore, ResourceStore, Settings,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;
    init_tracing(settings.environment);

    let catalog = match &settings.catalog_path {
        Some(path) => load_catalog(path).await?,
        None => builtin_catalog()?,
    };
    let model = Arc::new(resolve(&catalog, &settings.schema)?);

    let store: Arc<dyn ResourceStore> = match settings.backend {
        StoreBackend::Postgres => {
            ensure_database_exists(&settings.database_url).await?;
            let pool = connect(&settings).await?;
            apply_migrations(&pool, &model).await?;
            Arc::new(PgStore::new(pool, model.clone()))
        }
        StoreBackend::Memory => Arc::new(MemoryStore::new(model.clone())),
    };

    if settings.recompute_on_start {
        let engine = ConsistencyEngine::new(store.clone(), model.clone());
        for dependent in model.resources.iter().filter(|r| r.aggregate.is_some()) {
            engine.recompute_all(&dependent.name).await?;
        }
    }

    let addr = settings.bind_addr();
    let state = AppState::new(store, model, settings);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app(state)).await?;
    Ok(())
}
