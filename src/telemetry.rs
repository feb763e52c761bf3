//! Tracing subscriber setup.

use crate::config::Environment;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "tour_access=info,tour_server=info";

/// Install the global subscriber: `RUST_LOG` if set, else [`DEFAULT_FILTER`]. JSON lines in production.
pub fn init_tracing(environment: Environment) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match environment {
        Environment::Production => builder.json().with_current_span(false).try_init(),
        Environment::Development => builder.try_init(),
    };
    if let Err(e) = result {
        eprintln!("tracing already initialized: {}", e);
    }
}
