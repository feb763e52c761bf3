//! Process settings from environment variables (`.env` honored via dotenvy).

use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub backend: StoreBackend,
    /// Postgres schema holding resource tables.
    pub schema: String,
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub max_connections: u32,
    pub body_limit_bytes: usize,
    /// Out-of-range pages are reported as not found instead of an empty list.
    pub strict_pagination: bool,
    pub catalog_path: Option<PathBuf>,
    pub recompute_on_start: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: "postgres://localhost/tours".into(),
            backend: StoreBackend::Postgres,
            schema: "public".into(),
            host: "0.0.0.0".into(),
            port: 3000,
            environment: Environment::Development,
            max_connections: 5,
            body_limit_bytes: 10 * 1024,
            strict_pagination: false,
            catalog_path: None,
            recompute_on_start: false,
        }
    }
}

fn parse<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        Some(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map_err(|e| ConfigError::Load(format!("{}: {}", name, e))),
        _ => Ok(default),
    }
}

impl Settings {
    /// Load `.env` (if present) and read the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; missing keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Settings::default();
        let schema = lookup("TOUR_SCHEMA").unwrap_or(d.schema);
        if schema.is_empty() || !schema.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ConfigError::Load(format!("TOUR_SCHEMA: invalid identifier '{}'", schema)));
        }
        Ok(Settings {
            database_url: lookup("DATABASE_URL").unwrap_or(d.database_url),
            backend: parse("STORE_BACKEND", lookup("STORE_BACKEND"), d.backend)?,
            schema,
            host: lookup("HOST").unwrap_or(d.host),
            port: parse("PORT", lookup("PORT"), d.port)?,
            environment: parse("APP_ENV", lookup("APP_ENV"), d.environment)?,
            max_connections: parse("DB_MAX_CONNECTIONS", lookup("DB_MAX_CONNECTIONS"), d.max_connections)?,
            body_limit_bytes: parse("BODY_LIMIT_BYTES", lookup("BODY_LIMIT_BYTES"), d.body_limit_bytes)?,
            strict_pagination: parse("STRICT_PAGINATION", lookup("STRICT_PAGINATION"), d.strict_pagination)?,
            catalog_path: lookup("CATALOG_PATH").filter(|p| !p.is_empty()).map(PathBuf::from),
            recompute_on_start: parse("RECOMPUTE_ON_START", lookup("RECOMPUTE_ON_START"), d.recompute_on_start)?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
