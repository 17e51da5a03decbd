use std::str::FromStr;

use anyhow::{anyhow, Context};
use axum::http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Where room history lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Sqlite,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "sqlite" => Ok(StoreKind::Sqlite),
            other => Err(anyhow!("MESSAGE_STORE must be memory or sqlite, got {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub store: StoreKind,
    pub database_url: String,
    pub database_max_connections: u32,
    pub cors_origins: CorsOrigins,
    pub log_filter: String,
}

impl Config {
    /// Reads the process environment, with `.env` filling in anything unset.
    pub fn from_env() -> anyhow::Result<Config> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

        let port: u16 = var("PORT", "3001")
            .parse()
            .with_context(|| "PORT must be a port number")?;
        let store: StoreKind = var("MESSAGE_STORE", "memory").parse()?;
        let database_max_connections: u32 = var("DATABASE_MAX_CONNECTIONS", "16")
            .parse()
            .with_context(|| "DATABASE_MAX_CONNECTIONS must be a positive integer")?;
        if database_max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be at least 1"));
        }

        let cors_origins = match var("CORS_ORIGINS", "*").trim() {
            "*" => CorsOrigins::Any,
            list => CorsOrigins::List(
                list.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_owned)
                    .collect()
            ),
        };

        let config = Config {
            host: var("HOST", "0.0.0.0"),
            port,
            store,
            database_url: var("DATABASE_URL", "sqlite://roomrelay.db?mode=rwc"),
            database_max_connections,
            cors_origins,
            log_filter: var("RUST_LOG", "roomrelay=info,tower_http=info"),
        };
        config.allowed_origins()?;

        Ok(config)
    }

    /// Origins as header values; a malformed entry is a startup error.
    pub fn allowed_origins(&self) -> anyhow::Result<Option<Vec<HeaderValue>>> {
        match &self.cors_origins {
            CorsOrigins::Any => Ok(None),
            CorsOrigins::List(origins) => origins.iter()
                .map(|origin| origin.parse::<HeaderValue>().with_context(|| format!("bad CORS origin {origin:?}")))
                .collect::<anyhow::Result<Vec<_>>>()
                .map(Some),
        }
    }

    /// Browsers only need GET for the read endpoints and the socket upgrade,
    /// plus POST for polling-style clients.
    pub fn cors_layer(&self) -> anyhow::Result<CorsLayer> {
        let origin = match self.allowed_origins()? {
            None => AllowOrigin::from(Any),
            Some(origins) => AllowOrigin::list(origins),
        };

        Ok(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST])
        )
    }
}
