use std::sync::Arc;

use anyhow::Context;
use axum::{debug_handler, extract::State, routing::get, Json, Router};
use roomrelay::{config::{Config, StoreKind}, db, rooms, store::{MemoryStore, MessageStore, SqliteStore}, AppState};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_filter))
        .init();

    let db_pool = match config.store {
        StoreKind::Memory => None,
        StoreKind::Sqlite => Some(
            db::connect(&config.database_url, config.database_max_connections)
                .await
                .with_context(|| format!("opening {}", config.database_url))?
        ),
    };
    let store: Arc<dyn MessageStore> = match &db_pool {
        None => Arc::new(MemoryStore::new()),
        Some(db_pool) => Arc::new(SqliteStore::new(db_pool.clone())),
    };
    let app_state = AppState::new(store);

    let app = Router::new()
        .route("/health", get(health))
        .route("/ws", get(rooms::room_ws))

        .nest("/r", rooms::router())

        .with_state(app_state)
        .layer(config.cors_layer()?)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("binding {}:{}", config.host, config.port))?;
    tracing::info!("listening on {} with {:?} history", listener.local_addr()?, config.store);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(db_pool) = db_pool {
        db_pool.close().await;
    }
    tracing::info!("bye");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("can't listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
}

#[debug_handler]
async fn health(State(app_state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "rooms": app_state.relay.rooms().len(),
        "connections": app_state.hub.connection_count(),
    }))
}
