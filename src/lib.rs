pub mod config;
pub mod db;
pub mod events;
pub mod rooms;
pub mod store;

use std::sync::Arc;

use axum::{extract::FromRef, http::StatusCode, response::{IntoResponse, Response}};

use rooms::{Hub, Relay};
use store::MessageStore;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub hub: Arc<Hub>,
}

impl AppState {
    /// Wires a fresh relay to a fresh hub. Each call is an independent
    /// server's worth of state.
    pub fn new(store: Arc<dyn MessageStore>) -> AppState {
        let hub = Arc::new(Hub::new());
        let relay = Arc::new(Relay::new(store, hub.clone()));

        AppState { relay, hub }
    }
}

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!("request failed: {:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{}\n\n{}", self.0, self.0.backtrace()),
        )
            .into_response()
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        Self(anyhow::Error::msg(err))
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self(anyhow::Error::msg(err.to_owned()))
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(serde_json::Error);
apperr_impl!(sqlx::Error);
apperr_impl!(axum::Error);
apperr_impl!(store::StoreError);
