use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State}, Json};

use crate::AppResult;

use super::{Message, Participant, Relay};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn rooms(State(relay): State<Arc<Relay>>) -> Json<Vec<String>> {
    Json(relay.rooms())
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn online(
    State(relay): State<Arc<Relay>>,
    Path(room_id): Path<String>,
) -> Json<Vec<Participant>> {
    Json(relay.online(&room_id))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn history(
    State(relay): State<Arc<Relay>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Vec<Message>>> {
    Ok(Json(relay.history(&room_id).await?))
}
