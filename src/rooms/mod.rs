mod hub;
mod msg;
mod registry;
mod relay;
mod room;
mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub use hub::Hub;
pub use msg::{Message, NewMessage};
pub use registry::{ConnectionId, Participant, RoomRegistry};
pub use relay::Relay;
pub use ws::room_ws;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(room::rooms))
        .route("/{room_id}/online", get(room::online))
        .route("/{room_id}/history", get(room::history))
}
