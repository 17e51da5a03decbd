use std::{fmt::Display, sync::Arc, time::Duration};

use axum::{debug_handler, extract::{ws::Message as WsMessage, State, WebSocketUpgrade}, response::IntoResponse};
use futures_util::{Sink, SinkExt, Stream, StreamExt};

use super::{Hub, Relay};

/// How long one outbound frame may take before the peer counts as gone.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// One socket, any number of rooms. Frames are handled in arrival order; the
/// socket closing (or erroring) is the disconnect event.
#[debug_handler(state = crate::AppState)]
pub async fn room_ws(
    State(relay): State<Arc<Relay>>,
    State(hub): State<Arc<Hub>>,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(async move |stream| {
        let (sender, receiver) = stream.split();
        serve_socket(relay, hub, receiver, sender).await;
    })
}

/// Pumps one connection until either side gives up, then tells the relay.
///
/// The hub dropping the connection (its outbox filled up) ends the forward
/// task, which ends the loop the same way a close frame does.
pub(crate) async fn serve_socket<R, S, E>(relay: Arc<Relay>, hub: Arc<Hub>, mut receiver: R, mut sender: S)
where
    R: Stream<Item = Result<WsMessage, E>> + Unpin,
    S: Sink<WsMessage> + Unpin + Send + 'static,
    E: Display,
{
    let (connection_id, mut rx) = hub.connect();
    tracing::debug!(connection_id = %connection_id, "socket open");

    let mut forward_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!("can't encode {}: {err}", event.name());
                    continue;
                }
            };
            match tokio::time::timeout(WRITE_TIMEOUT, sender.send(WsMessage::Text(text.into()))).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }
    });

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    relay.handle_text(&connection_id, text.as_str()).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(connection_id = %connection_id, "socket error: {err}");
                    break;
                }
            },
            _ = &mut forward_task => break,
        }
    }

    hub.disconnect(&connection_id);
    relay.disconnect(&connection_id).await;
    forward_task.abort();
}
