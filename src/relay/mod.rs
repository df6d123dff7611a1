pub mod channels;
pub mod connection;
pub mod events;

pub use channels::{Published, RoomChannels};
pub use connection::Connection;
pub use events::{ClientEvent, PresenceStatus, ServerEvent};

use std::time::Duration;

use axum::{
    debug_handler,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};

use crate::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// A connection silent this long is assumed dead and torn down; the resulting
/// disconnect is the only cancellation path a connection has.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(75);
const OUTBOUND_QUEUE: usize = 64;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(upgrade))
}

#[debug_handler(state = AppState)]
async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_connection(socket, state))
}

async fn serve_connection(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_QUEUE);

    let mut connection = Connection::new(
        state.db_pool.clone(),
        state.presence.clone(),
        state.channels.clone(),
        outbound_tx.clone(),
    );

    // Presence broadcasts reach every client, joined to a room or not.
    let mut status_rx = state.status_tx.subscribe();
    let status_task = tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => {
                    if outbound_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "connection missed presence broadcasts");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Single writer: room forwarders, presence mirror, and error frames all
    // funnel into one queue, so each channel's ordering survives the fan-in.
    let writer_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            tokio::select! {
                event = outbound_rx.recv() => {
                    let Some(event) = event else { break };
                    let Ok(frame) = serde_json::to_string(&event) else { continue };
                    if sink.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        let frame = match tokio::time::timeout(CLIENT_TIMEOUT, stream.next()).await {
            Err(_) => {
                tracing::info!("connection idle beyond the heartbeat window");
                break;
            }
            Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(frame))) => frame,
        };
        if let Message::Close(_) = frame {
            break;
        }
        let Ok(event) = serde_json::from_slice::<ClientEvent>(&frame.into_data()) else {
            continue;
        };
        connection.handle(event).await;
    }

    connection.shutdown();
    status_task.abort();
    writer_task.abort();
}
