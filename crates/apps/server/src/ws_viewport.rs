//! WebSocket viewport sessions.
//!
//! Each connection owns one `ViewportSession`:
//! - Client sends viewport changes as the map moves
//! - Server decides whether the viewport escaped the loaded region
//! - Geo-box fetches run as background tasks and may overlap
//! - Completions come back over a channel and only new items are pushed

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use feed::{
    ClientMessage, FeedConfig, FetchId, FetchOrder, Item, ObjectStore, ServerMessage, StoreError,
    ViewportSession,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::AppState;

type FetchOutcome = (FetchId, Result<Vec<Item>, StoreError>);

/// Per-connection state.
pub struct WsSession {
    pub session_id: String,
    pub viewport: ViewportSession,
    pub store: Arc<dyn ObjectStore>,
}

impl WsSession {
    pub fn new(store: Arc<dyn ObjectStore>, config: FeedConfig) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            viewport: ViewportSession::new(config),
            store,
        }
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let store: Arc<dyn ObjectStore> = state.store.clone();
    let config = state.config.feed.clone();
    ws.on_upgrade(move |socket| handle_ws_connection(socket, store, config))
}

/// Handle a WebSocket connection for one viewport session.
pub async fn handle_ws_connection(
    socket: WebSocket,
    store: Arc<dyn ObjectStore>,
    config: FeedConfig,
) {
    let mut session = WsSession::new(store, config);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let hello = ServerMessage::Hello {
        session_id: session.session_id.clone(),
        server_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let hello = match serde_json::to_string(&hello) {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to serialize hello: {e}");
            return;
        }
    };
    if let Err(e) = ws_tx.send(Message::Text(hello)).await {
        error!("Failed to send hello: {e}");
        return;
    }

    info!("WS session {} connected", session.session_id);

    // Outgoing messages are serialized by a dedicated sender task.
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(256);
    let sender_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if let Err(e) = ws_tx.send(Message::Text(text)).await {
                warn!("Failed to send message: {e}");
                break;
            }
        }
    });

    // Fetch completions are delivered back to this task, which is the only
    // writer of the session state.
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<FetchOutcome>();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let Some(msg) = msg else { break };
                let msg = match msg {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("WS receive error: {e}");
                        break;
                    }
                };

                match msg {
                    Message::Text(text) => {
                        if handle_text(&mut session, &text, &out_tx, &done_tx).await.is_err() {
                            break;
                        }
                    }
                    // Protocol pings are answered by axum; app-level pings
                    // arrive as `ping` text messages.
                    Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(_) => {
                        info!("WS session {} closed by client", session.session_id);
                        break;
                    }
                }
            }
            Some(outcome) = done_rx.recv() => {
                if handle_fetch_outcome(&mut session, outcome, &out_tx).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(out_tx);
    let _ = sender_task.await;
    info!("WS session {} disconnected", session.session_id);
}

/// Handles one text frame. Malformed messages are answered with a
/// `parse_error`; an error is returned only once the sender task is gone.
async fn handle_text(
    session: &mut WsSession,
    text: &str,
    out_tx: &mpsc::Sender<ServerMessage>,
    done_tx: &mpsc::UnboundedSender<FetchOutcome>,
) -> Result<(), mpsc::error::SendError<ServerMessage>> {
    if let Err(e) = handle_client_message(session, text, out_tx, done_tx).await {
        let error_msg = ServerMessage::Error {
            code: "parse_error".to_string(),
            message: e.to_string(),
        };
        out_tx.send(error_msg).await?;
    }
    Ok(())
}

/// Merges a completed fetch and pushes whatever it produced.
async fn handle_fetch_outcome(
    session: &mut WsSession,
    (id, result): FetchOutcome,
    out_tx: &mpsc::Sender<ServerMessage>,
) -> Result<(), mpsc::error::SendError<ServerMessage>> {
    session.viewport.complete_fetch(id, result);
    flush_signals(session, out_tx).await
}

async fn handle_client_message(
    session: &mut WsSession,
    text: &str,
    out_tx: &mpsc::Sender<ServerMessage>,
    done_tx: &mpsc::UnboundedSender<FetchOutcome>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let msg: ClientMessage = serde_json::from_str(text)?;

    let order = match msg {
        ClientMessage::ViewportChanged { region } => session.viewport.on_viewport_changed(region),
        ClientMessage::MapLoaded { region } => session.viewport.on_map_loaded(region),
        ClientMessage::Reset => {
            debug!("Session {} reset", session.session_id);
            session.viewport.reset()
        }
        ClientMessage::Ping { seq } => {
            out_tx.send(ServerMessage::Pong { seq }).await?;
            None
        }
    };

    if let Some(order) = order {
        spawn_fetch(session, order, done_tx.clone());
    }
    flush_signals(session, out_tx).await?;
    Ok(())
}

/// Runs a fetch in the background. In-flight fetches are never cancelled; a
/// completion arriving after disconnect is dropped with the channel.
fn spawn_fetch(
    session: &mut WsSession,
    order: FetchOrder,
    done_tx: mpsc::UnboundedSender<FetchOutcome>,
) {
    session.viewport.mark_in_flight(order.id);
    debug!(
        "Session {} {} for {:?}",
        session.session_id, order.id, order.bounds
    );

    let store = session.store.clone();
    tokio::spawn(async move {
        let outcome = order.run(store.as_ref()).await;
        let _ = done_tx.send(outcome);
    });
}

async fn flush_signals(
    session: &mut WsSession,
    out_tx: &mpsc::Sender<ServerMessage>,
) -> Result<(), mpsc::error::SendError<ServerMessage>> {
    for signal in session.viewport.drain_signals() {
        out_tx.send(signal.into()).await?;
    }
    Ok(())
}
