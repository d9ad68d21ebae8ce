//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::session::Command;
use crate::util::rate_limit::ClientRateLimiter;
use crate::ws::hub::ClientLink;
use crate::ws::protocol::{ClientMsg, PageKind, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sink, mut ws_stream) = socket.split();

    // the first message says which page this is
    let Some(page) = await_page_init(&mut ws_stream).await else {
        debug!("Connection closed before page_init");
        return;
    };

    match page {
        PageKind::Game => run_game_client(ws_sink, ws_stream, state).await,
        PageKind::Stats => run_stats_client(ws_sink, ws_stream, state).await,
    }
}

async fn await_page_init(ws_stream: &mut SplitStream<WebSocket>) -> Option<PageKind> {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMsg>(&text) {
                Ok(ClientMsg::PageInit { page }) => return Some(page),
                Ok(other) => warn!(msg = ?other, "Expected page_init, ignoring"),
                Err(e) => warn!(error = %e, "Failed to parse client message"),
            },
            Ok(Message::Close(_)) => return None,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "WebSocket error before page_init");
                return None;
            }
        }
    }
    None
}

/// Run a game page: register an actor, then forward its messages to the session
async fn run_game_client(
    ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    state: AppState,
) {
    let (link, outbound_rx) = ClientLink::channel();
    let conn_id = link.conn_id;
    let closed = link.closed.clone();

    let actor_id = match state.session.connect(link).await {
        Ok(id) => id,
        Err(e) => {
            error!(error = %e, "Failed to register game connection");
            return;
        }
    };
    info!(actor_id = %actor_id, "Game page connected");

    let writer_handle = tokio::spawn(write_loop(ws_sink, outbound_rx, actor_id.to_string()));
    let rate_limiter = ClientRateLimiter::new();

    loop {
        tokio::select! {
            _ = closed.notified() => {
                info!(actor_id = %actor_id, "Connection closed by server");
                break;
            }
            frame = ws_stream.next() => {
                let Some(text) = read_text(frame, &actor_id) else {
                    break;
                };
                let Some(text) = text else {
                    continue;
                };
                if !rate_limiter.check_input() {
                    warn!(actor_id = %actor_id, "Rate limited input message");
                    continue;
                }

                let msg = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(actor_id = %actor_id, error = %e, "Failed to parse client message");
                        continue;
                    }
                };
                if let ClientMsg::ChatMessage { text } = &msg {
                    if !rate_limiter.check_chat() {
                        info!(actor_id = %actor_id, message = %text, "Suppressed chat message");
                        continue;
                    }
                }

                let command = Command::Client { actor_id, conn_id, msg };
                if state.session.send(command).await.is_err() {
                    debug!(actor_id = %actor_id, "Session closed");
                    break;
                }
            }
        }
    }

    let _ = state
        .session
        .send(Command::Disconnect { actor_id, conn_id })
        .await;

    writer_handle.abort();
    info!(actor_id = %actor_id, "WebSocket connection closed");
}

/// Run a stats page: admin commands in, summaries and exports out
async fn run_stats_client(
    ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    state: AppState,
) {
    let (observer_id, outbound_rx) = state.hub.add_observer();
    let writer_handle = tokio::spawn(write_loop(
        ws_sink,
        outbound_rx,
        format!("observer-{}", observer_id),
    ));

    if state
        .session
        .send(Command::ObserverJoined { observer_id })
        .await
        .is_ok()
    {
        while let Some(text) = read_text(ws_stream.next().await, &observer_id) {
            let Some(text) = text else {
                continue;
            };
            match serde_json::from_str::<ClientMsg>(&text) {
                Ok(msg) => {
                    if state
                        .session
                        .send(Command::Admin { observer_id, msg })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => warn!(observer_id = %observer_id, error = %e, "Failed to parse stats message"),
            }
        }
    }

    state.hub.remove_observer(observer_id);
    writer_handle.abort();
    info!(observer_id = %observer_id, "Stats page disconnected");
}

/// `None` ends the connection, `Some(None)` skips a non-text frame
fn read_text<I: std::fmt::Display>(
    frame: Option<Result<Message, axum::Error>>,
    id: &I,
) -> Option<Option<String>> {
    match frame? {
        Ok(Message::Text(text)) => Some(Some(text)),
        Ok(Message::Binary(_)) => {
            warn!(client = %id, "Received binary message, ignoring");
            Some(None)
        }
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => Some(None),
        Ok(Message::Close(_)) => {
            info!(client = %id, "Client initiated close");
            None
        }
        Err(e) => {
            debug!(client = %id, error = %e, "WebSocket error");
            None
        }
    }
}

/// Writer task: outbound queue -> WebSocket
async fn write_loop(
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
    client: String,
) {
    while let Some(msg) = outbound_rx.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(client = %client, error = %e, "WebSocket send failed");
            break;
        }
    }
    let _ = ws_sink.close().await;
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
