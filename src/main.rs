mod code;
mod config;
mod game;
mod grid;
mod persist;
mod state;
mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

use crate::game::{GameCommand, GameEvent, GameHandle, Registry};
use crate::persist::StoreHandle;
use crate::types::*;

#[derive(Clone)]
struct AppState {
    registry: Arc<Registry>,
    store: StoreHandle,
    cleanup_grace: Duration,
}

// ─── WebSocket transport ──────────────────────────────────────────

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    // the client's stable identity; reconnects present the same id
    let player_id = params
        .get("clientId")
        .filter(|id| !id.is_empty())
        .cloned()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, player_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, player_id: String) {
    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));

    let socket_id = uuid::Uuid::new_v4().to_string();
    tracing::info!("WebSocket connected: {} player: {}", socket_id, player_id);

    // Track which room this socket is subscribed to for broadcasting
    let current_room: Arc<Mutex<Option<GameHandle>>> = Arc::new(Mutex::new(None));

    // Spawn a task that listens for room events and forwards to this socket
    let sender_clone = sender.clone();
    let socket_id_clone = socket_id.clone();
    let current_room_clone = current_room.clone();

    let event_task = tokio::spawn(async move {
        loop {
            let handle = {
                let guard = current_room_clone.lock().await;
                guard.clone()
            };

            let Some(handle) = handle else {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                continue;
            };

            let mut event_rx = handle.event_tx.subscribe();

            loop {
                match event_rx.recv().await {
                    Ok(event) => {
                        let msg = match &event {
                            GameEvent::SendTo { socket_id, msg } => {
                                if *socket_id != socket_id_clone {
                                    continue;
                                }
                                msg
                            }
                            GameEvent::Broadcast { msg } => msg,
                        };

                        if let Ok(json) = serde_json::to_string(msg) {
                            let mut s = sender_clone.lock().await;
                            if s.send(Message::Text(json.into())).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        // Room ended, wait for a potential new room
                        break;
                    }
                }
            }
        }
    });

    // Process incoming messages
    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };

        let client_msg: ClientMsg = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid message: {}", e);
                continue;
            }
        };

        match client_msg {
            ClientMsg::CreateRoom { grid_size, name } => {
                let creator = Player {
                    id: player_id.clone(),
                    name,
                    score: 0,
                };
                match game::create_room(
                    state.registry.clone(),
                    grid_size,
                    socket_id.clone(),
                    creator.clone(),
                    state.store.clone(),
                    state.cleanup_grace,
                ) {
                    Ok((handle, snapshot)) => {
                        *current_room.lock().await = Some(handle.clone());
                        send_msg(&sender, &ServerMsg::RoomCreated {
                            code: handle.code.clone(),
                            player: creator,
                            state: snapshot,
                        })
                        .await;
                    }
                    Err(e) => {
                        send_msg(&sender, &ServerMsg::ErrorMessage {
                            kind: e.kind().to_string(),
                            message: e.to_string(),
                        })
                        .await;
                    }
                }
            }

            ClientMsg::JoinRoom { code, name } => {
                if !code::is_valid(&code) {
                    send_room_not_found(&sender).await;
                    continue;
                }
                if let Some(handle) = state.registry.get(&code) {
                    *current_room.lock().await = Some(handle.clone());
                    let _ = handle
                        .cmd_tx
                        .send(GameCommand::Join {
                            socket_id: socket_id.clone(),
                            player_id: player_id.clone(),
                            name,
                        })
                        .await;
                } else {
                    send_room_not_found(&sender).await;
                }
            }

            ClientMsg::MakeMove { code, edge } => {
                if let Some(handle) = state.registry.get(&code) {
                    *current_room.lock().await = Some(handle.clone());
                    let _ = handle
                        .cmd_tx
                        .send(GameCommand::Move {
                            socket_id: socket_id.clone(),
                            player_id: player_id.clone(),
                            edge,
                        })
                        .await;
                } else {
                    send_room_not_found(&sender).await;
                }
            }

            ClientMsg::SyncState { code } => {
                if let Some(handle) = state.registry.get(&code) {
                    *current_room.lock().await = Some(handle.clone());
                    let _ = handle
                        .cmd_tx
                        .send(GameCommand::Sync {
                            socket_id: socket_id.clone(),
                        })
                        .await;
                } else {
                    send_room_not_found(&sender).await;
                }
            }
        }
    }

    // Socket disconnected
    tracing::info!("WebSocket disconnected: {}", socket_id);
    event_task.abort();

    // Notify the room about the disconnect
    let room_code = state
        .registry
        .sockets
        .get(&socket_id)
        .map(|entry| entry.value().clone());
    if let Some(room_code) = room_code {
        if let Some(handle) = state.registry.get(&room_code) {
            let _ = handle
                .cmd_tx
                .send(GameCommand::Disconnect {
                    socket_id: socket_id.clone(),
                })
                .await;
        }
    }
}

async fn send_msg(sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>, msg: &ServerMsg) {
    if let Ok(json) = serde_json::to_string(msg) {
        let mut s = sender.lock().await;
        let _ = s.send(Message::Text(json.into())).await;
    }
}

async fn send_room_not_found(sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>) {
    send_msg(sender, &ServerMsg::ErrorMessage {
        kind: "ROOM_NOT_FOUND".to_string(),
        message: "Room not found".to_string(),
    })
    .await;
}

// ─── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cfg = config::load();

    let registry = Registry::new();
    let store = StoreHandle::spawn(cfg.data_path.clone());

    let state = AppState {
        registry,
        store,
        cleanup_grace: cfg.cleanup_grace,
    };

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", cfg.port))
        .await
        .expect("Failed to bind");

    tracing::info!("BoxRush server running on port {}", cfg.port);

    axum::serve(listener, app).await.unwrap();
}
