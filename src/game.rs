//! Room lifecycle: the session registry and the per-room actor task.
//!
//! Each live room is owned by one spawned task that consumes its command
//! queue strictly in admission order. That single consumer is the room's
//! mutual exclusion: two moves for the same code can never interleave their
//! validation and mutation, while different rooms proceed independently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{broadcast, mpsc, watch};

use crate::code;
use crate::grid::EdgeId;
use crate::persist::{StoreEvent, StoreHandle};
use crate::state::{self, GameState, JoinOutcome, Outcome};
use crate::types::{GameSnapshot, Player, ServerMsg};

/// Commands the WebSocket handler sends to a room task.
#[derive(Debug, Clone)]
pub enum GameCommand {
    Join {
        socket_id: String,
        player_id: String,
        name: String,
    },
    Move {
        socket_id: String,
        player_id: String,
        edge: EdgeId,
    },
    Sync {
        socket_id: String,
    },
    Disconnect {
        socket_id: String,
    },
    CleanupCheck,
}

/// Events emitted by a room to its subscribed sockets.
#[derive(Debug, Clone)]
pub enum GameEvent {
    /// Send a message to a specific socket.
    SendTo { socket_id: String, msg: ServerMsg },
    /// Broadcast a message to all sockets in the room.
    Broadcast { msg: ServerMsg },
}

/// Registry of all live rooms.
pub struct Registry {
    /// code -> room handle
    pub rooms: DashMap<String, GameHandle>,
    /// socket_id -> code, for disconnect routing
    pub sockets: DashMap<String, String>,
}

#[derive(Clone)]
pub struct GameHandle {
    pub code: String,
    pub cmd_tx: mpsc::Sender<GameCommand>,
    pub event_tx: broadcast::Sender<GameEvent>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: DashMap::new(),
            sockets: DashMap::new(),
        })
    }

    pub fn get(&self, room_code: &str) -> Option<GameHandle> {
        self.rooms.get(room_code).map(|h| h.clone())
    }

    /// Drop a room and its socket routes. Safe to call twice; the second
    /// call is a no-op and returns false.
    pub fn remove_room(&self, room_code: &str) -> bool {
        let removed = self.rooms.remove(room_code).is_some();
        if removed {
            self.sockets.retain(|_, c| c != room_code);
        }
        removed
    }
}

/// The per-task view of one room: the authoritative state plus the sockets
/// currently attached to it.
struct Room {
    state: GameState,
    /// socket_id -> player_id for every attached socket.
    connections: HashMap<String, String>,
    cleanup_cancel: Option<watch::Sender<bool>>,
    cleanup_grace: Duration,
}

impl Room {
    fn broadcast(&self, tx: &broadcast::Sender<GameEvent>, msg: ServerMsg) {
        let _ = tx.send(GameEvent::Broadcast { msg });
    }

    fn send_to(&self, tx: &broadcast::Sender<GameEvent>, socket_id: &str, msg: ServerMsg) {
        let _ = tx.send(GameEvent::SendTo {
            socket_id: socket_id.to_string(),
            msg,
        });
    }

    fn cancel_cleanup(&mut self) {
        if let Some(cancel) = self.cleanup_cancel.take() {
            let _ = cancel.send(true);
        }
    }
}

fn error_msg(kind: &'static str, message: impl std::fmt::Display) -> ServerMsg {
    ServerMsg::ErrorMessage {
        kind: kind.to_string(),
        message: message.to_string(),
    }
}

/// Create a new room under a fresh code and spawn its task. Returns the
/// handle and the initial state for the creator's reply.
pub fn create_room(
    registry: Arc<Registry>,
    grid_size: u8,
    creator_socket: String,
    creator: Player,
    store: StoreHandle,
    cleanup_grace: Duration,
) -> Result<(GameHandle, GameSnapshot), state::CreateError> {
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let (event_tx, _) = broadcast::channel(256);

    // Reserve the code atomically against the live map. A duplicate draw
    // retries; two concurrent creates can never claim the same entry.
    let room_code = loop {
        let candidate = code::generate();
        match registry.rooms.entry(candidate.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(GameHandle {
                    code: candidate.clone(),
                    cmd_tx: cmd_tx.clone(),
                    event_tx: event_tx.clone(),
                });
                break candidate;
            }
            Entry::Occupied(_) => continue,
        }
    };

    let game = match GameState::new(grid_size, room_code.clone(), creator.clone()) {
        Ok(game) => game,
        Err(e) => {
            registry.rooms.remove(&room_code);
            return Err(e);
        }
    };
    let snapshot = game.snapshot();

    registry
        .sockets
        .insert(creator_socket.clone(), room_code.clone());
    store.record(StoreEvent::GameCreated {
        code: room_code.clone(),
        grid_size,
        player: creator.clone(),
    });

    let room = Room {
        state: game,
        connections: HashMap::from([(creator_socket, creator.id)]),
        cleanup_cancel: None,
        cleanup_grace,
    };

    let handle = GameHandle {
        code: room_code.clone(),
        cmd_tx,
        event_tx: event_tx.clone(),
    };

    let reg = registry.clone();
    tokio::spawn(room_task(room, cmd_rx, event_tx, reg, store));

    tracing::info!("room created: {} grid: {}", room_code, grid_size);

    Ok((handle, snapshot))
}

async fn room_task(
    mut room: Room,
    mut cmd_rx: mpsc::Receiver<GameCommand>,
    event_tx: broadcast::Sender<GameEvent>,
    registry: Arc<Registry>,
    store: StoreHandle,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            GameCommand::Join {
                socket_id,
                player_id,
                name,
            } => {
                handle_join(&mut room, &event_tx, &registry, &store, socket_id, player_id, name);
            }
            GameCommand::Move {
                socket_id,
                player_id,
                edge,
            } => {
                handle_move(&mut room, &event_tx, &registry, &store, socket_id, player_id, edge);
            }
            GameCommand::Sync { socket_id } => {
                let snapshot = room.state.snapshot();
                room.send_to(&event_tx, &socket_id, ServerMsg::StateSync { state: snapshot });
            }
            GameCommand::Disconnect { socket_id } => {
                if handle_disconnect(&mut room, &registry, socket_id) {
                    break;
                }
            }
            GameCommand::CleanupCheck => {
                if room.state.status.is_terminal() {
                    tracing::info!("room {} cleaned up", room.state.code);
                    break;
                }
            }
        }
    }

    room.cancel_cleanup();
    registry.remove_room(&room.state.code);
    tracing::info!("room {} task ended", room.state.code);
}

fn handle_join(
    room: &mut Room,
    tx: &broadcast::Sender<GameEvent>,
    registry: &Arc<Registry>,
    store: &StoreHandle,
    socket_id: String,
    player_id: String,
    name: String,
) {
    let player = Player {
        id: player_id,
        name,
        score: 0,
    };

    match room.state.add_player(player) {
        Ok(JoinOutcome::Joined(player)) => {
            room.connections.insert(socket_id.clone(), player.id.clone());
            registry
                .sockets
                .insert(socket_id.clone(), room.state.code.clone());
            store.record(StoreEvent::PlayerJoined {
                code: room.state.code.clone(),
                player: player.clone(),
            });

            room.send_to(tx, &socket_id, ServerMsg::Joined {
                player: player.clone(),
                state: room.state.snapshot(),
            });
            room.broadcast(tx, ServerMsg::PlayerJoined { player });
        }
        Ok(JoinOutcome::Rejoined(player)) => {
            // reconnect: rebind the socket and re-send state, nothing to announce
            room.connections.insert(socket_id.clone(), player.id.clone());
            registry
                .sockets
                .insert(socket_id.clone(), room.state.code.clone());

            room.send_to(tx, &socket_id, ServerMsg::Joined {
                player,
                state: room.state.snapshot(),
            });
            tracing::info!("player rejoined room {}", room.state.code);
        }
        Err(e) => {
            room.send_to(tx, &socket_id, error_msg(e.kind(), &e));
        }
    }
}

fn handle_move(
    room: &mut Room,
    tx: &broadcast::Sender<GameEvent>,
    registry: &Arc<Registry>,
    store: &StoreHandle,
    socket_id: String,
    player_id: String,
    edge: EdgeId,
) {
    let outcome = match room.state.apply_move(edge, &player_id) {
        Ok(outcome) => outcome,
        Err(e) => {
            // rejected moves reach only the offending socket
            room.send_to(tx, &socket_id, error_msg(e.kind(), &e));
            return;
        }
    };

    let snapshot = room.state.snapshot();
    let next_player_id = if outcome.game_ended {
        None
    } else {
        Some(outcome.next_player_id.clone())
    };
    room.broadcast(tx, ServerMsg::StateUpdate {
        state: snapshot.clone(),
        boxes_completed: outcome.boxes_completed.clone(),
        next_player_id,
    });

    if outcome.game_ended {
        let (winner, tie) = match state::winner(&room.state.players) {
            Outcome::Winner(p) => (Some(p), false),
            Outcome::Tie => (None, true),
        };
        store.record(StoreEvent::GameCompleted {
            code: room.state.code.clone(),
            winner: winner.as_ref().map(|p| p.id.clone()),
            scores: room.state.players.clone(),
        });
        tracing::info!("room {} completed", room.state.code);

        room.broadcast(tx, ServerMsg::GameOver {
            state: snapshot,
            winner,
            tie,
        });

        let cmd_tx = registry.rooms.get(&room.state.code).map(|h| h.cmd_tx.clone());
        let delay = room.cleanup_grace;
        schedule_cleanup(room, cmd_tx, delay);
    }
}

/// Detach a socket. Returns true when the room should shut down because the
/// last socket of a still-active game is gone.
fn handle_disconnect(room: &mut Room, registry: &Arc<Registry>, socket_id: String) -> bool {
    registry.sockets.remove(&socket_id);
    room.connections.remove(&socket_id);

    if room.connections.is_empty() && room.state.status.is_active() {
        room.state.abandon();
        tracing::info!("room {} abandoned", room.state.code);
        return true;
    }
    false
}

/// Keep a completed room resolvable for the grace window, then fire the
/// cleanup command. The sleeper is cancelled if the room goes away first,
/// so it can never act on a reused code.
fn schedule_cleanup(room: &mut Room, cmd_tx: Option<mpsc::Sender<GameCommand>>, delay: Duration) {
    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    room.cleanup_cancel = Some(cancel_tx);

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                if let Some(tx) = cmd_tx {
                    let _ = tx.send(GameCommand::CleanupCheck).await;
                }
            }
            _ = cancel_rx.changed() => {}
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::EdgeId;
    use crate::types::GameStatus;

    fn player(id: &str) -> Player {
        Player {
            id: id.to_string(),
            name: id.to_uppercase(),
            score: 0,
        }
    }

    fn h(row: u8, col: u8) -> EdgeId {
        EdgeId::horizontal(row, col)
    }

    fn v(row: u8, col: u8) -> EdgeId {
        EdgeId::vertical(row, col)
    }

    fn spawn_room(
        registry: &Arc<Registry>,
        grid_size: u8,
    ) -> (GameHandle, broadcast::Receiver<GameEvent>) {
        let (handle, _snapshot) = create_room(
            registry.clone(),
            grid_size,
            "s1".to_string(),
            player("alice"),
            StoreHandle::disabled(),
            Duration::from_millis(50),
        )
        .unwrap();
        let rx = handle.event_tx.subscribe();
        (handle, rx)
    }

    async fn next_event(rx: &mut broadcast::Receiver<GameEvent>) -> GameEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn next_update(rx: &mut broadcast::Receiver<GameEvent>) -> GameSnapshot {
        match next_event(rx).await {
            GameEvent::Broadcast {
                msg: ServerMsg::StateUpdate { state, .. },
            } => state,
            other => panic!("expected StateUpdate, got {:?}", other),
        }
    }

    async fn wait_until(registry: &Arc<Registry>, gone: &str) {
        for _ in 0..100 {
            if !registry.rooms.contains_key(gone) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("room {} never removed", gone);
    }

    async fn join(handle: &GameHandle, socket: &str, id: &str) {
        handle
            .cmd_tx
            .send(GameCommand::Join {
                socket_id: socket.to_string(),
                player_id: id.to_string(),
                name: id.to_uppercase(),
            })
            .await
            .unwrap();
    }

    async fn make_move(handle: &GameHandle, socket: &str, id: &str, edge: EdgeId) {
        handle
            .cmd_tx
            .send(GameCommand::Move {
                socket_id: socket.to_string(),
                player_id: id.to_string(),
                edge,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_room_registers_a_valid_code() {
        let registry = Registry::new();
        let (handle, snapshot) = create_room(
            registry.clone(),
            3,
            "s1".to_string(),
            player("alice"),
            StoreHandle::disabled(),
            Duration::from_secs(60),
        )
        .unwrap();

        assert!(code::is_valid(&handle.code));
        assert!(registry.rooms.contains_key(&handle.code));
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(snapshot.status, GameStatus::Active);
        assert_eq!(snapshot.current_player_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn invalid_grid_size_leaves_no_entry() {
        let registry = Registry::new();
        let result = create_room(
            registry.clone(),
            1,
            "s1".to_string(),
            player("alice"),
            StoreHandle::disabled(),
            Duration::from_secs(60),
        );

        assert!(result.is_err());
        assert!(registry.rooms.is_empty());
    }

    #[tokio::test]
    async fn join_acks_the_joiner_then_announces() {
        let registry = Registry::new();
        let (handle, mut rx) = spawn_room(&registry, 2);

        join(&handle, "s2", "bob").await;

        match next_event(&mut rx).await {
            GameEvent::SendTo {
                socket_id,
                msg: ServerMsg::Joined { player, state },
            } => {
                assert_eq!(socket_id, "s2");
                assert_eq!(player.id, "bob");
                assert_eq!(state.players.len(), 2);
            }
            other => panic!("expected Joined, got {:?}", other),
        }
        match next_event(&mut rx).await {
            GameEvent::Broadcast {
                msg: ServerMsg::PlayerJoined { player },
            } => assert_eq!(player.id, "bob"),
            other => panic!("expected PlayerJoined, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejoin_resends_state_without_announcing() {
        let registry = Registry::new();
        let (handle, mut rx) = spawn_room(&registry, 2);

        join(&handle, "s2", "bob").await;
        next_event(&mut rx).await; // Joined
        next_event(&mut rx).await; // PlayerJoined

        // same player, fresh socket
        join(&handle, "s3", "bob").await;
        match next_event(&mut rx).await {
            GameEvent::SendTo {
                socket_id,
                msg: ServerMsg::Joined { player, state },
            } => {
                assert_eq!(socket_id, "s3");
                assert_eq!(player.id, "bob");
                assert_eq!(state.players.len(), 2);
            }
            other => panic!("expected Joined, got {:?}", other),
        }

        // no announcement followed; the next event is the sync reply
        handle
            .cmd_tx
            .send(GameCommand::Sync {
                socket_id: "s3".to_string(),
            })
            .await
            .unwrap();
        match next_event(&mut rx).await {
            GameEvent::SendTo {
                msg: ServerMsg::StateSync { .. },
                ..
            } => {}
            other => panic!("expected StateSync, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn queued_moves_apply_in_admission_order() {
        let registry = Registry::new();
        let (handle, mut rx) = spawn_room(&registry, 2);

        join(&handle, "s2", "bob").await;
        next_event(&mut rx).await;
        next_event(&mut rx).await;

        // both moves are admitted before either is processed; the second
        // must observe the first's mutation
        make_move(&handle, "s1", "alice", h(0, 0)).await;
        make_move(&handle, "s2", "bob", v(0, 0)).await;

        let first = next_update(&mut rx).await;
        assert_eq!(first.drawn_count, 1);
        assert_eq!(first.current_player_id.as_deref(), Some("bob"));

        let second = next_update(&mut rx).await;
        assert_eq!(second.drawn_count, 2);
        assert_eq!(second.current_player_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn losing_racer_gets_an_error_and_no_update() {
        let registry = Registry::new();
        let (handle, mut rx) = spawn_room(&registry, 2);

        join(&handle, "s2", "bob").await;
        next_event(&mut rx).await;
        next_event(&mut rx).await;

        // both players race for the same edge
        make_move(&handle, "s1", "alice", h(0, 0)).await;
        make_move(&handle, "s2", "bob", h(0, 0)).await;

        let update = next_update(&mut rx).await;
        assert_eq!(update.drawn_count, 1);

        match next_event(&mut rx).await {
            GameEvent::SendTo {
                socket_id,
                msg: ServerMsg::ErrorMessage { kind, .. },
            } => {
                assert_eq!(socket_id, "s2");
                assert_eq!(kind, "EDGE_ALREADY_DRAWN");
            }
            other => panic!("expected ErrorMessage, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn finished_game_announces_winner_and_cleans_up() {
        let registry = Registry::new();
        let (handle, mut rx) = spawn_room(&registry, 2);
        let room_code = handle.code.clone();

        join(&handle, "s2", "bob").await;
        next_event(&mut rx).await;
        next_event(&mut rx).await;

        make_move(&handle, "s1", "alice", h(0, 0)).await;
        make_move(&handle, "s2", "bob", v(0, 0)).await;
        make_move(&handle, "s1", "alice", h(1, 0)).await;
        make_move(&handle, "s2", "bob", v(0, 1)).await;

        for _ in 0..3 {
            next_update(&mut rx).await;
        }
        let last = next_update(&mut rx).await;
        assert_eq!(last.status, GameStatus::Completed);
        assert_eq!(last.drawn_count, 4);

        match next_event(&mut rx).await {
            GameEvent::Broadcast {
                msg: ServerMsg::GameOver { winner, tie, .. },
            } => {
                assert!(!tie);
                assert_eq!(winner.unwrap().id, "bob");
            }
            other => panic!("expected GameOver, got {:?}", other),
        }

        // the 50ms grace in spawn_room elapses and the room goes away
        wait_until(&registry, &room_code).await;
        assert!(!registry.remove_room(&room_code));
    }

    #[tokio::test]
    async fn abandoned_room_is_removed_immediately() {
        let registry = Registry::new();
        let (handle, _rx) = spawn_room(&registry, 2);
        let room_code = handle.code.clone();

        join(&handle, "s2", "bob").await;

        handle
            .cmd_tx
            .send(GameCommand::Disconnect {
                socket_id: "s1".to_string(),
            })
            .await
            .unwrap();
        handle
            .cmd_tx
            .send(GameCommand::Disconnect {
                socket_id: "s2".to_string(),
            })
            .await
            .unwrap();

        wait_until(&registry, &room_code).await;
        assert!(registry.sockets.is_empty());
    }

    #[tokio::test]
    async fn remove_room_is_idempotent() {
        let registry = Registry::new();
        assert!(!registry.remove_room("NOSUCH"));

        let (handle, _rx) = spawn_room(&registry, 2);
        assert!(registry.remove_room(&handle.code));
        assert!(!registry.remove_room(&handle.code));
    }
}
