use serde::{Deserialize, Serialize};

use crate::grid::{BoxId, EdgeId};

/// A player in a game session. `id` is stable across reconnects; `score`
/// counts owned boxes and never decreases within a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub score: u32,
}

/// Lifecycle of a game session. `Completed` and `Abandoned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    Active,
    Completed,
    Abandoned,
}

impl GameStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }
}

impl std::fmt::Display for GameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Abandoned => write!(f, "ABANDONED"),
        }
    }
}

/// Wire view of a drawn edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeView {
    pub edge: EdgeId,
    pub owner: Option<String>,
}

/// Wire view of an owned box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxView {
    pub id: BoxId,
    pub owner: String,
}

/// Full room state as sent to clients. Undrawn edges and unowned boxes are
/// omitted; clients enumerate them from `grid_size`. Lists are sorted so the
/// same state always serializes to the same JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub code: String,
    pub grid_size: u8,
    pub status: GameStatus,
    pub players: Vec<Player>,
    /// Id of the player whose turn it is. Absent once the game is over.
    pub current_player_id: Option<String>,
    pub drawn_edges: Vec<EdgeView>,
    pub owned_boxes: Vec<BoxView>,
    pub drawn_count: usize,
    pub total_edges: usize,
}

/// Messages sent from server to clients via WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMsg {
    /// Reply to the creator only.
    RoomCreated {
        code: String,
        player: Player,
        state: GameSnapshot,
    },
    /// Reply to the joining socket, on first join and on reconnect.
    Joined {
        player: Player,
        state: GameSnapshot,
    },
    /// Broadcast to the room when a new player enters turn order.
    PlayerJoined {
        player: Player,
    },
    /// Broadcast after every accepted move, in admission order.
    StateUpdate {
        state: GameSnapshot,
        boxes_completed: Vec<BoxId>,
        next_player_id: Option<String>,
    },
    /// Broadcast once, after the move that draws the last edge.
    GameOver {
        state: GameSnapshot,
        winner: Option<Player>,
        tie: bool,
    },
    /// Reply to an explicit state request.
    StateSync {
        state: GameSnapshot,
    },
    /// Reply to the offending socket only. `kind` is a stable error code.
    ErrorMessage {
        kind: String,
        message: String,
    },
}

/// Messages sent from clients to server via WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMsg {
    CreateRoom { grid_size: u8, name: String },
    JoinRoom { code: String, name: String },
    MakeMove { code: String, edge: EdgeId },
    SyncState { code: String },
}
