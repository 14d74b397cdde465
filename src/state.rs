//! Authoritative state of a single room and the move processor that
//! mutates it.
//!
//! Everything here is synchronous and single-owner; the room task in
//! `game` is the only caller once a session is live, which is what makes
//! concurrent move submission safe without a lock in this module.

use std::collections::HashMap;

use crate::grid::{self, BoxId, EdgeId};
use crate::types::{BoxView, EdgeView, GameSnapshot, GameStatus, Player};

pub const MIN_GRID_SIZE: u8 = 2;
pub const MAX_GRID_SIZE: u8 = 16;

/// One potential line between two adjacent dots. The owner is recorded for
/// display but never scores; only box ownership scores.
#[derive(Debug, Clone, Default)]
pub struct Edge {
    pub drawn: bool,
    pub owner: Option<String>,
}

/// One unit cell. Goes from unowned to owned exactly once.
#[derive(Debug, Clone, Default)]
pub struct BoxCell {
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateError {
    InvalidGridSize { given: u8 },
}

impl std::fmt::Display for CreateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidGridSize { given } => write!(
                f,
                "grid size must be between {MIN_GRID_SIZE} and {MAX_GRID_SIZE} dots per side, got {given}"
            ),
        }
    }
}

impl std::error::Error for CreateError {}

impl CreateError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidGridSize { .. } => "INVALID_GRID_SIZE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    GameNotJoinable,
}

impl std::fmt::Display for JoinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GameNotJoinable => write!(f, "Game is no longer joinable"),
        }
    }
}

impl std::error::Error for JoinError {}

impl JoinError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GameNotJoinable => "GAME_NOT_JOINABLE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveError {
    GameNotActive,
    UnknownEdge,
    EdgeAlreadyDrawn,
    NotPlayersTurn,
}

impl std::fmt::Display for MoveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GameNotActive => write!(f, "Game is not active"),
            Self::UnknownEdge => write!(f, "Edge is not part of this grid"),
            Self::EdgeAlreadyDrawn => write!(f, "Edge has already been drawn"),
            Self::NotPlayersTurn => write!(f, "It's not your turn"),
        }
    }
}

impl std::error::Error for MoveError {}

impl MoveError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GameNotActive => "GAME_NOT_ACTIVE",
            Self::UnknownEdge => "UNKNOWN_EDGE",
            Self::EdgeAlreadyDrawn => "EDGE_ALREADY_DRAWN",
            Self::NotPlayersTurn => "NOT_PLAYERS_TURN",
        }
    }
}

/// Result of joining a room.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// Appended to the end of turn order with score 0.
    Joined(Player),
    /// Already seated; the state was left untouched.
    Rejoined(Player),
}

/// Result of an accepted move.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveOutcome {
    /// Boxes claimed by this move, in topology order. At most two.
    pub boxes_completed: Vec<BoxId>,
    /// Whose turn it is after this move. Meaningless when `game_ended`.
    pub next_player_id: String,
    pub game_ended: bool,
}

/// Final outcome derived from scores. A strict maximum names a winner;
/// a shared maximum is a tie, which is a normal result and not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Winner(Player),
    Tie,
}

/// Winner/tie computation over final scores. Read-only; callers run it once
/// a game reaches `Completed`.
pub fn winner(players: &[Player]) -> Outcome {
    let best = players.iter().map(|p| p.score).max().unwrap_or(0);
    let mut at_best = players.iter().filter(|p| p.score == best);
    match (at_best.next(), at_best.next()) {
        (Some(p), None) => Outcome::Winner(p.clone()),
        _ => Outcome::Tie,
    }
}

/// The aggregate state of one room.
#[derive(Debug, Clone)]
pub struct GameState {
    pub grid_size: u8,
    pub code: String,
    /// Turn order is join order and never changes.
    pub players: Vec<Player>,
    edges: HashMap<EdgeId, Edge>,
    boxes: HashMap<BoxId, BoxCell>,
    pub current_player_index: usize,
    pub status: GameStatus,
    drawn_count: usize,
}

impl GameState {
    /// Build a fresh room: every edge undrawn, every box unowned, the
    /// creator alone in turn order.
    pub fn new(grid_size: u8, code: String, creator: Player) -> Result<Self, CreateError> {
        if !(MIN_GRID_SIZE..=MAX_GRID_SIZE).contains(&grid_size) {
            return Err(CreateError::InvalidGridSize { given: grid_size });
        }
        let edges = grid::all_edges(grid_size)
            .into_iter()
            .map(|e| (e, Edge::default()))
            .collect();
        let boxes = grid::all_boxes(grid_size)
            .into_iter()
            .map(|b| (b, BoxCell::default()))
            .collect();
        Ok(Self {
            grid_size,
            code,
            players: vec![Player { score: 0, ..creator }],
            edges,
            boxes,
            current_player_index: 0,
            status: GameStatus::Active,
            drawn_count: 0,
        })
    }

    /// Append a player to turn order. Joining twice with the same id is a
    /// no-op that reports the existing seat, so reconnecting clients can
    /// re-issue a join safely.
    pub fn add_player(&mut self, player: Player) -> Result<JoinOutcome, JoinError> {
        if !self.status.is_active() {
            return Err(JoinError::GameNotJoinable);
        }
        if let Some(existing) = self.players.iter().find(|p| p.id == player.id) {
            return Ok(JoinOutcome::Rejoined(existing.clone()));
        }
        let player = Player { score: 0, ..player };
        self.players.push(player.clone());
        Ok(JoinOutcome::Joined(player))
    }

    /// Validate and apply one move. Checks run in a fixed order and the
    /// first failure wins; nothing is mutated on any failure path.
    pub fn apply_move(&mut self, edge: EdgeId, player_id: &str) -> Result<MoveOutcome, MoveError> {
        // ids arriving over the wire may name the endpoints in either order
        let edge = EdgeId::new(edge.a, edge.b);

        if !self.status.is_active() {
            return Err(MoveError::GameNotActive);
        }
        match self.edges.get(&edge) {
            None => return Err(MoveError::UnknownEdge),
            Some(e) if e.drawn => return Err(MoveError::EdgeAlreadyDrawn),
            Some(_) => {}
        }
        if self.players[self.current_player_index].id != player_id {
            return Err(MoveError::NotPlayersTurn);
        }

        if let Some(slot) = self.edges.get_mut(&edge) {
            slot.drawn = true;
            slot.owner = Some(player_id.to_string());
        }
        self.drawn_count += 1;

        let mut boxes_completed = Vec::new();
        for bx in grid::adjacent_boxes(edge, self.grid_size) {
            if !self.box_is_complete(bx) {
                continue;
            }
            if let Some(cell) = self.boxes.get_mut(&bx) {
                if cell.owner.is_none() {
                    cell.owner = Some(player_id.to_string());
                    self.players[self.current_player_index].score += 1;
                    boxes_completed.push(bx);
                }
            }
        }

        // Completing a box keeps the turn; a plain edge passes it on.
        if boxes_completed.is_empty() {
            self.current_player_index = (self.current_player_index + 1) % self.players.len();
        }

        let game_ended = self.drawn_count == self.edges.len();
        if game_ended {
            self.status = GameStatus::Completed;
        }

        Ok(MoveOutcome {
            boxes_completed,
            next_player_id: self.players[self.current_player_index].id.clone(),
            game_ended,
        })
    }

    fn box_is_complete(&self, bx: BoxId) -> bool {
        grid::bounding_edges(bx)
            .iter()
            .all(|e| self.edges.get(e).is_some_and(|edge| edge.drawn))
    }

    /// Mark an active room abandoned. Terminal states are left alone.
    pub fn abandon(&mut self) {
        if self.status.is_active() {
            self.status = GameStatus::Abandoned;
        }
    }

    pub fn edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn box_owner(&self, id: &BoxId) -> Option<&str> {
        self.boxes.get(id).and_then(|b| b.owner.as_deref())
    }

    pub fn drawn_count(&self) -> usize {
        self.drawn_count
    }

    pub fn total_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn owned_box_count(&self) -> usize {
        self.boxes.values().filter(|b| b.owner.is_some()).count()
    }

    pub fn current_player(&self) -> Option<&Player> {
        if self.status.is_active() {
            self.players.get(self.current_player_index)
        } else {
            None
        }
    }

    /// Wire view of the room, with deterministic ordering.
    pub fn snapshot(&self) -> GameSnapshot {
        let mut drawn_edges: Vec<EdgeView> = self
            .edges
            .iter()
            .filter(|(_, e)| e.drawn)
            .map(|(id, e)| EdgeView {
                edge: *id,
                owner: e.owner.clone(),
            })
            .collect();
        drawn_edges.sort_by_key(|v| v.edge);

        let mut owned_boxes: Vec<BoxView> = self
            .boxes
            .iter()
            .filter_map(|(id, b)| {
                b.owner.as_ref().map(|owner| BoxView {
                    id: *id,
                    owner: owner.clone(),
                })
            })
            .collect();
        owned_boxes.sort_by_key(|v| v.id);

        GameSnapshot {
            code: self.code.clone(),
            grid_size: self.grid_size,
            status: self.status,
            players: self.players.clone(),
            current_player_id: self.current_player().map(|p| p.id.clone()),
            drawn_edges,
            owned_boxes,
            drawn_count: self.drawn_count,
            total_edges: self.edges.len(),
        }
    }
}
