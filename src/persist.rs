//! Fire-and-forget persistence boundary.
//!
//! The in-memory room is authoritative for the lifetime of a game; this
//! collaborator only records creation, joins and completion. A failed write
//! is logged and never reaches the game loop.

use std::path::PathBuf;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::types::Player;

/// A row appended to the store log.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum StoreEvent {
    GameCreated {
        code: String,
        grid_size: u8,
        player: Player,
    },
    PlayerJoined {
        code: String,
        player: Player,
    },
    /// Written once per game; carries final cumulative scores.
    GameCompleted {
        code: String,
        winner: Option<String>,
        scores: Vec<Player>,
    },
}

/// Handle cloned into every room task. `record` never blocks and never
/// fails the caller.
#[derive(Clone)]
pub struct StoreHandle {
    tx: Option<mpsc::UnboundedSender<StoreEvent>>,
}

impl StoreHandle {
    /// Spawn the writer task appending JSON lines under `data_path`.
    pub fn spawn(data_path: PathBuf) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_task(data_path, rx));
        Self { tx: Some(tx) }
    }

    /// A handle that drops every event. Used in tests.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn record(&self, event: StoreEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::error!("store writer gone, event dropped");
            }
        }
    }
}

async fn writer_task(data_path: PathBuf, mut rx: mpsc::UnboundedReceiver<StoreEvent>) {
    if let Err(e) = tokio::fs::create_dir_all(&data_path).await {
        tracing::error!("cannot create data dir {}: {}", data_path.display(), e);
        // keep draining so senders never notice
        while rx.recv().await.is_some() {}
        return;
    }

    let log_path = data_path.join("games.jsonl");
    let mut log = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .await
    {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("cannot open {}: {}", log_path.display(), e);
            while rx.recv().await.is_some() {}
            return;
        }
    };

    while let Some(event) = rx.recv().await {
        let mut line = match serde_json::to_string(&event) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!("store event not serializable: {}", e);
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = log.write_all(line.as_bytes()).await {
            tracing::error!("store write failed: {}", e);
        }
    }
}
