use std::path::PathBuf;
use std::time::Duration;

/// Server settings, all overridable from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Directory the persistence log is appended under.
    pub data_path: PathBuf,
    /// How long a completed room stays resolvable before cleanup.
    pub cleanup_grace: Duration,
}

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DATA_PATH: &str = "data";
const DEFAULT_CLEANUP_GRACE_SECS: u64 = 60;

/// Load configuration from `PORT`, `DATA_PATH` and `CLEANUP_GRACE_SECS`.
pub fn load() -> ServerConfig {
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| DEFAULT_PORT.to_string())
        .parse()
        .expect("Invalid PORT");

    let data_path = std::env::var("DATA_PATH")
        .unwrap_or_else(|_| DEFAULT_DATA_PATH.to_string())
        .into();

    let cleanup_grace = std::env::var("CLEANUP_GRACE_SECS")
        .unwrap_or_else(|_| DEFAULT_CLEANUP_GRACE_SECS.to_string())
        .parse()
        .map(Duration::from_secs)
        .expect("Invalid CLEANUP_GRACE_SECS");

    ServerConfig {
        port,
        data_path,
        cleanup_grace,
    }
}
