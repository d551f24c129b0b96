//! Headless client for a ralph hub: keeps a local dashboard state in sync
//! through the push channel, with periodic snapshot pulls as a fallback.

use thiserror::Error;

pub mod config;
pub mod console;
pub mod poll;
pub mod push;
pub mod store;

pub use config::{load_config, Args, MonitorConfig};
pub use poll::{HttpSnapshotSource, PollingReconciler, SnapshotSource};
pub use push::PushClient;
pub use store::{DashboardState, SharedState};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("hub returned {0}: {1}")]
    Status(u16, String),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}
