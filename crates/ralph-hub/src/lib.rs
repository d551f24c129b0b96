//! Dashboard hub for a ralph agent loop: tails the loop's log, parses its
//! status and plan files, and pushes changes to WebSocket subscribers.

pub mod broadcast;
pub mod config;
pub mod git;
pub mod logging;
pub mod pump;
pub mod runner;
pub mod server;
pub mod watcher;

pub use broadcast::{BroadcastError, Broadcaster, Snapshot, Subscription};
pub use config::{HubConfig, WatchedFiles};
pub use pump::UpdatePump;
pub use runner::{RunnerControl, StartRequest};
pub use server::{router, AppState};
pub use watcher::{ChangeKind, FileChangeWatcher, WatchOptions};
