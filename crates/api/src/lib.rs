//! Collabsphere API Library
//!
//! Real-time rooms with chat, direct messages and a shared whiteboard,
//! served over WebSockets, plus the small HTTP surface around them.

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod state;
pub mod store;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
pub use store::{ChatStore, MemoryStore, PgStore};
pub use websocket::{Hub, HubConfig};
