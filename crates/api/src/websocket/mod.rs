//! WebSocket support for real-time rooms
//!
//! Chat, direct messages, typing indicators and a shared whiteboard per room.
//!
//! # Architecture
//!
//! - **Hub**: single-writer actor owning all room state; every membership
//!   change and message goes through its one request queue
//! - **Room**: the registry the hub owns (members, whiteboards, fan-out)
//! - **Connection**: an admitted session and the producer side of its
//!   bounded outbound queue
//! - **Pump**: per-connection task reading inbound frames and writing the
//!   outbound queue, with rate limiting and keepalive
//! - **Events**: client and server event types and their wire format
//! - **Transport**: frame sink/stream abstraction over the axum socket
//! - **Handler**: Axum WebSocket route handler

pub mod connection;
pub mod events;
pub mod handler;
pub mod hub;
pub mod pump;
pub mod room;
pub mod transport;
pub mod whiteboard;

pub use handler::ws_handler;
pub use hub::{Hub, HubConfig, HubError};
