//! Per-connection pumps
//!
//! Each admitted connection runs one task with two duties: the inbound duty
//! reads, rate limits, decodes and forwards frames to the hub; the outbound
//! duty drains the connection's queue onto the transport and sends
//! keepalive pings. Whichever duty stops first ends both, and the task then
//! asks the hub to remove the connection exactly once.

use std::time::Duration;

use collabsphere_shared::{Identity, RateLimitError, RateLimiter};
use futures::{SinkExt, StreamExt};
use tokio::time::{timeout, Instant};
use uuid::Uuid;

use super::connection::OutboundReceiver;
use super::events::{check_frame_size, ClientEvent};
use super::hub::HubLink;
use super::room::InboundMessage;
use super::transport::{Frame, FrameSink, FrameStream, Transport, TransportError};

/// Time allowed between inbound frames before the peer is considered gone
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Keepalive interval, 9/10 of [`PONG_WAIT`]
pub const PING_PERIOD: Duration = Duration::from_secs(54);

/// Time allowed for a single write
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Why a connection's pumps stopped
#[derive(Debug)]
enum Exit {
    PeerClosed,
    ReadTimeout,
    ReadError(TransportError),
    RateLimited(RateLimitError),
    HubGone,
    QueueClosed,
    WriteTimeout,
    WriteError(TransportError),
}

impl Exit {
    /// Whether a close frame can still be written to the peer
    fn can_send_close(&self) -> bool {
        !matches!(self, Exit::QueueClosed | Exit::WriteTimeout | Exit::WriteError(_))
    }
}

pub struct ConnectionPump {
    session_id: Uuid,
    identity: Identity,
    room_id: String,
    hub: HubLink,
    limiter: RateLimiter,
}

impl ConnectionPump {
    pub fn new(session_id: Uuid, identity: Identity, room_id: String, hub: HubLink, limiter: RateLimiter) -> Self {
        Self {
            session_id,
            identity,
            room_id,
            hub,
            limiter,
        }
    }

    /// Run both duties until either stops, then deregister the connection
    pub async fn run(self, transport: Transport, outbound: OutboundReceiver) {
        let Self {
            session_id,
            identity,
            room_id,
            hub,
            mut limiter,
        } = self;
        let Transport { mut sink, mut stream } = transport;

        let inbound = Inbound {
            session_id,
            sender_id: identity.id,
            room_id: &room_id,
            hub: &hub,
        };

        let exit = tokio::select! {
            exit = inbound.run(&mut stream, &mut limiter) => exit,
            exit = write_loop(&mut sink, outbound) => exit,
        };

        match &exit {
            Exit::PeerClosed | Exit::QueueClosed => tracing::info!(
                session_id = %session_id,
                user_id = %identity.id,
                reason = ?exit,
                "WebSocket connection closing"
            ),
            _ => tracing::warn!(
                session_id = %session_id,
                user_id = %identity.id,
                reason = ?exit,
                "WebSocket connection terminated"
            ),
        }

        if exit.can_send_close() {
            let _ = timeout(WRITE_WAIT, sink.send(Frame::Close)).await;
        }
        let _ = timeout(WRITE_WAIT, sink.close()).await;

        if hub.remove(session_id).await.is_err() {
            tracing::debug!(session_id = %session_id, "Hub already stopped");
        }
    }
}

/// Inbound duty: everything needed to stamp and forward a frame
struct Inbound<'a> {
    session_id: Uuid,
    sender_id: Uuid,
    room_id: &'a str,
    hub: &'a HubLink,
}

impl Inbound<'_> {
    async fn run(&self, stream: &mut FrameStream, limiter: &mut RateLimiter) -> Exit {
        loop {
            if let Err(e) = limiter.acquire().await {
                return Exit::RateLimited(e);
            }

            // Any frame from the peer counts as a sign of life
            let frame = match timeout(PONG_WAIT, stream.next()).await {
                Err(_) => return Exit::ReadTimeout,
                Ok(None) => return Exit::PeerClosed,
                Ok(Some(Err(e))) => return Exit::ReadError(e),
                Ok(Some(Ok(frame))) => frame,
            };

            let text = match frame {
                Frame::Text(text) => text,
                Frame::Binary(data) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => {
                        tracing::debug!(session_id = %self.session_id, "Dropping non-UTF-8 binary frame");
                        continue;
                    }
                },
                Frame::Ping(_) | Frame::Pong(_) => continue,
                Frame::Close => return Exit::PeerClosed,
            };

            if let Err(e) = check_frame_size(text.len()) {
                tracing::warn!(session_id = %self.session_id, error = %e, "Dropping oversized frame");
                continue;
            }

            let event = match ClientEvent::decode_or_plain_text(&text) {
                Ok(event) => event,
                Err(e) => {
                    tracing::debug!(session_id = %self.session_id, error = %e, "Dropping malformed message");
                    continue;
                }
            };

            let message = InboundMessage {
                session_id: self.session_id,
                sender_id: self.sender_id,
                room_id: self.room_id.to_string(),
                event,
            };
            if self.hub.dispatch(message).await.is_err() {
                return Exit::HubGone;
            }
        }
    }
}

/// Outbound duty
async fn write_loop(sink: &mut FrameSink, mut outbound: OutboundReceiver) -> Exit {
    let mut ping = tokio::time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);

    loop {
        let result = tokio::select! {
            next = outbound.recv() => match next {
                Some(frame) => write(sink, Frame::Text(frame.to_string())).await,
                None => {
                    let _ = write(sink, Frame::Close).await;
                    return Exit::QueueClosed;
                }
            },
            _ = ping.tick() => write(sink, Frame::Ping(Vec::new())).await,
        };

        if let Err(exit) = result {
            return exit;
        }
    }
}

async fn write(sink: &mut FrameSink, frame: Frame) -> Result<(), Exit> {
    match timeout(WRITE_WAIT, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Exit::WriteError(e)),
        Err(_) => Err(Exit::WriteTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use collabsphere_shared::RateLimitConfig;

    use crate::store::MemoryStore;
    use crate::websocket::hub::{Hub, HubConfig};
    use crate::websocket::transport::{test_pair, TestPeer};

    fn hub_with_limit(rate_limit: RateLimitConfig) -> Hub {
        let config = HubConfig {
            rate_limit,
            ..HubConfig::default()
        };
        let (hub, _handle) = Hub::spawn(Arc::new(MemoryStore::new()), config);
        hub
    }

    async fn join(hub: &Hub, name: &str) -> TestPeer {
        let (transport, mut peer) = test_pair(64);
        hub.admit(Identity::new(Uuid::new_v4(), name), "lobby", transport, Vec::new())
            .await
            .unwrap();
        let state = peer.next_json().await.unwrap();
        assert_eq!(state["type"], "room_state");
        peer
    }

    /// Admit a member whose peer side is driven by hand
    async fn join_raw(hub: &Hub, name: &str, buffer: usize, watcher: &mut TestPeer) -> TestPeer {
        let (transport, peer) = test_pair(buffer);
        hub.admit(Identity::new(Uuid::new_v4(), name), "lobby", transport, Vec::new())
            .await
            .unwrap();
        assert_eq!(watcher.next_json().await.unwrap()["type"], "user_joined");
        peer
    }

    async fn next_user_left(peer: &mut TestPeer) -> serde_json::Value {
        loop {
            let frame = peer.next_json().await.expect("Connection closed before user_left");
            if frame["type"] == "user_left" {
                return frame;
            }
        }
    }

    #[test]
    fn test_timing_contract() {
        assert_eq!(PING_PERIOD, PONG_WAIT * 9 / 10);
        assert!(PING_PERIOD < PONG_WAIT);
        assert_eq!(WRITE_WAIT, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_is_pinged_then_dropped() {
        let hub = hub_with_limit(RateLimitConfig::default());
        let mut peer = join(&hub, "quiet").await;

        let started = Instant::now();
        assert_eq!(peer.from_server.next().await, Some(Frame::Ping(Vec::new())));
        assert!(started.elapsed() >= PING_PERIOD);
        assert!(started.elapsed() < PONG_WAIT);

        assert_eq!(peer.next_frame().await, Some(Frame::Close));
        assert!(started.elapsed() >= PONG_WAIT);

        // The hub forgets the connection
        tokio::task::yield_now().await;
        for _ in 0..10 {
            if hub.active_rooms().await.unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("Connection was not removed");
    }

    #[tokio::test]
    async fn test_oversized_and_malformed_frames_are_dropped() {
        let hub = hub_with_limit(RateLimitConfig::default());
        let sender = join(&hub, "ada").await;
        let mut receiver = join(&hub, "bob").await;

        sender.send_text(&"x".repeat(600));
        sender.send_text(r#"{"type":"draw_move","payload":{"x":"nope"}}"#);
        let _ = sender
            .to_server
            .unbounded_send(Ok(Frame::Binary(vec![0xff, 0xfe])));
        let _ = sender
            .to_server
            .unbounded_send(Ok(Frame::Binary(b"legacy bytes".to_vec())));

        // Only the UTF-8 binary frame gets through, as plain text
        let frame = receiver.next_json().await.unwrap();
        assert_eq!(frame["type"], "text_message");
        assert_eq!(frame["payload"], "legacy bytes");

        // The connection is still open
        sender.send_text(r#"{"type":"typing_stop"}"#);
        let frame = receiver.next_json().await.unwrap();
        assert_eq!(frame["type"], "typing_stop");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_flood_terminates_connection() {
        let hub = hub_with_limit(RateLimitConfig {
            per_second: 1,
            burst: 1,
            max_strikes: 2,
        });
        let mut flooder = join(&hub, "flood").await;

        let started = Instant::now();
        for _ in 0..10 {
            flooder.send_text(r#"{"type":"typing_start"}"#);
        }

        // Throttled reads keep the connection alive until strikes run out,
        // long before the liveness timeout
        assert_eq!(flooder.next_frame().await, Some(Frame::Close));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_client_routing_fields_are_restamped() {
        let hub = hub_with_limit(RateLimitConfig::default());
        let sender = join(&hub, "ada").await;
        let mut receiver = join(&hub, "bob").await;

        let forged = Uuid::new_v4();
        sender.send_text(&format!(
            r#"{{"type":"text_message","payload":"hi","sender":"{forged}","room_id":"elsewhere"}}"#
        ));

        let frame = receiver.next_json().await.unwrap();
        assert_eq!(frame["room_id"], "lobby");
        assert_ne!(frame["sender"], forged.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_writer_is_removed_after_write_timeout() {
        let hub = hub_with_limit(RateLimitConfig::default());
        let mut bob = join(&hub, "bob").await;
        // Holds room_state plus one more frame, and is never read
        let _stuck = join_raw(&hub, "ada", 1, &mut bob).await;

        let started = Instant::now();
        for i in 0..10 {
            bob.send_text(&format!("line {i}"));
        }

        let left = next_user_left(&mut bob).await;
        assert_eq!(left["payload"]["username"], "ada");
        assert!(started.elapsed() >= WRITE_WAIT);
        assert!(started.elapsed() < PONG_WAIT);
    }

    #[tokio::test]
    async fn test_write_error_removes_connection() {
        let hub = hub_with_limit(RateLimitConfig::default());
        let mut bob = join(&hub, "bob").await;
        let peer = join_raw(&hub, "ada", 8, &mut bob).await;

        // Keep the inbound side open while the outbound side goes away
        let TestPeer { to_server, from_server } = peer;
        drop(from_server);
        bob.send_text("anyone there?");

        let left = next_user_left(&mut bob).await;
        assert_eq!(left["payload"]["username"], "ada");
        drop(to_server);
    }

    #[tokio::test]
    async fn test_read_error_closes_and_removes_connection() {
        let hub = hub_with_limit(RateLimitConfig::default());
        let mut bob = join(&hub, "bob").await;
        let mut ada = join_raw(&hub, "ada", 8, &mut bob).await;
        assert_eq!(ada.next_json().await.unwrap()["type"], "room_state");

        let _ = ada
            .to_server
            .unbounded_send(Err(TransportError::Io("connection reset".to_string())));

        assert_eq!(ada.next_frame().await, Some(Frame::Close));
        let left = next_user_left(&mut bob).await;
        assert_eq!(left["payload"]["username"], "ada");
    }
}
