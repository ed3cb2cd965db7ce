//! Hub: the single-writer actor that owns all room state
//!
//! Every admission, removal and dispatch is a [`HubRequest`] on one bounded
//! queue, applied in arrival order by a single worker task that owns the
//! [`RoomRegistry`]. The worker never awaits the store: chat lines go to a
//! single writer task in order, whiteboard loads and flushes run in spawned
//! tasks, and admissions to a room whose board is still loading are parked
//! until it arrives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use collabsphere_shared::{ArchivedMessage, Identity, RateLimitConfig, RateLimiter, RoomSummary, WhiteboardState};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::config::Config;
use crate::store::ChatStore;

use super::connection::Connection;
use super::pump::ConnectionPump;
use super::room::{ChatRecord, Effects, InboundMessage, RoomRegistry};
use super::transport::Transport;
use super::whiteboard::DEFAULT_MAX_EVENTS;

/// Upper bound on any single store call made on behalf of the hub
pub const STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Hub tuning
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Frames buffered per connection before it is dropped as unreachable
    pub outbound_capacity: usize,
    /// Requests buffered in front of the worker
    pub queue_capacity: usize,
    pub whiteboard_max_events: usize,
    pub flush_interval: Duration,
    pub rate_limit: RateLimitConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            queue_capacity: 1024,
            whiteboard_max_events: DEFAULT_MAX_EVENTS,
            flush_interval: Duration::from_secs(60),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl From<&Config> for HubConfig {
    fn from(config: &Config) -> Self {
        Self {
            outbound_capacity: config.outbound_queue_capacity,
            queue_capacity: config.hub_queue_capacity,
            whiteboard_max_events: config.whiteboard_max_events,
            flush_interval: Duration::from_secs(config.whiteboard_flush_interval_secs),
            rate_limit: config.rate_limit(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Room id must not be empty")]
    InvalidRoom,
    #[error("Hub is not running")]
    Closed,
}

/// A verified connection waiting to join a room
struct Admission {
    identity: Identity,
    room_id: String,
    transport: Transport,
    history: Vec<ArchivedMessage>,
    reply: oneshot::Sender<Uuid>,
}

enum HubRequest {
    Admit(Admission),
    Remove { session_id: Uuid },
    Dispatch(InboundMessage),
    ActiveRooms { reply: oneshot::Sender<Vec<RoomSummary>> },
    /// Stored whiteboard of a room that had admissions parked on it
    Seeded { room_id: String, state: WhiteboardState },
    Shutdown { grace: Duration, done: oneshot::Sender<()> },
}

/// Handle to the hub worker
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::Sender<HubRequest>,
}

impl Hub {
    /// Start the worker. It runs until [`Hub::shutdown`] or until every
    /// handle is dropped.
    pub fn spawn(store: Arc<dyn ChatStore>, config: HubConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (chat_tx, chat_writer) = spawn_chat_writer(Arc::clone(&store), config.queue_capacity.max(1));
        let worker = HubWorker {
            rx,
            link: HubLink { tx: tx.downgrade() },
            registry: RoomRegistry::new(config.whiteboard_max_events),
            store,
            flushes: HashMap::new(),
            seeding: HashMap::new(),
            chat_tx: Some(chat_tx),
            chat_writer: Some(chat_writer),
            config,
        };
        let handle = tokio::spawn(worker.run());
        (Self { tx }, handle)
    }

    /// Admit a verified connection into a room and start its pumps.
    /// Returns the new session id.
    pub async fn admit(
        &self,
        identity: Identity,
        room_id: &str,
        transport: Transport,
        history: Vec<ArchivedMessage>,
    ) -> Result<Uuid, HubError> {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return Err(HubError::InvalidRoom);
        }

        let (reply, rx) = oneshot::channel();
        self.send(HubRequest::Admit(Admission {
            identity,
            room_id: room_id.to_string(),
            transport,
            history,
            reply,
        }))
        .await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub async fn remove(&self, session_id: Uuid) -> Result<(), HubError> {
        self.send(HubRequest::Remove { session_id }).await
    }

    pub async fn dispatch(&self, message: InboundMessage) -> Result<(), HubError> {
        self.send(HubRequest::Dispatch(message)).await
    }

    pub async fn active_rooms(&self) -> Result<Vec<RoomSummary>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubRequest::ActiveRooms { reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Stop admitting, drain queued requests for at most `grace`, flush
    /// every whiteboard and close all connections.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), HubError> {
        let (done, rx) = oneshot::channel();
        self.send(HubRequest::Shutdown { grace, done }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    async fn send(&self, request: HubRequest) -> Result<(), HubError> {
        self.tx.send(request).await.map_err(|_| HubError::Closed)
    }
}

/// Weak handle held by connection pumps, so open connections never keep a
/// stopped hub alive
#[derive(Clone)]
pub struct HubLink {
    tx: mpsc::WeakSender<HubRequest>,
}

impl HubLink {
    pub async fn dispatch(&self, message: InboundMessage) -> Result<(), HubError> {
        self.send(HubRequest::Dispatch(message)).await
    }

    pub async fn remove(&self, session_id: Uuid) -> Result<(), HubError> {
        self.send(HubRequest::Remove { session_id }).await
    }

    async fn send(&self, request: HubRequest) -> Result<(), HubError> {
        let tx = self.tx.upgrade().ok_or(HubError::Closed)?;
        tx.send(request).await.map_err(|_| HubError::Closed)
    }
}

/// A whiteboard save in flight, with the snapshot it is writing
struct Flush {
    snapshot: WhiteboardState,
    handle: JoinHandle<()>,
}

struct HubWorker {
    rx: mpsc::Receiver<HubRequest>,
    link: HubLink,
    registry: RoomRegistry,
    store: Arc<dyn ChatStore>,
    flushes: HashMap<String, Flush>,
    /// Admissions waiting for their room's stored whiteboard
    seeding: HashMap<String, Vec<Admission>>,
    chat_tx: Option<mpsc::Sender<ChatRecord>>,
    chat_writer: Option<JoinHandle<()>>,
    config: HubConfig,
}

impl HubWorker {
    async fn run(mut self) {
        let period = self.config.flush_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            outbound_capacity = self.config.outbound_capacity,
            queue_capacity = self.config.queue_capacity,
            "Hub started"
        );

        loop {
            tokio::select! {
                request = self.rx.recv() => match request {
                    Some(HubRequest::Shutdown { grace, done }) => {
                        self.shutdown(grace).await;
                        let _ = done.send(());
                        break;
                    }
                    Some(request) => self.handle(request),
                    None => {
                        tracing::info!("All hub handles dropped");
                        self.shutdown(Duration::ZERO).await;
                        break;
                    }
                },
                _ = ticker.tick() => self.flush_dirty(),
            }
        }

        tracing::info!("Hub stopped");
    }

    fn handle(&mut self, request: HubRequest) {
        match request {
            HubRequest::Admit(admission) => self.admit(admission),
            HubRequest::Remove { session_id } => {
                let effects = self.registry.remove(session_id);
                self.apply(effects);
            }
            HubRequest::Dispatch(message) => {
                let effects = self.registry.dispatch(message);
                self.apply(effects);
            }
            HubRequest::ActiveRooms { reply } => {
                let _ = reply.send(self.registry.active_rooms());
            }
            HubRequest::Seeded { room_id, state } => self.seeded(room_id, state),
            HubRequest::Shutdown { done, .. } => {
                // Only reachable while already shutting down
                let _ = done.send(());
            }
        }
    }

    fn admit(&mut self, admission: Admission) {
        if let Some(parked) = self.seeding.get_mut(&admission.room_id) {
            parked.push(admission);
            return;
        }

        if !self.registry.contains_room(&admission.room_id) {
            // A flush still tracked for the room is newer than the store
            match self.flushes.get(&admission.room_id) {
                Some(flush) => {
                    let seed = flush.snapshot.clone();
                    self.registry.create_room(&admission.room_id, &seed);
                }
                None => {
                    let room_id = admission.room_id.clone();
                    self.seeding.insert(room_id.clone(), vec![admission]);
                    self.spawn_seed(room_id);
                    return;
                }
            }
        }

        self.join(admission);
    }

    /// Load a room's stored whiteboard off the worker and report back
    fn spawn_seed(&self, room_id: String) {
        let store = Arc::clone(&self.store);
        let link = self.link.clone();
        tokio::spawn(async move {
            let state = load_whiteboard(store.as_ref(), &room_id).await;
            if link.send(HubRequest::Seeded { room_id, state }).await.is_err() {
                tracing::debug!("Hub stopped before a whiteboard seed arrived");
            }
        });
    }

    fn seeded(&mut self, room_id: String, state: WhiteboardState) {
        let Some(parked) = self.seeding.remove(&room_id) else {
            return;
        };
        if !self.registry.contains_room(&room_id) {
            self.registry.create_room(&room_id, &state);
        }
        for admission in parked {
            self.join(admission);
        }
    }

    /// Add a connection to its (existing) room and start its pump
    fn join(&mut self, admission: Admission) {
        let Admission {
            identity,
            room_id,
            transport,
            mut history,
            reply,
        } = admission;

        // History has to fit in the queue behind room_state
        let fits = self.config.outbound_capacity.saturating_sub(1);
        if history.len() > fits {
            history.drain(..history.len() - fits);
        }

        let (conn, outbound) = Connection::new(identity.clone(), room_id.clone(), self.config.outbound_capacity);
        let session_id = conn.session_id;
        let effects = self.registry.admit(conn, &history);

        let pump = ConnectionPump::new(
            session_id,
            identity,
            room_id,
            self.link.clone(),
            RateLimiter::new(self.config.rate_limit.clone()),
        );
        tokio::spawn(pump.run(transport, outbound));

        let _ = reply.send(session_id);
        self.apply(effects);
    }

    fn apply(&mut self, effects: Effects) {
        let Effects {
            evicted,
            chat,
            disconnected,
        } = effects;

        if let Some(chat) = chat {
            self.persist_chat(chat);
        }
        for (room_id, state) in evicted {
            self.spawn_flush(room_id, state);
        }
        if !disconnected.is_empty() {
            tracing::warn!(count = disconnected.len(), "Dropped unreachable connections");
        }
    }

    fn persist_chat(&self, chat: ChatRecord) {
        let Some(tx) = &self.chat_tx else {
            return;
        };
        match tx.try_send(chat) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(chat)) => {
                tracing::warn!(room_id = %chat.room_id, sender_id = %chat.sender_id, "Chat writer backlogged, message not persisted");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Save a whiteboard in the background, after any earlier save of the same room
    fn spawn_flush(&mut self, room_id: String, state: WhiteboardState) {
        let previous = self.flushes.remove(&room_id).map(|flush| flush.handle);
        let store = Arc::clone(&self.store);
        let room = room_id.clone();
        let snapshot = state.clone();

        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            match timeout(STORE_TIMEOUT, store.save_whiteboard(&room, &snapshot)).await {
                Ok(Ok(())) => tracing::debug!(room_id = %room, events = snapshot.events.len(), "Whiteboard flushed"),
                Ok(Err(e)) => tracing::error!(room_id = %room, error = ?e, "Failed to flush whiteboard"),
                Err(_) => tracing::error!(room_id = %room, "Timed out flushing whiteboard"),
            }
        });

        self.flushes.insert(room_id, Flush { snapshot: state, handle });
    }

    fn flush_dirty(&mut self) {
        self.flushes.retain(|_, flush| !flush.handle.is_finished());
        for (room_id, state) in self.registry.take_dirty() {
            self.spawn_flush(room_id, state);
        }
    }

    async fn shutdown(&mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        tracing::info!(grace_secs = grace.as_secs(), "Hub shutting down");

        // Requests queued before the shutdown still apply, except admissions
        while Instant::now() < deadline {
            match self.rx.try_recv() {
                Ok(HubRequest::Admit(admission)) => {
                    tracing::debug!(room_id = %admission.room_id, "Rejecting admission during shutdown");
                }
                Ok(HubRequest::Seeded { room_id, .. }) => {
                    tracing::debug!(room_id = %room_id, "Dropping whiteboard seed during shutdown");
                }
                Ok(request) => self.handle(request),
                Err(_) => break,
            }
        }
        self.rx.close();

        // Parked admissions see their reply dropped
        self.seeding.clear();

        // Dropping the connections closes every outbound queue
        let boards = self.registry.drain_all();
        for (room_id, state) in boards {
            self.spawn_flush(room_id, state);
        }

        // Closing the chat queue lets the writer finish what is queued
        self.chat_tx = None;
        let writer = self.chat_writer.take();

        let pending: Vec<_> = self.flushes.drain().map(|(_, flush)| flush.handle).collect();
        let budget = deadline.saturating_duration_since(Instant::now()) + STORE_TIMEOUT;
        let drained = async {
            futures::future::join_all(pending).await;
            if let Some(writer) = writer {
                let _ = writer.await;
            }
        };
        if timeout(budget, drained).await.is_err() {
            tracing::warn!("Abandoned store writes still running at shutdown");
        }
    }
}

/// One writer per hub keeps chat rows in dispatch order
fn spawn_chat_writer(store: Arc<dyn ChatStore>, capacity: usize) -> (mpsc::Sender<ChatRecord>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ChatRecord>(capacity);
    let handle = tokio::spawn(async move {
        while let Some(chat) = rx.recv().await {
            save_chat(store.as_ref(), &chat).await;
        }
    });
    (tx, handle)
}

async fn save_chat(store: &dyn ChatStore, chat: &ChatRecord) {
    let save = store.save_chat_message(&chat.room_id, chat.sender_id, &chat.text);
    match timeout(STORE_TIMEOUT, save).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(
            room_id = %chat.room_id,
            sender_id = %chat.sender_id,
            error = ?e,
            "Failed to persist chat message"
        ),
        Err(_) => tracing::error!(room_id = %chat.room_id, "Timed out persisting chat message"),
    }
}

/// Stored whiteboard of a room entering memory; empty when the store fails
async fn load_whiteboard(store: &dyn ChatStore, room_id: &str) -> WhiteboardState {
    match timeout(STORE_TIMEOUT, store.load_whiteboard(room_id)).await {
        Ok(Ok(state)) => state,
        Ok(Err(e)) => {
            tracing::warn!(room_id = %room_id, error = ?e, "Failed to load whiteboard, starting empty");
            WhiteboardState::default()
        }
        Err(_) => {
            tracing::warn!(room_id = %room_id, "Timed out loading whiteboard, starting empty");
            WhiteboardState::default()
        }
    }
}
