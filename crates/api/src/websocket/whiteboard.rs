//! In-memory whiteboard log of an active room

use std::collections::VecDeque;

use collabsphere_shared::{DrawEvent, WhiteboardState};

/// Default cap on events kept per room
pub const DEFAULT_MAX_EVENTS: usize = 10_000;

/// Append-only draw log, compacted on clear and capped in length.
///
/// Because a clear truncates the log, every stored event is part of the
/// current drawing and the log itself is its replay.
#[derive(Debug, Clone)]
pub struct Whiteboard {
    events: VecDeque<DrawEvent>,
    max_events: usize,
}

impl Whiteboard {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::new(),
            max_events: max_events.max(1),
        }
    }

    /// Seed from a stored snapshot, keeping only its replay
    pub fn from_state(state: &WhiteboardState, max_events: usize) -> Self {
        let mut board = Self::new(max_events);
        for event in state.replay().events {
            board.push(event);
        }
        board
    }

    /// Apply one event. Returns how many old events were dropped by the cap.
    pub fn apply(&mut self, event: DrawEvent) -> usize {
        if event.is_clear() {
            self.events.clear();
            return 0;
        }
        self.push(event)
    }

    fn push(&mut self, event: DrawEvent) -> usize {
        self.events.push_back(event);
        let mut dropped = 0;
        while self.events.len() > self.max_events {
            self.events.pop_front();
            dropped += 1;
        }
        dropped
    }

    pub fn snapshot(&self) -> WhiteboardState {
        WhiteboardState::new(self.events.iter().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for Whiteboard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENTS)
    }
}
