//! Bounded per-connection event queues over a shared payload arena.

use std::collections::VecDeque;
use tracing::warn;

/// Event kinds surfaced to the user between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Empty,
    Data,
    Connect,
    Disconnect,
}

/// One queued event: kind plus a payload span in the arena.
#[derive(Debug, Clone, Copy)]
pub struct EventRecord {
    pub kind: NetworkEvent,
    pub offset: usize,
    pub length: usize,
}

/// Per-connection FIFOs of typed events sharing one byte arena.
///
/// The arena and every queue reset at the start of each tick; payload spans
/// popped during a tick stay readable until that reset. A queue that hits
/// its per-connection capacity resets on the spot with the same warning the
/// tick-start reset logs.
pub struct EventQueue {
    queues: Vec<VecDeque<EventRecord>>,
    arena: Vec<u8>,
    max_events_per_connection: usize,
    rr_cursor: usize,
}

impl EventQueue {
    pub fn new(max_events_per_connection: usize) -> Self {
        Self {
            queues: Vec::new(),
            arena: Vec::new(),
            max_events_per_connection,
            rr_cursor: 0,
        }
    }

    fn queue_mut(&mut self, connection: usize) -> &mut VecDeque<EventRecord> {
        if connection >= self.queues.len() {
            self.queues.resize_with(connection + 1, VecDeque::new);
        }
        &mut self.queues[connection]
    }

    /// Tick-start reset: discards every queue and the arena, logging each
    /// connection that still held events. Returns the number of resets.
    pub fn begin_tick(&mut self, listening: bool) -> u64 {
        let mut resets = 0;
        for (connection, queue) in self.queues.iter_mut().enumerate() {
            if !queue.is_empty() {
                warn!(
                    "Resetting event queue with pending events (Count={}, ConnectionID={}) Listening: {}",
                    queue.len(),
                    connection,
                    listening as u8
                );
                resets += 1;
                queue.clear();
            }
        }
        self.arena.clear();
        resets
    }

    /// Appends an event, copying the payload into the arena.
    ///
    /// On per-connection overflow the affected queue resets (with the
    /// warning) before the event goes in; returns true when that happened.
    pub fn push(
        &mut self,
        connection: usize,
        kind: NetworkEvent,
        payload: &[u8],
        listening: bool,
    ) -> bool {
        let max = self.max_events_per_connection;
        let queue = self.queue_mut(connection);
        let mut reset = false;
        if queue.len() >= max {
            warn!(
                "Resetting event queue with pending events (Count={}, ConnectionID={}) Listening: {}",
                queue.len(),
                connection,
                listening as u8
            );
            queue.clear();
            reset = true;
        }

        let offset = self.arena.len();
        self.arena.extend_from_slice(payload);
        self.queue_mut(connection).push_back(EventRecord {
            kind,
            offset,
            length: payload.len(),
        });
        reset
    }

    /// Pops the next event from any connection, round-robin fair.
    pub fn pop_any(&mut self) -> Option<(usize, EventRecord)> {
        let count = self.queues.len();
        for step in 0..count {
            let connection = (self.rr_cursor + step) % count;
            if let Some(record) = self.queues[connection].pop_front() {
                self.rr_cursor = (connection + 1) % count;
                return Some((connection, record));
            }
        }
        None
    }

    /// Pops the next event for one connection.
    pub fn pop_for(&mut self, connection: usize) -> Option<EventRecord> {
        self.queues.get_mut(connection)?.pop_front()
    }

    /// Payload bytes of a popped record.
    pub fn arena_slice(&self, offset: usize, length: usize) -> &[u8] {
        &self.arena[offset..offset + length]
    }
}
