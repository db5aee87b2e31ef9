//! # slipwire-ipc
//!
//! Process-global in-process datagram exchange.
//!
//! The exchange stands in for a real network inside one process: drivers
//! bind 16-bit ports that map to 32-bit channel ids, and sending to a
//! channel enqueues a fixed-MTU datagram on the destination's FIFO. Used by
//! local transports and by deterministic tests.
//!
//! - One process-wide registry behind a single mutex
//! - Reference-counted by [`IpcExchange`] handles; the port map and all
//!   queues are torn down when the last handle drops
//! - Bounded per-channel queues; a full queue rejects the send
//!
//! ## Usage
//!
//! ```rust
//! use slipwire_ipc::IpcExchange;
//!
//! let exchange = IpcExchange::acquire();
//! let server = exchange.channel_for_port(1337);
//! let client = exchange.create_channel();
//!
//! exchange.send(server, client, b"hello").unwrap();
//! let datagram = exchange.receive(server).unwrap();
//! assert_eq!(datagram.payload(), b"hello");
//! assert_eq!(datagram.from, client);
//! ```

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

pub use slipwire_shared::MTU;

/// Maximum datagrams queued per channel before sends are rejected.
const MAX_QUEUE_DEPTH: usize = 256;

pub type Result<T> = std::result::Result<T, ExchangeError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("destination channel {0} does not exist")]
    UnknownChannel(u32),

    #[error("destination channel {0} queue is full")]
    QueueFull(u32),

    #[error("payload of {0} bytes exceeds the {MTU} byte MTU")]
    PayloadTooLarge(usize),
}

/// One in-process datagram: source channel plus a fixed-MTU payload slot.
#[derive(Clone)]
pub struct IpcData {
    /// Channel id of the sender
    pub from: u32,
    /// Valid payload length
    pub length: u16,
    /// Payload bytes, `..length` valid
    pub data: [u8; MTU],
}

impl IpcData {
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length as usize]
    }
}

#[derive(Default)]
struct ExchangeState {
    ref_count: usize,
    next_channel: u32,
    port_map: HashMap<u16, u32>,
    queues: HashMap<u32, VecDeque<IpcData>>,
}

impl ExchangeState {
    fn new_channel(&mut self) -> u32 {
        let id = self.next_channel;
        self.next_channel += 1;
        self.queues.insert(id, VecDeque::new());
        id
    }
}

static EXCHANGE: Mutex<Option<ExchangeState>> = Mutex::new(None);

/// Reference-counted handle to the process-wide exchange.
///
/// Every driver instance holds one. Dropping the last handle completes any
/// in-flight delivery (the mutex serializes senders) and releases the
/// multi-queue and the port map.
pub struct IpcExchange(());

impl IpcExchange {
    pub fn acquire() -> Self {
        let mut guard = EXCHANGE.lock();
        let state = guard.get_or_insert_with(ExchangeState::default);
        state.ref_count += 1;
        Self(())
    }

    /// Channel id for a port, allocating the channel on first use.
    ///
    /// Port 0 always allocates a fresh anonymous channel.
    pub fn channel_for_port(&self, port: u16) -> u32 {
        let mut guard = EXCHANGE.lock();
        let state = guard.as_mut().expect("exchange handle outlived registry");
        if port == 0 {
            return state.new_channel();
        }
        if let Some(&id) = state.port_map.get(&port) {
            return id;
        }
        let id = state.new_channel();
        state.port_map.insert(port, id);
        id
    }

    /// Allocates an anonymous channel (no port mapping).
    pub fn create_channel(&self) -> u32 {
        let mut guard = EXCHANGE.lock();
        let state = guard.as_mut().expect("exchange handle outlived registry");
        state.new_channel()
    }

    /// Enqueues a datagram on the destination channel's FIFO.
    pub fn send(&self, to: u32, from: u32, payload: &[u8]) -> Result<usize> {
        if payload.len() > MTU {
            return Err(ExchangeError::PayloadTooLarge(payload.len()));
        }
        let mut guard = EXCHANGE.lock();
        let state = guard.as_mut().expect("exchange handle outlived registry");
        let queue = state
            .queues
            .get_mut(&to)
            .ok_or(ExchangeError::UnknownChannel(to))?;
        if queue.len() >= MAX_QUEUE_DEPTH {
            return Err(ExchangeError::QueueFull(to));
        }

        let mut slot = IpcData {
            from,
            length: payload.len() as u16,
            data: [0u8; MTU],
        };
        slot.data[..payload.len()].copy_from_slice(payload);
        queue.push_back(slot);
        Ok(payload.len())
    }

    /// Dequeues the head of a channel's FIFO, if any.
    pub fn receive(&self, channel: u32) -> Option<IpcData> {
        let mut guard = EXCHANGE.lock();
        let state = guard.as_mut().expect("exchange handle outlived registry");
        state.queues.get_mut(&channel)?.pop_front()
    }
}

impl Drop for IpcExchange {
    fn drop(&mut self) {
        let mut guard = EXCHANGE.lock();
        if let Some(state) = guard.as_mut() {
            state.ref_count -= 1;
            if state.ref_count == 0 {
                *guard = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_receive_roundtrip() {
        let exchange = IpcExchange::acquire();
        let a = exchange.create_channel();
        let b = exchange.create_channel();

        exchange.send(b, a, b"ping").unwrap();
        let datagram = exchange.receive(b).unwrap();
        assert_eq!(datagram.payload(), b"ping");
        assert_eq!(datagram.from, a);
        assert!(exchange.receive(b).is_none());
    }

    #[test]
    fn test_fifo_order_per_channel() {
        let exchange = IpcExchange::acquire();
        let src = exchange.create_channel();
        let dst = exchange.create_channel();

        for i in 0..5u8 {
            exchange.send(dst, src, &[i]).unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(exchange.receive(dst).unwrap().payload(), &[i]);
        }
    }

    #[test]
    fn test_port_mapping_is_stable() {
        let exchange = IpcExchange::acquire();
        let first = exchange.channel_for_port(40_001);
        let second = exchange.channel_for_port(40_001);
        assert_eq!(first, second);

        let anon_a = exchange.channel_for_port(0);
        let anon_b = exchange.channel_for_port(0);
        assert_ne!(anon_a, anon_b);
    }

    #[test]
    fn test_unknown_channel_rejected() {
        let exchange = IpcExchange::acquire();
        let src = exchange.create_channel();
        assert_eq!(
            exchange.send(0xdead_0000, src, b"x"),
            Err(ExchangeError::UnknownChannel(0xdead_0000))
        );
    }

    #[test]
    fn test_queue_bound() {
        let exchange = IpcExchange::acquire();
        let src = exchange.create_channel();
        let dst = exchange.create_channel();

        for _ in 0..MAX_QUEUE_DEPTH {
            exchange.send(dst, src, b"fill").unwrap();
        }
        assert_eq!(
            exchange.send(dst, src, b"over"),
            Err(ExchangeError::QueueFull(dst))
        );

        exchange.receive(dst).unwrap();
        exchange.send(dst, src, b"fits again").unwrap();
    }

    #[test]
    fn test_oversize_payload_rejected() {
        let exchange = IpcExchange::acquire();
        let dst = exchange.create_channel();
        let big = vec![0u8; MTU + 1];
        assert_eq!(
            exchange.send(dst, 0, &big),
            Err(ExchangeError::PayloadTooLarge(MTU + 1))
        );
    }
}
