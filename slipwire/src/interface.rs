//! Network interface contract shared by the UDP and IPC transports.

use crate::endpoint::Endpoint;
use crate::error::Result;
use slipwire_shared::MTU;
use std::collections::VecDeque;

/// Windows WSAEMSGSIZE; the receive error reported when a datagram does not
/// fit the remaining receive stream capacity.
pub const RECEIVE_BUFFER_TOO_SMALL: i32 = 10040;

/// One queued outbound datagram, complete with destination.
pub struct QueuedSendMessage {
    pub dest: Endpoint,
    pub length: u16,
    pub data: [u8; MTU],
}

/// Single-producer/single-consumer queue between the user-facing send path
/// and the flush phase of the tick.
#[derive(Default)]
pub struct SendQueue {
    queue: VecDeque<QueuedSendMessage>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, message: QueuedSendMessage) {
        self.queue.push_back(message);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<QueuedSendMessage> {
        self.queue.pop_front()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Temporary MTU-sized buffer handed out by `begin_send_message`.
///
/// `offset..offset + length` is the finished datagram once the caller hands
/// the buffer back through `end_send_message`.
pub struct SendBuffer {
    pub data: Box<[u8; MTU]>,
    pub offset: usize,
    pub length: usize,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; MTU]),
            offset: 0,
            length: 0,
        }
    }
}

impl Default for SendBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Location of one received datagram inside the receive stream.
#[derive(Debug, Clone, Copy)]
pub struct ReceivedPacket {
    pub source: Endpoint,
    pub offset: usize,
    pub length: usize,
}

/// Per-tick receive staging: a byte stream plus per-packet records.
///
/// Capacity is a hard cap on stream bytes per tick. Fixed mode preallocates
/// the whole cap; dynamic mode starts small and grows on demand up to the
/// same cap. When the next datagram does not fit, `receive_error_code` is
/// set to [`RECEIVE_BUFFER_TOO_SMALL`], the datagram is dropped, and the
/// receive phase ends for this tick.
pub struct ReceiveBuffer {
    stream: Vec<u8>,
    packets: Vec<ReceivedPacket>,
    capacity: usize,
    receive_error_code: i32,
}

impl ReceiveBuffer {
    pub fn new(capacity: usize, dynamic: bool) -> Self {
        let stream = if dynamic {
            Vec::with_capacity(capacity.min(MTU))
        } else {
            Vec::with_capacity(capacity)
        };
        Self {
            stream,
            packets: Vec::new(),
            capacity,
            receive_error_code: 0,
        }
    }

    /// Clears packets, stream and error code, keeping allocations.
    pub fn reset(&mut self) {
        self.stream.clear();
        self.packets.clear();
        self.receive_error_code = 0;
    }

    /// Appends one datagram. Returns false (and flags the error) when the
    /// datagram does not fit the remaining capacity.
    pub fn append_packet(&mut self, source: Endpoint, data: &[u8]) -> bool {
        if self.stream.len() + data.len() > self.capacity {
            self.receive_error_code = RECEIVE_BUFFER_TOO_SMALL;
            return false;
        }
        let offset = self.stream.len();
        self.stream.extend_from_slice(data);
        self.packets.push(ReceivedPacket {
            source,
            offset,
            length: data.len(),
        });
        true
    }

    #[inline]
    pub fn receive_error_code(&self) -> i32 {
        self.receive_error_code
    }

    #[inline]
    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    #[inline]
    pub fn packet(&self, index: usize) -> ReceivedPacket {
        self.packets[index]
    }

    #[inline]
    pub fn packet_payload(&self, index: usize) -> &[u8] {
        let p = self.packets[index];
        &self.stream[p.offset..p.offset + p.length]
    }
}

/// The unreliable datagram transport underneath a driver.
///
/// Implementations move fixed-MTU datagrams between opaque endpoints; they
/// neither parse nor produce protocol headers. All methods are called from
/// the driver's update thread only.
pub trait NetworkInterface {
    /// Binds the interface to a local endpoint.
    fn bind(&mut self, endpoint: &Endpoint) -> Result<()>;

    /// The endpoint this interface is bound to (actual port, once bound).
    fn local_endpoint(&self) -> Endpoint;

    /// Drains inbound datagrams into the receive buffer, stopping early when
    /// the buffer flags an overflow.
    fn schedule_receive(&mut self, receiver: &mut ReceiveBuffer);

    /// Drains the send queue onto the wire. Best-effort: undeliverable
    /// datagrams are dropped.
    fn schedule_send(&mut self, queue: &mut SendQueue);

    /// Allocates a temporary MTU buffer for one outbound message.
    fn begin_send_message(&mut self) -> SendBuffer {
        SendBuffer::new()
    }

    /// Copies the finished region of `buffer` into a queued message.
    fn end_send_message(&mut self, buffer: SendBuffer, dest: Endpoint, queue: &mut SendQueue) {
        let mut message = QueuedSendMessage {
            dest,
            length: buffer.length as u16,
            data: [0u8; MTU],
        };
        message.data[..buffer.length]
            .copy_from_slice(&buffer.data[buffer.offset..buffer.offset + buffer.length]);
        queue.push(message);
    }

    /// Releases a temporary buffer without sending.
    fn abort_send_message(&mut self, buffer: SendBuffer) {
        drop(buffer);
    }
}
