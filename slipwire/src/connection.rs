//! Connection slots, handles and per-connection state.

use crate::endpoint::Endpoint;
use std::collections::HashMap;

/// Stable virtual-connection identity: slot index plus generation counter.
///
/// `generation == 0` means uncreated. Releasing a slot bumps its generation,
/// so a handle held across slot reuse compares unequal to the new handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ConnectionId {
    pub index: i32,
    pub generation: i32,
}

impl ConnectionId {
    #[inline]
    pub fn is_created(&self) -> bool {
        self.generation != 0
    }
}

/// Lifecycle of a connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Empty,
    Connecting,
    AwaitingResponse,
    Connected,
    Disconnected,
}

/// Why a connection ended; carried as the Disconnect event payload byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Connection request attempts were exhausted
    ConnectionTimeout = 1,
    /// The peer went silent past the disconnect timeout
    Timeout = 2,
    /// The peer sent a Disconnect
    ClosedByRemote = 3,
    /// This side called disconnect
    ClosedByLocal = 4,
}

impl DisconnectReason {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::ConnectionTimeout),
            2 => Some(Self::Timeout),
            3 => Some(Self::ClosedByRemote),
            4 => Some(Self::ClosedByLocal),
            _ => None,
        }
    }
}

/// Per-slot connection state.
pub struct ConnectionRecord {
    pub address: Endpoint,
    pub state: ConnectionState,
    /// Token peers must put in headers addressed to us; fixed once set
    pub receive_token: u16,
    /// Token we put in headers addressed to the peer
    pub send_token: u16,
    pub last_receive_ms: u64,
    pub last_send_ms: u64,
    pub last_attempt_ms: u64,
    pub connect_attempts: u16,
    pub disconnect_reason: Option<DisconnectReason>,
    /// Handle was handed to the user (via connect or accept)
    pub accepted: bool,
    /// Contiguous stage scratch, indexed by pipeline id
    pub pipeline_scratch: Vec<Vec<u8>>,
}

impl ConnectionRecord {
    fn empty() -> Self {
        Self {
            address: Endpoint::default(),
            state: ConnectionState::Empty,
            receive_token: 0,
            send_token: 0,
            last_receive_ms: 0,
            last_send_ms: 0,
            last_attempt_ms: 0,
            connect_attempts: 0,
            disconnect_reason: None,
            accepted: false,
            pipeline_scratch: Vec::new(),
        }
    }

    #[inline]
    pub fn touch_receive(&mut self, now_ms: u64) {
        self.last_receive_ms = now_ms;
    }

    #[inline]
    pub fn touch_send(&mut self, now_ms: u64) {
        self.last_send_ms = now_ms;
    }
}

struct Slot {
    generation: i32,
    record: ConnectionRecord,
}

/// Slot allocator with generation counters and an address index.
pub struct ConnectionTable {
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_address: HashMap<Endpoint, usize>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_address: HashMap::new(),
        }
    }

    /// Creates a record in the given state, reusing a free slot if any.
    pub fn create(
        &mut self,
        address: Endpoint,
        state: ConnectionState,
        now_ms: u64,
    ) -> ConnectionId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 1,
                    record: ConnectionRecord::empty(),
                });
                self.slots.len() - 1
            }
        };

        let slot = &mut self.slots[index];
        slot.record = ConnectionRecord::empty();
        slot.record.address = address;
        slot.record.state = state;
        slot.record.last_receive_ms = now_ms;
        slot.record.last_send_ms = now_ms;
        self.by_address.insert(address, index);

        ConnectionId {
            index: index as i32,
            generation: slot.generation,
        }
    }

    /// Releases a slot back to the free list, bumping its generation.
    pub fn release(&mut self, index: usize) {
        let Some(slot) = self.slots.get_mut(index) else { return };
        if slot.record.state == ConnectionState::Empty {
            return;
        }
        self.by_address.remove(&slot.record.address);
        slot.record = ConnectionRecord::empty();
        slot.generation += 1;
        self.free.push(index);
    }

    /// Drops the address index entry so a dead slot no longer claims its
    /// endpoint; the slot itself lives on until released.
    pub fn unlink_address(&mut self, index: usize) {
        if let Some(slot) = self.slots.get(index) {
            if self.by_address.get(&slot.record.address) == Some(&index) {
                self.by_address.remove(&slot.record.address);
            }
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionRecord> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation || slot.record.state == ConnectionState::Empty {
            return None;
        }
        Some(&slot.record)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionRecord> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation || slot.record.state == ConnectionState::Empty {
            return None;
        }
        Some(&mut slot.record)
    }

    pub fn get_index(&self, index: usize) -> Option<&ConnectionRecord> {
        let slot = self.slots.get(index)?;
        if slot.record.state == ConnectionState::Empty {
            return None;
        }
        Some(&slot.record)
    }

    pub fn get_index_mut(&mut self, index: usize) -> Option<&mut ConnectionRecord> {
        let slot = self.slots.get_mut(index)?;
        if slot.record.state == ConnectionState::Empty {
            return None;
        }
        Some(&mut slot.record)
    }

    /// Current handle for a slot index; uncreated if the slot is empty.
    pub fn id_for_index(&self, index: usize) -> ConnectionId {
        match self.slots.get(index) {
            Some(slot) if slot.record.state != ConnectionState::Empty => ConnectionId {
                index: index as i32,
                generation: slot.generation,
            },
            _ => ConnectionId::default(),
        }
    }

    pub fn find_by_address(&self, address: &Endpoint) -> Option<usize> {
        self.by_address.get(address).copied()
    }

    /// Indices of occupied slots.
    pub fn occupied_indices(&self) -> Vec<usize> {
        (0..self.slots.len())
            .filter(|&i| self.slots[i].record.state != ConnectionState::Empty)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.len() == self.free.len()
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}
