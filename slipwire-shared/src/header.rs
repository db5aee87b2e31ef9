//! Fixed datagram header.

use crate::MessageType;
use bytemuck::{Pod, Zeroable};

/// Protocol header size in bytes.
pub const HEADER_SIZE: usize = 4;

/// The fixed prefix on every datagram (4 bytes, little-endian on wire).
///
/// Layout:
/// ```text
/// Offset  Size  Field
/// 0       1     msg_type
/// 1       2     session_token
/// 3       1     flags
/// ```
///
/// `session_token` is the connection-scoped nonce the receiving side issued;
/// datagrams carrying the wrong token for an established record are dropped.
/// For `Data` packets `flags` carries the pipeline id (0 = null pipeline);
/// it is 0 on every other type.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ProtocolHeader {
    /// Message type (see [`MessageType`])
    pub msg_type: u8,
    /// Connection-scoped nonce
    pub session_token: u16,
    /// Pipeline id on `Data`, 0 otherwise
    pub flags: u8,
}

impl ProtocolHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = HEADER_SIZE;

    #[inline]
    pub fn new(msg_type: MessageType, session_token: u16, flags: u8) -> Self {
        Self {
            msg_type: msg_type as u8,
            session_token,
            flags,
        }
    }

    /// Serialize to wire bytes.
    #[inline]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.msg_type;
        buf[1..3].copy_from_slice(&self.session_token.to_le_bytes());
        buf[3] = self.flags;
        buf
    }

    /// Parse from wire bytes.
    ///
    /// Returns `None` if the buffer is too small; the type byte is not
    /// validated here, use [`ProtocolHeader::message_type`].
    #[inline]
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            msg_type: buf[0],
            session_token: u16::from_le_bytes([buf[1], buf[2]]),
            flags: buf[3],
        })
    }

    /// Parse from a full datagram, also returning the payload slice.
    #[inline]
    pub fn from_packet(buf: &[u8]) -> Option<(Self, &[u8])> {
        let header = Self::from_bytes(buf)?;
        Some((header, &buf[HEADER_SIZE..]))
    }

    /// Get the message type as enum; `None` for unknown wire values.
    #[inline]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.msg_type)
    }
}
