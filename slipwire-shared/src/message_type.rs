//! Datagram type discriminator.

/// Message types for the transport layer.
///
/// These identify the purpose of each datagram:
/// - `ConnectionRequest`/`ConnectionAccept`: handshake
/// - `Disconnect`: graceful connection close (best-effort, unacknowledged)
/// - `Data`: application data payload
/// - `Ping`: keep-alive heartbeat
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Connection handshake, carries the initiator's token
    ConnectionRequest = 1,
    /// Handshake response, carries the acceptor's token
    ConnectionAccept = 2,
    /// Graceful disconnect
    Disconnect = 3,
    /// Application data payload
    Data = 4,
    /// Keep-alive heartbeat
    Ping = 5,
}

impl MessageType {
    /// Convert from raw byte value.
    ///
    /// Returns `None` for invalid values; datagrams with an unknown type
    /// must be dropped, never reinterpreted.
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::ConnectionRequest),
            2 => Some(Self::ConnectionAccept),
            3 => Some(Self::Disconnect),
            4 => Some(Self::Data),
            5 => Some(Self::Ping),
            _ => None,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    #[inline]
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_values() {
        assert_eq!(MessageType::ConnectionRequest as u8, 1);
        assert_eq!(MessageType::ConnectionAccept as u8, 2);
        assert_eq!(MessageType::Disconnect as u8, 3);
        assert_eq!(MessageType::Data as u8, 4);
        assert_eq!(MessageType::Ping as u8, 5);
    }

    #[test]
    fn test_from_u8() {
        assert_eq!(MessageType::from_u8(1), Some(MessageType::ConnectionRequest));
        assert_eq!(MessageType::from_u8(5), Some(MessageType::Ping));
        assert_eq!(MessageType::from_u8(0), None);
        assert_eq!(MessageType::from_u8(6), None);
        assert_eq!(MessageType::from_u8(255), None);
    }

    #[test]
    fn test_try_from() {
        assert_eq!(MessageType::try_from(4u8), Ok(MessageType::Data));
        assert_eq!(MessageType::try_from(100u8), Err(()));
    }
}
