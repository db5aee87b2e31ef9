//! Opaque transport endpoints.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Bytes an endpoint can hold: family tag + port + IPv6 address.
pub const ENDPOINT_DATA_SIZE: usize = 19;

const FAMILY_IPV4: u8 = 4;
const FAMILY_IPV6: u8 = 6;

/// Opaque fixed-size address blob tagged with a length.
///
/// UDP endpoints encode `family | port (LE) | ip octets`; in-process
/// endpoints encode a raw 4-byte channel id. Equality and hashing cover the
/// valid prefix only, so endpoints work as map keys regardless of family.
/// The default endpoint has length 0 and matches nothing.
#[derive(Clone, Copy)]
pub struct Endpoint {
    data: [u8; ENDPOINT_DATA_SIZE],
    len: u8,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            data: [0u8; ENDPOINT_DATA_SIZE],
            len: 0,
        }
    }
}

impl Endpoint {
    /// Encodes a UDP socket address.
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        let mut data = [0u8; ENDPOINT_DATA_SIZE];
        data[1..3].copy_from_slice(&addr.port().to_le_bytes());
        let len = match addr.ip() {
            IpAddr::V4(ip) => {
                data[0] = FAMILY_IPV4;
                data[3..7].copy_from_slice(&ip.octets());
                7
            }
            IpAddr::V6(ip) => {
                data[0] = FAMILY_IPV6;
                data[3..19].copy_from_slice(&ip.octets());
                19
            }
        };
        Self { data, len }
    }

    /// Decodes a UDP socket address; `None` for non-UDP endpoints.
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        let port = u16::from_le_bytes([self.data[1], self.data[2]]);
        match (self.data[0], self.len) {
            (FAMILY_IPV4, 7) => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.data[3..7]);
                Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
            }
            (FAMILY_IPV6, 19) => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&self.data[3..19]);
                Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
            }
            _ => None,
        }
    }

    /// Encodes an in-process exchange channel id.
    pub fn ipc(channel: u32) -> Self {
        let mut data = [0u8; ENDPOINT_DATA_SIZE];
        data[..4].copy_from_slice(&channel.to_le_bytes());
        Self { data, len: 4 }
    }

    /// Decodes a channel id; `None` for non-IPC endpoints.
    pub fn ipc_channel(&self) -> Option<u32> {
        if self.len != 4 {
            return None;
        }
        Some(u32::from_le_bytes([
            self.data[0],
            self.data[1],
            self.data[2],
            self.data[3],
        ]))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// An endpoint of length 0 addresses nothing.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The valid prefix.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(addr) = self.to_socket_addr() {
            write!(f, "Endpoint(udp {addr})")
        } else if let Some(channel) = self.ipc_channel() {
            write!(f, "Endpoint(ipc #{channel})")
        } else if self.is_empty() {
            write!(f, "Endpoint(unspecified)")
        } else {
            write!(f, "Endpoint({:02x?})", self.as_bytes())
        }
    }
}
