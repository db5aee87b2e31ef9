//! # slipwire-shared
//!
//! Shared wire protocol types for the slipwire transport.
//!
//! This crate provides the low-level datagram framing used by every
//! interface variant (UDP and in-process):
//!
//! - [`MessageType`]: control/data discriminator
//! - [`ProtocolHeader`]: the fixed 4-byte prefix on every datagram
//! - [`HEADER_SIZE`] / [`MTU`] constants
//!
//! ## Layer diagram
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ slipwire (driver, connections, events)  │
//! └────────────────────┬────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────┐
//! │ slipwire-shared (wire framing)          │  ← this crate
//! │ - MessageType, ProtocolHeader (binary)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use slipwire_shared::{MessageType, ProtocolHeader, HEADER_SIZE};
//!
//! let header = ProtocolHeader::new(MessageType::Data, 0x1234, 0);
//! let bytes = header.to_bytes();
//! assert_eq!(bytes.len(), HEADER_SIZE);
//! ```

mod header;
mod message_type;

pub use header::{ProtocolHeader, HEADER_SIZE};
pub use message_type::MessageType;

/// Maximum transmission unit for a single datagram, inclusive of all headers.
pub const MTU: usize = 1400;

/// Largest payload a raw (null-pipeline) datagram can carry.
pub const MAX_PAYLOAD_SIZE: usize = MTU - HEADER_SIZE;
