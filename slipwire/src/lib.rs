//! # slipwire
//!
//! Connection-oriented datagram transport for games, built on unreliable
//! sockets.
//!
//! ## Features
//!
//! - **Virtual connections**: handshake, liveness tracking, timed
//!   retransmission of control packets, graceful and timeout-driven
//!   disconnect over plain datagrams
//! - **Stable handles**: slot + generation identity, stale handles compare
//!   unequal after slot reuse
//! - **Composable pipelines**: ordered stage chains applied symmetrically on
//!   send and receive, with per-connection scratch and header reservation
//! - **Two transports**: nonblocking UDP and an in-process exchange for
//!   local loops and deterministic tests
//! - **Single-threaded cooperative**: one `update()` per tick drives
//!   everything; no public call blocks on the network
//!
//! ## Usage
//!
//! ```rust
//! use slipwire::{DriverConfig, NetDriver, NetworkEvent, PipelineId};
//!
//! let mut server = NetDriver::ipc(DriverConfig::default());
//! let server_endpoint = server.create_endpoint(1337);
//! server.bind(&server_endpoint).unwrap();
//! server.listen();
//!
//! let mut client = NetDriver::ipc(DriverConfig::default());
//! let client_endpoint = client.create_endpoint(0);
//! client.bind(&client_endpoint).unwrap();
//! let connection = client.connect(&server.create_endpoint(1337)).unwrap();
//!
//! client.update();
//! server.update();
//! let accepted = server.accept().unwrap();
//! client.update();
//!
//! let (id, event, _) = client.pop_event();
//! assert_eq!(event, NetworkEvent::Connect);
//! assert_eq!(id, connection);
//!
//! let mut send = client.begin_send(PipelineId::NULL, connection).unwrap();
//! send.write_bytes(b"hello");
//! client.end_send(send).unwrap();
//! client.update();
//! server.update();
//!
//! let (event, reader) = server.pop_event_for_connection(accepted);
//! assert_eq!(event, NetworkEvent::Data);
//! assert_eq!(reader.unwrap().length(), 5);
//! ```

mod config;
mod connection;
mod counters;
mod driver;
mod endpoint;
mod error;
mod events;
mod interface;
mod ipc;
mod pipeline;
mod udp;

pub use config::DriverConfig;
pub use connection::{ConnectionId, ConnectionState, DisconnectReason};
pub use counters::DriverCounters;
pub use driver::{NetDriver, PendingSend};
pub use endpoint::{Endpoint, ENDPOINT_DATA_SIZE};
pub use error::{NetworkError, Result};
pub use events::NetworkEvent;
pub use interface::{
    NetworkInterface, QueuedSendMessage, ReceiveBuffer, ReceivedPacket, SendBuffer, SendQueue,
    RECEIVE_BUFFER_TOO_SMALL,
};
pub use ipc::IpcInterface;
pub use pipeline::{
    PacketBuffer, PipelineId, PipelineRequests, PipelineStage, StageCapacities, StageIo,
};
pub use udp::UdpInterface;

pub use slipwire_codec::{CompressionModel, DataStreamReader, DataStreamWriter};
pub use slipwire_shared::{MessageType, ProtocolHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE, MTU};
