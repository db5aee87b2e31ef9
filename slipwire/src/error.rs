//! Error types for the slipwire driver.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetworkError>;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("driver is not bound to an endpoint")]
    NotBound,

    #[error("endpoint is not valid for this interface")]
    InvalidEndpoint,

    #[error("connection handle is stale or was never created")]
    InvalidConnection,

    #[error("connection is not in a state that can send")]
    NotConnected,

    #[error("payload exceeds the datagram capacity")]
    PacketOverflow,

    #[error("unknown pipeline id {0}")]
    UnknownPipeline(u8),

    #[error("pipelines must be created before any connection exists")]
    PipelinesLocked,

    #[error("pipeline stage rejected the buffer")]
    StageError,
}
