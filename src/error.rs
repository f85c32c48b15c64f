//! Error taxonomy for broker primitives, topology, publishing and subscriptions.

use std::io;

use thiserror::Error;

/// Failure of a single broker primitive (declare, bind, publish, consume, settle).
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker could not be reached or the handshake failed.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The connection (and every channel on it) has been closed.
    #[error("connection closed")]
    ConnectionClosed,
    /// A redeclaration conflicts with an existing entity's properties.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    /// An exclusive queue is owned by another connection.
    #[error("resource locked: {0}")]
    ResourceLocked(String),
    /// The referenced exchange or queue does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Ack/nack for a delivery this consumer does not hold.
    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),
    #[error("broker lock poisoned during {0}")]
    LockPoisoned(&'static str),
    /// Error reported by the underlying transport.
    #[error("transport error: {0}")]
    Transport(String),
}

impl BrokerError {
    /// Whether this is a connection-level failure (the `ConnectionError` class).
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            BrokerError::Connection(_) | BrokerError::ConnectionClosed
        )
    }
}

/// Topology declaration failed. Unrecoverable for the caller.
#[derive(Debug, Error)]
pub enum DeclareError {
    #[error("could not open channel: {0}")]
    Channel(#[source] BrokerError),
    #[error("could not declare exchange {name}: {source}")]
    Exchange { name: String, source: BrokerError },
    #[error("could not declare queue {name}: {source}")]
    Queue { name: String, source: BrokerError },
    #[error("could not bind queue {queue} to {exchange} on {key}: {source}")]
    Bind {
        queue: String,
        exchange: String,
        key: String,
        source: BrokerError,
    },
}

/// A value could not be serialized by the selected codec.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("json encode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bitcode encode failed: {0}")]
    Bitcode(#[from] bitcode::Error),
}

/// A message body could not be deserialized by the selected codec.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("json decode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bitcode decode failed: {0}")]
    Bitcode(#[from] bitcode::Error),
}

/// Publishing failed before the broker accepted the envelope.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("publish rejected: {0}")]
    Broker(#[from] BrokerError),
}

/// A subscription could not be established.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Declare(#[from] DeclareError),
    #[error("could not start consuming {queue}: {source}")]
    Consume { queue: String, source: BrokerError },
    #[error("could not spawn consumer thread: {0}")]
    Spawn(#[source] io::Error),
}
