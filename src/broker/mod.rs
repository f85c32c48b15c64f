//! Broker connection abstraction.
//!
//! The pub/sub layer never speaks a wire protocol itself. It drives a broker
//! through three blocking traits that mirror the AMQP 0-9-1 primitives it
//! relies on:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Connection  (one per process, owned by lifetime management)  │
//! │   channel()                                                  │
//! └──────────────────────────────────────────────────────────────┘
//!                               │ one per subscription / publish path
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Channel                                                      │
//! │   exchange_declare / queue_declare / queue_bind              │
//! │   basic_publish / basic_consume                              │
//! └──────────────────────────────────────────────────────────────┘
//!                               │ manual-ack stream
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Consumer                                                     │
//! │   recv() / ack(tag) / nack(tag, requeue)                     │
//! └──────────────────────────────────────────────────────────────┘
//!          │                                        │
//!          ▼                                        ▼
//! ┌─────────────────┐                  ┌──────────────────────────┐
//! │ InMemoryBroker  │                  │ AmqpConnection (lapin)   │
//! │   (included)    │                  │   feature = "amqp"       │
//! └─────────────────┘                  └──────────────────────────┘
//! ```

#[cfg(feature = "amqp")]
pub mod amqp;
mod in_memory;
mod spec;
pub mod topic;

pub use in_memory::{InMemoryBroker, MemoryChannel, MemoryConnection, MemoryConsumer, QueueStats};
pub use spec::{
    Binding, DeclaredQueue, Delivery, DeliveryTag, Envelope, ExchangeKind, ExchangeSpec,
    QueueDurability, QueueSpec, DEAD_LETTER_ARGUMENT,
};

use crate::error::BrokerError;

/// A broker connection capable of opening independent channels.
///
/// A single connection may back any number of channels. Channels are never
/// shared across concurrent tasks; each subscription and each independent
/// publishing path opens its own.
pub trait Connection: Send + Sync {
    type Channel: Channel;

    /// Open a new channel on this connection.
    fn channel(&self) -> Result<Self::Channel, BrokerError>;
}

/// A channel exposing the exchange/queue/binding primitives.
///
/// Every declaration is idempotent when repeated with identical properties
/// and fails with [`BrokerError::PreconditionFailed`] on a mismatch.
pub trait Channel: Send + 'static {
    type Consumer: Consumer;

    /// Declare an exchange.
    fn exchange_declare(&self, exchange: &ExchangeSpec) -> Result<(), BrokerError>;

    /// Declare a queue, returning its broker-side view.
    fn queue_declare(&self, queue: &QueueSpec) -> Result<DeclaredQueue, BrokerError>;

    /// Bind a queue to an exchange. Rebinding the same triple is a no-op.
    fn queue_bind(&self, binding: &Binding) -> Result<(), BrokerError>;

    /// Hand an envelope to the broker for routing.
    ///
    /// Returns once the broker has accepted the envelope, not once any
    /// consumer has processed it.
    fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: Envelope,
    ) -> Result<(), BrokerError>;

    /// Open a manual-acknowledgment delivery stream on a queue.
    fn basic_consume(&self, queue: &str) -> Result<Self::Consumer, BrokerError>;
}

/// A manual-ack delivery stream.
pub trait Consumer: Send + 'static {
    /// Block until the next delivery arrives.
    ///
    /// Returns `None` once the stream has ended (connection closed or queue
    /// deleted).
    fn recv(&mut self) -> Option<Result<Delivery, BrokerError>>;

    /// Acknowledge a delivery; the broker removes the message.
    fn ack(&mut self, tag: DeliveryTag) -> Result<(), BrokerError>;

    /// Negatively acknowledge a delivery.
    ///
    /// With `requeue` the message goes back to the queue for redelivery;
    /// without it the message is dropped or routed to the queue's
    /// dead-letter exchange.
    fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError>;
}
