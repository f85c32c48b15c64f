//! # peril_pubsub
//!
//! Typed publish/subscribe for game clients that talk through a shared
//! message broker.
//!
//! - [`broker`]: the connection/channel/consumer abstraction, an in-memory
//!   broker, and (with the `amqp` feature) a lapin-backed adapter
//! - [`pubsub`]: topology declaration, codec-driven publishing, and the
//!   manual-ack consume loop driven by [`AckDecision`]
//! - [`routing`]: well-known exchanges, routing keys and event payloads
//! - [`config`] / [`logging`]: process settings and tracing setup

pub mod broker;
pub mod config;
mod error;
pub mod logging;
pub mod pubsub;
pub mod routing;

pub use error::{BrokerError, DecodeError, DeclareError, EncodeError, PublishError, SetupError};
pub use pubsub::{AckDecision, Codec, Subscription, SubscriptionStats};
