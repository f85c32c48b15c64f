//! Typed publish/subscribe over a [`Connection`](crate::broker::Connection).
//!
//! ## Architecture
//!
//! ```text
//!   publisher process                          subscriber process
//! ┌────────────────────┐                   ┌───────────────────────────┐
//! │ publish(ch, ex,    │                   │ subscribe(conn, ex, queue,│
//! │   key, &value,     │                   │   key, durability, codec, │
//! │   codec)           │                   │   handler)                │
//! └─────────┬──────────┘                   └─────────────┬─────────────┘
//!           │ encode                                     │ declare_and_bind (once)
//!           ▼                                            ▼
//! ┌────────────────────────────────────────────────────────────────────┐
//! │ broker: exchange ──binding(key)──▶ queue ──x-dead-letter──▶ DLX     │
//! └────────────────────────────────────────────────────────────────────┘
//!                                                        │ manual-ack stream
//!                                                        ▼
//!                                        consume thread: decode → handler
//!                                          Ack         → ack
//!                                          NackRequeue → nack(requeue)
//!                                          NackDiscard → nack (dead-letter)
//! ```
//!
//! A body that fails to decode is nacked without requeue and never reaches
//! the handler.

mod ack;
mod codec;
mod publish;
mod subscribe;
mod topology;

pub use ack::AckDecision;
pub use codec::{Codec, BITCODE_CONTENT_TYPE, JSON_CONTENT_TYPE};
pub use publish::{publish, publish_bitcode, publish_json};
pub use subscribe::{subscribe, subscribe_bitcode, subscribe_json, Subscription, SubscriptionStats};
pub use topology::declare_and_bind;
