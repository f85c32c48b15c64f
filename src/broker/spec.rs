//! Topology and message data model shared by every broker implementation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Queue declaration argument naming the dead-letter exchange.
pub const DEAD_LETTER_ARGUMENT: &str = "x-dead-letter-exchange";

/// Per-channel delivery sequence number used to settle a delivery.
pub type DeliveryTag = u64;

/// Exchange routing rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Routing key must equal the binding key.
    Direct,
    /// Binding key is a dot-segmented pattern with `*` and `#` wildcards.
    Topic,
    /// Routing key is ignored; every bound queue receives a copy.
    Fanout,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Fanout => "fanout",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, durable exchange of a fixed kind.
///
/// The kind is always explicit; it is never inferred from the name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
}

impl ExchangeSpec {
    pub fn new(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn direct(name: impl Into<String>) -> Self {
        Self::new(name, ExchangeKind::Direct)
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self::new(name, ExchangeKind::Topic)
    }

    pub fn fanout(name: impl Into<String>) -> Self {
        Self::new(name, ExchangeKind::Fanout)
    }

    /// Exchanges are always declared durable.
    pub fn durable(&self) -> bool {
        true
    }
}

/// Lifetime class of a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueDurability {
    /// Survives broker restarts; shared; never auto-deleted.
    Durable,
    /// Owned by one connection; removed when that connection closes.
    Transient,
}

/// A queue declaration.
///
/// The durable/auto-delete/exclusive flags are derived from the
/// [`QueueDurability`] class, so a durable queue can never be exclusive or
/// auto-deleted and a transient queue is always both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durability: QueueDurability,
    pub dead_letter_exchange: String,
}

impl QueueSpec {
    pub fn new(
        name: impl Into<String>,
        durability: QueueDurability,
        dead_letter_exchange: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            durability,
            dead_letter_exchange: dead_letter_exchange.into(),
        }
    }

    pub fn durable(&self) -> bool {
        self.durability == QueueDurability::Durable
    }

    pub fn auto_delete(&self) -> bool {
        self.durability == QueueDurability::Transient
    }

    pub fn exclusive(&self) -> bool {
        self.durability == QueueDurability::Transient
    }

    /// Declaration arguments as `(name, value)` pairs.
    pub fn arguments(&self) -> Vec<(&'static str, &str)> {
        vec![(DEAD_LETTER_ARGUMENT, self.dead_letter_exchange.as_str())]
    }
}

/// Broker-side view of a declared queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclaredQueue {
    pub name: String,
    /// Messages ready for delivery at declaration time.
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Association of a queue with an exchange under a routing-key pattern.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Binding {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

impl Binding {
    pub fn new(
        queue: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }
}

/// A published message body plus its informative content type.
///
/// The content type is metadata only: subscribers decode with the codec
/// they were configured with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Envelope {
    pub fn new(content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            body,
        }
    }

    /// Get the body as a string (if valid UTF-8).
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// A message handed to a consumer, awaiting settlement.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub exchange: String,
    pub routing_key: String,
    /// Set when the message was requeued at least once before.
    pub redelivered: bool,
    pub envelope: Envelope,
}
