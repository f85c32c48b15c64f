//! Acknowledgment decisions and their mapping onto broker primitives.

use std::fmt;

use crate::broker::{Consumer, DeliveryTag};
use crate::error::BrokerError;

/// Outcome of handling one delivery.
///
/// Every handler invocation returns exactly one of these. The consume loop
/// also produces `NackDiscard` on its own when a body fails to decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AckDecision {
    /// Processed; remove the message.
    Ack,
    /// Not processed; put it back for redelivery.
    ///
    /// There is no retry limit: a handler that always requeues the same
    /// message will see it redelivered indefinitely.
    NackRequeue,
    /// Not processable; drop it (dead-lettered if the queue has a bound DLX).
    NackDiscard,
}

impl AckDecision {
    /// Issue the broker primitive for this decision.
    pub fn apply<C: Consumer + ?Sized>(
        self,
        consumer: &mut C,
        tag: DeliveryTag,
    ) -> Result<(), BrokerError> {
        match self {
            AckDecision::Ack => consumer.ack(tag),
            AckDecision::NackRequeue => consumer.nack(tag, true),
            AckDecision::NackDiscard => consumer.nack(tag, false),
        }
    }
}

impl fmt::Display for AckDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckDecision::Ack => write!(f, "Ack"),
            AckDecision::NackRequeue => write!(f, "NackRequeue"),
            AckDecision::NackDiscard => write!(f, "NackDiscard"),
        }
    }
}
