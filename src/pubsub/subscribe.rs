//! Consumption loop: decode → handle → settle, one thread per subscription.

use std::io;
use std::thread::{self, JoinHandle};

use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use super::ack::AckDecision;
use super::codec::Codec;
use super::topology::declare_and_bind;
use crate::broker::{Channel, Connection, Consumer, Delivery, ExchangeSpec, QueueDurability};
use crate::error::SetupError;

/// Counters collected by a subscription's consume loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Deliveries received from the broker.
    pub delivered: usize,
    pub acked: usize,
    pub requeued: usize,
    /// Deliveries nacked without requeue, including decode failures.
    pub discarded: usize,
    /// Deliveries whose body could not be decoded (handler not invoked).
    pub decode_failures: usize,
}

impl SubscriptionStats {
    fn record(&mut self, decision: AckDecision) {
        match decision {
            AckDecision::Ack => self.acked += 1,
            AckDecision::NackRequeue => self.requeued += 1,
            AckDecision::NackDiscard => self.discarded += 1,
        }
    }
}

/// Handle to a running subscription.
///
/// The consume loop runs until the broker ends the stream (connection
/// closed or queue deleted). There is no per-subscription cancellation;
/// dropping the handle detaches the loop.
#[derive(Debug)]
pub struct Subscription {
    queue: String,
    handle: JoinHandle<SubscriptionStats>,
}

impl Subscription {
    /// Name of the queue being consumed.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Whether the consume loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the stream to end and return the loop's counters.
    ///
    /// A handler that panicked yields default stats.
    pub fn join(self) -> SubscriptionStats {
        self.handle.join().unwrap_or_default()
    }
}

/// Subscribe `handler` to `queue_name`, bound to `exchange` on `routing_key`.
///
/// Declares the topology once (see [`declare_and_bind`]), opens a
/// manual-ack stream on its own channel and spawns a thread that processes
/// deliveries strictly in order:
///
/// 1. decode the body with `codec`; on failure nack without requeue and
///    skip the handler
/// 2. otherwise call `handler(value)`
/// 3. settle the delivery according to the returned [`AckDecision`]
///
/// Returns as soon as the stream is open. Declare or consume failures are
/// returned as [`SetupError`].
///
/// ## Example
///
/// ```
/// use peril_pubsub::broker::{InMemoryBroker, QueueDurability};
/// use peril_pubsub::pubsub::{subscribe, AckDecision, Codec};
/// use peril_pubsub::routing::{self, PlayingState};
///
/// let broker = InMemoryBroker::new();
/// let conn = broker.connect();
///
/// let subscription = subscribe(
///     &conn,
///     &routing::direct_exchange(),
///     "pause.alice",
///     routing::PAUSE_KEY,
///     QueueDurability::Transient,
///     Codec::Json,
///     |state: PlayingState| {
///         println!("paused: {}", state.is_paused);
///         AckDecision::Ack
///     },
/// )
/// .unwrap();
///
/// conn.close();
/// assert_eq!(subscription.join().delivered, 0);
/// ```
pub fn subscribe<C, T, F>(
    conn: &C,
    exchange: &ExchangeSpec,
    queue_name: &str,
    routing_key: &str,
    durability: QueueDurability,
    codec: Codec,
    handler: F,
) -> Result<Subscription, SetupError>
where
    C: Connection,
    T: DeserializeOwned + 'static,
    F: FnMut(T) -> AckDecision + Send + 'static,
{
    let (channel, queue) = declare_and_bind(conn, exchange, queue_name, routing_key, durability)?;

    let consumer = channel
        .basic_consume(&queue.name)
        .map_err(|source| SetupError::Consume {
            queue: queue.name.clone(),
            source,
        })?;

    let handle = spawn_loop(channel, consumer, queue.name.clone(), codec, handler)
        .map_err(SetupError::Spawn)?;

    info!(
        queue = %queue.name,
        exchange = %exchange.name,
        routing_key,
        codec = codec.content_type(),
        "subscribed"
    );

    Ok(Subscription {
        queue: queue.name,
        handle,
    })
}

/// [`subscribe`] with the JSON codec.
pub fn subscribe_json<C, T, F>(
    conn: &C,
    exchange: &ExchangeSpec,
    queue_name: &str,
    routing_key: &str,
    durability: QueueDurability,
    handler: F,
) -> Result<Subscription, SetupError>
where
    C: Connection,
    T: DeserializeOwned + 'static,
    F: FnMut(T) -> AckDecision + Send + 'static,
{
    subscribe(conn, exchange, queue_name, routing_key, durability, Codec::Json, handler)
}

/// [`subscribe`] with the bitcode codec.
pub fn subscribe_bitcode<C, T, F>(
    conn: &C,
    exchange: &ExchangeSpec,
    queue_name: &str,
    routing_key: &str,
    durability: QueueDurability,
    handler: F,
) -> Result<Subscription, SetupError>
where
    C: Connection,
    T: DeserializeOwned + 'static,
    F: FnMut(T) -> AckDecision + Send + 'static,
{
    subscribe(conn, exchange, queue_name, routing_key, durability, Codec::Bitcode, handler)
}

fn spawn_loop<Ch, T, F>(
    channel: Ch,
    mut consumer: Ch::Consumer,
    queue: String,
    codec: Codec,
    handler: F,
) -> io::Result<JoinHandle<SubscriptionStats>>
where
    Ch: Channel,
    T: DeserializeOwned + 'static,
    F: FnMut(T) -> AckDecision + Send + 'static,
{
    thread::Builder::new()
        .name(format!("consume-{}", queue))
        .spawn(move || {
            // The channel must outlive the stream it opened.
            let _channel = channel;
            consume_loop(&mut consumer, &queue, codec, handler)
        })
}

fn consume_loop<K, T, F>(
    consumer: &mut K,
    queue: &str,
    codec: Codec,
    mut handler: F,
) -> SubscriptionStats
where
    K: Consumer + ?Sized,
    T: DeserializeOwned,
    F: FnMut(T) -> AckDecision,
{
    let mut stats = SubscriptionStats::default();

    while let Some(next) = consumer.recv() {
        let delivery = match next {
            Ok(delivery) => delivery,
            Err(err) => {
                error!(queue, error = %err, "delivery stream failed");
                break;
            }
        };
        stats.delivered += 1;

        let (decision, decoded) = decide(&delivery, codec, &mut handler);
        if !decoded {
            stats.decode_failures += 1;
        }

        if let Err(err) = decision.apply(consumer, delivery.tag) {
            error!(queue, tag = delivery.tag, %decision, error = %err, "could not settle delivery");
            break;
        }
        stats.record(decision);
        debug!(queue, tag = delivery.tag, redelivered = delivery.redelivered, %decision, "settled");
    }

    info!(queue, delivered = stats.delivered, "delivery stream ended");
    stats
}

/// Decode a delivery and run the handler, returning the decision and
/// whether decoding succeeded.
fn decide<T, F>(delivery: &Delivery, codec: Codec, handler: &mut F) -> (AckDecision, bool)
where
    T: DeserializeOwned,
    F: FnMut(T) -> AckDecision,
{
    match codec.decode::<T>(&delivery.envelope.body) {
        Ok(value) => (handler(value), true),
        Err(err) => {
            warn!(
                routing_key = %delivery.routing_key,
                content_type = %delivery.envelope.content_type,
                error = %err,
                "could not decode message, discarding"
            );
            (AckDecision::NackDiscard, false)
        }
    }
}
