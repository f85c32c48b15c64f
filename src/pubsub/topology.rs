//! Topology manager: declare exchange, dead-letter exchange, queue and binding.

use tracing::debug;

use crate::broker::{
    Binding, Channel, Connection, DeclaredQueue, ExchangeSpec, QueueDurability, QueueSpec,
};
use crate::error::DeclareError;
use crate::routing::EXCHANGE_PERIL_DLX;

/// Declare `exchange`, the shared dead-letter fanout exchange and `queue_name`,
/// then bind the queue to the exchange on `routing_key`.
///
/// Opens a fresh channel for the caller and returns it together with the
/// declared queue. Every step is idempotent, so two processes may run this
/// concurrently with identical arguments. A conflicting existing declaration
/// (different exchange kind, different queue durability) fails with
/// [`DeclareError`].
///
/// ## Example
///
/// ```
/// use peril_pubsub::broker::{InMemoryBroker, QueueDurability};
/// use peril_pubsub::pubsub::declare_and_bind;
/// use peril_pubsub::routing;
///
/// let broker = InMemoryBroker::new();
/// let conn = broker.connect();
///
/// let (_channel, queue) = declare_and_bind(
///     &conn,
///     &routing::direct_exchange(),
///     "pause.alice",
///     routing::PAUSE_KEY,
///     QueueDurability::Transient,
/// )
/// .unwrap();
/// assert_eq!(queue.name, "pause.alice");
/// ```
pub fn declare_and_bind<C: Connection>(
    conn: &C,
    exchange: &ExchangeSpec,
    queue_name: &str,
    routing_key: &str,
    durability: QueueDurability,
) -> Result<(C::Channel, DeclaredQueue), DeclareError> {
    let channel = conn.channel().map_err(DeclareError::Channel)?;

    declare_exchange(&channel, exchange)?;
    declare_exchange(&channel, &ExchangeSpec::fanout(EXCHANGE_PERIL_DLX))?;

    let spec = QueueSpec::new(queue_name, durability, EXCHANGE_PERIL_DLX);
    let queue = channel
        .queue_declare(&spec)
        .map_err(|source| DeclareError::Queue {
            name: queue_name.to_string(),
            source,
        })?;
    debug!(
        queue = %queue.name,
        durable = spec.durable(),
        exclusive = spec.exclusive(),
        auto_delete = spec.auto_delete(),
        "queue declared"
    );

    let binding = Binding::new(&queue.name, &exchange.name, routing_key);
    channel
        .queue_bind(&binding)
        .map_err(|source| DeclareError::Bind {
            queue: binding.queue.clone(),
            exchange: binding.exchange.clone(),
            key: binding.routing_key.clone(),
            source,
        })?;
    debug!(queue = %queue.name, exchange = %exchange.name, routing_key, "queue bound");

    Ok((channel, queue))
}

fn declare_exchange<Ch: Channel>(channel: &Ch, exchange: &ExchangeSpec) -> Result<(), DeclareError> {
    channel
        .exchange_declare(exchange)
        .map_err(|source| DeclareError::Exchange {
            name: exchange.name.clone(),
            source,
        })?;
    debug!(exchange = %exchange.name, kind = %exchange.kind, "exchange declared");
    Ok(())
}
