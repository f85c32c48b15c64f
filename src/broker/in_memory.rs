//! In-memory broker for testing and single-process scenarios.
//!
//! `InMemoryBroker` implements the exchange/queue/binding semantics the
//! pub/sub layer relies on, without any network I/O:
//! - direct, topic and fanout exchanges, plus the default `""` exchange that
//!   routes straight to the queue named by the routing key
//! - idempotent declarations that reject property mismatches
//! - exclusive queues owned by one connection and deleted when it closes
//! - auto-delete queues removed when their last consumer goes away
//! - manual ack/nack with requeue-at-head and dead-lettering
//!
//! Every connection obtained from the same broker (or a clone of it) shares
//! the same state, so two connections stand in for two processes.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use super::spec::{
    Binding, DeclaredQueue, Delivery, DeliveryTag, Envelope, ExchangeKind, ExchangeSpec,
    QueueSpec,
};
use super::{topic, Channel, Connection, Consumer};
use crate::error::BrokerError;

type ConnectionId = u64;

#[derive(Clone, Debug)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    envelope: Envelope,
    redelivered: bool,
}

#[derive(Debug)]
struct QueueState {
    id: u64,
    spec: QueueSpec,
    owner: Option<ConnectionId>,
    ready: VecDeque<StoredMessage>,
    unacked: usize,
    consumers: usize,
}

#[derive(Debug, Default)]
struct State {
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, QueueState>,
    bindings: BTreeSet<Binding>,
    open_connections: HashSet<ConnectionId>,
    next_connection: ConnectionId,
    next_queue: u64,
}

impl State {
    fn ensure_open(&self, connection: ConnectionId) -> Result<(), BrokerError> {
        if self.open_connections.contains(&connection) {
            Ok(())
        } else {
            Err(BrokerError::ConnectionClosed)
        }
    }

    fn accessible_queue(
        &self,
        name: &str,
        connection: ConnectionId,
    ) -> Result<&QueueState, BrokerError> {
        let queue = self
            .queues
            .get(name)
            .ok_or_else(|| BrokerError::NotFound(format!("queue '{}'", name)))?;
        match queue.owner {
            Some(owner) if owner != connection => Err(BrokerError::ResourceLocked(format!(
                "cannot obtain exclusive access to locked queue '{}'",
                name
            ))),
            _ => Ok(queue),
        }
    }

    /// Copy `envelope` into every queue the exchange routes `routing_key` to.
    fn route(&mut self, exchange: &str, routing_key: &str, envelope: &Envelope) -> usize {
        let targets: BTreeSet<String> = if exchange.is_empty() {
            self.queues
                .contains_key(routing_key)
                .then(|| routing_key.to_string())
                .into_iter()
                .collect()
        } else {
            let Some(kind) = self.exchanges.get(exchange).map(|e| e.kind) else {
                return 0;
            };
            self.bindings
                .iter()
                .filter(|b| b.exchange == exchange)
                .filter(|b| match kind {
                    ExchangeKind::Direct => b.routing_key == routing_key,
                    ExchangeKind::Topic => topic::matches(&b.routing_key, routing_key),
                    ExchangeKind::Fanout => true,
                })
                .map(|b| b.queue.clone())
                .collect()
        };

        let mut routed = 0;
        for name in targets {
            if let Some(queue) = self.queues.get_mut(&name) {
                queue.ready.push_back(StoredMessage {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    envelope: envelope.clone(),
                    redelivered: false,
                });
                routed += 1;
            }
        }
        routed
    }

    fn dead_letter(&mut self, queue: &str, message: StoredMessage) {
        let Some(exchange) = self
            .queues
            .get(queue)
            .map(|q| q.spec.dead_letter_exchange.clone())
        else {
            return;
        };
        if self.exchanges.contains_key(&exchange) {
            let routed = self.route(&exchange, &message.routing_key, &message.envelope);
            debug!(queue, exchange = %exchange, routed, "dead-lettered message");
        } else {
            debug!(queue, exchange = %exchange, "dead-letter exchange missing, message dropped");
        }
    }

    fn delete_queue(&mut self, name: &str) {
        if self.queues.remove(name).is_some() {
            self.bindings.retain(|b| b.queue != name);
            debug!(queue = name, "queue deleted");
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, State>, BrokerError> {
        self.state
            .lock()
            .map_err(|_| BrokerError::LockPoisoned(operation))
    }

    /// Lock for inspection and cleanup paths that must not fail.
    fn lock_unpoisoned(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Snapshot of a queue's message counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages waiting to be delivered.
    pub ready: usize,
    /// Messages delivered but not yet acked or nacked.
    pub unacked: usize,
    pub consumers: usize,
}

/// In-process broker.
///
/// Cheap to clone; clones share the same exchanges, queues and bindings.
///
/// ## Example
///
/// ```
/// use peril_pubsub::broker::{Channel, Connection, Envelope, ExchangeSpec, InMemoryBroker};
///
/// let broker = InMemoryBroker::new();
/// let conn = broker.connect();
/// let channel = conn.channel().unwrap();
///
/// channel.exchange_declare(&ExchangeSpec::direct("peril_direct")).unwrap();
/// channel
///     .basic_publish("peril_direct", "pause", Envelope::new("application/json", b"{}".to_vec()))
///     .unwrap();
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection. Dropping it closes it.
    pub fn connect(&self) -> MemoryConnection {
        let mut state = self.shared.lock_unpoisoned();
        state.next_connection += 1;
        let id = state.next_connection;
        state.open_connections.insert(id);
        debug!(connection = id, "connection opened");

        MemoryConnection {
            shared: Arc::clone(&self.shared),
            id,
        }
    }

    /// Counts for a queue, or `None` if it does not exist.
    pub fn queue_stats(&self, name: &str) -> Option<QueueStats> {
        let state = self.shared.lock_unpoisoned();
        state.queues.get(name).map(|q| QueueStats {
            ready: q.ready.len(),
            unacked: q.unacked,
            consumers: q.consumers,
        })
    }

    /// The declaration a queue was created with.
    pub fn queue(&self, name: &str) -> Option<QueueSpec> {
        let state = self.shared.lock_unpoisoned();
        state.queues.get(name).map(|q| q.spec.clone())
    }

    pub fn exchange(&self, name: &str) -> Option<ExchangeSpec> {
        let state = self.shared.lock_unpoisoned();
        state.exchanges.get(name).cloned()
    }

    /// All bindings whose source is `exchange`, in sorted order.
    pub fn bindings(&self, exchange: &str) -> Vec<Binding> {
        let state = self.shared.lock_unpoisoned();
        state
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange)
            .cloned()
            .collect()
    }
}

/// A connection to an [`InMemoryBroker`].
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    id: ConnectionId,
}

impl MemoryConnection {
    /// Close the connection.
    ///
    /// Exclusive queues it owns are deleted and every consumer on it sees
    /// its stream end. Closing twice is a no-op.
    pub fn close(&self) {
        let mut state = self.shared.lock_unpoisoned();
        if !state.open_connections.remove(&self.id) {
            return;
        }

        let owned: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, q)| q.owner == Some(self.id))
            .map(|(name, _)| name.clone())
            .collect();
        for name in owned {
            state.delete_queue(&name);
        }
        debug!(connection = self.id, "connection closed");
        drop(state);

        self.shared.ready.notify_all();
    }

    pub fn is_open(&self) -> bool {
        self.shared
            .lock_unpoisoned()
            .open_connections
            .contains(&self.id)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl Connection for MemoryConnection {
    type Channel = MemoryChannel;

    fn channel(&self) -> Result<MemoryChannel, BrokerError> {
        self.shared.lock("channel")?.ensure_open(self.id)?;
        Ok(MemoryChannel {
            shared: Arc::clone(&self.shared),
            connection: self.id,
        })
    }
}

/// A channel on a [`MemoryConnection`].
#[derive(Debug)]
pub struct MemoryChannel {
    shared: Arc<Shared>,
    connection: ConnectionId,
}

impl Channel for MemoryChannel {
    type Consumer = MemoryConsumer;

    fn exchange_declare(&self, exchange: &ExchangeSpec) -> Result<(), BrokerError> {
        let mut state = self.shared.lock("exchange_declare")?;
        state.ensure_open(self.connection)?;

        if exchange.name.is_empty() {
            return Err(BrokerError::PreconditionFailed(
                "the default exchange cannot be redeclared".into(),
            ));
        }
        if let Some(existing) = state.exchanges.get(&exchange.name) {
            if existing.kind != exchange.kind {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent arg 'type' for exchange '{}': received '{}' but current is '{}'",
                    exchange.name, exchange.kind, existing.kind
                )));
            }
            return Ok(());
        }
        state
            .exchanges
            .insert(exchange.name.clone(), exchange.clone());
        Ok(())
    }

    fn queue_declare(&self, queue: &QueueSpec) -> Result<DeclaredQueue, BrokerError> {
        let mut state = self.shared.lock("queue_declare")?;
        state.ensure_open(self.connection)?;

        let mut spec = queue.clone();
        if spec.name.is_empty() {
            state.next_queue += 1;
            spec.name = format!("amq.gen-{}", state.next_queue);
        }

        if state.queues.contains_key(&spec.name) {
            let existing = state.accessible_queue(&spec.name, self.connection)?;
            if existing.spec.durability != spec.durability {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent arg 'durable' for queue '{}': received '{}' but current is '{}'",
                    spec.name,
                    spec.durable(),
                    existing.spec.durable()
                )));
            }
            if existing.spec.dead_letter_exchange != spec.dead_letter_exchange {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent arg 'x-dead-letter-exchange' for queue '{}': received '{}' but current is '{}'",
                    spec.name, spec.dead_letter_exchange, existing.spec.dead_letter_exchange
                )));
            }
            return Ok(DeclaredQueue {
                name: spec.name.clone(),
                message_count: existing.ready.len() as u32,
                consumer_count: existing.consumers as u32,
            });
        }

        state.next_queue += 1;
        let id = state.next_queue;
        let owner = spec.exclusive().then_some(self.connection);
        let name = spec.name.clone();
        state.queues.insert(
            name.clone(),
            QueueState {
                id,
                spec,
                owner,
                ready: VecDeque::new(),
                unacked: 0,
                consumers: 0,
            },
        );

        Ok(DeclaredQueue {
            name,
            message_count: 0,
            consumer_count: 0,
        })
    }

    fn queue_bind(&self, binding: &Binding) -> Result<(), BrokerError> {
        let mut state = self.shared.lock("queue_bind")?;
        state.ensure_open(self.connection)?;

        if !state.exchanges.contains_key(&binding.exchange) {
            return Err(BrokerError::NotFound(format!(
                "exchange '{}'",
                binding.exchange
            )));
        }
        state.accessible_queue(&binding.queue, self.connection)?;
        state.bindings.insert(binding.clone());
        Ok(())
    }

    fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: Envelope,
    ) -> Result<(), BrokerError> {
        let mut state = self.shared.lock("basic_publish")?;
        state.ensure_open(self.connection)?;

        if !exchange.is_empty() && !state.exchanges.contains_key(exchange) {
            return Err(BrokerError::NotFound(format!("exchange '{}'", exchange)));
        }
        let routed = state.route(exchange, routing_key, &envelope);
        trace!(exchange, routing_key, routed, "message routed");
        drop(state);

        if routed > 0 {
            self.shared.ready.notify_all();
        }
        Ok(())
    }

    fn basic_consume(&self, queue: &str) -> Result<MemoryConsumer, BrokerError> {
        let mut state = self.shared.lock("basic_consume")?;
        state.ensure_open(self.connection)?;

        let queue_id = state.accessible_queue(queue, self.connection)?.id;
        if let Some(q) = state.queues.get_mut(queue) {
            q.consumers += 1;
        }

        Ok(MemoryConsumer {
            shared: Arc::clone(&self.shared),
            connection: self.connection,
            queue: queue.to_string(),
            queue_id,
            next_tag: 0,
            unacked: HashMap::new(),
        })
    }
}

/// A manual-ack consumer on an in-memory queue.
///
/// Dropping the consumer returns its unsettled deliveries to the head of the
/// queue, flagged as redelivered.
#[derive(Debug)]
pub struct MemoryConsumer {
    shared: Arc<Shared>,
    connection: ConnectionId,
    queue: String,
    queue_id: u64,
    next_tag: DeliveryTag,
    unacked: HashMap<DeliveryTag, StoredMessage>,
}

impl MemoryConsumer {
    /// Take an unsettled delivery, after checking the connection is still open.
    fn settle(
        &mut self,
        state: &mut State,
        tag: DeliveryTag,
    ) -> Result<StoredMessage, BrokerError> {
        state.ensure_open(self.connection)?;
        let message = self
            .unacked
            .remove(&tag)
            .ok_or(BrokerError::UnknownDeliveryTag(tag))?;
        if let Some(queue) = self.live_queue(state) {
            queue.unacked = queue.unacked.saturating_sub(1);
        }
        Ok(message)
    }

    fn live_queue<'a>(&self, state: &'a mut State) -> Option<&'a mut QueueState> {
        state
            .queues
            .get_mut(&self.queue)
            .filter(|q| q.id == self.queue_id)
    }
}

impl Consumer for MemoryConsumer {
    fn recv(&mut self) -> Option<Result<Delivery, BrokerError>> {
        let shared = Arc::clone(&self.shared);
        let mut state = match shared.lock("recv") {
            Ok(state) => state,
            Err(err) => return Some(Err(err)),
        };

        loop {
            if state.ensure_open(self.connection).is_err() {
                return None;
            }
            let queue = self.live_queue(&mut state)?;
            if let Some(message) = queue.ready.pop_front() {
                queue.unacked += 1;
                self.next_tag += 1;
                let delivery = Delivery {
                    tag: self.next_tag,
                    exchange: message.exchange.clone(),
                    routing_key: message.routing_key.clone(),
                    redelivered: message.redelivered,
                    envelope: message.envelope.clone(),
                };
                self.unacked.insert(self.next_tag, message);
                return Some(Ok(delivery));
            }

            state = match shared.ready.wait(state) {
                Ok(state) => state,
                Err(_) => return Some(Err(BrokerError::LockPoisoned("recv"))),
            };
        }
    }

    fn ack(&mut self, tag: DeliveryTag) -> Result<(), BrokerError> {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock("ack")?;
        self.settle(&mut state, tag)?;
        Ok(())
    }

    fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock("nack")?;
        let mut message = self.settle(&mut state, tag)?;

        if requeue {
            if let Some(queue) = self.live_queue(&mut state) {
                message.redelivered = true;
                queue.ready.push_front(message);
            }
        } else {
            state.dead_letter(&self.queue, message);
        }
        drop(state);

        shared.ready.notify_all();
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock_unpoisoned();

        let mut pending: Vec<(DeliveryTag, StoredMessage)> = self.unacked.drain().collect();
        pending.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));

        let Some(queue) = self.live_queue(&mut state) else {
            return;
        };
        queue.unacked = queue.unacked.saturating_sub(pending.len());
        for (_, mut message) in pending {
            message.redelivered = true;
            queue.ready.push_front(message);
        }
        queue.consumers = queue.consumers.saturating_sub(1);

        if queue.consumers == 0 && queue.spec.auto_delete() {
            let name = self.queue.clone();
            state.delete_queue(&name);
        }
        drop(state);
        shared.ready.notify_all();
    }
}
