//! # In-Memory Broker
//!
//! An in-process topic broker implementing [`Connection`] and [`Channel`].
//!
//! Suitable for single-process deployments and tests; a networked broker
//! binding would implement the same traits.
//!
//! Handlers are invoked on the publishing thread once every broker lock has
//! been released, so a handler may publish again without deadlocking.

use crate::connection::{Channel, Connection, DeliveryHandler, StartOptions, TransportError};
use crate::message::{
    Acknowledger, ConsumeOptions, Delivery, ExchangeKind, Message, QueueDeclaration,
};
use crate::topic::TopicPattern;
use crate::{DEFAULT_EXCHANGE, GENERATED_QUEUE_PREFIX};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Snapshot of a queue's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages routed into the queue.
    pub enqueued: u64,
    /// Messages handed to a consumer.
    pub delivered: u64,
    /// Deliveries explicitly acknowledged.
    pub acked: u64,
    /// Messages discarded because their expiration elapsed while queued.
    pub expired: u64,
    /// Messages waiting for a running consumer.
    pub backlog: usize,
    /// Attached consumers.
    pub consumers: usize,
}

/// Shared broker. Cheap to clone; clones refer to the same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

#[derive(Default)]
struct BrokerState {
    topology: RwLock<Topology>,
    next_connection_id: AtomicU64,
    next_delivery_tag: AtomicU64,
    next_consumer_tag: AtomicU64,
    published: AtomicU64,
    unroutable: AtomicU64,
}

#[derive(Default)]
struct Topology {
    exchanges: HashMap<String, ExchangeState>,
    queues: HashMap<String, Arc<QueueState>>,
}

struct ExchangeState {
    kind: ExchangeKind,
    durable: bool,
    bindings: Vec<(String, TopicPattern)>,
}

struct ConnectionState {
    id: u64,
    running: AtomicBool,
}

struct QueueState {
    name: String,
    auto_delete: bool,
    owner: Option<u64>,
    inner: Mutex<QueueInner>,
    enqueued: AtomicU64,
    delivered: AtomicU64,
    acked: AtomicU64,
    expired: AtomicU64,
}

#[derive(Default)]
struct QueueInner {
    consumers: Vec<Consumer>,
    backlog: VecDeque<Queued>,
    next_consumer: usize,
    ever_consumed: bool,
}

#[derive(Clone)]
struct Consumer {
    connection: Arc<ConnectionState>,
    handler: DeliveryHandler,
    auto_ack: bool,
    exclusive: bool,
}

struct Queued {
    message: Message,
    enqueued_at: Instant,
}

impl Queued {
    fn is_expired(&self) -> bool {
        self.message
            .expiration
            .is_some_and(|ttl| self.enqueued_at.elapsed() > ttl)
    }
}

struct QueueAcker {
    queue: Arc<QueueState>,
}

impl Acknowledger for QueueAcker {
    fn ack(&self, delivery_tag: u64) {
        self.queue.acked.fetch_add(1, Ordering::Relaxed);
        debug!(queue = %self.queue.name, delivery_tag, "Delivery acknowledged");
    }
}

impl QueueState {
    fn new(name: String, auto_delete: bool, owner: Option<u64>) -> Self {
        Self {
            name,
            auto_delete,
            owner,
            inner: Mutex::new(QueueInner::default()),
            enqueued: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            backlog: inner.backlog.len(),
            consumers: inner.consumers.len(),
        }
    }
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new (stopped) connection to this broker.
    #[must_use]
    pub fn connect(&self) -> Arc<InMemoryConnection> {
        let id = self.state.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(connection_id = id, "Connection opened");
        Arc::new(InMemoryConnection {
            broker: self.state.clone(),
            state: Arc::new(ConnectionState {
                id,
                running: AtomicBool::new(false),
            }),
        })
    }

    /// Whether an exchange with this name exists.
    #[must_use]
    pub fn has_exchange(&self, name: &str) -> bool {
        self.state.topology.read().exchanges.contains_key(name)
    }

    /// Whether the exchange exists and is durable.
    #[must_use]
    pub fn is_durable(&self, exchange: &str) -> bool {
        self.state
            .topology
            .read()
            .exchanges
            .get(exchange)
            .is_some_and(|e| e.durable)
    }

    /// Whether a queue with this name exists.
    #[must_use]
    pub fn has_queue(&self, name: &str) -> bool {
        self.state.topology.read().queues.contains_key(name)
    }

    /// Binding patterns from `exchange` to `queue`.
    #[must_use]
    pub fn bindings(&self, exchange: &str, queue: &str) -> Vec<String> {
        self.state
            .topology
            .read()
            .exchanges
            .get(exchange)
            .map(|e| {
                e.bindings
                    .iter()
                    .filter(|(q, _)| q == queue)
                    .map(|(_, p)| p.as_str().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Counters for a queue, if it exists.
    #[must_use]
    pub fn queue_stats(&self, name: &str) -> Option<QueueStats> {
        let queue = self.state.topology.read().queues.get(name).cloned()?;
        Some(queue.stats())
    }

    /// Total messages accepted for publishing.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.state.published.load(Ordering::Relaxed)
    }

    /// Messages that matched no queue.
    #[must_use]
    pub fn messages_unroutable(&self) -> u64 {
        self.state.unroutable.load(Ordering::Relaxed)
    }
}

impl BrokerState {
    fn resolve_targets(&self, message: &Message) -> Result<Vec<Arc<QueueState>>, TransportError> {
        let topology = self.topology.read();

        if message.exchange == DEFAULT_EXCHANGE {
            return Ok(topology.queues.get(&message.topic).cloned().into_iter().collect());
        }

        let exchange = topology
            .exchanges
            .get(&message.exchange)
            .ok_or_else(|| TransportError::ExchangeNotFound(message.exchange.clone()))?;

        let mut targets: Vec<Arc<QueueState>> = Vec::new();
        for (queue, pattern) in &exchange.bindings {
            if !pattern.matches(exchange.kind, &message.topic) {
                continue;
            }
            if targets.iter().any(|q| &q.name == queue) {
                continue;
            }
            if let Some(q) = topology.queues.get(queue) {
                targets.push(q.clone());
            }
        }
        Ok(targets)
    }

    fn publish(&self, message: Message) -> Result<(), TransportError> {
        let targets = self.resolve_targets(&message)?;
        self.published.fetch_add(1, Ordering::Relaxed);

        if targets.is_empty() {
            self.unroutable.fetch_add(1, Ordering::Relaxed);
            debug!(
                exchange = %message.exchange,
                topic = %message.topic,
                "Message dropped (no matching queue)"
            );
            return Ok(());
        }

        for queue in targets {
            queue.enqueued.fetch_add(1, Ordering::Relaxed);
            queue.inner.lock().backlog.push_back(Queued {
                message: message.clone(),
                enqueued_at: Instant::now(),
            });
            self.drain(&queue);
        }
        Ok(())
    }

    /// Hand queued messages to running consumers.
    ///
    /// Deliveries are collected under the queue lock and dispatched after it
    /// is released.
    fn drain(&self, queue: &Arc<QueueState>) {
        let mut ready = Vec::new();
        {
            let mut inner = queue.inner.lock();
            loop {
                let Some(consumer) = next_running_consumer(&mut inner) else {
                    break;
                };
                let Some(queued) = inner.backlog.pop_front() else {
                    break;
                };
                if queued.is_expired() {
                    queue.expired.fetch_add(1, Ordering::Relaxed);
                    debug!(queue = %queue.name, "Queued message expired");
                    continue;
                }
                ready.push((consumer, queued.message));
            }
        }

        for (consumer, message) in ready {
            let tag = self.next_delivery_tag.fetch_add(1, Ordering::Relaxed) + 1;
            let acker: Option<Arc<dyn Acknowledger>> = if consumer.auto_ack {
                None
            } else {
                Some(Arc::new(QueueAcker {
                    queue: queue.clone(),
                }))
            };
            queue.delivered.fetch_add(1, Ordering::Relaxed);
            (consumer.handler)(Delivery::new(message, queue.name.clone(), tag, acker));
        }
    }

    fn drain_all_for(&self, connection_id: u64) {
        let queues: Vec<Arc<QueueState>> =
            self.topology.read().queues.values().cloned().collect();
        for queue in queues {
            let attached = queue
                .inner
                .lock()
                .consumers
                .iter()
                .any(|c| c.connection.id == connection_id);
            if attached {
                self.drain(&queue);
            }
        }
    }

    /// Cancel the connection's consumers and delete what it leaves orphaned.
    fn release_connection(&self, connection_id: u64) {
        let mut topology = self.topology.write();
        let mut deleted = Vec::new();

        for (name, queue) in &topology.queues {
            let mut inner = queue.inner.lock();
            inner.consumers.retain(|c| c.connection.id != connection_id);
            let orphaned = queue.auto_delete && inner.ever_consumed && inner.consumers.is_empty();
            if queue.owner == Some(connection_id) || orphaned {
                deleted.push(name.clone());
            }
        }

        for name in &deleted {
            topology.queues.remove(name);
            for exchange in topology.exchanges.values_mut() {
                exchange.bindings.retain(|(q, _)| q != name);
            }
            debug!(queue = %name, "Queue deleted");
        }
    }
}

fn next_running_consumer(inner: &mut QueueInner) -> Option<Consumer> {
    let count = inner.consumers.len();
    for offset in 0..count {
        let idx = (inner.next_consumer + offset) % count;
        if inner.consumers[idx].connection.running.load(Ordering::Acquire) {
            inner.next_consumer = (idx + 1) % count;
            return Some(inner.consumers[idx].clone());
        }
    }
    None
}

/// A connection to an [`InMemoryBroker`].
pub struct InMemoryConnection {
    broker: Arc<BrokerState>,
    state: Arc<ConnectionState>,
}

impl InMemoryConnection {
    /// Broker-assigned connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.state.id
    }
}

impl Connection for InMemoryConnection {
    fn channel(&self) -> Result<Arc<dyn Channel>, TransportError> {
        Ok(Arc::new(InMemoryChannel {
            broker: self.broker.clone(),
            connection: self.state.clone(),
        }))
    }

    fn start(&self, options: StartOptions) -> Result<(), TransportError> {
        if self.state.running.swap(true, Ordering::AcqRel) {
            debug!(connection_id = self.state.id, "Connection already running");
            return Ok(());
        }
        info!(
            connection_id = self.state.id,
            auto_reconnect = options.auto_reconnect,
            "Connection started"
        );
        self.broker.drain_all_for(self.state.id);
        Ok(())
    }

    fn stop(&self) -> Result<(), TransportError> {
        if !self.state.running.swap(false, Ordering::AcqRel) {
            debug!(connection_id = self.state.id, "Connection already stopped");
        }
        self.broker.release_connection(self.state.id);
        info!(connection_id = self.state.id, "Connection stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }
}

struct InMemoryChannel {
    broker: Arc<BrokerState>,
    connection: Arc<ConnectionState>,
}

impl Channel for InMemoryChannel {
    fn exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), TransportError> {
        if name == DEFAULT_EXCHANGE {
            return Err(TransportError::PreconditionFailed(
                "the default exchange cannot be redeclared".into(),
            ));
        }

        let mut topology = self.broker.topology.write();
        if let Some(existing) = topology.exchanges.get(name) {
            if existing.kind != kind {
                return Err(TransportError::PreconditionFailed(format!(
                    "exchange {name} already declared as {}",
                    existing.kind
                )));
            }
            return Ok(());
        }

        topology.exchanges.insert(
            name.to_string(),
            ExchangeState {
                kind,
                durable,
                bindings: Vec::new(),
            },
        );
        debug!(exchange = name, kind = %kind, durable, "Exchange declared");
        Ok(())
    }

    fn queue(&self, declaration: QueueDeclaration) -> Result<String, TransportError> {
        let name = declaration
            .name
            .clone()
            .unwrap_or_else(|| format!("{GENERATED_QUEUE_PREFIX}{}", Uuid::new_v4().simple()));

        let mut topology = self.broker.topology.write();
        if let Some(existing) = topology.queues.get(&name) {
            if let Some(owner) = existing.owner {
                if owner != self.connection.id {
                    return Err(TransportError::ResourceLocked(name));
                }
            }
            if existing.auto_delete != declaration.auto_delete
                || existing.owner.is_some() != declaration.exclusive
            {
                return Err(TransportError::PreconditionFailed(format!(
                    "queue {name} redeclared with different flags"
                )));
            }
            return Ok(name);
        }

        let owner = declaration.exclusive.then_some(self.connection.id);
        topology.queues.insert(
            name.clone(),
            Arc::new(QueueState::new(name.clone(), declaration.auto_delete, owner)),
        );
        debug!(
            queue = %name,
            auto_delete = declaration.auto_delete,
            exclusive = declaration.exclusive,
            "Queue declared"
        );
        Ok(name)
    }

    fn bind(&self, queue: &str, exchange: &str, topic: &str) -> Result<(), TransportError> {
        if exchange == DEFAULT_EXCHANGE {
            return Err(TransportError::PreconditionFailed(
                "queues are bound to the default exchange implicitly".into(),
            ));
        }

        let mut topology = self.broker.topology.write();
        if !topology.queues.contains_key(queue) {
            return Err(TransportError::QueueNotFound(queue.to_string()));
        }
        let state = topology
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| TransportError::ExchangeNotFound(exchange.to_string()))?;

        let exists = state
            .bindings
            .iter()
            .any(|(q, p)| q == queue && p.as_str() == topic);
        if !exists {
            state
                .bindings
                .push((queue.to_string(), TopicPattern::new(topic)));
            debug!(queue, exchange, topic, "Queue bound");
        }
        Ok(())
    }

    fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
        handler: DeliveryHandler,
    ) -> Result<String, TransportError> {
        let state = self
            .broker
            .topology
            .read()
            .queues
            .get(queue)
            .cloned()
            .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))?;

        if state.owner.is_some_and(|owner| owner != self.connection.id) {
            return Err(TransportError::ResourceLocked(queue.to_string()));
        }

        let tag = format!(
            "ctag-{}",
            self.broker.next_consumer_tag.fetch_add(1, Ordering::Relaxed) + 1
        );
        {
            let mut inner = state.inner.lock();
            let locked = inner.consumers.iter().any(|c| c.exclusive)
                || (options.exclusive && !inner.consumers.is_empty());
            if locked {
                return Err(TransportError::ResourceLocked(queue.to_string()));
            }
            inner.consumers.push(Consumer {
                connection: self.connection.clone(),
                handler,
                auto_ack: options.auto_ack,
                exclusive: options.exclusive,
            });
            inner.ever_consumed = true;
        }
        debug!(queue, consumer_tag = %tag, auto_ack = options.auto_ack, "Consumer attached");

        self.broker.drain(&state);
        Ok(tag)
    }

    fn publish(&self, message: Message) -> Result<(), TransportError> {
        if !self.connection.running.load(Ordering::Acquire) {
            warn!(
                exchange = %message.exchange,
                topic = %message.topic,
                "Publish refused (connection not running)"
            );
            return Err(TransportError::NotConnected);
        }
        self.broker.publish(message)
    }
}
