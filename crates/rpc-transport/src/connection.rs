//! # Connection and Channel
//!
//! The transport capability consumed by the RPC engine.

use crate::message::{ConsumeOptions, Delivery, ExchangeKind, Message, QueueDeclaration};
use std::sync::Arc;
use thiserror::Error;

/// Errors from transport operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection is not started, or has been stopped.
    #[error("connection is not running")]
    NotConnected,

    /// Publish or bind against an exchange that was never declared.
    #[error("exchange not found: {0}")]
    ExchangeNotFound(String),

    /// Bind or consume against a queue that was never declared.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// A redeclaration disagrees with the existing entity.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The entity is owned exclusively by another connection or consumer.
    #[error("resource locked: {0}")]
    ResourceLocked(String),
}

/// Callback invoked for each delivery on a consumed queue.
pub type DeliveryHandler = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Options for [`Connection::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOptions {
    /// Reconnect automatically after the link drops.
    pub auto_reconnect: bool,
    /// Block until the connection is established.
    pub wait: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            wait: true,
        }
    }
}

/// A broker connection.
///
/// Topology may be declared through channels before `start`; deliveries only
/// flow while the connection is running.
pub trait Connection: Send + Sync {
    /// Open a channel on this connection.
    fn channel(&self) -> Result<Arc<dyn Channel>, TransportError>;

    /// Connect and begin delivering messages to attached consumers.
    fn start(&self, options: StartOptions) -> Result<(), TransportError>;

    /// Disconnect. Consumers attached through this connection are cancelled.
    fn stop(&self) -> Result<(), TransportError>;

    /// Whether the connection is currently running.
    fn is_running(&self) -> bool;
}

/// A channel for topology declaration, consuming and publishing.
pub trait Channel: Send + Sync {
    /// Declare an exchange. Redeclaring with the same kind is a no-op.
    fn exchange(&self, name: &str, kind: ExchangeKind, durable: bool)
        -> Result<(), TransportError>;

    /// Declare a queue and return its (possibly generated) name.
    fn queue(&self, declaration: QueueDeclaration) -> Result<String, TransportError>;

    /// Bind `queue` to `exchange` on a routing pattern.
    fn bind(&self, queue: &str, exchange: &str, topic: &str) -> Result<(), TransportError>;

    /// Attach a consumer to `queue`. Returns the consumer tag.
    fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
        handler: DeliveryHandler,
    ) -> Result<String, TransportError>;

    /// Publish a message on its `exchange` with its `topic` as routing key.
    fn publish(&self, message: Message) -> Result<(), TransportError>;
}
