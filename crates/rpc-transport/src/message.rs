//! # Messages and Declarations
//!
//! Value types that travel through a [`Channel`](crate::Channel).

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A message published to, or delivered from, the broker.
///
/// All fields are plain values; the `with_*` methods return an updated copy
/// so a codec can build the payload and the caller can stamp routing fields.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Exchange to publish on (`""` is the default exchange).
    pub exchange: String,
    /// Routing key.
    pub topic: String,
    /// Encoded body.
    pub payload: Bytes,
    /// MIME type of the payload.
    pub content_type: String,
    /// Time the message may wait in a queue before it is discarded.
    pub expiration: Option<Duration>,
    /// Queue replies should be addressed to.
    pub reply_to: Option<String>,
    /// Token linking a reply to its request.
    pub correlation_id: Option<String>,
}

impl Message {
    /// Create a message carrying `payload` with the given content type.
    pub fn new(payload: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            content_type: content_type.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    #[must_use]
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("exchange", &self.exchange)
            .field("topic", &self.topic)
            .field("payload_len", &self.payload.len())
            .field("content_type", &self.content_type)
            .field("expiration", &self.expiration)
            .field("reply_to", &self.reply_to)
            .field("correlation_id", &self.correlation_id)
            .finish()
    }
}

/// Settles a delivery with the broker.
pub trait Acknowledger: Send + Sync {
    /// Mark the delivery handled so it is not redelivered.
    fn ack(&self, delivery_tag: u64);
}

/// A message handed to a consumer.
#[derive(Clone)]
pub struct Delivery {
    /// The delivered message.
    pub message: Message,
    /// Queue the message was consumed from.
    pub queue: String,
    /// Broker-assigned tag, unique per broker.
    pub delivery_tag: u64,
    acker: Option<Arc<dyn Acknowledger>>,
}

impl Delivery {
    pub fn new(
        message: Message,
        queue: impl Into<String>,
        delivery_tag: u64,
        acker: Option<Arc<dyn Acknowledger>>,
    ) -> Self {
        Self {
            message,
            queue: queue.into(),
            delivery_tag,
            acker,
        }
    }

    /// Acknowledge the delivery.
    ///
    /// A no-op for deliveries made to auto-ack consumers.
    pub fn ack(&self) {
        if let Some(acker) = &self.acker {
            acker.ack(self.delivery_tag);
        }
    }

    /// Whether this delivery still expects an explicit ack.
    #[must_use]
    pub fn requires_ack(&self) -> bool {
        self.acker.is_some()
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("queue", &self.queue)
            .field("delivery_tag", &self.delivery_tag)
            .field("requires_ack", &self.requires_ack())
            .finish()
    }
}

/// Exchange routing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExchangeKind {
    /// Exact routing-key match.
    Direct,
    /// Every bound queue receives every message.
    Fanout,
    /// Dot-separated pattern match.
    #[default]
    Topic,
}

impl ExchangeKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Fanout => "fanout",
            Self::Topic => "topic",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a queue declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDeclaration {
    /// Queue name; `None` asks the broker to generate one.
    pub name: Option<String>,
    /// Delete the queue once its last consumer goes away.
    pub auto_delete: bool,
    /// Restrict the queue to the declaring connection.
    pub exclusive: bool,
}

impl QueueDeclaration {
    /// Declare a queue with a fixed name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Declare a queue whose name the broker generates.
    #[must_use]
    pub fn server_named() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

/// Options for attaching a consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Deliveries are considered acknowledged on hand-off.
    pub auto_ack: bool,
    /// Refuse other consumers on the same queue.
    pub exclusive: bool,
}
