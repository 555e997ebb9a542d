//! # RPC Transport - Messaging Capability for RPC over Pub/Sub
//!
//! Defines the broker-facing surface the RPC engine consumes, plus an
//! in-process topic broker that implements it.
//!
//! ## Capability
//!
//! ```text
//! ┌──────────────┐  channel()   ┌──────────────┐  exchange() / queue() / bind()
//! │  Connection  │ ───────────→ │   Channel    │  consume(handler)
//! │ start / stop │              │              │  publish(Message)
//! └──────────────┘              └──────┬───────┘
//!                                      │
//!                                      ▼
//!                            ┌──────────────────┐
//!                            │  Exchange (topic)│ ──bind "rpc"──→ Queue ──→ consumer
//!                            └──────────────────┘
//! ```
//!
//! ## Semantics
//!
//! - **Default exchange (`""`):** routes a message straight to the queue named by its topic
//! - **Topic exchange:** AMQP-style patterns, `*` matches one word and `#` zero or more
//! - **Expiration:** a message that waits in a queue longer than its TTL is dropped
//! - **Exclusive queues:** only the declaring connection may consume, deleted when it stops

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod connection;
pub mod memory;
pub mod message;
pub mod topic;

// Re-export main types
pub use connection::{Channel, Connection, DeliveryHandler, StartOptions, TransportError};
pub use memory::{InMemoryBroker, InMemoryConnection, QueueStats};
pub use message::{
    Acknowledger, ConsumeOptions, Delivery, ExchangeKind, Message, QueueDeclaration,
};
pub use topic::TopicPattern;

/// Name of the default exchange, which routes by queue name.
pub const DEFAULT_EXCHANGE: &str = "";

/// Prefix of server-generated queue names.
pub const GENERATED_QUEUE_PREFIX: &str = "amq.gen-";
