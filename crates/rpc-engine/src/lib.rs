//! # RPC Engine - Request/Response over Topic Pub/Sub
//!
//! Callers invoke named methods on named remote services; the engine
//! publishes a call message on the right exchange, waits for the correlated
//! response on a private reply queue, and returns it (or a typed error)
//! within a timeout.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                            Rpc<R: Runtime>                          │
//! │                                                                      │
//! │  ┌──────────────┐   ┌──────────────┐   ┌────────────────────────┐   │
//! │  │  RpcClient   │   │ ServiceReg.  │   │   CorrelationTable     │   │
//! │  │ method cache │   │ svc → method │   │ rpc.reply.<uuid> → slot│   │
//! │  └──────┬───────┘   └──────▲───────┘   └───────────▲────────────┘   │
//! │         │ send_call        │ recv_call             │ settle         │
//! │  ┌──────┴──────────────────┴───────────────────────┴────────────┐   │
//! │  │                   Codecs (msgpack | json)                     │   │
//! │  └──────────────────────────────┬────────────────────────────────┘   │
//! └─────────────────────────────────┼────────────────────────────────────┘
//!                                   │ Channel / Connection
//!                                   ▼
//!                             rpc-transport
//! ```
//!
//! ## Concurrency
//!
//! - **[`Cooperative`]:** tokio tasks; handlers and waits are futures
//! - **[`Blocking`]:** OS threads; handlers are functions, waits block
//!
//! The engine, registry and correlation table are shared by both.
//!
//! ## Usage
//!
//! ```
//! use rpc_engine::{rpc_method, Args, Blocking, BlockingRpc, HandlerResult, RpcConfig, Service};
//! use rpc_transport::InMemoryBroker;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct Ping;
//!
//! impl Ping {
//!     fn ping(&self, args: Args) -> HandlerResult {
//!         let (name,): (String,) = args.parse()?;
//!         Ok(json!(format!("pong: {name}")))
//!     }
//! }
//!
//! let broker = InMemoryBroker::new();
//!
//! let server = BlockingRpc::blocking(broker.connect(), RpcConfig::with_route("ping")).unwrap();
//! let service = rpc_method!(Service::<Ping, Blocking>::new("ping"), ping);
//! server.add_service(&service, Arc::new(Ping));
//! server.start_default().unwrap();
//!
//! let caller = BlockingRpc::blocking(broker.connect(), RpcConfig::with_route("caller")).unwrap();
//! let ping = caller.client("ping", "ping").unwrap();
//! caller.start_default().unwrap();
//!
//! let resp = ping.call("ping", vec![json!("duck")]).unwrap();
//! assert_eq!(resp.body, json!("pong: duck"));
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod client;
pub mod codec;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod service;
pub mod types;

// Re-export main types
pub use client::{RemoteMethod, RpcClient};
pub use codec::{CodecError, Codecs, Encoding, JsonEncoding, MsgPackEncoding};
pub use config::{ConfigError, RpcConfig};
pub use correlation::{CorrelationStats, CorrelationTable};
pub use engine::{BlockingRpc, CooperativeRpc, EngineState, FaultObserver, Rpc};
pub use error::{HandlerError, RpcError};
pub use registry::{Handler, HandlerResult, LookupError, ServiceRegistry};
pub use runtime::{Blocking, Cooperative, Runtime, Settlement};
pub use service::Service;
pub use types::{Args, Call, CorrelationId, Response, Status};

pub use rpc_transport::StartOptions;

/// Routing key every call is published with.
pub const RPC_TOPIC: &str = "rpc";

/// Exchange calls for `route` are published on.
pub fn exchange_name(route: &str) -> String {
    format!("rpc.{route}")
}

/// Queue the services of `route` consume from.
pub fn queue_name(route: &str) -> String {
    format!("rpc.{route}")
}
