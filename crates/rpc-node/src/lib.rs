//! # RPC Node
//!
//! Wires a small ping/pong system onto one broker:
//!
//! ```text
//!  caller ──pong.pong──→ [route "pong"] PongService ──ping.ping──→ [route "ping"] PingService
//!     └────────────────────────────ping.ping────────────────────────────↗
//! ```
//!
//! The services are written once against [`Runtime`] and run unchanged
//! under either concurrency model.

pub mod config;

pub use config::{NodeConfig, RuntimeKind};

use anyhow::{Context, Result};
use rpc_engine::{
    rpc_method, Args, HandlerError, HandlerResult, Response, Rpc, RpcClient, RpcConfig, Runtime,
    Service,
};
use rpc_transport::{Connection, InMemoryBroker};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Route the ping service listens on.
pub const PING_ROUTE: &str = "ping";

/// Route the pong service listens on.
pub const PONG_ROUTE: &str = "pong";

/// Route of the engine that only makes calls.
pub const CALLER_ROUTE: &str = "caller";

// =============================================================================
// Services
// =============================================================================

/// Answers `ping(name)` with `"pong: {name}"`.
pub struct PingService;

impl PingService {
    pub fn ping(&self, args: Args) -> HandlerResult {
        let (name,): (String,) = args.parse()?;
        Ok(json!(format!("pong: {name}")))
    }

    /// Descriptor exposing [`ping`](Self::ping) under runtime `R`.
    pub fn service<R: Runtime>(runtime: R) -> Service<Self, R> {
        Service::new("ping").rpc("ping", move |this: &Arc<Self>, args| {
            runtime.ready(this.ping(args))
        })
    }
}

/// Answers `pong(name)` by calling `ping.ping(name)` and describing the response.
pub struct PongService<R: Runtime> {
    ping: RpcClient<R>,
    runtime: R,
}

impl<R: Runtime> PongService<R> {
    pub fn new(ping: RpcClient<R>, runtime: R) -> Self {
        Self { ping, runtime }
    }

    pub fn pong(&self, args: Args) -> R::Deferred<HandlerResult> {
        let name = match args.parse::<(String,)>() {
            Ok((name,)) => name,
            Err(e) => return self.runtime.ready(Err(e)),
        };
        let call = self.ping.call("ping", vec![json!(name)]);
        self.runtime.map(call, |result| -> HandlerResult {
            let resp = result.map_err(HandlerError::fault)?;
            Ok(json!(describe(&resp)))
        })
    }

    pub fn service() -> Service<Self, R> {
        rpc_method!(Service::<Self, R>::new("pong"), pong)
    }
}

/// `resp [200]: pong: duck`
pub fn describe(resp: &Response) -> String {
    let body = match &resp.body {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    format!("resp [{}]: {}", resp.status.code(), body)
}

// =============================================================================
// Wiring
// =============================================================================

/// The three engines plus the caller's proxies.
pub struct PingPong<R: Runtime> {
    pub ping_server: Rpc<R>,
    pub pong_server: Rpc<R>,
    pub caller: Rpc<R>,
    pub ping: RpcClient<R>,
    pub pong: RpcClient<R>,
}

impl<R: Runtime> PingPong<R> {
    /// Build and start the system on `broker`.
    ///
    /// `make` creates one engine per route, which is where the concurrency
    /// model is chosen.
    pub fn start<F>(broker: &InMemoryBroker, base: &RpcConfig, make: F) -> Result<Self>
    where
        F: Fn(Arc<dyn Connection>, RpcConfig) -> Result<Rpc<R>, rpc_engine::RpcError>,
    {
        let engine = |route: &str| -> Result<Rpc<R>> {
            let config = RpcConfig {
                route: route.to_string(),
                ..base.clone()
            };
            let connection: Arc<dyn Connection> = broker.connect();
            make(connection, config).with_context(|| format!("creating engine for {route}"))
        };

        let ping_server = engine(PING_ROUTE)?;
        ping_server.add_service(
            &PingService::service(ping_server.runtime().clone()),
            Arc::new(PingService),
        );

        let pong_server = engine(PONG_ROUTE)?;
        let upstream = pong_server.client("ping", PING_ROUTE)?;
        let pong_impl = PongService::new(upstream, pong_server.runtime().clone());
        pong_server.add_service(&PongService::service(), Arc::new(pong_impl));

        let caller = engine(CALLER_ROUTE)?;
        let ping = caller.client("ping", PING_ROUTE)?;
        let pong = caller.client("pong", PONG_ROUTE)?;

        for rpc in [&ping_server, &pong_server, &caller] {
            rpc.start_default()
                .with_context(|| format!("starting engine for {}", rpc.route()))?;
        }
        info!(runtime = ping_server.runtime().name(), "Ping/pong system started");

        Ok(Self {
            ping_server,
            pong_server,
            caller,
            ping,
            pong,
        })
    }

    pub fn stop(&self) -> Result<()> {
        for rpc in [&self.caller, &self.pong_server, &self.ping_server] {
            rpc.stop()?;
        }
        Ok(())
    }
}
