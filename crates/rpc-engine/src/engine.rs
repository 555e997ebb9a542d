//! # RPC Engine
//!
//! Owns the topology, the registry and the correlation table for one
//! connection, and moves calls and responses between them and the transport.
//!
//! ## Topology
//!
//! ```text
//!   caller                                          server (route R)
//!   ──────                                          ───────────────
//!   send_call ─publish─→ exchange rpc.R ─"rpc"─→ queue rpc.R ─→ on_call
//!                                                               │ recv_call
//!   on_response ←── reply queue amq.gen-* ←── default exchange ←┘ reply_to
//! ```
//!
//! ## Lifecycle
//!
//! `Unconfigured → Configured → Started → Stopped`. Calls need the
//! topology from [`Rpc::configure`]; inbound traffic flows once
//! [`Rpc::start`] has started the connection.

use crate::client::RpcClient;
use crate::codec::Codecs;
use crate::config::RpcConfig;
use crate::correlation::{CorrelationStats, CorrelationTable};
use crate::error::{HandlerError, RpcError};
use crate::registry::{Handler, HandlerResult, ServiceRegistry};
use crate::runtime::{Blocking, Cooperative, Runtime, Settlement};
use crate::service::Service;
use crate::types::{Args, Call, CorrelationId, Response};
use crate::{exchange_name, queue_name, RPC_TOPIC};
use parking_lot::{Mutex, RwLock};
use rpc_transport::{
    Channel, ConsumeOptions, Connection, Delivery, DeliveryHandler, ExchangeKind, Message,
    QueueDeclaration, StartOptions, DEFAULT_EXCHANGE,
};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Observer of handler faults.
pub type FaultObserver = Arc<dyn Fn(&Call, &anyhow::Error) + Send + Sync>;

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unconfigured,
    Configured,
    Started,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::Started => "started",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Declared topology.
struct Topology {
    channel: Arc<dyn Channel>,
    reply_queue: String,
}

struct RpcInner<R: Runtime> {
    runtime: R,
    connection: Arc<dyn Connection>,
    config: RpcConfig,
    codecs: Codecs,
    registry: ServiceRegistry<R>,
    pending: CorrelationTable<R>,
    observers: RwLock<Vec<FaultObserver>>,
    client_routes: Mutex<BTreeSet<String>>,
    topology: RwLock<Option<Topology>>,
    state: Mutex<EngineState>,
}

/// RPC engine over runtime `R`. Cheap to clone; clones share state.
pub struct Rpc<R: Runtime> {
    inner: Arc<RpcInner<R>>,
}

impl<R: Runtime> Clone for Rpc<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Engine driven by tokio.
pub type CooperativeRpc = Rpc<Cooperative>;

/// Engine driven by OS threads.
pub type BlockingRpc = Rpc<Blocking>;

impl Rpc<Cooperative> {
    /// Engine on the tokio runtime the caller is executing on.
    pub fn cooperative(
        connection: Arc<dyn Connection>,
        config: RpcConfig,
    ) -> Result<Self, RpcError> {
        Self::new(connection, config, Cooperative::current()?)
    }
}

impl Rpc<Blocking> {
    /// Engine whose workers are named after `config.worker_thread_name`.
    pub fn blocking(connection: Arc<dyn Connection>, config: RpcConfig) -> Result<Self, RpcError> {
        let runtime = Blocking::new(config.worker_thread_name.clone());
        Self::new(connection, config, runtime)
    }
}

impl<R: Runtime> Rpc<R> {
    /// Create an engine. The configuration is validated here.
    pub fn new(
        connection: Arc<dyn Connection>,
        config: RpcConfig,
        runtime: R,
    ) -> Result<Self, RpcError> {
        config.validate()?;
        let codecs = config.codecs()?;
        Ok(Self::with_codecs(connection, config, codecs, runtime))
    }

    /// Create an engine with a prepared codec registry (custom encodings).
    pub fn with_codecs(
        connection: Arc<dyn Connection>,
        config: RpcConfig,
        codecs: Codecs,
        runtime: R,
    ) -> Self {
        Self {
            inner: Arc::new(RpcInner {
                runtime,
                connection,
                config,
                codecs,
                registry: ServiceRegistry::new(),
                pending: CorrelationTable::new(),
                observers: RwLock::new(Vec::new()),
                client_routes: Mutex::new(BTreeSet::new()),
                topology: RwLock::new(None),
                state: Mutex::new(EngineState::Unconfigured),
            }),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Route this engine serves.
    pub fn route(&self) -> &str {
        &self.inner.config.route
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    pub fn runtime(&self) -> &R {
        &self.inner.runtime
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.lock()
    }

    /// Name of the private reply queue, once configured.
    pub fn reply_queue(&self) -> Option<String> {
        self.inner
            .topology
            .read()
            .as_ref()
            .map(|t| t.reply_queue.clone())
    }

    /// Outbound calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn correlation_stats(&self) -> &CorrelationStats {
        self.inner.pending.stats()
    }

    pub fn registry(&self) -> &ServiceRegistry<R> {
        &self.inner.registry
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a free-standing handler as `service.method`.
    pub fn register<F>(&self, service: &str, method: &str, handler: F) -> &Self
    where
        F: Fn(Args) -> R::Deferred<HandlerResult> + Send + Sync + 'static,
    {
        let handler: Handler<R> = Arc::new(handler);
        self.inner.registry.register(service, method, handler);
        self
    }

    /// Attach every method of `service` bound to `instance`.
    pub fn add_service<T>(&self, service: &Service<T, R>, instance: Arc<T>) -> &Self
    where
        T: Send + Sync + 'static,
    {
        for (method, handler) in service.bind(instance) {
            self.inner
                .registry
                .register(service.name(), &method, handler);
        }
        info!(service = service.name(), route = %self.route(), "Service attached");
        self
    }

    /// Receive handler faults. Without observers faults are logged at error level.
    pub fn on_handler_fault<F>(&self, observer: F) -> &Self
    where
        F: Fn(&Call, &anyhow::Error) + Send + Sync + 'static,
    {
        self.inner.observers.write().push(Arc::new(observer));
        self
    }

    /// Proxy for `service` served on `route`.
    ///
    /// The route's exchange is declared by `configure`, or immediately when
    /// the engine is already configured.
    pub fn client(&self, service: &str, route: &str) -> Result<RpcClient<R>, RpcError> {
        let newly_added = self.inner.client_routes.lock().insert(route.to_string());
        if newly_added {
            if let Some(topology) = self.inner.topology.read().as_ref() {
                declare_exchange(topology.channel.as_ref(), route)?;
            }
        }
        Ok(RpcClient::new(self.clone(), service, route))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Declare the topology and attach consumers. Calling it again is a no-op.
    pub fn configure(&self) -> Result<(), RpcError> {
        let mut state = self.inner.state.lock();
        self.configure_locked(&mut state)
    }

    fn configure_locked(&self, state: &mut EngineState) -> Result<(), RpcError> {
        match *state {
            EngineState::Unconfigured => {}
            EngineState::Stopped => {
                return Err(RpcError::InvalidState(
                    "cannot configure a stopped engine".into(),
                ))
            }
            current => {
                debug!(state = %current, "Engine already configured");
                return Ok(());
            }
        }

        let route = self.route().to_string();
        let channel = self.inner.connection.channel()?;

        // Serving side
        declare_exchange(channel.as_ref(), &route)?;
        let serving_queue =
            channel.queue(QueueDeclaration::named(queue_name(&route)).auto_delete())?;
        channel.bind(&serving_queue, &exchange_name(&route), RPC_TOPIC)?;

        // Reply side
        let reply_queue =
            channel.queue(QueueDeclaration::server_named().auto_delete().exclusive())?;

        // Topology is visible before any consumer can fire.
        *self.inner.topology.write() = Some(Topology {
            channel: channel.clone(),
            reply_queue: reply_queue.clone(),
        });

        // Publish side, after the topology so `client()` cannot miss a route
        let client_routes: Vec<String> =
            self.inner.client_routes.lock().iter().cloned().collect();
        for client_route in &client_routes {
            declare_exchange(channel.as_ref(), client_route)?;
        }

        channel.consume(&serving_queue, ConsumeOptions::default(), self.call_listener())?;
        channel.consume(
            &reply_queue,
            ConsumeOptions {
                auto_ack: true,
                exclusive: true,
            },
            self.response_listener(),
        )?;

        info!(
            route = %route,
            serving_queue = %serving_queue,
            reply_queue = %reply_queue,
            runtime = self.inner.runtime.name(),
            "RPC topology configured"
        );

        *state = EngineState::Configured;
        Ok(())
    }

    /// Start the connection. Configures first if needed.
    pub fn start(&self, options: StartOptions) -> Result<(), RpcError> {
        // Held until Started so a concurrent stop() cannot be overwritten.
        let mut state = self.inner.state.lock();
        let current = *state;
        match current {
            EngineState::Unconfigured => self.configure_locked(&mut state)?,
            EngineState::Configured => {}
            EngineState::Started => {
                debug!("Engine already started");
                return Ok(());
            }
            EngineState::Stopped => {
                return Err(RpcError::InvalidState(
                    "cannot restart a stopped engine".into(),
                ))
            }
        }

        let options = StartOptions {
            auto_reconnect: options.auto_reconnect && self.inner.config.auto_reconnect,
            ..options
        };
        self.inner.connection.start(options)?;
        *state = EngineState::Started;
        info!(route = %self.route(), "RPC engine started");
        Ok(())
    }

    /// Start with the configured reconnect policy.
    pub fn start_default(&self) -> Result<(), RpcError> {
        self.start(StartOptions {
            auto_reconnect: self.inner.config.auto_reconnect,
            wait: true,
        })
    }

    /// Disconnect. Outstanding calls fail with `ConnectionClosed`.
    pub fn stop(&self) -> Result<(), RpcError> {
        {
            let mut state = self.inner.state.lock();
            if *state == EngineState::Stopped {
                return Ok(());
            }
            *state = EngineState::Stopped;
        }

        let result = self.inner.connection.stop();
        let expired = self.inner.pending.expire();
        let abandoned = self.inner.pending.abandon_all();
        *self.inner.topology.write() = None;
        info!(route = %self.route(), expired, abandoned, "RPC engine stopped");
        result.map_err(RpcError::from)
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Publish `call` and wait for its response.
    ///
    /// `timeout` of `None` uses the configured call timeout.
    pub fn send_call(
        &self,
        call: Call,
        timeout: Option<Duration>,
    ) -> R::Deferred<Result<Response, RpcError>> {
        let runtime = &self.inner.runtime;
        let timeout = timeout.unwrap_or(self.inner.config.call_timeout);
        let label = format!("{}.{}", call.service, call.method);
        debug!(
            route = %call.route,
            service = %call.service,
            method = %call.method,
            "Sending call"
        );

        let (id, waiter) = match self.publish_call(&call, &label, timeout) {
            Ok(sent) => sent,
            Err(e) => {
                warn!(method = %label, error = %e, "Call not sent");
                return runtime.ready(Err(e));
            }
        };

        let slot = PendingSlot {
            inner: self.inner.clone(),
            id,
        };
        runtime.map(runtime.wait(waiter, timeout), move |settlement| match settlement {
            Settlement::Settled(response) => Ok(response),
            Settlement::TimedOut => {
                slot.timed_out();
                Err(RpcError::Timeout {
                    method: label,
                    timeout,
                })
            }
            Settlement::Abandoned => Err(RpcError::ConnectionClosed),
        })
    }

    /// Encode, register the slot, publish. The slot exists before the
    /// message leaves so a fast reply always finds it.
    fn publish_call(
        &self,
        call: &Call,
        label: &str,
        timeout: Duration,
    ) -> Result<(CorrelationId, R::Waiter), RpcError> {
        let (channel, reply_queue) = self.topology()?;
        let message = self.inner.codecs.encode_call(call)?;

        let (id, waiter) = self.inner.pending.open(&self.inner.runtime, label, timeout);
        let message = message
            .with_reply_to(reply_queue)
            .with_correlation_id(id.as_str());

        if let Err(e) = channel.publish(message) {
            self.inner.pending.remove(&id);
            return Err(e.into());
        }
        Ok((id, waiter))
    }

    fn topology(&self) -> Result<(Arc<dyn Channel>, String), RpcError> {
        self.inner
            .topology
            .read()
            .as_ref()
            .map(|t| (t.channel.clone(), t.reply_queue.clone()))
            .ok_or_else(|| RpcError::InvalidState("engine is not configured".into()))
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Dispatch `call` to its handler and build the response.
    pub fn recv_call(&self, call: Call) -> R::Deferred<Response> {
        let runtime = &self.inner.runtime;
        debug!(
            route = %call.route,
            service = %call.service,
            method = %call.method,
            "Received call"
        );

        let handler = match self.inner.registry.lookup(&call.service, &call.method) {
            Ok(handler) => handler,
            Err(e) => {
                debug!(error = %e, "Call lookup failed");
                return runtime.ready(e.into_response());
            }
        };

        let args = Args::new(call.args.clone());
        let deferred = runtime.catch_unwind(move || handler(args));
        let inner = self.inner.clone();
        runtime.map(deferred, move |outcome| {
            let result = outcome.unwrap_or_else(|panic| {
                Err(HandlerError::Fault(anyhow::anyhow!("handler panicked: {panic}")))
            });
            match result {
                Ok(value) => Response::ok(value),
                Err(HandlerError::InvalidArguments(reason)) => {
                    debug!(
                        service = %call.service,
                        method = %call.method,
                        reason = %reason,
                        "Call arguments mismatch"
                    );
                    Response::bad_request()
                }
                Err(HandlerError::Fault(fault)) => {
                    inner.report_fault(&call, &fault);
                    Response::internal_error()
                }
            }
        })
    }

    fn call_listener(&self) -> DeliveryHandler {
        let weak: Weak<RpcInner<R>> = Arc::downgrade(&self.inner);
        Arc::new(move |delivery: Delivery| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let rpc = Rpc { inner };
            let runtime = rpc.inner.runtime.clone();
            runtime.spawn(move || rpc.on_call(delivery));
        })
    }

    fn response_listener(&self) -> DeliveryHandler {
        let weak: Weak<RpcInner<R>> = Arc::downgrade(&self.inner);
        Arc::new(move |delivery: Delivery| {
            if let Some(inner) = weak.upgrade() {
                Rpc { inner }.on_response(&delivery);
            }
        })
    }

    fn on_call(&self, delivery: Delivery) -> R::Deferred<()> {
        let runtime = &self.inner.runtime;
        let call = match self.inner.codecs.decode_call(&delivery.message, self.route()) {
            Ok(call) => call,
            Err(e) => {
                error!(
                    queue = %delivery.queue,
                    error = %e,
                    "Dropping undecodable call"
                );
                delivery.ack();
                return runtime.ready(());
            }
        };

        let rpc = self.clone();
        runtime.map(self.recv_call(call), move |response| {
            rpc.reply(&delivery, &response);
            delivery.ack();
        })
    }

    fn reply(&self, delivery: &Delivery, response: &Response) {
        let request = &delivery.message;
        let Some(reply_to) = request.reply_to.as_deref() else {
            debug!(status = %response.status, "Call without reply_to; response discarded");
            return;
        };

        let encoding = self.inner.codecs.for_message(request, self.route());
        let message = match self.inner.codecs.encode_resp_with(response, encoding) {
            Ok(message) => message,
            Err(e) => {
                error!(reply_to, error = %e, "Failed to encode response");
                return;
            }
        };

        let mut message = message
            .with_exchange(DEFAULT_EXCHANGE)
            .with_topic(reply_to);
        if let Some(id) = &request.correlation_id {
            message = message.with_correlation_id(id.clone());
        }

        if let Err(e) = self.publish(message) {
            warn!(reply_to, error = %e, "Failed to publish response");
        }
    }

    fn publish(&self, message: Message) -> Result<(), RpcError> {
        let (channel, _) = self.topology()?;
        channel.publish(message).map_err(RpcError::from)
    }

    fn on_response(&self, delivery: &Delivery) {
        let message = &delivery.message;
        let Some(id) = message.correlation_id.as_deref() else {
            debug!(queue = %delivery.queue, "Response without correlation id dropped");
            return;
        };

        let response = match self.inner.codecs.decode_resp(message, self.route()) {
            Ok(response) => response,
            Err(e) => {
                // The caller's slot is left to time out.
                warn!(correlation_id = id, error = %e, "Dropping undecodable response");
                return;
            }
        };

        let id = CorrelationId::from(id);
        self.inner
            .pending
            .settle(&self.inner.runtime, &id, response);
    }
}

/// An outbound slot owned by a pending call. Dropping the call before it
/// settles removes the slot.
struct PendingSlot<R: Runtime> {
    inner: Arc<RpcInner<R>>,
    id: CorrelationId,
}

impl<R: Runtime> PendingSlot<R> {
    fn timed_out(&self) -> bool {
        self.inner.pending.timed_out(&self.id)
    }
}

impl<R: Runtime> Drop for PendingSlot<R> {
    fn drop(&mut self) {
        self.inner.pending.cancel(&self.id);
    }
}

impl<R: Runtime> RpcInner<R> {
    fn report_fault(&self, call: &Call, fault: &anyhow::Error) {
        let observers = self.observers.read().clone();
        if observers.is_empty() {
            error!(
                route = %call.route,
                service = %call.service,
                method = %call.method,
                error = %format!("{fault:#}"),
                "Handler fault"
            );
            return;
        }
        for observer in observers {
            observer(call, fault);
        }
    }
}

fn declare_exchange(channel: &dyn Channel, route: &str) -> Result<(), RpcError> {
    channel.exchange(&exchange_name(route), ExchangeKind::Topic, true)?;
    Ok(())
}

impl<R: Runtime> fmt::Debug for Rpc<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rpc")
            .field("route", &self.route())
            .field("runtime", &self.inner.runtime.name())
            .field("state", &self.state())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}
