//! Client proxy for a remote service.

use crate::engine::Rpc;
use crate::error::RpcError;
use crate::runtime::Runtime;
use crate::types::{Call, Response};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Proxy for one service on one route. Method handles are cached by name.
pub struct RpcClient<R: Runtime> {
    rpc: Rpc<R>,
    service: String,
    route: String,
    methods: DashMap<String, Arc<RemoteMethod<R>>>,
}

impl<R: Runtime> RpcClient<R> {
    pub(crate) fn new(rpc: Rpc<R>, service: &str, route: &str) -> Self {
        Self {
            rpc,
            service: service.to_string(),
            route: route.to_string(),
            methods: DashMap::new(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    /// Handle for `name`. Repeated calls return the same handle.
    pub fn method(&self, name: &str) -> Arc<RemoteMethod<R>> {
        self.methods
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(RemoteMethod {
                    rpc: self.rpc.clone(),
                    route: self.route.clone(),
                    service: self.service.clone(),
                    method: name.to_string(),
                })
            })
            .clone()
    }

    /// Shorthand for `method(name).call(args)`.
    pub fn call(&self, name: &str, args: Vec<Value>) -> R::Deferred<Result<Response, RpcError>> {
        self.method(name).call(args)
    }
}

/// A callable remote method.
pub struct RemoteMethod<R: Runtime> {
    rpc: Rpc<R>,
    route: String,
    service: String,
    method: String,
}

impl<R: Runtime> RemoteMethod<R> {
    pub fn name(&self) -> &str {
        &self.method
    }

    /// Call with the engine's default timeout.
    pub fn call(&self, args: Vec<Value>) -> R::Deferred<Result<Response, RpcError>> {
        self.rpc.send_call(self.to_call(args), None)
    }

    pub fn call_with_timeout(
        &self,
        args: Vec<Value>,
        timeout: Duration,
    ) -> R::Deferred<Result<Response, RpcError>> {
        self.rpc.send_call(self.to_call(args), Some(timeout))
    }

    fn to_call(&self, args: Vec<Value>) -> Call {
        Call::new(&*self.route, &*self.service, &*self.method, args)
    }
}
