//! Service registry: service name → method name → handler.

use crate::error::HandlerError;
use crate::runtime::Runtime;
use crate::types::{Args, Response};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// What a handler produces.
pub type HandlerResult = Result<Value, HandlerError>;

/// A registered method implementation under runtime `R`.
pub type Handler<R> =
    Arc<dyn Fn(Args) -> <R as Runtime>::Deferred<HandlerResult> + Send + Sync>;

/// Two-stage lookup failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("Service [{service}] not found")]
    ServiceNotFound { service: String },

    #[error("Method [{service}:{method}] not found")]
    MethodNotFound { service: String, method: String },
}

impl LookupError {
    /// The response a caller receives for this failure.
    pub fn into_response(self) -> Response {
        match self {
            Self::ServiceNotFound { service } => Response::service_not_found(&service),
            Self::MethodNotFound { service, method } => {
                Response::method_not_found(&service, &method)
            }
        }
    }
}

/// Registry of handlers. Registration may race with lookups.
pub struct ServiceRegistry<R: Runtime> {
    services: RwLock<HashMap<String, HashMap<String, Handler<R>>>>,
}

impl<R: Runtime> Default for ServiceRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Runtime> ServiceRegistry<R> {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` as `service.method`, replacing any previous one.
    pub fn register(&self, service: &str, method: &str, handler: Handler<R>) {
        let replaced = self
            .services
            .write()
            .entry(service.to_string())
            .or_default()
            .insert(method.to_string(), handler)
            .is_some();
        debug!(service, method, replaced, "Registered method");
    }

    /// Resolve `service.method`.
    pub fn lookup(&self, service: &str, method: &str) -> Result<Handler<R>, LookupError> {
        let services = self.services.read();
        let methods = services
            .get(service)
            .ok_or_else(|| LookupError::ServiceNotFound {
                service: service.to_string(),
            })?;
        methods
            .get(method)
            .cloned()
            .ok_or_else(|| LookupError::MethodNotFound {
                service: service.to_string(),
                method: method.to_string(),
            })
    }

    /// Registered service names, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Method names of `service`, sorted. Empty for an unknown service.
    pub fn methods(&self, service: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .get(service)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Total registered methods across all services.
    pub fn len(&self) -> usize {
        self.services.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
