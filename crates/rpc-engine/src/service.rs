//! Declarative service descriptors.
//!
//! A [`Service`] names a service and lists the methods it exposes. Binding
//! the descriptor to an instance produces the handlers the registry stores;
//! the same descriptor can be bound to any number of instances.
//!
//! ```
//! use rpc_engine::{rpc_method, Args, Blocking, HandlerResult, Service};
//! use serde_json::json;
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
//! let service = rpc_method!(Service::<Ping, Blocking>::new("ping"), ping);
//! assert_eq!(service.method_names().collect::<Vec<_>>(), vec!["ping"]);
//! ```

use crate::registry::{Handler, HandlerResult};
use crate::runtime::{Cooperative, Runtime};
use crate::types::Args;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

type MethodFn<T, R> =
    Arc<dyn Fn(&Arc<T>, Args) -> <R as Runtime>::Deferred<HandlerResult> + Send + Sync>;

/// A service name plus its table of exposed methods over handler type `T`.
pub struct Service<T, R: Runtime> {
    name: String,
    methods: Vec<(String, MethodFn<T, R>)>,
}

impl<T, R: Runtime> Clone for Service<T, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            methods: self.methods.clone(),
        }
    }
}

impl<T, R> Service<T, R>
where
    T: Send + Sync + 'static,
    R: Runtime,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Expose `f` under `name`.
    #[must_use]
    pub fn rpc<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&Arc<T>, Args) -> R::Deferred<HandlerResult> + Send + Sync + 'static,
    {
        self.methods.push((name.to_string(), Arc::new(f)));
        self
    }

    /// Exposed method names in declaration order.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|(name, _)| name.as_str())
    }

    /// Resolve the method table against `instance`.
    pub fn bind(&self, instance: Arc<T>) -> Vec<(String, Handler<R>)> {
        self.methods
            .iter()
            .map(|(name, method)| {
                let method = method.clone();
                let instance = instance.clone();
                let handler: Handler<R> = Arc::new(move |args: Args| method(&instance, args));
                (name.clone(), handler)
            })
            .collect()
    }
}

impl<T> Service<T, Cooperative>
where
    T: Send + Sync + 'static,
{
    /// Expose an async method under `name`.
    #[must_use]
    pub fn rpc_async<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(Arc<T>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.rpc(name, move |this: &Arc<T>, args: Args| f(this.clone(), args).boxed())
    }
}

/// Expose a method of the service's handler type under its own name.
///
/// `rpc_method!(service, name)` exposes `fn name(&self, Args) -> R::Deferred<HandlerResult>`;
/// `rpc_method!(service, async name)` exposes `async fn name(&self, Args) -> HandlerResult`
/// on a cooperative service.
#[macro_export]
macro_rules! rpc_method {
    ($service:expr, async $method:ident) => {
        $service.rpc_async(stringify!($method), |this, args| async move {
            this.$method(args).await
        })
    };
    ($service:expr, $method:ident) => {
        $service.rpc(stringify!($method), |this, args| this.$method(args))
    };
}
