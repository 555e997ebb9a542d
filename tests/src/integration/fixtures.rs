//! Handlers and engine builders shared by the flow tests.

use rpc_engine::{
    Args, BlockingRpc, CooperativeRpc, HandlerError, HandlerResult, RpcConfig,
};
use rpc_transport::InMemoryBroker;
use serde_json::json;
use std::time::Duration;

/// `ping(name)` → `"pong: {name}"`
pub fn ping(args: Args) -> HandlerResult {
    let (name,): (String,) = args.parse()?;
    Ok(json!(format!("pong: {name}")))
}

/// Always fails with a handler fault.
pub fn boom(args: Args) -> HandlerResult {
    args.none()?;
    Err(HandlerError::Fault(anyhow::anyhow!("exploded")))
}

/// Panics instead of returning.
pub fn kaboom(args: Args) -> HandlerResult {
    args.none()?;
    panic!("kaboom")
}

/// `(delay_ms, tag)` parsed from a `sleep` call.
pub fn sleep_args(args: Args) -> Result<(Duration, String), HandlerError> {
    let (delay_ms, tag): (u64, String) = args.parse()?;
    Ok((Duration::from_millis(delay_ms), tag))
}

/// Config for `route` with a short call timeout.
pub fn config(route: &str, call_timeout: Duration) -> RpcConfig {
    RpcConfig {
        call_timeout,
        ..RpcConfig::with_route(route)
    }
}

/// Blocking engine serving `ping.ping`, `ping.boom`, `ping.kaboom` and
/// `ping.sleep` on route "ping".
pub fn blocking_server(broker: &InMemoryBroker) -> BlockingRpc {
    let server = BlockingRpc::blocking(broker.connect(), config("ping", Duration::from_secs(5)))
        .expect("valid config");
    server
        .register("ping", "ping", ping)
        .register("ping", "boom", boom)
        .register("ping", "kaboom", kaboom)
        .register("ping", "sleep", |args: Args| -> HandlerResult {
            let (delay, tag) = sleep_args(args)?;
            std::thread::sleep(delay);
            Ok(json!(tag))
        });
    server.start_default().expect("server starts");
    server
}

/// Started blocking engine on route "caller".
pub fn blocking_caller(broker: &InMemoryBroker, call_timeout: Duration) -> BlockingRpc {
    let caller = BlockingRpc::blocking(broker.connect(), config("caller", call_timeout))
        .expect("valid config");
    caller.start_default().expect("caller starts");
    caller
}

/// Cooperative engine with the same methods as [`blocking_server`].
///
/// Must be called from inside a tokio runtime.
pub fn cooperative_server(broker: &InMemoryBroker) -> CooperativeRpc {
    use futures::FutureExt;

    let server =
        CooperativeRpc::cooperative(broker.connect(), config("ping", Duration::from_secs(5)))
            .expect("valid config");
    server
        .register("ping", "ping", |args: Args| async move { ping(args) }.boxed())
        .register("ping", "boom", |args: Args| async move { boom(args) }.boxed())
        .register("ping", "kaboom", |args: Args| async move { kaboom(args) }.boxed())
        .register("ping", "sleep", |args: Args| {
            async move {
                let (delay, tag) = sleep_args(args)?;
                tokio::time::sleep(delay).await;
                HandlerResult::Ok(json!(tag))
            }
            .boxed()
        });
    server.start_default().expect("server starts");
    server
}

/// Started cooperative engine on route "caller".
pub fn cooperative_caller(broker: &InMemoryBroker, call_timeout: Duration) -> CooperativeRpc {
    let caller = CooperativeRpc::cooperative(broker.connect(), config("caller", call_timeout))
        .expect("valid config");
    caller.start_default().expect("caller starts");
    caller
}
