//! # Cooperative Call Flows
//!
//! The same flows as the blocking suite with handlers and waits running as
//! tokio tasks.

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use futures::future::join_all;
    use rpc_engine::{
        rpc_method, Args, Cooperative, CooperativeRpc, EngineState, HandlerResult, Response,
        RpcError, Service, Status,
    };
    use rpc_transport::InMemoryBroker;
    use serde_json::json;

    use crate::integration::fixtures::{config, cooperative_caller, cooperative_server};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_ping_returns_pong() {
        let broker = InMemoryBroker::new();
        let _server = cooperative_server(&broker);
        let caller = cooperative_caller(&broker, TIMEOUT);
        let ping = caller.client("ping", "ping").unwrap();

        let resp = ping.call("ping", vec![json!("duck")]).await.unwrap();

        assert_eq!(resp, Response::ok(json!("pong: duck")));
        assert_eq!(caller.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let broker = InMemoryBroker::new();
        let _server = cooperative_server(&broker);
        let caller = cooperative_caller(&broker, TIMEOUT);
        let ping = caller.client("ping", "ping").unwrap();
        let ghost = caller.client("ghost", "ping").unwrap();

        let missing_method = ping.call("missing", vec![]).await.unwrap();
        assert_eq!(missing_method.status, Status::MethodNotAllowed);
        assert_eq!(missing_method.body, json!("Method [ping:missing] not found"));

        let missing_service = ghost.call("ping", vec![]).await.unwrap();
        assert_eq!(missing_service.status, Status::NotFound);

        let bad_args = ping.call("ping", vec![json!(1), json!(2)]).await.unwrap();
        assert_eq!(bad_args, Response::bad_request());

        let fault = ping.call("boom", vec![]).await.unwrap();
        assert_eq!(fault.status, Status::InternalServerError);
        assert!(fault.body.is_null());
    }

    #[tokio::test]
    async fn test_panicking_handler_is_500_and_acked() {
        let broker = InMemoryBroker::new();
        let _server = cooperative_server(&broker);
        let caller = cooperative_caller(&broker, TIMEOUT);
        let ping = caller.client("ping", "ping").unwrap();

        let resp = ping.call("kaboom", vec![]).await.unwrap();
        assert_eq!(resp, Response::internal_error());

        tokio::task::yield_now().await;
        let stats = broker.queue_stats("rpc.ping").unwrap();
        assert_eq!(stats.acked, 1);
        assert_eq!(stats.backlog, 0);

        let resp = ping.call("ping", vec![json!("duck")]).await.unwrap();
        assert_eq!(resp.body, json!("pong: duck"));
    }

    #[tokio::test]
    async fn test_abandoned_call_releases_its_slot() {
        let broker = InMemoryBroker::new();
        let caller = cooperative_caller(&broker, TIMEOUT);
        let nobody = caller.client("ping", "nobody").unwrap();

        let outer = tokio::time::timeout(
            Duration::from_millis(10),
            nobody
                .method("ping")
                .call_with_timeout(vec![json!("duck")], Duration::from_millis(100)),
        )
        .await;
        assert!(outer.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(caller.pending_calls(), 0);
        assert_eq!(caller.correlation_stats().cancelled.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_call_without_server_times_out() {
        let broker = InMemoryBroker::new();
        let caller = cooperative_caller(&broker, Duration::from_secs(1));
        let nobody = caller.client("ping", "nobody").unwrap();

        let started = Instant::now();
        let result = nobody.call("ping", vec![json!("duck")]).await;
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(RpcError::Timeout { .. })));
        assert!(elapsed >= Duration::from_secs(1), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
        assert_eq!(caller.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_settle_out_of_order() {
        let broker = InMemoryBroker::new();
        let _server = cooperative_server(&broker);
        let caller = cooperative_caller(&broker, TIMEOUT);
        let sleep = caller.client("ping", "ping").unwrap().method("sleep");

        let finished = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let calls = [(300, "slow"), (50, "fast"), (150, "medium")].map(|(delay, tag)| {
            let sleep = sleep.clone();
            let finished = finished.clone();
            async move {
                let resp = sleep.call(vec![json!(delay), json!(tag)]).await.unwrap();
                finished.lock().push(tag);
                resp
            }
        });

        let responses = join_all(calls).await;

        let bodies: Vec<_> = responses.into_iter().map(|r| r.body).collect();
        assert_eq!(bodies, vec![json!("slow"), json!("fast"), json!("medium")]);
        assert_eq!(*finished.lock(), vec!["fast", "medium", "slow"]);
        assert_eq!(caller.correlation_stats().completed.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_late_response_is_dropped() {
        let broker = InMemoryBroker::new();
        let _server = cooperative_server(&broker);
        let caller = cooperative_caller(&broker, TIMEOUT);
        let sleep = caller.client("ping", "ping").unwrap().method("sleep");

        let result = sleep
            .call_with_timeout(vec![json!(300), json!("late")], Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(RpcError::Timeout { .. })));

        tokio::time::sleep(Duration::from_millis(600)).await;
        let stats = caller.correlation_stats();
        assert_eq!(stats.late_responses.load(Ordering::Relaxed), 1);
        assert_eq!(stats.timeouts.load(Ordering::Relaxed), 1);
        assert_eq!(caller.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_stop_releases_waiting_caller() {
        let broker = InMemoryBroker::new();
        let _server = cooperative_server(&broker);
        let caller = cooperative_caller(&broker, TIMEOUT);
        let sleep = caller.client("ping", "ping").unwrap().method("sleep");

        let waiting = tokio::spawn(async move { sleep.call(vec![json!(1_000), json!("x")]).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(caller.pending_calls(), 1);

        caller.stop().unwrap();
        let result = tokio::time::timeout(Duration::from_millis(500), waiting)
            .await
            .expect("caller released")
            .unwrap();

        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
        assert_eq!(caller.state(), EngineState::Stopped);
        assert_eq!(caller.correlation_stats().abandoned.load(Ordering::Relaxed), 1);
    }

    struct Greeter;

    impl Greeter {
        async fn greet(&self, args: Args) -> HandlerResult {
            let (name,): (String,) = args.parse()?;
            tokio::task::yield_now().await;
            Ok(json!(format!("hello, {name}")))
        }
    }

    #[tokio::test]
    async fn test_async_service_descriptor() {
        let broker = InMemoryBroker::new();
        let server =
            CooperativeRpc::cooperative(broker.connect(), config("greeter", TIMEOUT)).unwrap();
        let service = rpc_method!(Service::<Greeter, Cooperative>::new("greeter"), async greet);
        server.add_service(&service, Arc::new(Greeter));
        server.start_default().unwrap();

        let caller = cooperative_caller(&broker, TIMEOUT);
        let greeter = caller.client("greeter", "greeter").unwrap();

        let resp = greeter.call("greet", vec![json!("duck")]).await.unwrap();
        assert_eq!(resp.body, json!("hello, duck"));
    }
}
