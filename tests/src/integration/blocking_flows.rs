//! # Blocking Call Flows
//!
//! Caller and server engines on separate connections of one broker, each
//! inbound call handled on its own worker thread and each outbound call
//! blocking the calling thread until settled.

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use rpc_engine::{
        rpc_method, Args, Blocking, BlockingRpc, EngineState, HandlerResult, Response, RpcError,
        Service, Status,
    };
    use rpc_transport::InMemoryBroker;
    use serde_json::json;

    use crate::integration::fixtures::{blocking_caller, blocking_server, config};

    const TIMEOUT: Duration = Duration::from_secs(5);

    // =============================================================================
    // RESPONSES
    // =============================================================================

    #[test]
    fn test_ping_returns_pong() {
        let broker = InMemoryBroker::new();
        let _server = blocking_server(&broker);
        let caller = blocking_caller(&broker, TIMEOUT);
        let ping = caller.client("ping", "ping").unwrap();

        let resp = ping.call("ping", vec![json!("duck")]).unwrap();

        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.body, json!("pong: duck"));
        assert_eq!(caller.pending_calls(), 0);
    }

    #[test]
    fn test_missing_method_is_405() {
        let broker = InMemoryBroker::new();
        let _server = blocking_server(&broker);
        let caller = blocking_caller(&broker, TIMEOUT);
        let ping = caller.client("ping", "ping").unwrap();

        let resp = ping.call("missing", vec![]).unwrap();

        assert_eq!(resp.status.code(), 405);
        assert_eq!(resp.body, json!("Method [ping:missing] not found"));
    }

    #[test]
    fn test_missing_service_is_404() {
        let broker = InMemoryBroker::new();
        let _server = blocking_server(&broker);
        let caller = blocking_caller(&broker, TIMEOUT);
        let ghost = caller.client("ghost", "ping").unwrap();

        let resp = ghost.call("ping", vec![json!("duck")]).unwrap();

        assert_eq!(resp.status, Status::NotFound);
        assert_eq!(resp.body, json!("Service [ghost] not found"));
    }

    #[test]
    fn test_wrong_arguments_are_400() {
        let broker = InMemoryBroker::new();
        let _server = blocking_server(&broker);
        let caller = blocking_caller(&broker, TIMEOUT);
        let ping = caller.client("ping", "ping").unwrap();

        let no_args = ping.call("ping", vec![]).unwrap();
        let extra_args = ping.call("ping", vec![json!("a"), json!("b")]).unwrap();
        let wrong_type = ping.call("ping", vec![json!(7)]).unwrap();

        for resp in [no_args, extra_args, wrong_type] {
            assert_eq!(resp, Response::bad_request());
        }
    }

    #[test]
    fn test_handler_fault_is_500_with_null_body() {
        let broker = InMemoryBroker::new();
        let server = blocking_server(&broker);
        let faults = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = faults.clone();
        server.on_handler_fault(move |call, error| {
            seen.lock().push(format!("{}.{}: {error}", call.service, call.method));
        });
        let caller = blocking_caller(&broker, TIMEOUT);
        let ping = caller.client("ping", "ping").unwrap();

        let resp = ping.call("boom", vec![]).unwrap();

        assert_eq!(resp.status, Status::InternalServerError);
        assert!(resp.body.is_null());
        assert_eq!(*faults.lock(), vec!["ping.boom: exploded".to_string()]);
    }

    #[test]
    fn test_panicking_handler_is_500_and_acked() {
        let broker = InMemoryBroker::new();
        let server = blocking_server(&broker);
        let faults = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = faults.clone();
        server.on_handler_fault(move |call, error| {
            seen.lock().push(format!("{}.{}: {error}", call.service, call.method));
        });
        let caller = blocking_caller(&broker, TIMEOUT);
        let ping = caller.client("ping", "ping").unwrap();

        let resp = ping.call("kaboom", vec![]).unwrap();

        assert_eq!(resp, Response::internal_error());
        assert_eq!(
            *faults.lock(),
            vec!["ping.kaboom: handler panicked: kaboom".to_string()]
        );

        // The worker acks right after publishing the reply.
        let deadline = Instant::now() + Duration::from_secs(1);
        while broker.queue_stats("rpc.ping").unwrap().acked < 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let stats = broker.queue_stats("rpc.ping").unwrap();
        assert_eq!(stats.acked, 1);
        assert_eq!(stats.backlog, 0);

        // The server keeps serving.
        let resp = ping.call("ping", vec![json!("duck")]).unwrap();
        assert_eq!(resp.body, json!("pong: duck"));
    }

    // =============================================================================
    // TIMEOUTS AND CORRELATION
    // =============================================================================

    #[test]
    fn test_call_without_server_times_out() {
        let broker = InMemoryBroker::new();
        let caller = blocking_caller(&broker, Duration::from_secs(1));
        let nobody = caller.client("ping", "nobody").unwrap();

        let started = Instant::now();
        let result = nobody.call("ping", vec![json!("duck")]);
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(RpcError::Timeout { .. })));
        assert!(elapsed >= Duration::from_secs(1), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
        assert_eq!(caller.pending_calls(), 0);
        assert_eq!(caller.correlation_stats().timeouts.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_concurrent_calls_settle_out_of_order() {
        let broker = InMemoryBroker::new();
        let _server = blocking_server(&broker);
        let caller = blocking_caller(&broker, TIMEOUT);
        let ping = caller.client("ping", "ping").unwrap();
        let sleep = ping.method("sleep");

        let finished = parking_lot::Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            for (delay, tag) in [(300, "slow"), (50, "fast"), (150, "medium")] {
                let sleep = sleep.clone();
                let finished = &finished;
                scope.spawn(move || {
                    let resp = sleep.call(vec![json!(delay), json!(tag)]).unwrap();
                    assert_eq!(resp.body, json!(tag));
                    finished.lock().push(tag);
                });
            }
        });

        assert_eq!(*finished.lock(), vec!["fast", "medium", "slow"]);
        assert_eq!(caller.correlation_stats().completed.load(Ordering::Relaxed), 3);
        assert_eq!(caller.pending_calls(), 0);
    }

    #[test]
    fn test_late_response_is_dropped() {
        let broker = InMemoryBroker::new();
        let _server = blocking_server(&broker);
        let caller = blocking_caller(&broker, TIMEOUT);
        let sleep = caller.client("ping", "ping").unwrap().method("sleep");

        let result = sleep.call_with_timeout(
            vec![json!(300), json!("late")],
            Duration::from_millis(50),
        );
        assert!(matches!(result, Err(RpcError::Timeout { .. })));

        // The server still answers; the reply must find no slot.
        std::thread::sleep(Duration::from_millis(600));
        let stats = caller.correlation_stats();
        assert_eq!(stats.late_responses.load(Ordering::Relaxed), 1);
        assert_eq!(stats.completed.load(Ordering::Relaxed), 0);
        assert_eq!(caller.pending_calls(), 0);

        // The engine keeps working afterwards.
        let resp = caller
            .client("ping", "ping")
            .unwrap()
            .call("ping", vec![json!("duck")])
            .unwrap();
        assert_eq!(resp.body, json!("pong: duck"));
    }

    // =============================================================================
    // LIFECYCLE
    // =============================================================================

    #[test]
    fn test_stop_releases_waiting_caller() {
        let broker = InMemoryBroker::new();
        let _server = blocking_server(&broker);
        let caller = blocking_caller(&broker, TIMEOUT);
        let sleep = caller.client("ping", "ping").unwrap().method("sleep");

        let waiting = std::thread::spawn(move || sleep.call(vec![json!(1_000), json!("x")]));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(caller.pending_calls(), 1);

        let started = Instant::now();
        caller.stop().unwrap();
        let result = waiting.join().unwrap();

        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
        assert!(started.elapsed() < Duration::from_millis(900));
        assert_eq!(caller.state(), EngineState::Stopped);
    }

    #[test]
    fn test_call_after_stop_fails_fast() {
        let broker = InMemoryBroker::new();
        let caller = blocking_caller(&broker, TIMEOUT);
        let ping = caller.client("ping", "ping").unwrap();
        caller.stop().unwrap();

        let result = ping.call("ping", vec![json!("duck")]);
        assert!(matches!(result, Err(RpcError::InvalidState(_))));
    }

    // =============================================================================
    // SERVICE DESCRIPTORS
    // =============================================================================

    struct Greeter {
        greeting: &'static str,
    }

    impl Greeter {
        fn greet(&self, args: Args) -> HandlerResult {
            let (name,): (String,) = args.parse()?;
            Ok(json!(format!("{}, {name}", self.greeting)))
        }
    }

    #[test]
    fn test_one_descriptor_two_routes() {
        let broker = InMemoryBroker::new();
        let service = rpc_method!(Service::<Greeter, Blocking>::new("greeter"), greet);

        let mut servers = Vec::new();
        for (route, greeting) in [("en", "hello"), ("pt", "ola")] {
            let server = BlockingRpc::blocking(broker.connect(), config(route, TIMEOUT)).unwrap();
            server.add_service(&service, Arc::new(Greeter { greeting }));
            server.start_default().unwrap();
            servers.push(server);
        }

        let caller = blocking_caller(&broker, TIMEOUT);
        let en = caller.client("greeter", "en").unwrap();
        let pt = caller.client("greeter", "pt").unwrap();

        assert_eq!(en.call("greet", vec![json!("duck")]).unwrap().body, json!("hello, duck"));
        assert_eq!(pt.call("greet", vec![json!("duck")]).unwrap().body, json!("ola, duck"));
    }

    #[test]
    fn test_two_servers_on_one_route_share_the_work() {
        let broker = InMemoryBroker::new();
        let a = blocking_server(&broker);
        let b = blocking_server(&broker);
        let caller = blocking_caller(&broker, TIMEOUT);
        let ping = caller.client("ping", "ping").unwrap();

        for _ in 0..4 {
            assert!(ping.call("ping", vec![json!("duck")]).unwrap().is_ok());
        }

        let stats = broker.queue_stats("rpc.ping").unwrap();
        assert_eq!(stats.consumers, 2);
        assert_eq!(stats.delivered, 4);
        assert_eq!(a.state(), EngineState::Started);
        assert_eq!(b.state(), EngineState::Started);
    }
}
