//! # Wire Interoperability
//!
//! Raw messages on the broker: what a foreign client publishes and what it
//! gets back, plus engines that disagree on their default encoding.

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;
    use rpc_engine::{BlockingRpc, RpcConfig, RpcError, Status};
    use rpc_transport::{
        Connection, ConsumeOptions, Delivery, ExchangeKind, InMemoryBroker, Message,
        QueueDeclaration, StartOptions,
    };
    use serde_json::{json, Value};

    use crate::integration::fixtures::{blocking_server, config};

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// A bare connection with a server-named reply queue collecting deliveries.
    struct RawClient {
        connection: Arc<dyn Connection>,
        reply_queue: String,
        replies: Arc<Mutex<Vec<Delivery>>>,
    }

    impl RawClient {
        fn new(broker: &InMemoryBroker) -> Self {
            let connection: Arc<dyn Connection> = broker.connect();
            let channel = connection.channel().unwrap();
            let reply_queue = channel
                .queue(QueueDeclaration::server_named().auto_delete().exclusive())
                .unwrap();
            let replies = Arc::new(Mutex::new(Vec::new()));
            let sink = replies.clone();
            channel
                .consume(
                    &reply_queue,
                    ConsumeOptions {
                        auto_ack: true,
                        exclusive: true,
                    },
                    Arc::new(move |delivery: Delivery| sink.lock().push(delivery)),
                )
                .unwrap();
            connection.start(StartOptions::default()).unwrap();
            Self {
                connection,
                reply_queue,
                replies,
            }
        }

        fn send(&self, payload: Vec<u8>, content_type: &str, correlation_id: &str) {
            let message = Message::new(payload, content_type)
                .with_exchange("rpc.ping")
                .with_topic("rpc")
                .with_reply_to(self.reply_queue.clone())
                .with_correlation_id(correlation_id);
            self.connection.channel().unwrap().publish(message).unwrap();
        }

        fn wait_for_replies(&self, count: usize) -> Vec<Delivery> {
            let deadline = Instant::now() + TIMEOUT;
            while self.replies.lock().len() < count && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            std::mem::take(&mut *self.replies.lock())
        }
    }

    #[test]
    fn test_json_client_gets_json_reply() {
        let broker = InMemoryBroker::new();
        let _server = blocking_server(&broker);
        let client = RawClient::new(&broker);

        let call = json!({"service": "ping", "method": "ping", "args": ["duck"]});
        client.send(serde_json::to_vec(&call).unwrap(), "application/json", "abc");

        let replies = client.wait_for_replies(1);
        assert_eq!(replies.len(), 1);
        let reply = &replies[0].message;
        assert_eq!(reply.content_type, "application/json");
        assert_eq!(reply.correlation_id.as_deref(), Some("abc"));
        let body: Value = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(body, json!({"status": 200, "body": "pong: duck"}));
    }

    #[test]
    fn test_msgpack_client_gets_msgpack_reply() {
        let broker = InMemoryBroker::new();
        let _server = blocking_server(&broker);
        let client = RawClient::new(&broker);

        let call = json!({"service": "ping", "method": "nope", "args": []});
        client.send(rmp_serde::to_vec_named(&call).unwrap(), "application/msgpack", "xyz");

        let replies = client.wait_for_replies(1);
        let reply = &replies[0].message;
        assert_eq!(reply.content_type, "application/msgpack");
        let body: Value = rmp_serde::from_slice(&reply.payload).unwrap();
        assert_eq!(body, json!({"status": 405, "body": "Method [ping:nope] not found"}));
    }

    #[test]
    fn test_garbage_call_is_dropped_and_acked() {
        let broker = InMemoryBroker::new();
        let _server = blocking_server(&broker);
        let client = RawClient::new(&broker);

        client.send(b"{not json".to_vec(), "application/json", "bad");
        let call = json!({"service": "ping", "method": "ping", "args": ["duck"]});
        client.send(serde_json::to_vec(&call).unwrap(), "application/json", "good");

        let replies = client.wait_for_replies(1);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].message.correlation_id.as_deref(), Some("good"));

        std::thread::sleep(Duration::from_millis(100));
        let stats = broker.queue_stats("rpc.ping").unwrap();
        assert_eq!(stats.acked, 2);
        assert_eq!(stats.backlog, 0);
    }

    #[test]
    fn test_engines_with_different_default_encodings() {
        let broker = InMemoryBroker::new();
        let _server = blocking_server(&broker);

        let caller_config = RpcConfig {
            default_encoding: "json".to_string(),
            ..config("caller", TIMEOUT)
        };
        let caller = BlockingRpc::blocking(broker.connect(), caller_config).unwrap();
        caller.start_default().unwrap();

        let resp = caller
            .client("ping", "ping")
            .unwrap()
            .call("ping", vec![json!("duck")])
            .unwrap();
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.body, json!("pong: duck"));
    }

    #[test]
    fn test_per_route_encoding() {
        let broker = InMemoryBroker::new();
        let _server = blocking_server(&broker);

        let caller_config = RpcConfig {
            route_encodings: HashMap::from([("ping".to_string(), "json".to_string())]),
            ..config("caller", TIMEOUT)
        };
        let caller = BlockingRpc::blocking(broker.connect(), caller_config).unwrap();
        caller.start_default().unwrap();

        let resp = caller
            .client("ping", "ping")
            .unwrap()
            .call("ping", vec![json!("goose")])
            .unwrap();
        assert_eq!(resp.body, json!("pong: goose"));
    }

    #[test]
    fn test_unconsumed_call_expires_in_queue() {
        let broker = InMemoryBroker::new();

        // rpc.ping exists but nobody consumes it yet.
        let parked: Arc<dyn Connection> = broker.connect();
        let channel = parked.channel().unwrap();
        channel.exchange("rpc.ping", ExchangeKind::Topic, true).unwrap();
        channel.queue(QueueDeclaration::named("rpc.ping")).unwrap();
        channel.bind("rpc.ping", "rpc.ping", "rpc").unwrap();

        let caller_config = RpcConfig {
            message_ttl: Duration::from_millis(50),
            ..config("caller", Duration::from_millis(150))
        };
        let caller = BlockingRpc::blocking(broker.connect(), caller_config).unwrap();
        caller.start_default().unwrap();
        let result = caller
            .client("ping", "ping")
            .unwrap()
            .call("ping", vec![json!("duck")]);
        assert!(matches!(result, Err(RpcError::Timeout { .. })));

        let delivered = Arc::new(Mutex::new(0));
        let counter = delivered.clone();
        channel
            .consume(
                "rpc.ping",
                ConsumeOptions::default(),
                Arc::new(move |delivery: Delivery| {
                    *counter.lock() += 1;
                    delivery.ack();
                }),
            )
            .unwrap();
        parked.start(StartOptions::default()).unwrap();

        let stats = broker.queue_stats("rpc.ping").unwrap();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.backlog, 0);
        assert_eq!(*delivered.lock(), 0);
    }
}
