//! # Wire Codec
//!
//! Maps [`Call`] and [`Response`] envelopes to transport [`Message`]s.
//!
//! ## Envelopes
//!
//! | Kind     | Payload                     | Routing                                 |
//! |----------|-----------------------------|-----------------------------------------|
//! | Call     | `{service, method, args}`   | exchange `rpc.<route>`, topic `rpc`, TTL |
//! | Response | `{status, body}`            | stamped by the engine from `reply_to`   |
//!
//! The route of an inbound call is not on the wire; it comes from the queue
//! that received it.
//!
//! Encodings are pluggable by name. `msgpack` (the default) and `json` are
//! always registered.

use crate::config::ConfigError;
use crate::types::{Call, Response, Status};
use crate::{exchange_name, RPC_TOPIC};
use bytes::Bytes;
use rpc_transport::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default time a call message may wait in a queue.
pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(60);

/// Codec failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("{encoding}: encode failed: {reason}")]
    Encode { encoding: String, reason: String },

    #[error("{encoding}: decode failed: {reason}")]
    Decode { encoding: String, reason: String },
}

/// A named byte encoding for envelope values.
pub trait Encoding: Send + Sync {
    /// Registry name, e.g. `msgpack`.
    fn name(&self) -> &str;

    /// MIME type stamped on produced messages.
    fn content_type(&self) -> &str;

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, payload: &[u8]) -> Result<Value, CodecError>;
}

/// MessagePack via `rmp-serde`, maps keyed by field name.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackEncoding;

impl Encoding for MsgPackEncoding {
    fn name(&self) -> &str {
        "msgpack"
    }

    fn content_type(&self) -> &str {
        "application/msgpack"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(value).map_err(|e| CodecError::Encode {
            encoding: self.name().to_string(),
            reason: e.to_string(),
        })
    }

    fn decode(&self, payload: &[u8]) -> Result<Value, CodecError> {
        rmp_serde::from_slice(payload).map_err(|e| CodecError::Decode {
            encoding: self.name().to_string(),
            reason: e.to_string(),
        })
    }
}

/// JSON via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoding;

impl Encoding for JsonEncoding {
    fn name(&self) -> &str {
        "json"
    }

    fn content_type(&self) -> &str {
        "application/json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            encoding: self.name().to_string(),
            reason: e.to_string(),
        })
    }

    fn decode(&self, payload: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(payload).map_err(|e| CodecError::Decode {
            encoding: self.name().to_string(),
            reason: e.to_string(),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct CallPayload {
    service: String,
    method: String,
    #[serde(default)]
    args: Vec<Value>,
}

#[derive(Serialize, Deserialize)]
struct ResponsePayload {
    status: Status,
    #[serde(default)]
    body: Value,
}

fn to_bytes<T: Serialize>(encoding: &dyn Encoding, payload: &T) -> Result<Bytes, CodecError> {
    let value = serde_json::to_value(payload).map_err(|e| CodecError::Encode {
        encoding: encoding.name().to_string(),
        reason: e.to_string(),
    })?;
    encoding.encode(&value).map(Bytes::from)
}

fn from_bytes<T: for<'de> Deserialize<'de>>(
    encoding: &dyn Encoding,
    payload: &[u8],
) -> Result<T, CodecError> {
    let value = encoding.decode(payload)?;
    serde_json::from_value(value).map_err(|e| CodecError::Decode {
        encoding: encoding.name().to_string(),
        reason: format!("malformed envelope: {e}"),
    })
}

/// Encoding registry with a default and per-route overrides.
#[derive(Clone)]
pub struct Codecs {
    encodings: HashMap<String, Arc<dyn Encoding>>,
    default: Arc<dyn Encoding>,
    routes: HashMap<String, Arc<dyn Encoding>>,
    message_ttl: Duration,
}

impl Default for Codecs {
    fn default() -> Self {
        Self::new()
    }
}

impl Codecs {
    /// Registry with `msgpack` (default) and `json`.
    pub fn new() -> Self {
        let msgpack: Arc<dyn Encoding> = Arc::new(MsgPackEncoding);
        let json: Arc<dyn Encoding> = Arc::new(JsonEncoding);
        let mut encodings = HashMap::new();
        encodings.insert(msgpack.name().to_string(), msgpack.clone());
        encodings.insert(json.name().to_string(), json);
        Self {
            encodings,
            default: msgpack,
            routes: HashMap::new(),
            message_ttl: DEFAULT_MESSAGE_TTL,
        }
    }

    /// Add (or replace) an encoding under its own name.
    pub fn register(&mut self, encoding: Arc<dyn Encoding>) {
        self.encodings.insert(encoding.name().to_string(), encoding);
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn Encoding>, ConfigError> {
        self.encodings
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownEncoding(name.to_string()))
    }

    pub fn set_default_encoding(&mut self, name: &str) -> Result<(), ConfigError> {
        self.default = self.lookup(name)?;
        Ok(())
    }

    pub fn set_route_encoding(&mut self, route: &str, name: &str) -> Result<(), ConfigError> {
        let encoding = self.lookup(name)?;
        self.routes.insert(route.to_string(), encoding);
        Ok(())
    }

    pub fn set_message_ttl(&mut self, ttl: Duration) {
        self.message_ttl = ttl;
    }

    #[must_use]
    pub fn message_ttl(&self) -> Duration {
        self.message_ttl
    }

    /// Names of all registered encodings, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.encodings.keys().cloned().collect();
        names.sort();
        names
    }

    /// Encoding used to produce messages for `route`.
    pub fn for_route(&self, route: &str) -> &dyn Encoding {
        &**self.routes.get(route).unwrap_or(&self.default)
    }

    /// Encoding to decode `message` with: the one named by its content type
    /// when registered, otherwise the route's.
    pub fn for_message(&self, message: &Message, route: &str) -> &dyn Encoding {
        self.encodings
            .values()
            .find(|e| e.content_type() == message.content_type)
            .map_or_else(|| self.for_route(route), |e| &**e)
    }

    /// Build the message for an outbound call.
    ///
    /// Reply routing (`reply_to`, correlation id) is left to the caller.
    pub fn encode_call(&self, call: &Call) -> Result<Message, CodecError> {
        let encoding = self.for_route(&call.route);
        let payload = CallPayload {
            service: call.service.clone(),
            method: call.method.clone(),
            args: call.args.clone(),
        };
        Ok(Message::new(to_bytes(encoding, &payload)?, encoding.content_type())
            .with_exchange(exchange_name(&call.route))
            .with_topic(RPC_TOPIC)
            .with_expiration(self.message_ttl))
    }

    /// Decode an inbound call received on the queue serving `route`.
    pub fn decode_call(&self, message: &Message, route: &str) -> Result<Call, CodecError> {
        let encoding = self.for_message(message, route);
        let payload: CallPayload = from_bytes(encoding, &message.payload)?;
        Ok(Call {
            route: route.to_string(),
            service: payload.service,
            method: payload.method,
            args: payload.args,
        })
    }

    /// Build a response message using `encoding`.
    pub fn encode_resp_with(
        &self,
        response: &Response,
        encoding: &dyn Encoding,
    ) -> Result<Message, CodecError> {
        let payload = ResponsePayload {
            status: response.status,
            body: response.body.clone(),
        };
        Ok(Message::new(
            to_bytes(encoding, &payload)?,
            encoding.content_type(),
        ))
    }

    /// Build a response message in `route`'s encoding.
    pub fn encode_resp(&self, response: &Response, route: &str) -> Result<Message, CodecError> {
        self.encode_resp_with(response, self.for_route(route))
    }

    pub fn decode_resp(&self, message: &Message, route: &str) -> Result<Response, CodecError> {
        let encoding = self.for_message(message, route);
        let payload: ResponsePayload = from_bytes(encoding, &message.payload)?;
        Ok(Response::new(payload.status, payload.body))
    }
}

impl std::fmt::Debug for Codecs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codecs")
            .field("encodings", &self.names())
            .field("default", &self.default.name())
            .field(
                "routes",
                &self
                    .routes
                    .iter()
                    .map(|(r, e)| (r.as_str(), e.name()))
                    .collect::<HashMap<_, _>>(),
            )
            .field("message_ttl", &self.message_ttl)
            .finish()
    }
}
