//! Core value types: calls, responses, status codes, correlation ids, arguments.

use crate::error::HandlerError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Prefix of every generated correlation id.
pub const REPLY_ID_PREFIX: &str = "rpc.reply.";

/// Body of the response to a call with the wrong arguments.
pub const INVALID_ARGUMENTS_BODY: &str = "Invalid call arguments";

/// A request to invoke `service.method(args)` on the services serving `route`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Namespace selecting the exchange and queue (`rpc.<route>`).
    pub route: String,
    pub service: String,
    pub method: String,
    /// Positional arguments, opaque to the engine.
    pub args: Vec<Value>,
}

impl Call {
    pub fn new(
        route: impl Into<String>,
        service: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            route: route.into(),
            service: service.into(),
            method: method.into(),
            args,
        }
    }
}

/// Outcome classes of a call, numbered like their HTTP counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum Status {
    Ok = 200,
    BadRequest = 400,
    NotFound = 404,
    MethodNotAllowed = 405,
    InternalServerError = 500,
}

impl Status {
    #[must_use]
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl From<Status> for u16 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

/// A status code outside the known set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown status code {0}")]
pub struct UnknownStatus(pub u16);

impl TryFrom<u16> for Status {
    type Error = UnknownStatus;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            200 => Ok(Self::Ok),
            400 => Ok(Self::BadRequest),
            404 => Ok(Self::NotFound),
            405 => Ok(Self::MethodNotAllowed),
            500 => Ok(Self::InternalServerError),
            other => Err(UnknownStatus(other)),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The result of a call as it travels back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    /// Return value, error text, or null.
    pub body: Value,
}

impl Response {
    pub fn new(status: Status, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(Status::Ok, body)
    }

    pub fn service_not_found(service: &str) -> Self {
        Self::new(
            Status::NotFound,
            Value::String(format!("Service [{service}] not found")),
        )
    }

    pub fn method_not_found(service: &str, method: &str) -> Self {
        Self::new(
            Status::MethodNotAllowed,
            Value::String(format!("Method [{service}:{method}] not found")),
        )
    }

    pub fn bad_request() -> Self {
        Self::new(
            Status::BadRequest,
            Value::String(INVALID_ARGUMENTS_BODY.to_string()),
        )
    }

    /// Handler faults never reach the wire; the body is always null.
    pub fn internal_error() -> Self {
        Self::new(Status::InternalServerError, Value::Null)
    }

    /// Whether the call succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Deserialize the body of a successful response.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.body.clone())
    }
}

/// Token linking a response to its outbound call: `rpc.reply.<uuid-v4>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(format!("{REPLY_ID_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Positional call arguments as seen by a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Deserialize the arguments into a typed tuple.
    ///
    /// `(T,)` takes one argument, `(A, B)` two, and so on. Wrong arity or
    /// wrong types yield [`HandlerError::InvalidArguments`]. Use
    /// [`Args::none`] for methods without parameters.
    ///
    /// ```
    /// use rpc_engine::Args;
    /// use serde_json::json;
    ///
    /// let args = Args::new(vec![json!("duck"), json!(2)]);
    /// let (name, times): (String, u32) = args.parse().unwrap();
    /// assert_eq!(name, "duck");
    /// assert_eq!(times, 2);
    /// ```
    pub fn parse<T: DeserializeOwned>(self) -> Result<T, HandlerError> {
        serde_json::from_value(Value::Array(self.0))
            .map_err(|e| HandlerError::InvalidArguments(e.to_string()))
    }

    /// Require an empty argument list.
    pub fn none(&self) -> Result<(), HandlerError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(HandlerError::InvalidArguments(format!(
                "expected no arguments, got {}",
                self.0.len()
            )))
        }
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}
