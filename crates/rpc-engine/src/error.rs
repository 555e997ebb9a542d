//! Error types for the RPC engine.

use crate::codec::CodecError;
use crate::config::ConfigError;
use rpc_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Failure of a handler invocation.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Arguments did not match the handler's parameters (wrong arity or type).
    #[error("invalid call arguments: {0}")]
    InvalidArguments(String),

    /// The handler itself failed.
    #[error("handler fault: {0}")]
    Fault(#[from] anyhow::Error),
}

impl HandlerError {
    /// Wrap any error as a handler fault.
    pub fn fault<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Fault(anyhow::Error::new(error))
    }
}

/// Errors surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum RpcError {
    /// No response arrived in time.
    #[error("call to {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// A message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The transport refused an operation.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The engine stopped while the call was outstanding.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Operation not valid in the engine's current state.
    #[error("invalid engine state: {0}")]
    InvalidState(String),
}
