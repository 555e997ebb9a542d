//! Node configuration: which concurrency model to run and what to send.

use anyhow::{bail, Result};
use rpc_engine::RpcConfig;
use rpc_telemetry::TelemetryConfig;
use std::fmt;
use std::str::FromStr;

/// Concurrency model the node runs its engines under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeKind {
    #[default]
    Blocking,
    Cooperative,
}

impl FromStr for RuntimeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "blocking" | "threads" => Ok(Self::Blocking),
            "cooperative" | "async" | "tokio" => Ok(Self::Cooperative),
            other => bail!("unknown runtime `{other}` (expected blocking or cooperative)"),
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking => write!(f, "blocking"),
            Self::Cooperative => write!(f, "cooperative"),
        }
    }
}

/// Everything the node needs at startup.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub runtime: RuntimeKind,
    /// Argument sent to `ping` and `pong`.
    pub name: String,
    /// Shared engine settings; the route is overridden per engine.
    pub rpc: RpcConfig,
    pub telemetry: TelemetryConfig,
}

impl NodeConfig {
    /// `RPC_RUNTIME` selects the model, the first CLI argument names the caller.
    pub fn from_env_and_args(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let runtime = match std::env::var("RPC_RUNTIME") {
            Ok(value) => value.parse()?,
            Err(_) => RuntimeKind::default(),
        };
        Ok(Self {
            runtime,
            name: args.next().unwrap_or_else(|| "duck".to_string()),
            rpc: RpcConfig::from_env()?,
            telemetry: TelemetryConfig::for_service("rpc-node"),
        })
    }
}
