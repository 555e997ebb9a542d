//! # RPC Telemetry
//!
//! Structured logging for processes that host RPC engines. Engine crates only
//! emit `tracing` events; a binary calls [`init_logging`] once to decide where
//! they go.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rpc_telemetry::{init_logging, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&TelemetryConfig::from_env())?;
//!     // Application code here
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RPC_LOG_LEVEL` / `RUST_LOG` | `error` | Log filter |
//! | `RPC_JSON_LOGS` | `false` | One JSON object per line |
//! | `RPC_CONSOLE_OUTPUT` | `true` | Write events to stdout at all |
//! | `RPC_SERVICE_NAME` | `simple-amqp-rpc` | Name on the startup event |

#![warn(clippy::all)]
#![deny(unsafe_code)]

mod config;

pub use config::{TelemetryConfig, DEFAULT_LOG_LEVEL};

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter `{filter}`: {reason}")]
    Filter { filter: String, reason: String },

    #[error("Failed to install global subscriber: {0}")]
    SubscriberInit(String),
}

/// Build the filter for `config`.
///
/// The configured directive is used verbatim so that `RPC_LOG_LEVEL` can
/// override a `RUST_LOG` inherited from the environment.
pub fn env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(&config.log_level).map_err(|e| TelemetryError::Filter {
        filter: config.log_level.clone(),
        reason: e.to_string(),
    })
}

/// Install the global `tracing` subscriber.
///
/// Fails if the filter does not parse or a subscriber is already installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = env_filter(config)?;

    let result = match (config.console_output, config.json_logs) {
        (true, true) => {
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_thread_names(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init()
        }
        (true, false) => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_names(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()
        }
        (false, _) => tracing_subscriber::registry().with(env_filter).try_init(),
    };
    result.map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        filter = %config.log_level,
        json = config.json_logs,
        "Logging initialized"
    );
    Ok(())
}
