//! # RPC Node
//!
//! Starts ping, pong and a caller on an in-memory broker, makes one call to
//! each service and prints the responses.
//!
//! ```text
//! $ RPC_RUNTIME=cooperative rpc-node duck
//! ping -> resp [200]: pong: duck
//! pong -> resp [200]: resp [200]: pong: duck
//! ```

use anyhow::{Context, Result};
use rpc_engine::{Blocking, BlockingRpc, Cooperative, CooperativeRpc};
use rpc_node::{describe, NodeConfig, PingPong, RuntimeKind};
use rpc_transport::InMemoryBroker;
use serde_json::json;
use tracing::info;

fn main() -> Result<()> {
    let config = NodeConfig::from_env_and_args(std::env::args().skip(1))?;
    rpc_telemetry::init_logging(&config.telemetry)?;

    info!(runtime = %config.runtime, name = %config.name, "Starting rpc-node");

    match config.runtime {
        RuntimeKind::Blocking => run_blocking(&config),
        RuntimeKind::Cooperative => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?;
            runtime.block_on(run_cooperative(&config))
        }
    }
}

fn run_blocking(config: &NodeConfig) -> Result<()> {
    let broker = InMemoryBroker::new();
    let system = PingPong::<Blocking>::start(&broker, &config.rpc, BlockingRpc::blocking)?;

    let ping = system.ping.call("ping", vec![json!(config.name)])?;
    println!("ping -> {}", describe(&ping));
    let pong = system.pong.call("pong", vec![json!(config.name)])?;
    println!("pong -> {}", describe(&pong));

    system.stop()
}

async fn run_cooperative(config: &NodeConfig) -> Result<()> {
    let broker = InMemoryBroker::new();
    let system =
        PingPong::<Cooperative>::start(&broker, &config.rpc, CooperativeRpc::cooperative)?;

    let ping = system.ping.call("ping", vec![json!(config.name)]).await?;
    println!("ping -> {}", describe(&ping));
    let pong = system.pong.call("pong", vec![json!(config.name)]).await?;
    println!("pong -> {}", describe(&pong));

    system.stop()
}
