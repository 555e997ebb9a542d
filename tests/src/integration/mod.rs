//! End-to-end call flows on the in-memory broker.

pub mod fixtures;

mod blocking_flows;
mod cooperative_flows;
mod wire;
