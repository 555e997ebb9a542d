//! # simple-amqp-rpc Test Suite
//!
//! Call flows that cross the transport, codec, registry and correlation
//! layers, run end to end on the in-memory broker.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── fixtures.rs           # Shared services and engine builders
//!     ├── blocking_flows.rs     # Thread-per-delivery engine
//!     ├── cooperative_flows.rs  # Tokio engine
//!     └── wire.rs               # Raw messages, mixed encodings
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p rpc-tests
//! cargo test -p rpc-tests integration::blocking_flows::
//! ```

pub mod integration;
