//! # Utility Modules
//!
//! Supporting utilities shared by the codec, the server and the binary.
//!
//! ## Components
//! - **Compression**: LZ4 and Zstd with a size threshold and an output cap
//! - **Logging**: tracing subscriber setup
//! - **Metrics**: atomic traffic and session counters

pub mod compression;
pub mod logging;
pub mod metrics;
