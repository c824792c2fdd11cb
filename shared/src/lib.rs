//! Shared types for the cluster test harness
//!
//! Wire framing, the database client capability, program supervision and the
//! logging conventions used by both the orchestrator and the bridge.

pub mod types;
pub mod errors;
pub mod logging;
pub mod messages;
pub mod client;
pub mod ports;
#[cfg(unix)]
pub mod programs;
pub mod stub;

pub use types::*;
pub use errors::*;

pub use client::{ConnectOptions, DatabaseClient, DirectConnection, MockDatabaseClient};
pub use messages::{BridgeCommand, Document, Message};
pub use ports::{resolve_host_name, PortAllocator, DEFAULT_BASE_PORT};
