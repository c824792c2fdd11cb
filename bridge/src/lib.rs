//! Fault-injection proxy for cluster tests
//!
//! The `bridge` binary sits between a test and one database process and
//! applies per-peer policies (block, delay, drop) to the traffic it forwards.
//! `BridgeEndpoint` is the test-side handle: it launches the binary, stands
//! in for a direct connection, and issues the policy commands.

pub mod endpoint;
pub mod error;
pub mod policy;
pub mod proxy;

pub use endpoint::{
    BridgeControl, BridgeEndpoint, BridgeOptions, PeerAddress, BRIDGE_PORT_OFFSET, DEFAULT_BRIDGE_PROGRAM,
};
pub use error::{BridgeError, BridgeResult};
pub use policy::{EdgePolicy, HostSettingsMap, PolicyChange};
pub use proxy::{BridgeServer, BridgeServerHandle, ProxyConfig};
