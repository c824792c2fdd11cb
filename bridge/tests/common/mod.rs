//! Shared setup for bridge tests
//!
//! Destinations are in-process stub servers; bridges are the real `bridge`
//! binary, each test drawing ports from its own range.

use bridge::{BridgeEndpoint, BridgeOptions};
use shared::stub::{StubHandle, StubServer};
use shared::{ConnectOptions, DirectConnection, PortAllocator, SharedResult};
use std::time::Duration;

pub const BRIDGE_BINARY: &str = env!("CARGO_BIN_EXE_bridge");

/// Identity a simulated peer announces in its handshake
pub const PEER: &str = "peer-b:27017";

pub async fn stub() -> StubHandle {
    shared::logging::init_test_tracing();
    StubServer::bind("127.0.0.1:0", vec!["dbstub".to_string()])
        .await
        .unwrap()
        .spawn()
        .unwrap()
}

pub fn options() -> BridgeOptions {
    BridgeOptions::new()
        .program(BRIDGE_BINARY)
        .seed(1234)
        .activate_timeout(Duration::from_secs(20))
        .poll_interval(Duration::from_millis(50))
}

/// A started and activated bridge in front of `destination`
pub async fn active_bridge(ports: &mut PortAllocator, destination: &str) -> BridgeEndpoint {
    let mut endpoint = BridgeEndpoint::create(ports, destination, options()).unwrap();
    endpoint.activate().await.unwrap();
    endpoint
}

/// Connect through `endpoint` claiming to be `peer`
pub async fn connect_as(endpoint: &BridgeEndpoint, peer: &str) -> SharedResult<DirectConnection> {
    let options = ConnectOptions::default()
        .with_host_info(peer)
        .with_connect_timeout(Duration::from_secs(5))
        .with_operation_timeout(Some(Duration::from_secs(5)));
    DirectConnection::connect_with(&format!("127.0.0.1:{}", endpoint.port()), options).await
}
