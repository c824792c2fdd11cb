//! End-to-end tests: the bridge binary between a test and a stub database

use assert_matches::assert_matches;
use bridge::{BridgeEndpoint, BridgeError};
use shared::{messages, DatabaseClient, PortAllocator, SharedError};
use std::time::{Duration, Instant};

mod common;
use common::{active_bridge, connect_as, options, stub, PEER};

fn ping() -> shared::Document {
    messages::command("ping")
}

/// Blocking both directions refuses peers until reconnected
#[tokio::test]
async fn test_disconnect_then_reconnect() {
    let mut ports = PortAllocator::new(26000);
    let (stub_a, stub_b) = (stub().await, stub().await);
    let mut a = active_bridge(&mut ports, &stub_a.address()).await;
    let mut b = active_bridge(&mut ports, &stub_b.address()).await;

    a.disconnect(&mut [&mut b]).await.unwrap();
    assert!(connect_as(&a, b.destination()).await.is_err());
    assert!(connect_as(&b, a.destination()).await.is_err());
    // Peers that were not named are unaffected
    assert!(connect_as(&a, PEER).await.is_ok());

    a.reconnect(&mut [&mut b]).await.unwrap();
    let mut from_b = connect_as(&a, b.destination()).await.unwrap();
    assert!(messages::is_ok(&from_b.run_command("admin", ping()).await.unwrap()));
    assert!(connect_as(&b, a.destination()).await.is_ok());

    assert_eq!(a.stop().await.unwrap(), 0);
    assert_eq!(b.stop().await.unwrap(), 0);
}

/// A delay set before a block/unblock cycle still applies afterwards
#[tokio::test]
async fn test_delay_survives_block_cycle() {
    let mut ports = PortAllocator::new(26100);
    let destination = stub().await;
    let mut a = active_bridge(&mut ports, &destination.address()).await;

    a.control().delay_messages_from(&[PEER], Duration::from_millis(500)).await.unwrap();
    a.control().reject_connections_from(&[PEER]).await.unwrap();
    assert!(connect_as(&a, PEER).await.is_err());
    a.control().accept_connections_from(&[PEER]).await.unwrap();

    let mut conn = connect_as(&a, PEER).await.unwrap();
    let started = Instant::now();
    let reply = conn.run_command("admin", ping()).await.unwrap();
    assert!(messages::is_ok(&reply));
    assert!(started.elapsed() >= Duration::from_millis(500));

    // Other peers see no delay
    let mut other = connect_as(&a, "peer-c:27018").await.unwrap();
    let started = Instant::now();
    other.run_command("admin", ping()).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_discard_everything() {
    let mut ports = PortAllocator::new(26200);
    let destination = stub().await;
    let mut a = active_bridge(&mut ports, &destination.address()).await;

    let mut conn = connect_as(&a, PEER).await.unwrap();
    a.control().discard_messages_from(&[PEER], 1.0).await.unwrap();

    let result = conn.run_command("admin", ping()).await;
    assert_matches!(result, Err(SharedError::OperationTimeout { .. }));
    assert_eq!(destination.commands_served(), 0);
}

/// Rejecting a peer hangs up connections it already has open
#[tokio::test]
async fn test_reject_severs_open_connections() {
    let mut ports = PortAllocator::new(26300);
    let destination = stub().await;
    let mut a = active_bridge(&mut ports, &destination.address()).await;

    let mut conn = connect_as(&a, PEER).await.unwrap();
    assert!(messages::is_ok(&conn.run_command("admin", ping()).await.unwrap()));

    a.control().reject_connections_from(&[PEER]).await.unwrap();
    assert!(conn.run_command("admin", ping()).await.is_err());

    // The endpoint's own connection is not attributed to the peer
    assert!(messages::is_ok(&a.run_command("admin", ping()).await.unwrap()));
}

/// The endpoint can stand in for a direct connection
#[tokio::test]
async fn test_endpoint_delegates_to_user_connection() {
    let mut ports = PortAllocator::new(26400);
    let destination = stub().await;
    let mut a = active_bridge(&mut ports, &destination.address()).await;

    let mut echo = messages::command("echo");
    echo.insert("x".into(), serde_json::json!(2));
    let reply = a.run_command("test", echo).await.unwrap();
    assert_eq!(reply["echo"]["x"], 2);

    assert_eq!(a.host(), format!("localhost:{}", a.port()));
    assert!(!a.secondary_ok());
    a.set_secondary_ok(true);
    assert!(a.secondary_ok());

    a.send_fire_and_forget("test", ping()).await.unwrap();
    assert!(messages::is_ok(&a.run_command("admin", ping()).await.unwrap()));
    assert_eq!(destination.commands_served(), 3);
}

#[tokio::test]
async fn test_rejected_control_command_is_an_error() {
    let mut ports = PortAllocator::new(26500);
    let destination = stub().await;

    let mut a = BridgeEndpoint::create(&mut ports, destination.address(), options()).unwrap();
    assert_matches!(
        a.control().reject_connections_from(&[PEER]).await,
        Err(BridgeError::NotActivated { .. })
    );
    a.activate().await.unwrap();

    let result = a.control().discard_messages_from(&[PEER], 1.5).await;
    assert_matches!(
        result,
        Err(BridgeError::ConfigurationFailure { command, host, .. })
            if command == "discardMessagesFrom" && host == PEER
    );
}

/// A bridge that dies on startup fails activation without waiting out the timeout
#[tokio::test]
async fn test_activation_fails_fast_when_bridge_dies() {
    let mut ports = PortAllocator::new(26600);
    let destination = stub().await;

    let mut a = BridgeEndpoint::create(
        &mut ports,
        destination.address(),
        options().flag("noSuchOption", Some("")),
    )
    .unwrap();

    let started = Instant::now();
    assert_matches!(a.activate().await, Err(BridgeError::FailedToStart { exit_code: 2, .. }));
    assert!(started.elapsed() < Duration::from_secs(20));
}
