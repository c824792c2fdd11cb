//! The proxy itself: accepts connections, attributes them to peers and
//! forwards traffic to the destination under each peer's edge policy
//!
//! Commands marked `$forBridge` are consumed here and change the policy
//! table. Everything else is forwarded byte-for-byte after the policy's delay
//! and loss check. A connection is hung up when its peer is blocked, either
//! on its next message or immediately when `rejectConnectionsFrom` arrives.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use shared::messages::{self, read_message, write_message, Message, FOR_BRIDGE_KEY, HOST_INFO_KEY};
use shared::{process_debug, process_info, process_warn, BridgeCommand, ComponentId, Document, SharedError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{BridgeError, BridgeResult};
use crate::policy::{EdgePolicy, HostSettingsMap};

pub const DESTINATION_RETRY_INTERVAL: Duration = Duration::from_millis(500);
pub const DESTINATION_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const BAD_VALUE: i32 = 2;
const COMMAND_NOT_FOUND: i32 = 59;

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// `host:port` every connection is forwarded to
    pub destination: String,
    /// Seed for message-loss decisions; random when absent
    pub seed: Option<u64>,
    pub retry_interval: Duration,
    pub connect_timeout: Duration,
}

impl ProxyConfig {
    pub fn new<S: Into<String>>(destination: S) -> Self {
        Self {
            destination: destination.into(),
            seed: None,
            retry_interval: DESTINATION_RETRY_INTERVAL,
            connect_timeout: DESTINATION_CONNECT_TIMEOUT,
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
}

struct RegisteredConnection {
    peer: Option<String>,
    sever: Arc<Notify>,
}

/// Open client connections, so a reject can hang up on the ones it names
#[derive(Default)]
struct ConnectionRegistry {
    next_id: u64,
    connections: HashMap<u64, RegisteredConnection>,
}

impl ConnectionRegistry {
    fn register(&mut self) -> (u64, Arc<Notify>) {
        self.next_id += 1;
        let sever = Arc::new(Notify::new());
        self.connections.insert(
            self.next_id,
            RegisteredConnection {
                peer: None,
                sever: sever.clone(),
            },
        );
        (self.next_id, sever)
    }

    fn attribute(&mut self, id: u64, peer: &str) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.peer = Some(peer.to_string());
        }
    }

    fn remove(&mut self, id: u64) {
        self.connections.remove(&id);
    }

    /// Wake every connection attributed to `host`; returns how many
    fn sever(&self, host: &str) -> usize {
        let mut count = 0;
        for connection in self.connections.values() {
            if connection.peer.as_deref() == Some(host) {
                connection.sever.notify_one();
                count += 1;
            }
        }
        count
    }
}

struct ProxyState {
    config: ProxyConfig,
    policies: RwLock<HostSettingsMap>,
    registry: Mutex<ConnectionRegistry>,
    rng: Mutex<StdRng>,
}

impl ProxyState {
    fn registry(&self) -> MutexGuard<'_, ConnectionRegistry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Independent generator for one connection, drawn from the seeded global one
    fn connection_rng(&self) -> StdRng {
        let mut global = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        StdRng::seed_from_u64(global.r#gen())
    }

    async fn policy_for(&self, peer: Option<&str>) -> EdgePolicy {
        match peer {
            Some(host) => self.policies.read().await.get(host),
            None => EdgePolicy::default(),
        }
    }

    /// Apply a `$forBridge` command and build its reply
    async fn control(&self, body: &Document) -> Document {
        let name = body.get(messages::COMMAND_KEY).and_then(Value::as_str).unwrap_or_default();
        let command: BridgeCommand = match name.parse() {
            Ok(command) => command,
            Err(message) => return messages::error_reply(&message, COMMAND_NOT_FOUND),
        };

        let applied = self.policies.write().await.apply(command, body);
        match applied {
            Ok(change) => {
                process_info!(
                    ComponentId::current(),
                    "🔧 {} {}: blocked={} delay={:?} loss={}",
                    change.command,
                    change.host,
                    change.policy.blocked,
                    change.policy.delay,
                    change.policy.loss
                );
                if change.severs() {
                    let severed = self.registry().sever(&change.host);
                    if severed > 0 {
                        process_info!(
                            ComponentId::current(),
                            "✂️ Closing {} open connection(s) from {}",
                            severed,
                            change.host
                        );
                    }
                }
                messages::ok_reply(Document::new())
            }
            Err(message) => {
                process_warn!(ComponentId::current(), "Rejected {} command: {}", command, message);
                messages::error_reply(&message, BAD_VALUE)
            }
        }
    }
}

/// Removes a connection from the registry when its task ends
struct Registration {
    state: Arc<ProxyState>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.state.registry().remove(self.id);
    }
}

pub struct BridgeServer {
    listener: TcpListener,
    state: Arc<ProxyState>,
}

/// In-process proxy; stops accepting when dropped
pub struct BridgeServerHandle {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl BridgeServerHandle {
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }
}

impl Drop for BridgeServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl BridgeServer {
    pub async fn bind(addr: &str, config: ProxyConfig) -> BridgeResult<Self> {
        if config.destination.trim().is_empty() {
            return Err(BridgeError::MissingDestination);
        }
        let listener = TcpListener::bind(addr).await?;

        let seed = config.seed.unwrap_or_else(rand::random);
        process_info!(
            ComponentId::current(),
            "Proxying {} -> {} (seed {})",
            listener.local_addr()?,
            config.destination,
            seed
        );

        Ok(Self {
            listener,
            state: Arc::new(ProxyState {
                config,
                policies: RwLock::new(HostSettingsMap::new()),
                registry: Mutex::new(ConnectionRegistry::default()),
                rng: Mutex::new(StdRng::seed_from_u64(seed)),
            }),
        })
    }

    pub fn local_addr(&self) -> BridgeResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn spawn(self) -> BridgeResult<BridgeServerHandle> {
        let addr = self.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(e) = self.serve().await {
                tracing::warn!("Proxy on {} stopped: {}", addr, e);
            }
        });
        Ok(BridgeServerHandle { addr, task })
    }

    pub async fn serve(self) -> BridgeResult<()> {
        loop {
            let (stream, remote) = self.listener.accept().await?;
            let state = self.state.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, remote, state).await {
                    process_debug!(ComponentId::current(), "Connection from {} ended: {}", remote, e);
                }
            });
        }
    }
}

async fn handle_connection(client: TcpStream, remote: SocketAddr, state: Arc<ProxyState>) -> BridgeResult<()> {
    client.set_nodelay(true)?;
    let (id, sever) = state.registry().register();
    let _registration = Registration {
        state: state.clone(),
        id,
    };

    let mut session = Session {
        id,
        remote,
        peer: None,
        client,
        destination: None,
        rng: state.connection_rng(),
    };

    tokio::select! {
        _ = sever.notified() => {
            process_info!(ComponentId::current(), "Hanging up on connection from {}", remote);
            Ok(())
        }
        result = session.run(&state) => result,
    }
}

struct Session {
    id: u64,
    remote: SocketAddr,
    /// Identity announced in the handshake
    peer: Option<String>,
    client: TcpStream,
    destination: Option<TcpStream>,
    rng: StdRng,
}

impl Session {
    async fn run(&mut self, state: &ProxyState) -> BridgeResult<()> {
        while let Some(request) = read_message(&mut self.client).await? {
            self.attribute(&request, state);

            if is_for_bridge(&request.body) {
                let reply = state.control(&request.body).await;
                if !request.more_to_come() {
                    write_message(&mut self.client, &Message::reply_to(&request, 0, reply)).await?;
                }
                continue;
            }

            let policy = state.policy_for(self.peer.as_deref()).await;
            if policy.blocked {
                process_info!(
                    ComponentId::current(),
                    "🚫 Rejecting connection from {} ({})",
                    self.peer.as_deref().unwrap_or("unknown peer"),
                    self.remote
                );
                return Ok(());
            }
            if !policy.delay.is_zero() {
                tokio::time::sleep(policy.delay).await;
            }
            if policy.drops(self.rng.r#gen::<f64>()) {
                process_debug!(
                    ComponentId::current(),
                    "🎲 Discarding {} from {}",
                    request.command_name().unwrap_or("message"),
                    self.peer.as_deref().unwrap_or("unknown peer")
                );
                continue;
            }

            let destination = self.destination(state).await?;
            write_message(destination, &request).await?;
            if request.more_to_come() {
                continue;
            }

            let reply = read_message(destination)
                .await?
                .ok_or_else(|| SharedError::closed(&state.config.destination))?;

            // The peer may have been blocked while we waited
            if state.policy_for(self.peer.as_deref()).await.blocked {
                return Ok(());
            }
            write_message(&mut self.client, &reply).await?;
        }
        Ok(())
    }

    fn attribute(&mut self, request: &Message, state: &ProxyState) {
        let is_handshake = request
            .command_name()
            .is_some_and(|name| name.eq_ignore_ascii_case(messages::HANDSHAKE_COMMAND));
        if !is_handshake {
            return;
        }
        if let Some(host) = request.body.get(HOST_INFO_KEY).and_then(Value::as_str) {
            process_debug!(ComponentId::current(), "Connection {} is from {}", self.remote, host);
            state.registry().attribute(self.id, host);
            self.peer = Some(host.to_string());
        }
    }

    /// Destination stream, connecting on first use
    async fn destination(&mut self, state: &ProxyState) -> BridgeResult<&mut TcpStream> {
        if self.destination.is_none() {
            self.destination = Some(connect_destination(&state.config).await?);
        }
        self.destination
            .as_mut()
            .ok_or_else(|| SharedError::closed(&state.config.destination).into())
    }
}

fn is_for_bridge(body: &Document) -> bool {
    match body.get(FOR_BRIDGE_KEY) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        _ => false,
    }
}

async fn connect_destination(config: &ProxyConfig) -> BridgeResult<TcpStream> {
    let deadline = Instant::now() + config.connect_timeout;
    loop {
        match TcpStream::connect(&config.destination).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) if Instant::now() < deadline => {
                process_debug!(
                    ComponentId::current(),
                    "Destination {} not reachable yet: {}",
                    config.destination,
                    e
                );
                tokio::time::sleep(config.retry_interval).await;
            }
            Err(e) => {
                return Err(SharedError::ConnectFailed {
                    address: config.destination.clone(),
                    message: format!("gave up after {:?}: {}", config.connect_timeout, e),
                }
                .into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::stub::StubServer;
    use shared::{ConnectOptions, DatabaseClient, DirectConnection};

    async fn control(bridge: &str, command: BridgeCommand, host: &str, extra: Value) -> Document {
        let extra = match extra {
            Value::Object(map) => map,
            _ => Document::new(),
        };
        let mut conn = DirectConnection::connect_with(bridge, ConnectOptions::default())
            .await
            .unwrap();
        conn.run_command("test", command.to_document(host, extra)).await.unwrap()
    }

    #[tokio::test]
    async fn test_forwards_and_consumes_control_commands() {
        let stub = StubServer::bind("127.0.0.1:0", vec![]).await.unwrap().spawn().unwrap();
        let bridge = BridgeServer::bind("127.0.0.1:0", ProxyConfig::new(stub.address()).with_seed(Some(7)))
            .await
            .unwrap()
            .spawn()
            .unwrap();

        let reply = control(&bridge.address(), BridgeCommand::DelayMessagesFrom, "b:1", json!({"delay": 0})).await;
        assert!(messages::is_ok(&reply));

        let mut conn = DirectConnection::connect(&bridge.address()).await.unwrap();
        let reply = conn.run_command("admin", messages::command("ping")).await.unwrap();
        assert!(messages::is_ok(&reply));

        // Control traffic never reaches the destination
        assert_eq!(stub.commands_served(), 1);
    }

    #[tokio::test]
    async fn test_bad_control_commands_fail() {
        let stub = StubServer::bind("127.0.0.1:0", vec![]).await.unwrap().spawn().unwrap();
        let bridge = BridgeServer::bind("127.0.0.1:0", ProxyConfig::new(stub.address()))
            .await
            .unwrap()
            .spawn()
            .unwrap();

        let reply = control(&bridge.address(), BridgeCommand::DiscardMessagesFrom, "b:1", json!({"loss": 2})).await;
        assert!(!messages::is_ok(&reply));
        assert_eq!(reply["code"], BAD_VALUE);

        let mut conn = DirectConnection::connect(&bridge.address()).await.unwrap();
        let mut unknown = messages::command("partitionEverything");
        unknown.insert(FOR_BRIDGE_KEY.into(), json!(true));
        let reply = conn.run_command("test", unknown).await.unwrap();
        assert_eq!(reply["code"], COMMAND_NOT_FOUND);
        assert_eq!(stub.commands_served(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_destination_closes_connection() {
        let config = ProxyConfig {
            retry_interval: Duration::from_millis(20),
            connect_timeout: Duration::from_millis(100),
            ..ProxyConfig::new("127.0.0.1:1")
        };
        let bridge = BridgeServer::bind("127.0.0.1:0", config).await.unwrap().spawn().unwrap();

        let result = DirectConnection::connect(&bridge.address()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_destination() {
        let result = BridgeServer::bind("127.0.0.1:0", ProxyConfig::new(" ")).await;
        assert!(matches!(result, Err(BridgeError::MissingDestination)));
    }

    #[test]
    fn test_registry_severs_by_peer() {
        let mut registry = ConnectionRegistry::default();
        let (a, _) = registry.register();
        let (b, _) = registry.register();
        registry.register();
        registry.attribute(a, "node-b:20001");
        registry.attribute(b, "node-b:20001");

        assert_eq!(registry.sever("node-b:20001"), 2);
        assert_eq!(registry.sever("node-c:20002"), 0);
        registry.remove(a);
        assert_eq!(registry.sever("node-b:20001"), 1);
    }
}
