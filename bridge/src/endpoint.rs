//! Test-side handle on a proxy process
//!
//! A `BridgeEndpoint` launches the `bridge` binary in front of a destination
//! and, once activated, holds two connections through it: a user connection
//! that every `DatabaseClient` call is delegated to, and a control connection
//! for the fault-injection commands reached through [`BridgeEndpoint::control`].

use async_trait::async_trait;
use nix::sys::signal::Signal;
use serde_json::{json, Value};
use shared::programs::{ProgramRegistry, ProgramSpec, ProgramState};
use shared::{
    messages, process_debug, process_info, BridgeCommand, ComponentId, DatabaseClient, DirectConnection,
    Document, PortAllocator, SharedError, SharedResult,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{BridgeError, BridgeResult};

/// Distance between a fronted process's port and its bridge's, when staggered
pub const BRIDGE_PORT_OFFSET: u16 = 10;
pub const DEFAULT_BRIDGE_PROGRAM: &str = "bridge";

/// How a bridge process is launched and activated
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Listen port; allocated when absent
    pub port: Option<u16>,
    /// Host part of the endpoint's `host:port` identity
    pub host_name: String,
    pub program: PathBuf,
    pub seed: Option<u64>,
    pub verbosity: u8,
    /// Pass-through flags; `Some("")` is emitted bare and `None` is rejected
    pub flags: BTreeMap<String, Option<String>>,
    pub connect_host: String,
    pub activate_timeout: Duration,
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            port: None,
            host_name: "localhost".to_string(),
            program: PathBuf::from(DEFAULT_BRIDGE_PROGRAM),
            seed: None,
            verbosity: 0,
            flags: BTreeMap::new(),
            connect_host: "127.0.0.1".to_string(),
            activate_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(200),
            stop_timeout: Duration::from_secs(60),
        }
    }
}

impl BridgeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Listen `BRIDGE_PORT_OFFSET` above the fronted process
    pub fn staggered_from(self, fronted_port: u16) -> Self {
        self.port(fronted_port.saturating_add(BRIDGE_PORT_OFFSET))
    }

    pub fn host_name<S: Into<String>>(mut self, host_name: S) -> Self {
        self.host_name = host_name.into();
        self
    }

    pub fn program<P: Into<PathBuf>>(mut self, program: P) -> Self {
        self.program = program.into();
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Extra `--key [value]` passed to the bridge binary. Only flags the
    /// binary understands may be given; anything else makes it exit at
    /// startup and `activate` fails with `FailedToStart`.
    pub fn flag<S: Into<String>>(mut self, key: &str, value: Option<S>) -> Self {
        self.flags.insert(key.to_string(), value.map(Into::into));
        self
    }

    pub fn activate_timeout(mut self, timeout: Duration) -> Self {
        self.activate_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Arguments for the bridge binary, program name excluded
    pub fn render_args(&self, port: u16, destination: &str) -> BridgeResult<Vec<String>> {
        if destination.trim().is_empty() {
            return Err(BridgeError::MissingDestination);
        }

        let mut args = vec![
            "--port".to_string(),
            port.to_string(),
            "--dest".to_string(),
            destination.to_string(),
        ];
        if let Some(seed) = self.seed {
            args.push("--seed".to_string());
            args.push(seed.to_string());
        }
        if self.verbosity > 0 {
            args.push(format!("-{}", "v".repeat(self.verbosity as usize)));
        }

        for (key, value) in &self.flags {
            match value {
                None => {
                    return Err(BridgeError::invalid_option(
                        key.as_str(),
                        "a null value is ambiguous; use an empty string for a bare flag",
                    ))
                }
                Some(v) if v.is_empty() => args.push(format!("--{key}")),
                Some(v) => {
                    args.push(format!("--{key}"));
                    args.push(v.clone());
                }
            }
        }
        Ok(args)
    }
}

/// Anything that names a peer by its destination `host:port`
pub trait PeerAddress {
    fn peer_address(&self) -> String;
}

impl PeerAddress for str {
    fn peer_address(&self) -> String {
        self.to_string()
    }
}

impl PeerAddress for String {
    fn peer_address(&self) -> String {
        self.clone()
    }
}

/// A bridge is named by the process it fronts
impl PeerAddress for BridgeEndpoint {
    fn peer_address(&self) -> String {
        self.destination.clone()
    }
}

impl<T: PeerAddress + ?Sized> PeerAddress for &T {
    fn peer_address(&self) -> String {
        (**self).peer_address()
    }
}

impl<T: PeerAddress + ?Sized> PeerAddress for &mut T {
    fn peer_address(&self) -> String {
        (**self).peer_address()
    }
}

pub struct BridgeEndpoint {
    port: u16,
    host_name: String,
    destination: String,
    options: BridgeOptions,
    argv: Vec<String>,
    pid: u32,
    programs: ProgramRegistry,
    user: Option<DirectConnection>,
    control: Option<DirectConnection>,
}

impl std::fmt::Debug for BridgeEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeEndpoint")
            .field("port", &self.port)
            .field("destination", &self.destination)
            .field("pid", &self.pid)
            .field("activated", &self.is_activated())
            .finish()
    }
}

impl BridgeEndpoint {
    /// Launch a bridge in front of `destination`. Unusable until `activate`.
    pub fn create<S: Into<String>>(
        ports: &mut PortAllocator,
        destination: S,
        options: BridgeOptions,
    ) -> BridgeResult<Self> {
        let destination = destination.into();
        let port = match options.port {
            Some(port) => {
                ports.reserve(port);
                port
            }
            None => ports.allocate()?,
        };
        let args = options.render_args(port, &destination)?;

        let mut programs = ProgramRegistry::new();
        let pid = programs.spawn(ProgramSpec {
            program: options.program.clone(),
            args: args.clone(),
            env: BTreeMap::new(),
            port,
            label: format!("bridge:{port}"),
        })?;
        process_info!(
            ComponentId::current(),
            "🌉 Started bridge on port {} -> {} (pid {})",
            port,
            destination,
            pid
        );

        let mut argv = vec![options.program.to_string_lossy().into_owned()];
        argv.extend(args);

        Ok(Self {
            port,
            host_name: options.host_name.clone(),
            destination,
            options,
            argv,
            pid,
            programs,
            user: None,
            control: None,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` identity of the bridge itself
    pub fn address(&self) -> String {
        format!("{}:{}", self.host_name, self.port)
    }

    /// `host:port` of the fronted process
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn is_activated(&self) -> bool {
        self.user.is_some() && self.control.is_some()
    }

    /// Wait until the bridge accepts connections and open the user and
    /// control connections
    ///
    /// The destination must already be reachable: the handshake on each
    /// connection is forwarded to it. Fails at once if the bridge process dies.
    pub async fn activate(&mut self) -> BridgeResult<()> {
        let address = format!("{}:{}", self.options.connect_host, self.port);
        let deadline = Instant::now() + self.options.activate_timeout;

        loop {
            match DirectConnection::connect(&address).await {
                Ok(user) => {
                    let control = DirectConnection::connect(&address).await?;
                    self.user = Some(user);
                    self.control = Some(control);
                    process_info!(ComponentId::current(), "✅ Bridge on port {} is active", self.port);
                    return Ok(());
                }
                Err(e) => {
                    if let ProgramState::Exited(exit_code) = self.programs.check(self.port)? {
                        return Err(BridgeError::FailedToStart {
                            port: self.port,
                            exit_code,
                        });
                    }
                    process_debug!(ComponentId::current(), "Bridge on port {} not ready: {}", self.port, e);
                }
            }

            if Instant::now() >= deadline {
                return Err(BridgeError::ActivationTimeout {
                    port: self.port,
                    timeout: self.options.activate_timeout,
                });
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    /// Terminate the bridge process and return its exit code
    pub async fn stop(&mut self) -> BridgeResult<i32> {
        for mut connection in [self.user.take(), self.control.take()].into_iter().flatten() {
            let _ = connection.close().await;
        }
        let code = self
            .programs
            .stop(self.port, Signal::SIGTERM, self.options.stop_timeout)
            .await?;
        process_info!(ComponentId::current(), "Bridge on port {} exited with {}", self.port, code);
        Ok(code)
    }

    /// Fault-injection commands for this bridge
    pub fn control(&mut self) -> BridgeControl<'_> {
        BridgeControl { endpoint: self }
    }

    /// Allow traffic in both directions between this bridge and each peer
    ///
    /// Two control round trips per peer, not atomic on the wire.
    pub async fn reconnect(&mut self, peers: &mut [&mut BridgeEndpoint]) -> BridgeResult<()> {
        let mine = self.destination.clone();
        for peer in peers.iter_mut() {
            let theirs = peer.destination.clone();
            self.control().accept_connections_from(&[theirs]).await?;
            peer.control().accept_connections_from(&[mine.as_str()]).await?;
        }
        Ok(())
    }

    /// Block traffic in both directions between this bridge and each peer
    pub async fn disconnect(&mut self, peers: &mut [&mut BridgeEndpoint]) -> BridgeResult<()> {
        let mine = self.destination.clone();
        for peer in peers.iter_mut() {
            let theirs = peer.destination.clone();
            self.control().reject_connections_from(&[theirs]).await?;
            peer.control().reject_connections_from(&[mine.as_str()]).await?;
        }
        Ok(())
    }

    fn user_connection(&mut self) -> SharedResult<&mut DirectConnection> {
        self.user
            .as_mut()
            .ok_or_else(|| SharedError::closed(format!("{}:{}", self.host_name, self.port)))
    }
}

/// Directional edge configuration, applied by the bridge to traffic it
/// receives from the named peers
pub struct BridgeControl<'a> {
    endpoint: &'a mut BridgeEndpoint,
}

impl BridgeControl<'_> {
    pub async fn accept_connections_from<P: PeerAddress>(&mut self, peers: &[P]) -> BridgeResult<()> {
        self.send(BridgeCommand::AcceptConnectionsFrom, peers, Document::new()).await
    }

    /// Refuse connections from each peer and hang up the ones already open
    pub async fn reject_connections_from<P: PeerAddress>(&mut self, peers: &[P]) -> BridgeResult<()> {
        self.send(BridgeCommand::RejectConnectionsFrom, peers, Document::new()).await
    }

    pub async fn delay_messages_from<P: PeerAddress>(&mut self, peers: &[P], delay: Duration) -> BridgeResult<()> {
        let mut extra = Document::new();
        extra.insert("delay".to_string(), json!(delay.as_millis() as u64));
        self.send(BridgeCommand::DelayMessagesFrom, peers, extra).await
    }

    /// Drop each message from the peers with probability `loss`
    pub async fn discard_messages_from<P: PeerAddress>(&mut self, peers: &[P], loss: f64) -> BridgeResult<()> {
        let mut extra = Document::new();
        extra.insert("loss".to_string(), Value::from(loss));
        self.send(BridgeCommand::DiscardMessagesFrom, peers, extra).await
    }

    async fn send<P: PeerAddress>(&mut self, command: BridgeCommand, peers: &[P], extra: Document) -> BridgeResult<()> {
        let port = self.endpoint.port;
        let control = self
            .endpoint
            .control
            .as_mut()
            .ok_or(BridgeError::NotActivated { port })?;

        for peer in peers {
            let host = peer.peer_address();
            let reply = control
                .run_command("test", command.to_document(&host, extra.clone()))
                .await?;
            if !messages::is_ok(&reply) {
                return Err(BridgeError::ConfigurationFailure {
                    port,
                    command: command.to_string(),
                    host,
                    message: messages::error_message(&reply),
                });
            }
            process_debug!(ComponentId::current(), "Bridge {} applied {} for {}", port, command, host);
        }
        Ok(())
    }
}

/// Everything a test does with a connection goes to the user connection
#[async_trait]
impl DatabaseClient for BridgeEndpoint {
    fn host(&self) -> String {
        self.address()
    }

    async fn run_command(&mut self, db: &str, command: Document) -> SharedResult<Document> {
        self.user_connection()?.run_command(db, command).await
    }

    async fn send_fire_and_forget(&mut self, db: &str, command: Document) -> SharedResult<()> {
        self.user_connection()?.send_fire_and_forget(db, command).await
    }

    fn secondary_ok(&self) -> bool {
        self.user.as_ref().is_some_and(|c| c.secondary_ok())
    }

    fn set_secondary_ok(&mut self, value: bool) {
        if let Some(connection) = self.user.as_mut() {
            connection.set_secondary_ok(value);
        }
    }

    async fn close(&mut self) -> SharedResult<()> {
        self.user_connection()?.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_render_args() {
        let options = BridgeOptions::new()
            .seed(42)
            .verbosity(2)
            .flag("enableTestCommands", Some(""))
            .flag("logFile", Some("/tmp/bridge.log"));

        assert_eq!(
            options.render_args(20010, "node-a:20000").unwrap(),
            vec![
                "--port",
                "20010",
                "--dest",
                "node-a:20000",
                "--seed",
                "42",
                "-vv",
                "--enableTestCommands",
                "--logFile",
                "/tmp/bridge.log",
            ]
        );
    }

    #[test]
    fn test_render_args_rejects_null_flag() {
        let options = BridgeOptions::new().flag::<String>("mystery", None);
        assert_matches!(
            options.render_args(20010, "node-a:20000"),
            Err(BridgeError::InvalidOption { key, .. }) if key == "mystery"
        );
        assert_matches!(
            BridgeOptions::new().render_args(20010, ""),
            Err(BridgeError::MissingDestination)
        );
    }

    #[test]
    fn test_staggered_port() {
        assert_eq!(BridgeOptions::new().staggered_from(20000).port, Some(20000 + BRIDGE_PORT_OFFSET));
    }

    #[test]
    fn test_peer_addresses() {
        let peers: Vec<String> = vec!["a:1".into()];
        assert_eq!(peers[0].peer_address(), "a:1");
        assert_eq!("b:2".peer_address(), "b:2");
        assert_eq!((&"c:3").peer_address(), "c:3");
    }
}
