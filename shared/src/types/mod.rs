//! Core shared types and identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use uuid::Uuid;

// Global component identity - initialized once per process
static COMPONENT_ID: OnceLock<ComponentId> = OnceLock::new();

/// Identity of the running harness component, used to tag every trace event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentId {
    /// The test driver process running the orchestrator and bridge control
    Harness,
    /// A fault-injection proxy listening on the given port
    Bridge(u16),
    /// A stub database listening on the given port
    DbStub(u16),
}

impl ComponentId {
    /// Initialize the global component identity for a bridge process
    pub fn init_bridge(port: u16) -> &'static ComponentId {
        COMPONENT_ID.get_or_init(|| ComponentId::Bridge(port))
    }

    /// Initialize the global component identity for a stub database process
    pub fn init_dbstub(port: u16) -> &'static ComponentId {
        COMPONENT_ID.get_or_init(|| ComponentId::DbStub(port))
    }

    /// Initialize the global component identity for the harness
    pub fn init_harness() -> &'static ComponentId {
        COMPONENT_ID.get_or_init(|| ComponentId::Harness)
    }

    /// Get the global component identity, falling back to the harness
    pub fn current() -> &'static ComponentId {
        COMPONENT_ID.get_or_init(|| ComponentId::Harness)
    }

    /// Crate name whose log targets belong to this component
    pub fn crate_target(&self) -> &'static str {
        match self {
            ComponentId::Harness => "orchestrator",
            ComponentId::Bridge(_) => "bridge",
            ComponentId::DbStub(_) => "dbstub",
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentId::Harness => write!(f, "harness"),
            ComponentId::Bridge(port) => write!(f, "bridge_{port}"),
            ComponentId::DbStub(port) => write!(f, "dbstub_{port}"),
        }
    }
}

/// Stable identifier recalling a process's startup options across restarts
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `host:port` pair as it appears on the wire and in proxy policies
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostAndPort {
    pub host: String,
    pub port: u16,
}

impl HostAndPort {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn localhost(port: u16) -> Self {
        Self::new("localhost", port)
    }
}

impl fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostAndPort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("'{s}' is not of the form host:port"))?;
        if host.is_empty() {
            return Err(format!("'{s}' has an empty host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("'{s}' has an invalid port: {e}"))?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for HostAndPort {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HostAndPort> for String {
    fn from(value: HostAndPort) -> Self {
        value.to_string()
    }
}

/// Exit codes reported by database processes
pub mod exit_codes {
    pub const EXIT_ABORT: i32 = -6;
    pub const EXIT_CLEAN: i32 = 0;
    pub const EXIT_BADOPTIONS: i32 = 2;
    pub const EXIT_REPLICATION_ERROR: i32 = 3;
    pub const EXIT_NEED_UPGRADE: i32 = 4;
    pub const EXIT_SHARDING_ERROR: i32 = 5;
    pub const EXIT_SIGKILL: i32 = -9;
    pub const EXIT_KILL: i32 = 12;
    pub const EXIT_ABRUPT: i32 = 14;
    pub const EXIT_FS: i32 = 45;
    pub const EXIT_NET_ERROR: i32 = 48;
    pub const EXIT_POSSIBLE_CORRUPTION: i32 = 60;
    pub const EXIT_NEED_DOWNGRADE: i32 = 62;
    pub const EXIT_UNCAUGHT: i32 = 100;
    pub const EXIT_TEST: i32 = 101;
}
