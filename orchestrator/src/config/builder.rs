//! Launcher Configuration Builder

use std::path::PathBuf;
use std::time::Duration;

use super::LauncherConfig;

pub struct LauncherConfigBuilder {
    config: LauncherConfig,
}

impl LauncherConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LauncherConfig::default(),
        }
    }

    pub fn bin_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.bin_dir = Some(dir.into());
        self
    }

    /// Program spawned for database processes, a name or a full path
    pub fn database_program<S: Into<String>>(mut self, program: S) -> Self {
        self.config.database_program = program.into();
        self
    }

    pub fn router_program<S: Into<String>>(mut self, program: S) -> Self {
        self.config.router_program = program.into();
        self
    }

    pub fn data_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn latest_version<S: Into<String>>(mut self, version: S) -> Self {
        self.config.latest_version = version.into();
        self
    }

    pub fn last_stable_version<S: Into<String>>(mut self, version: S) -> Self {
        self.config.last_stable_version = version.into();
        self
    }

    pub fn base_port(mut self, port: u16) -> Self {
        self.config.base_port = port;
        self
    }

    pub fn connect_host<S: Into<String>>(mut self, host: S) -> Self {
        self.config.connect_host = host.into();
        self
    }

    /// Bound on waiting for a new process to accept connections
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.config.startup_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Bound on waiting for a signalled process to exit before SIGKILL
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.config.stop_timeout = timeout;
        self
    }

    pub fn build(self) -> LauncherConfig {
        self.config
    }
}

impl Default for LauncherConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
