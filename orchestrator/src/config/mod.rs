//! Launcher configuration
//!
//! - `LauncherConfig`: where binaries and data live, and the timing bounds
//! - `LauncherConfigBuilder`: fluent construction
//! - `TestOptions`: run-wide settings layered onto every spawned process

pub mod builder;
pub mod test_options;

pub use builder::LauncherConfigBuilder;
pub use test_options::TestOptions;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::options::ProcessKind;
use crate::version::{DEFAULT_LAST_STABLE_VERSION, DEFAULT_LATEST_VERSION};

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Directory holding the server binaries; `None` searches `PATH`
    pub bin_dir: Option<PathBuf>,
    pub database_program: String,
    pub router_program: String,
    /// Root substituted for `$dataDir`; relative paths are placed under it
    pub data_dir: PathBuf,
    pub latest_version: String,
    pub last_stable_version: String,
    pub base_port: u16,
    /// Host the launcher dials to probe a freshly started process
    pub connect_host: String,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            bin_dir: None,
            database_program: ProcessKind::Database.default_program().to_string(),
            router_program: ProcessKind::Router.default_program().to_string(),
            data_dir: PathBuf::from("/data/db"),
            latest_version: DEFAULT_LATEST_VERSION.to_string(),
            last_stable_version: DEFAULT_LAST_STABLE_VERSION.to_string(),
            base_port: shared::DEFAULT_BASE_PORT,
            connect_host: "127.0.0.1".to_string(),
            startup_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_millis(200),
            stop_timeout: Duration::from_secs(300),
        }
    }
}

impl LauncherConfig {
    pub fn builder() -> LauncherConfigBuilder {
        LauncherConfigBuilder::new()
    }

    pub fn program(&self, kind: ProcessKind) -> &str {
        match kind {
            ProcessKind::Database => &self.database_program,
            ProcessKind::Router => &self.router_program,
        }
    }

    /// Executable to spawn for a rendered binary name
    pub fn program_path(&self, binary: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) if !Path::new(binary).is_absolute() => dir.join(binary),
            _ => PathBuf::from(binary),
        }
    }

    /// `$dataDir` value
    pub fn data_dir_string(&self) -> String {
        let dir = self.data_dir.to_string_lossy().to_string();
        dir.trim_end_matches('/').to_string()
    }

    /// `$dataPath` value: the data directory with a trailing separator
    pub fn data_path_string(&self) -> String {
        format!("{}/", self.data_dir_string())
    }
}
