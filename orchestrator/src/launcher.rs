//! Starting, restarting and stopping database and router processes

use nix::sys::signal::Signal;
use shared::exit_codes::EXIT_CLEAN;
use shared::programs::{ProgramRegistry, ProgramSpec, ProgramState};
use shared::{
    process_debug, process_info, process_warn, ComponentId, ConnectOptions, DirectConnection, RunId,
    SharedError,
};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

use crate::args::parse_command_line;
use crate::config::{LauncherConfig, TestOptions};
use crate::context::TestContext;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::normalize::{command_line, normalize, NormalizedOptions};
use crate::options::{OptionValue, ProcessKind, ProcessOptions};
use crate::traits::{NoValidation, ShutdownHook};
use crate::version::VersionTable;

const LOCK_FILE: &str = "mongod.lock";

/// A started process
#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: u32,
    pub port: u16,
    pub run_id: RunId,
    pub kind: ProcessKind,
    /// `host:port` identity peers should use
    pub host: String,
    pub bin_version: String,
    pub dbpath: Option<PathBuf>,
    /// Normalized launch options, logical keys included
    pub options: ProcessOptions,
    pub argv: Vec<String>,
    /// `argv` parsed back into options
    pub command_line: BTreeMap<String, OptionValue>,
    connection: Option<DirectConnection>,
}

impl ProcessHandle {
    /// Connection opened by the startup probe; `None` for fire-and-forget starts
    pub fn connection(&mut self) -> Option<&mut DirectConnection> {
        self.connection.as_mut()
    }

    pub fn take_connection(&mut self) -> Option<DirectConnection> {
        self.connection.take()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Stop options honouring the handle's own `skipValidation`
    pub fn stop_options(&self) -> StopOptions {
        StopOptions {
            skip_validation: self.options.skip_validation.unwrap_or(false),
            ..StopOptions::default()
        }
    }
}

/// Result of `start`: a usable process, or one that died while starting up
#[derive(Debug)]
pub enum StartOutcome {
    Ready(ProcessHandle),
    /// Exit code is also recorded in the test context for a later `stop`
    Crashed {
        port: u16,
        pid: u32,
        run_id: RunId,
        exit_code: i32,
    },
}

impl StartOutcome {
    pub fn port(&self) -> u16 {
        match self {
            StartOutcome::Ready(handle) => handle.port,
            StartOutcome::Crashed { port, .. } => *port,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            StartOutcome::Ready(_) => None,
            StartOutcome::Crashed { exit_code, .. } => Some(*exit_code),
        }
    }

    pub fn into_handle(self) -> Option<ProcessHandle> {
        match self {
            StartOutcome::Ready(handle) => Some(handle),
            StartOutcome::Crashed { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StopOptions {
    /// Exit code the caller expects; anything else is an error
    pub allowed_exit_code: i32,
    pub skip_validation: bool,
    /// Overrides the launcher's stop timeout
    pub timeout: Option<Duration>,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            allowed_exit_code: EXIT_CLEAN,
            skip_validation: false,
            timeout: None,
        }
    }
}

impl StopOptions {
    pub fn allowed_exit_code(mut self, code: i32) -> Self {
        self.allowed_exit_code = code;
        self
    }

    pub fn skip_validation(mut self) -> Self {
        self.skip_validation = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub struct Launcher {
    config: LauncherConfig,
    versions: VersionTable,
    test_options: TestOptions,
    programs: ProgramRegistry,
    hook: Box<dyn ShutdownHook>,
}

impl Launcher {
    pub fn new(config: LauncherConfig) -> OrchestratorResult<Self> {
        let versions = VersionTable::new(&config.latest_version, &config.last_stable_version)?;
        Ok(Self {
            config,
            versions,
            test_options: TestOptions::default(),
            programs: ProgramRegistry::new(),
            hook: Box::new(NoValidation),
        })
    }

    pub fn with_test_options(mut self, test_options: TestOptions) -> Self {
        self.test_options = test_options;
        self
    }

    pub fn with_shutdown_hook<H: ShutdownHook + 'static>(mut self, hook: H) -> Self {
        self.hook = Box::new(hook);
        self
    }

    pub fn with_version_table(mut self, versions: VersionTable) -> Self {
        self.versions = versions;
        self
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    pub fn versions(&self) -> &VersionTable {
        &self.versions
    }

    pub fn test_options(&self) -> &TestOptions {
        &self.test_options
    }

    pub fn resolve_version(&self, tag: &str) -> String {
        self.versions.resolve(tag)
    }

    pub fn compare_versions(&self, a: &str, b: &str) -> OrchestratorResult<Ordering> {
        self.versions.compare(a, b)
    }

    pub fn normalize_options(
        &self,
        ctx: &mut TestContext,
        kind: ProcessKind,
        options: ProcessOptions,
    ) -> OrchestratorResult<NormalizedOptions> {
        normalize(ctx, &self.config, &self.versions, &self.test_options, kind, options)
    }

    pub fn render_args(&self, normalized: &NormalizedOptions) -> Vec<String> {
        command_line(normalized, &self.config, &self.versions, &self.test_options)
    }

    /// Launch a process and wait until it accepts connections or dies
    ///
    /// A process exiting during startup is not an error: its exit code is
    /// recorded in `ctx` and returned as `StartOutcome::Crashed`.
    pub async fn start(
        &mut self,
        ctx: &mut TestContext,
        kind: ProcessKind,
        options: ProcessOptions,
    ) -> OrchestratorResult<StartOutcome> {
        let normalized = self.normalize_options(ctx, kind, options)?;

        if let Some(dbpath) = &normalized.dbpath {
            if normalized.force_lock {
                remove_if_present(&dbpath.join(LOCK_FILE)).await?;
            }
            if normalized.clean_data {
                process_info!(ComponentId::current(), "🧹 Resetting db path '{}'", dbpath.display());
                reset_dir(dbpath).await?;
            } else {
                tokio::fs::create_dir_all(dbpath).await?;
            }
        }

        let argv = self.render_args(&normalized);
        let port = normalized.port;
        ctx.take_exit_code(port);

        let spec = ProgramSpec {
            program: self.config.program_path(&argv[0]),
            args: argv[1..].to_vec(),
            env: normalized.env.clone(),
            port,
            label: format!("{}:{}", kind.default_program(), port),
        };
        process_info!(
            ComponentId::current(),
            "🚀 Starting {} on port {} (run {}, version {})",
            kind,
            port,
            normalized.run_id,
            normalized.bin_version
        );
        let pid = self.programs.spawn(spec)?;

        let mut handle = ProcessHandle {
            pid,
            port,
            run_id: normalized.run_id.clone(),
            kind,
            host: normalized.host.clone(),
            bin_version: normalized.bin_version.clone(),
            dbpath: normalized.dbpath.clone(),
            options: normalized.options.clone(),
            command_line: parse_command_line(&argv),
            argv,
            connection: None,
        };

        if !normalized.wait_for_connect {
            process_debug!(ComponentId::current(), "Not waiting for port {} to accept connections", port);
            return Ok(StartOutcome::Ready(handle));
        }

        let address = format!("{}:{}", self.config.connect_host, port);
        let deadline = Instant::now() + self.config.startup_timeout;
        let connect_options = ConnectOptions::default()
            .with_connect_timeout(self.config.poll_interval.max(Duration::from_secs(1)));

        loop {
            match DirectConnection::connect_with(&address, connect_options.clone()).await {
                Ok(connection) => {
                    process_info!(ComponentId::current(), "✅ {} ready on port {} (pid {})", kind, port, pid);
                    handle.connection = Some(connection);
                    return Ok(StartOutcome::Ready(handle));
                }
                Err(e) => {
                    if let ProgramState::Exited(exit_code) = self.programs.check(port)? {
                        process_warn!(
                            ComponentId::current(),
                            "💥 Could not start {} on port {}, process ended with exit code {}",
                            kind,
                            port,
                            exit_code
                        );
                        ctx.record_exit_code(port, exit_code);
                        return Ok(StartOutcome::Crashed {
                            port,
                            pid,
                            run_id: handle.run_id,
                            exit_code,
                        });
                    }
                    process_debug!(ComponentId::current(), "Port {} not accepting yet: {}", port, e);
                }
            }

            if Instant::now() >= deadline {
                if let Err(e) = self.programs.stop(port, Signal::SIGKILL, Duration::from_secs(5)).await {
                    process_warn!(
                        ComponentId::current(),
                        "Failed to kill {} on port {} after startup timeout: {}",
                        kind,
                        port,
                        e
                    );
                }
                return Err(OrchestratorError::StartupTimeout {
                    port,
                    timeout: self.config.startup_timeout,
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Start the process behind `handle` again with `overrides` merged over
    /// its remembered options
    pub async fn restart(
        &mut self,
        ctx: &mut TestContext,
        handle: &ProcessHandle,
        overrides: ProcessOptions,
    ) -> OrchestratorResult<StartOutcome> {
        self.restart_run(ctx, handle.kind, &handle.run_id, overrides).await
    }

    /// Restart by run id, for processes that never produced a handle
    pub async fn restart_run(
        &mut self,
        ctx: &mut TestContext,
        kind: ProcessKind,
        run_id: &RunId,
        overrides: ProcessOptions,
    ) -> OrchestratorResult<StartOutcome> {
        let mut overrides = overrides;
        overrides.run_id = Some(run_id.clone());
        overrides.restart = Some(true);
        self.start(ctx, kind, overrides).await
    }

    /// Stop the process on `port` and check its exit code
    ///
    /// A process recorded as crashed during startup is not signalled; its
    /// recorded code is used instead.
    pub async fn stop(
        &mut self,
        ctx: &mut TestContext,
        port: u16,
        signal: Signal,
        options: StopOptions,
    ) -> OrchestratorResult<i32> {
        let allowed = options.allowed_exit_code;

        let code = match ctx.take_exit_code(port) {
            Some(code) => {
                self.programs.forget(port);
                process_debug!(
                    ComponentId::current(),
                    "Port {} exited during startup with code {}, not signalling",
                    port,
                    code
                );
                code
            }
            None => {
                if allowed == EXIT_CLEAN && !options.skip_validation {
                    self.hook.before_stop(port).await?;
                }
                let timeout = options.timeout.unwrap_or(self.config.stop_timeout);
                match self.programs.stop(port, signal, timeout).await {
                    Ok(code) => code,
                    Err(SharedError::UnknownProgram { port }) => {
                        return Err(OrchestratorError::UnknownPort { port })
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        if code != allowed {
            return Err(OrchestratorError::UnexpectedExitCode {
                port,
                expected: allowed,
                actual: code,
            });
        }
        if code != EXIT_CLEAN {
            process_info!(
                ComponentId::current(),
                "Process on port {} intentionally exited with error code {}",
                port,
                code
            );
        }
        Ok(code)
    }

    /// Whether the process on `port` is still alive
    pub fn is_running(&mut self, port: u16) -> bool {
        matches!(self.programs.check(port), Ok(ProgramState::Running))
    }

    pub fn running_ports(&self) -> Vec<u16> {
        self.programs.ports()
    }
}

async fn remove_if_present(path: &Path) -> OrchestratorResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn reset_dir(path: &Path) -> OrchestratorResult<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}
