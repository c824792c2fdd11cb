//! Spawning and supervising external programs keyed by their listening port
//!
//! Child output is piped and re-emitted as debug events tagged with the
//! program label, so a test log interleaves every process it started.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::{BTreeMap, HashMap};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::errors::{SharedError, SharedResult};
use crate::{process_debug, process_info, process_warn, ComponentId};

/// How long to wait for a SIGKILLed child to be reaped
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Everything needed to launch one program
#[derive(Debug, Clone)]
pub struct ProgramSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub port: u16,
    /// Prefix for forwarded output lines, e.g. `mongod:20000`
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramState {
    Running,
    Exited(i32),
}

struct Program {
    child: Child,
    label: String,
}

/// Live programs by port
#[derive(Default)]
pub struct ProgramRegistry {
    programs: HashMap<u16, Program>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch a program and return its pid
    pub fn spawn(&mut self, spec: ProgramSpec) -> SharedResult<u32> {
        let child = spawn_child(&spec)?;
        let pid = child.id().unwrap_or(0);

        if let Some(mut previous) = self.programs.insert(
            spec.port,
            Program {
                child,
                label: spec.label.clone(),
            },
        ) {
            if matches!(previous.child.try_wait(), Ok(None)) {
                process_warn!(
                    ComponentId::current(),
                    "⚠️ Replacing still-running {} on port {}",
                    previous.label,
                    spec.port
                );
                let _ = previous.child.start_kill();
            }
        }

        Ok(pid)
    }

    pub fn pid(&self, port: u16) -> Option<u32> {
        self.programs.get(&port).and_then(|p| p.child.id())
    }

    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.programs.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Non-blocking liveness check
    pub fn check(&mut self, port: u16) -> SharedResult<ProgramState> {
        let program = self
            .programs
            .get_mut(&port)
            .ok_or(SharedError::UnknownProgram { port })?;
        Ok(match program.child.try_wait()? {
            Some(status) => ProgramState::Exited(exit_code_of(status)),
            None => ProgramState::Running,
        })
    }

    /// Signal the program on `port` and wait up to `timeout` for it to exit
    pub async fn stop(&mut self, port: u16, signal: Signal, timeout: Duration) -> SharedResult<i32> {
        let mut program = self
            .programs
            .remove(&port)
            .ok_or(SharedError::UnknownProgram { port })?;
        terminate_child(&mut program.child, port, signal, timeout, &program.label).await
    }

    /// Drop tracking of a program without signalling it
    pub fn forget(&mut self, port: u16) -> bool {
        self.programs.remove(&port).is_some()
    }
}

impl Drop for ProgramRegistry {
    fn drop(&mut self) {
        for (port, program) in self.programs.iter_mut() {
            if matches!(program.child.try_wait(), Ok(None)) {
                process_warn!(
                    ComponentId::current(),
                    "🚨 Emergency cleanup: killing {} on port {}",
                    program.label,
                    port
                );
                let _ = program.child.start_kill();
            }
        }
    }
}

/// Spawn a child with piped output and no stdin
pub fn spawn_child(spec: &ProgramSpec) -> SharedResult<Child> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    process_info!(
        ComponentId::current(),
        "🚀 Spawning {}: {} {}",
        spec.label,
        spec.program.display(),
        spec.args.join(" ")
    );

    let mut child = cmd.spawn().map_err(|e| SharedError::SpawnFailed {
        program: spec.program.display().to_string(),
        message: e.to_string(),
    })?;
    spawn_output_consumers(&mut child, &spec.label);
    Ok(child)
}

/// Signal `child`, wait up to `timeout`, escalate to SIGKILL after that
pub async fn terminate_child(
    child: &mut Child,
    port: u16,
    signal: Signal,
    timeout: Duration,
    label: &str,
) -> SharedResult<i32> {
    if let Some(status) = child.try_wait()? {
        return Ok(exit_code_of(status));
    }

    if let Some(pid) = child.id() {
        process_debug!(ComponentId::current(), "📤 Sending {} to {} (pid {})", signal, label, pid);
        match signal::kill(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(e.into()),
        }
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => {
            let code = exit_code_of(status?);
            process_info!(ComponentId::current(), "🏁 {} exited with code {}", label, code);
            Ok(code)
        }
        Err(_) => {
            process_warn!(
                ComponentId::current(),
                "🔨 {} ignored {} for {:?}, using SIGKILL",
                label,
                signal,
                timeout
            );
            child.start_kill()?;
            match tokio::time::timeout(KILL_GRACE, child.wait()).await {
                Ok(status) => Ok(exit_code_of(status?)),
                Err(_) => Err(SharedError::ProgramWouldNotDie {
                    port,
                    waited: KILL_GRACE,
                }),
            }
        }
    }
}

/// Exit code as the database reports it: the code, or `-signal` when killed
pub fn exit_code_of(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => -status.signal().unwrap_or(0),
    }
}

fn spawn_output_consumers(child: &mut Child, label: &str) {
    if let Some(stdout) = child.stdout.take() {
        let label = label.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(program = %label, "{}", line);
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let label = label.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(program = %label, stream = "stderr", "{}", line);
            }
        });
    }
}
