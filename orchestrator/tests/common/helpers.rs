//! Launcher harness wrapping the stub database

use orchestrator::*;
use serde_json::Value;
use shared::{messages, DatabaseClient};
use std::time::Duration;
use tempfile::TempDir;

use super::fixtures::TestFixtures;

/// A launcher, its test context and the data directory they share
pub struct TestHarness {
    pub launcher: Launcher,
    pub ctx: TestContext,
    pub data_dir: TempDir,
}

impl TestHarness {
    pub fn new(base_port: u16) -> Self {
        Self::with_startup_timeout(base_port, Duration::from_secs(20))
    }

    pub fn with_startup_timeout(base_port: u16, startup_timeout: Duration) -> Self {
        shared::logging::init_test_tracing();
        let data_dir = TempDir::new().unwrap();
        let config = LauncherConfig::builder()
            .database_program(TestFixtures::DBSTUB)
            .data_dir(data_dir.path())
            .base_port(base_port)
            .startup_timeout(startup_timeout)
            .poll_interval(Duration::from_millis(50))
            .stop_timeout(Duration::from_secs(10))
            .build();
        let launcher = Launcher::new(config)
            .unwrap()
            .with_test_options(TestOptions::default());

        Self {
            launcher,
            ctx: TestContext::with_base_port(base_port),
            data_dir,
        }
    }

    pub async fn start(&mut self, options: ProcessOptions) -> StartOutcome {
        self.launcher
            .start(&mut self.ctx, ProcessKind::Database, options)
            .await
            .unwrap()
    }

    pub async fn start_ready(&mut self, options: ProcessOptions) -> ProcessHandle {
        match self.start(options).await {
            StartOutcome::Ready(handle) => handle,
            StartOutcome::Crashed { exit_code, .. } => {
                panic!("stub database crashed on startup with {exit_code}")
            }
        }
    }

    pub async fn stop(&mut self, port: u16, options: StopOptions) -> OrchestratorResult<i32> {
        self.launcher
            .stop(&mut self.ctx, port, Signal::SIGTERM, options)
            .await
    }

    /// Ask a running stub for the argv it was started with
    pub async fn reported_argv(handle: &mut ProcessHandle) -> Vec<String> {
        let connection = handle.connection().expect("handle has a connection");
        let reply = connection
            .run_command("admin", messages::command("getCmdLineOpts"))
            .await
            .unwrap();
        match &reply["argv"] {
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            other => panic!("unexpected argv in reply: {other}"),
        }
    }
}
