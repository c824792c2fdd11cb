//! Stand-in database binary for launcher tests
//!
//! Accepts any command line a real server would get, answers the handshake
//! and a few diagnostic commands, and exits on SIGTERM. Extra flags drive
//! failure paths: `--crashOnStartup <code>` exits before listening,
//! `--hangOnStartup` never starts listening and `--shutdownExitCode <code>`
//! picks the code used on SIGTERM.

use anyhow::Context;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};

use orchestrator::{args, OptionValue};
use shared::stub::StubServer;
use shared::{logging, process_info, ComponentId};

const LOCK_FILE: &str = "mongod.lock";

fn int_flag(flags: &std::collections::BTreeMap<String, OptionValue>, name: &str) -> anyhow::Result<Option<i32>> {
    match flags.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_string()
            .parse()
            .map(Some)
            .with_context(|| format!("--{name} takes an integer, got '{value}'")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let argv: Vec<String> = std::env::args().collect();
    let flags = args::parse_command_line(&argv);

    let port = args::parsed_port(&flags).context("--port is required")?;
    ComponentId::init_dbstub(port);
    logging::init_tracing(None);

    if let Some(code) = int_flag(&flags, "crashOnStartup")? {
        process_info!(ComponentId::current(), "💥 Crashing on startup with code {}", code);
        std::process::exit(code);
    }
    let shutdown_code = int_flag(&flags, "shutdownExitCode")?.unwrap_or(0);

    let lock_path = match flags.get("dbpath") {
        Some(dbpath) => {
            let dir = PathBuf::from(dbpath.to_string());
            std::fs::create_dir_all(&dir)?;
            let lock = dir.join(LOCK_FILE);
            std::fs::write(&lock, std::process::id().to_string())?;
            Some(lock)
        }
        None => None,
    };

    let mut terminate = signal(SignalKind::terminate())?;
    if flags.contains_key("hangOnStartup") {
        process_info!(ComponentId::current(), "Hanging before listening on port {}", port);
        terminate.recv().await;
        std::process::exit(shutdown_code);
    }

    let server = StubServer::bind(&format!("0.0.0.0:{port}"), argv.clone()).await?;
    let handle = server.spawn()?;
    logging::log_startup(ComponentId::current(), &format!("stub database on {}", handle.addr));

    tokio::select! {
        _ = terminate.recv() => logging::log_shutdown(ComponentId::current(), "Received SIGTERM"),
        _ = tokio::signal::ctrl_c() => logging::log_shutdown(ComponentId::current(), "Received Ctrl+C"),
    }

    drop(handle);
    if let Some(lock) = lock_path {
        let _ = std::fs::remove_file(lock);
    }
    std::process::exit(shutdown_code);
}
