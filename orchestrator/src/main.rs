//! Command-line front-end over the process launcher

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::cmp::Ordering;
use std::path::PathBuf;
use tokio::signal;

use orchestrator::{
    Launcher, LauncherConfig, ProcessKind, ProcessOptions, Signal, StartOutcome,
    TestContext, TestOptions,
};
use shared::{logging, process_info, ComponentId};

/// Starts, inspects and stops cluster test processes
#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Launches database and router processes the way cluster tests do")]
pub struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Directory holding the server binaries (defaults to PATH lookup)
    #[arg(long, global = true)]
    pub bin_dir: Option<PathBuf>,

    /// Root for `$dataDir` and relative data paths
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Concrete version the `latest` tag stands for
    #[arg(long, global = true)]
    pub latest_version: Option<String>,

    #[arg(long, global = true)]
    pub last_stable_version: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the concrete version a tag resolves to
    ResolveVersion { tag: Option<String> },

    /// Print -1, 0 or 1 comparing two versions
    CompareVersions { a: String, b: String },

    /// Print the command line a set of JSON options renders to
    RenderArgs {
        #[arg(long, default_value = "database")]
        kind: ProcessKind,

        /// Options as a JSON object, e.g. '{"port": 20000, "setParameter": {"x": 1}}'
        #[arg(long, default_value = "{}")]
        options: String,
    },

    /// Start a process, wait for Ctrl+C, then stop it
    Run {
        #[arg(long, default_value = "database")]
        kind: ProcessKind,

        #[arg(long, default_value = "{}")]
        options: String,
    },
}

fn build_config(args: &Args) -> LauncherConfig {
    let mut builder = LauncherConfig::builder();
    if let Some(dir) = &args.bin_dir {
        builder = builder.bin_dir(dir.clone());
    }
    if let Some(dir) = &args.data_dir {
        builder = builder.data_dir(dir.clone());
    }
    if let Some(version) = &args.latest_version {
        builder = builder.latest_version(version.clone());
    }
    if let Some(version) = &args.last_stable_version {
        builder = builder.last_stable_version(version.clone());
    }
    builder.build()
}

fn parse_options(json: &str) -> anyhow::Result<ProcessOptions> {
    serde_json::from_str(json).context("options must be a JSON object")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    ComponentId::init_harness();
    logging::init_tracing(Some(&args.log_level));

    let config = build_config(&args);
    let base_port = config.base_port;
    let mut launcher = Launcher::new(config)?.with_test_options(TestOptions::from_env()?);

    match &args.command {
        Command::ResolveVersion { tag } => {
            println!("{}", launcher.resolve_version(tag.as_deref().unwrap_or("")));
        }
        Command::CompareVersions { a, b } => {
            let result = match launcher.compare_versions(a, b)? {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            };
            println!("{result}");
        }
        Command::RenderArgs { kind, options } => {
            let mut ctx = TestContext::with_base_port(base_port);
            let normalized = launcher.normalize_options(&mut ctx, *kind, parse_options(options)?)?;
            println!("{}", launcher.render_args(&normalized).join(" "));
        }
        Command::Run { kind, options } => {
            let mut ctx = TestContext::with_base_port(base_port);
            logging::log_startup(ComponentId::current(), &format!("{kind} process"));

            match launcher.start(&mut ctx, *kind, parse_options(options)?).await? {
                StartOutcome::Ready(handle) => {
                    process_info!(ComponentId::current(), "🟢 {} is up as {} (pid {})", kind, handle.host, handle.pid);
                    println!("{}", handle.host);

                    if let Err(err) = signal::ctrl_c().await {
                        logging::log_error(ComponentId::current(), "Signal handling", &err);
                    }
                    logging::log_shutdown(ComponentId::current(), "Received Ctrl+C signal");

                    let code = launcher
                        .stop(&mut ctx, handle.port, Signal::SIGTERM, handle.stop_options().skip_validation())
                        .await?;
                    process_info!(ComponentId::current(), "{} on port {} exited with {}", kind, handle.port, code);
                }
                StartOutcome::Crashed { port, exit_code, .. } => {
                    anyhow::bail!("{kind} on port {port} exited during startup with code {exit_code}");
                }
            }
        }
    }

    Ok(())
}
