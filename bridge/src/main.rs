//! Bridge binary entry point

use clap::{ArgAction, Parser};
use tokio::signal::unix::{signal, SignalKind};

use bridge::{BridgeServer, ProxyConfig};
use shared::{logging, ComponentId};

#[derive(Parser)]
#[command(name = "bridge")]
#[command(about = "Fault-injection proxy in front of one database process")]
struct Args {
    /// Port to listen on
    #[arg(long)]
    port: u16,

    /// host:port every connection is forwarded to
    #[arg(long)]
    dest: String,

    /// Seed for message-loss decisions
    #[arg(long)]
    seed: Option<u64>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, action = ArgAction::Count)]
    verbose: u8,

    /// Log level; overrides -v
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    ComponentId::init_bridge(args.port);
    let level = args.log_level.clone().unwrap_or_else(|| {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
        .to_string()
    });
    logging::init_tracing(Some(&level));

    let mut terminate = signal(SignalKind::terminate())?;
    let config = ProxyConfig::new(args.dest).with_seed(args.seed);
    let server = BridgeServer::bind(&format!("0.0.0.0:{}", args.port), config).await?;
    logging::log_startup(ComponentId::current(), &format!("bridge on port {}", args.port));

    tokio::select! {
        result = server.serve() => result?,
        _ = terminate.recv() => logging::log_shutdown(ComponentId::current(), "Received SIGTERM"),
        _ = tokio::signal::ctrl_c() => logging::log_shutdown(ComponentId::current(), "Received Ctrl+C"),
    }

    Ok(())
}
