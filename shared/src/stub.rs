//! Minimal stand-in for a database process
//!
//! Answers the handful of commands the harness itself issues. Used in-process
//! by proxy tests and wrapped by the `dbstub` binary for launcher tests.

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::errors::SharedResult;
use crate::messages::{self, read_message, write_message, Document, Message, COMMAND_KEY, DB_KEY};
use crate::{process_debug, ComponentId};

const COMMAND_NOT_FOUND: i32 = 59;

pub struct StubServer {
    listener: TcpListener,
    argv: Arc<Vec<String>>,
    served: Arc<AtomicU64>,
}

/// Running stub; aborts the accept loop when dropped
pub struct StubHandle {
    pub addr: SocketAddr,
    served: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl StubHandle {
    /// Non-handshake commands that reached the stub, replies or not
    pub fn commands_served(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }

    /// `host:port` form used as a proxy destination
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }
}

impl Drop for StubHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl StubServer {
    /// Bind to `addr`. `argv` is what `getCmdLineOpts` reports.
    pub async fn bind(addr: &str, argv: Vec<String>) -> SharedResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            argv: Arc::new(argv),
            served: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn local_addr(&self) -> SharedResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop on a background task
    pub fn spawn(self) -> SharedResult<StubHandle> {
        let addr = self.local_addr()?;
        let served = self.served.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = self.serve().await {
                tracing::warn!("Stub server on {} stopped: {}", addr, e);
            }
        });
        Ok(StubHandle { addr, served, task })
    }

    pub async fn serve(self) -> SharedResult<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let argv = self.argv.clone();
            let served = self.served.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, argv, served).await {
                    process_debug!(ComponentId::current(), "Connection from {} ended: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    argv: Arc<Vec<String>>,
    served: Arc<AtomicU64>,
) -> SharedResult<()> {
    stream.set_nodelay(true)?;
    let mut next_id: i32 = 1;

    while let Some(request) = read_message(&mut stream).await? {
        let name = request.command_name().unwrap_or_default().to_string();
        if !name.eq_ignore_ascii_case(messages::HANDSHAKE_COMMAND) {
            served.fetch_add(1, Ordering::SeqCst);
        }

        let body = respond(&name, &request.body, &argv).await;
        if request.more_to_come() {
            continue;
        }

        let reply = Message::reply_to(&request, next_id, body);
        next_id = next_id.wrapping_add(1);
        write_message(&mut stream, &reply).await?;
    }
    Ok(())
}

async fn respond(name: &str, body: &Document, argv: &[String]) -> Document {
    match name {
        "isMaster" | "ismaster" | "hello" => {
            let mut extra = Document::new();
            extra.insert("ismaster".into(), Value::Bool(true));
            extra.insert("maxWireVersion".into(), json!(8));
            messages::ok_reply(extra)
        }
        "ping" => messages::ok_reply(Document::new()),
        "echo" => {
            let mut args = body.clone();
            args.remove(COMMAND_KEY);
            args.remove(DB_KEY);
            let mut extra = Document::new();
            extra.insert("echo".into(), Value::Object(args));
            messages::ok_reply(extra)
        }
        "sleep" => {
            let millis = body.get("millis").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            messages::ok_reply(Document::new())
        }
        "getCmdLineOpts" => {
            let mut extra = Document::new();
            extra.insert("argv".into(), json!(argv));
            messages::ok_reply(extra)
        }
        other => messages::error_reply(&format!("no such command: '{other}'"), COMMAND_NOT_FOUND),
    }
}
