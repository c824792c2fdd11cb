//! Database client capability and the direct TCP connection implementing it

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::errors::{SharedError, SharedResult};
use crate::messages::{
    self, flags, read_message, write_message, Document, Message, DB_KEY, HANDSHAKE_COMMAND,
    HOST_INFO_KEY,
};

/// Anything a test can issue commands through: a direct connection, or a
/// proxy endpoint delegating to one.
#[mockall::automock]
#[async_trait]
pub trait DatabaseClient: Send {
    /// `host:port` this client talks to
    fn host(&self) -> String;

    /// Run `command` against database `db` and return the raw reply
    async fn run_command(&mut self, db: &str, command: Document) -> SharedResult<Document>;

    /// Send `command` without waiting for a reply
    async fn send_fire_and_forget(&mut self, db: &str, command: Document) -> SharedResult<()>;

    fn secondary_ok(&self) -> bool;

    /// Affects the flags of every subsequent request
    fn set_secondary_ok(&mut self, value: bool);

    async fn close(&mut self) -> SharedResult<()>;
}

/// Connection establishment settings
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Identity announced in the handshake, used by proxies to attribute the connection
    pub host_info: Option<String>,
    pub connect_timeout: Duration,
    /// Bound on each command round trip; `None` waits indefinitely
    pub operation_timeout: Option<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host_info: None,
            connect_timeout: Duration::from_secs(10),
            operation_timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl ConnectOptions {
    pub fn with_host_info<S: Into<String>>(mut self, host_info: S) -> Self {
        self.host_info = Some(host_info.into());
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// A single TCP connection speaking the framed command protocol
pub struct DirectConnection {
    address: String,
    stream: Option<TcpStream>,
    next_request_id: i32,
    secondary_ok: bool,
    operation_timeout: Option<Duration>,
}

impl std::fmt::Debug for DirectConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectConnection")
            .field("address", &self.address)
            .field("open", &self.stream.is_some())
            .field("secondary_ok", &self.secondary_ok)
            .finish()
    }
}

impl DirectConnection {
    pub async fn connect(address: &str) -> SharedResult<Self> {
        Self::connect_with(address, ConnectOptions::default()).await
    }

    /// Connect and complete the handshake. Fails unless the remote answers it.
    pub async fn connect_with(address: &str, options: ConnectOptions) -> SharedResult<Self> {
        let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| SharedError::ConnectFailed {
                address: address.to_string(),
                message: format!("timed out after {:?}", options.connect_timeout),
            })?
            .map_err(|e| SharedError::ConnectFailed {
                address: address.to_string(),
                message: e.to_string(),
            })?;
        stream.set_nodelay(true)?;

        let mut conn = Self {
            address: address.to_string(),
            stream: Some(stream),
            next_request_id: 1,
            secondary_ok: false,
            operation_timeout: options.operation_timeout,
        };

        let mut hello = messages::command(HANDSHAKE_COMMAND);
        if let Some(host_info) = options.host_info {
            hello.insert(HOST_INFO_KEY.to_string(), Value::String(host_info));
        }
        let reply = conn.run_command("admin", hello).await?;
        if !messages::is_ok(&reply) {
            return Err(SharedError::ConnectFailed {
                address: address.to_string(),
                message: format!("handshake rejected: {}", messages::error_message(&reply)),
            });
        }

        Ok(conn)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn request_flags(&self, more_to_come: bool) -> u32 {
        let mut bits = 0;
        if self.secondary_ok {
            bits |= flags::SECONDARY_OK;
        }
        if more_to_come {
            bits |= flags::MORE_TO_COME;
        }
        bits
    }

    fn next_id(&mut self) -> i32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    async fn send(&mut self, db: &str, mut command: Document, more_to_come: bool) -> SharedResult<i32> {
        command.insert(DB_KEY.to_string(), Value::String(db.to_string()));
        let request_id = self.next_id();
        let message = Message::request(request_id, self.request_flags(more_to_come), command);

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SharedError::closed(&self.address))?;
        if let Err(e) = write_message(stream, &message).await {
            self.stream = None;
            return Err(e);
        }
        Ok(request_id)
    }

    async fn receive(&mut self, request_id: i32) -> SharedResult<Document> {
        let address = self.address.clone();
        let timeout = self.operation_timeout;

        let outcome = {
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| SharedError::closed(&address))?;
            match timeout {
                Some(limit) => tokio::time::timeout(limit, read_message(stream))
                    .await
                    .map_err(|_| limit),
                None => Ok(read_message(stream).await),
            }
        };

        let outcome = match outcome {
            Ok(result) => result,
            Err(limit) => {
                // The reply may still arrive later; the stream can no longer be trusted
                self.stream = None;
                return Err(SharedError::OperationTimeout { address, timeout: limit });
            }
        };

        match outcome {
            Ok(Some(reply)) if reply.header.response_to == request_id => Ok(reply.body),
            Ok(Some(reply)) => {
                self.stream = None;
                Err(SharedError::MismatchedReply {
                    request_id,
                    response_to: reply.header.response_to,
                })
            }
            Ok(None) => {
                self.stream = None;
                Err(SharedError::closed(address))
            }
            Err(e) => {
                self.stream = None;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl DatabaseClient for DirectConnection {
    fn host(&self) -> String {
        self.address.clone()
    }

    async fn run_command(&mut self, db: &str, command: Document) -> SharedResult<Document> {
        let request_id = self.send(db, command, false).await?;
        self.receive(request_id).await
    }

    async fn send_fire_and_forget(&mut self, db: &str, command: Document) -> SharedResult<()> {
        self.send(db, command, true).await.map(|_| ())
    }

    fn secondary_ok(&self) -> bool {
        self.secondary_ok
    }

    fn set_secondary_ok(&mut self, value: bool) {
        self.secondary_ok = value;
    }

    async fn close(&mut self) -> SharedResult<()> {
        use tokio::io::AsyncWriteExt;

        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }
}
