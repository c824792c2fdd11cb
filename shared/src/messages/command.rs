//! Command documents and replies

use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

use super::frame::Document;

pub const COMMAND_KEY: &str = "command";
pub const DB_KEY: &str = "$db";
/// Marks a command as proxy configuration; such commands are never forwarded
pub const FOR_BRIDGE_KEY: &str = "$forBridge";
/// Field of the handshake identifying the sender by `host:port`
pub const HOST_INFO_KEY: &str = "hostInfo";
pub const HANDSHAKE_COMMAND: &str = "isMaster";

/// Start a command document for `name`
pub fn command(name: &str) -> Document {
    let mut doc = Document::new();
    doc.insert(COMMAND_KEY.to_string(), Value::String(name.to_string()));
    doc
}

pub fn ok_reply(extra: Document) -> Document {
    let mut doc = Document::new();
    doc.insert("ok".to_string(), json!(1));
    doc.extend(extra);
    doc
}

pub fn error_reply(message: &str, code: i32) -> Document {
    let mut doc = Document::new();
    doc.insert("ok".to_string(), json!(0));
    doc.insert("errmsg".to_string(), Value::String(message.to_string()));
    doc.insert("code".to_string(), json!(code));
    doc
}

/// True when the reply reports success (`ok: 1` or `ok: true`)
pub fn is_ok(reply: &Document) -> bool {
    match reply.get("ok") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

pub fn error_message(reply: &Document) -> String {
    reply
        .get("errmsg")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| Value::Object(reply.clone()).to_string())
}

/// Commands understood by the fault-injection proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeCommand {
    AcceptConnectionsFrom,
    RejectConnectionsFrom,
    DelayMessagesFrom,
    DiscardMessagesFrom,
}

impl BridgeCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeCommand::AcceptConnectionsFrom => "acceptConnectionsFrom",
            BridgeCommand::RejectConnectionsFrom => "rejectConnectionsFrom",
            BridgeCommand::DelayMessagesFrom => "delayMessagesFrom",
            BridgeCommand::DiscardMessagesFrom => "discardMessagesFrom",
        }
    }

    /// Build the wire document for this command aimed at peer `host`
    pub fn to_document(&self, host: &str, extra: Document) -> Document {
        let mut doc = command(self.as_str());
        doc.insert(FOR_BRIDGE_KEY.to_string(), Value::Bool(true));
        doc.insert(DB_KEY.to_string(), Value::String("test".to_string()));
        doc.insert("host".to_string(), Value::String(host.to_string()));
        doc.extend(extra);
        doc
    }
}

impl fmt::Display for BridgeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BridgeCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acceptConnectionsFrom" => Ok(BridgeCommand::AcceptConnectionsFrom),
            "rejectConnectionsFrom" => Ok(BridgeCommand::RejectConnectionsFrom),
            "delayMessagesFrom" => Ok(BridgeCommand::DelayMessagesFrom),
            "discardMessagesFrom" => Ok(BridgeCommand::DiscardMessagesFrom),
            other => Err(format!("No such bridge command: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_status() {
        assert!(is_ok(&ok_reply(Document::new())));
        assert!(!is_ok(&error_reply("boom", 8)));
        assert_eq!(error_message(&error_reply("boom", 8)), "boom");

        let mut as_bool = Document::new();
        as_bool.insert("ok".into(), Value::Bool(true));
        assert!(is_ok(&as_bool));
        assert!(!is_ok(&Document::new()));
    }

    #[test]
    fn test_bridge_command_document() {
        let mut extra = Document::new();
        extra.insert("delay".into(), json!(500));
        let doc = BridgeCommand::DelayMessagesFrom.to_document("node-b:20001", extra);

        assert_eq!(doc[COMMAND_KEY], "delayMessagesFrom");
        assert_eq!(doc[FOR_BRIDGE_KEY], true);
        assert_eq!(doc["host"], "node-b:20001");
        assert_eq!(doc["delay"], 500);
        assert_eq!(
            "delayMessagesFrom".parse::<BridgeCommand>(),
            Ok(BridgeCommand::DelayMessagesFrom)
        );
        assert!("shutdown".parse::<BridgeCommand>().is_err());
    }
}
