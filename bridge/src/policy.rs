//! Per-peer fault policies held by a running proxy
//!
//! Each peer, identified by the `host:port` it announced in its handshake,
//! has one directed edge policy. Blocking is independent of the delay and
//! loss settings: both survive a block/unblock cycle.

use serde_json::Value;
use shared::{BridgeCommand, Document};
use std::collections::HashMap;
use std::time::Duration;

/// Fault settings for traffic arriving from one peer
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EdgePolicy {
    pub blocked: bool,
    pub delay: Duration,
    /// Probability in `[0, 1]` that a message is dropped
    pub loss: f64,
}

impl EdgePolicy {
    /// Whether a uniform sample in `[0, 1)` means the message is dropped
    pub fn drops(&self, sample: f64) -> bool {
        self.loss > 0.0 && sample < self.loss
    }
}

/// What a successfully applied control command changed
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyChange {
    pub command: BridgeCommand,
    pub host: String,
    pub policy: EdgePolicy,
}

impl PolicyChange {
    /// Existing connections from `host` must be hung up
    pub fn severs(&self) -> bool {
        self.command == BridgeCommand::RejectConnectionsFrom
    }
}

/// Edge policies keyed by peer `host:port`
#[derive(Debug, Default)]
pub struct HostSettingsMap {
    settings: HashMap<String, EdgePolicy>,
}

impl HostSettingsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy for `host`; unknown peers are allowed with no faults
    pub fn get(&self, host: &str) -> EdgePolicy {
        self.settings.get(host).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    /// Apply a control command document. The error is the message returned
    /// to the caller in an `ok: 0` reply.
    pub fn apply(&mut self, command: BridgeCommand, body: &Document) -> Result<PolicyChange, String> {
        let host = body
            .get("host")
            .and_then(Value::as_str)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| format!("{command} requires a 'host' string"))?
            .to_string();

        let mut policy = self.get(&host);
        match command {
            BridgeCommand::AcceptConnectionsFrom => policy.blocked = false,
            BridgeCommand::RejectConnectionsFrom => policy.blocked = true,
            BridgeCommand::DelayMessagesFrom => {
                let delay = body
                    .get("delay")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| format!("{command} requires a numeric 'delay'"))?;
                if !delay.is_finite() || delay < 0.0 {
                    return Err(format!("'delay' must be a non-negative number of milliseconds, got {delay}"));
                }
                policy.delay = Duration::from_millis(delay as u64);
            }
            BridgeCommand::DiscardMessagesFrom => {
                let loss = body
                    .get("loss")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| format!("{command} requires a numeric 'loss'"))?;
                if !(0.0..=1.0).contains(&loss) {
                    return Err(format!("'loss' must be a probability between 0 and 1, got {loss}"));
                }
                policy.loss = loss;
            }
        }

        self.settings.insert(host.clone(), policy);
        Ok(PolicyChange { command, host, policy })
    }
}
