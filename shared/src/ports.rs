//! Port allocation and host naming for spawned processes

use std::collections::HashSet;
use std::net::TcpListener;

use crate::errors::{SharedError, SharedResult};

pub const DEFAULT_BASE_PORT: u16 = 20000;

/// Hands out listening ports, never the same one twice
#[derive(Debug, Clone)]
pub struct PortAllocator {
    base: u16,
    next: u16,
    handed_out: HashSet<u16>,
}

impl PortAllocator {
    pub fn new(base: u16) -> Self {
        Self {
            base,
            next: base,
            handed_out: HashSet::new(),
        }
    }

    /// Next port that can currently be bound
    pub fn allocate(&mut self) -> SharedResult<u16> {
        while self.next < u16::MAX {
            let candidate = self.next;
            self.next += 1;
            if self.handed_out.contains(&candidate) {
                continue;
            }
            if is_bindable(candidate) {
                self.handed_out.insert(candidate);
                return Ok(candidate);
            }
            tracing::debug!("Port {} is busy, skipping", candidate);
        }
        Err(SharedError::PortsExhausted { base: self.base })
    }

    /// Record a caller-chosen port so it is never handed out
    pub fn reserve(&mut self, port: u16) {
        self.handed_out.insert(port);
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_PORT)
    }
}

fn is_bindable(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

/// Machine hostname when `use_host_name`, otherwise the loopback name
pub fn resolve_host_name(use_host_name: bool) -> String {
    if !use_host_name {
        return "localhost".to_string();
    }

    #[cfg(unix)]
    {
        match nix::unistd::gethostname() {
            Ok(name) => return name.to_string_lossy().into_owned(),
            Err(e) => tracing::warn!("gethostname failed, using localhost: {}", e),
        }
    }

    "localhost".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocated_ports_are_distinct() {
        let mut ports = PortAllocator::new(31000);
        let mut seen = HashSet::new();
        for _ in 0..20 {
            let port = ports.allocate().unwrap();
            assert!(port >= 31000);
            assert!(seen.insert(port), "port {port} handed out twice");
        }
    }

    #[test]
    fn test_busy_and_reserved_ports_are_skipped() {
        let held = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let busy = held.local_addr().unwrap().port();

        let mut ports = PortAllocator::new(busy);
        assert_ne!(ports.allocate().unwrap(), busy);

        let mut ports = PortAllocator::new(32000);
        ports.reserve(32000);
        assert_ne!(ports.allocate().unwrap(), 32000);
    }

    #[test]
    fn test_loopback_host_name() {
        assert_eq!(resolve_host_name(false), "localhost");
        assert!(!resolve_host_name(true).is_empty());
    }
}
