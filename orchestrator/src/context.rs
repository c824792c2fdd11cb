//! State scoped to one test: remembered options, startup crashes and ports

use shared::{PortAllocator, RunId};
use std::collections::HashMap;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::options::ProcessOptions;

/// Owned by whatever represents "one test" and passed to every launcher call
#[derive(Debug, Default)]
pub struct TestContext {
    saved_options: HashMap<RunId, ProcessOptions>,
    exit_codes: HashMap<u16, i32>,
    ports: PortAllocator,
}

impl TestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context allocating ports upwards from `base`
    pub fn with_base_port(base: u16) -> Self {
        Self {
            ports: PortAllocator::new(base),
            ..Self::default()
        }
    }

    pub fn allocate_port(&mut self) -> OrchestratorResult<u16> {
        Ok(self.ports.allocate()?)
    }

    pub fn reserve_port(&mut self, port: u16) {
        self.ports.reserve(port);
    }

    pub fn save_options(&mut self, run_id: RunId, options: ProcessOptions) {
        self.saved_options.insert(run_id, options);
    }

    pub fn saved_options(&self, run_id: &RunId) -> Option<&ProcessOptions> {
        self.saved_options.get(run_id)
    }

    pub fn require_saved_options(&self, run_id: &RunId) -> OrchestratorResult<&ProcessOptions> {
        self.saved_options(run_id)
            .ok_or_else(|| OrchestratorError::UnknownRunId {
                run_id: run_id.to_string(),
            })
    }

    /// Record the exit code of a process that died before accepting a connection
    pub fn record_exit_code(&mut self, port: u16, code: i32) {
        self.exit_codes.insert(port, code);
    }

    pub fn exit_code(&self, port: u16) -> Option<i32> {
        self.exit_codes.get(&port).copied()
    }

    /// Remove and return a recorded startup crash
    pub fn take_exit_code(&mut self, port: u16) -> Option<i32> {
        self.exit_codes.remove(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ports_are_distinct() {
        let mut ctx = TestContext::with_base_port(23100);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..5 {
            assert!(seen.insert(ctx.allocate_port().unwrap()));
        }
    }

    #[test]
    fn test_exit_codes_are_consumed() {
        let mut ctx = TestContext::new();
        ctx.record_exit_code(20000, 14);
        assert_eq!(ctx.exit_code(20000), Some(14));
        assert_eq!(ctx.take_exit_code(20000), Some(14));
        assert_eq!(ctx.take_exit_code(20000), None);
    }

    #[test]
    fn test_saved_options() {
        let mut ctx = TestContext::new();
        let run_id = RunId::from("run-1");
        assert!(ctx.require_saved_options(&run_id).is_err());

        ctx.save_options(run_id.clone(), ProcessOptions::builder().port(20001).build());
        assert_eq!(ctx.require_saved_options(&run_id).unwrap().port, Some(20001));
    }
}
