//! Trait definitions with mockall annotations for testing

use crate::error::OrchestratorResult;

/// Check run against a database process just before it is asked to shut down
///
/// Used to validate collections and indexes while the process is still up.
/// Only invoked when a clean exit is expected and validation is not skipped.
#[mockall::automock]
#[async_trait::async_trait]
pub trait ShutdownHook: Send + Sync {
    async fn before_stop(&self, port: u16) -> OrchestratorResult<()>;
}

/// Hook that accepts every shutdown
#[derive(Debug, Default, Clone, Copy)]
pub struct NoValidation;

#[async_trait::async_trait]
impl ShutdownHook for NoValidation {
    async fn before_stop(&self, _port: u16) -> OrchestratorResult<()> {
        Ok(())
    }
}
