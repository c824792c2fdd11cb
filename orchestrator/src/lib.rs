//! Process orchestration for cluster tests
//!
//! Starts, tracks and stops the database and router processes of a test
//! topology. Symbolic binary versions are resolved through an ordered
//! substitution table, options are normalized and rendered into a command
//! line, and per-run options are remembered in a `TestContext` so a process
//! can be restarted with the same configuration plus overrides.

pub mod args;
pub mod config;
pub mod context;
pub mod error;
pub mod launcher;
pub mod normalize;
pub mod options;
pub mod traits;
pub mod version;

// Re-export commonly used types
pub use args::{parse_command_line, render_args};
pub use config::{LauncherConfig, LauncherConfigBuilder, TestOptions};
pub use context::TestContext;
pub use error::{OrchestratorError, OrchestratorResult};
pub use launcher::{Launcher, ProcessHandle, StartOutcome, StopOptions};
pub use nix::sys::signal::Signal;
pub use normalize::NormalizedOptions;
pub use options::{OptionValue, ProcessKind, ProcessOptions, ProcessOptionsBuilder};
pub use traits::{NoValidation, ShutdownHook};
pub use version::{VersionCycle, VersionSub, VersionTable};
