//! Shared logging utilities for consistent tracing across harness processes

use crate::types::ComponentId;
use chrono::{DateTime, Utc};
use tracing::{error, info};

/// Build the filter directive for the current component
fn filter_directive(component: &ComponentId, base_level: &str) -> String {
    match component {
        ComponentId::Harness => {
            format!("orchestrator={base_level},bridge={base_level},shared={base_level}")
        }
        ComponentId::Bridge(_) => format!("bridge={base_level},shared={base_level}"),
        ComponentId::DbStub(_) => format!("dbstub={base_level},orchestrator={base_level},shared={base_level}"),
    }
}

/// Initialize tracing subscriber with component-specific filtering
///
/// `RUST_LOG` wins over the computed directive when set. Safe to call more
/// than once; later calls are ignored.
pub fn init_tracing(log_level: Option<&str>) {
    use tracing_subscriber::{fmt, EnvFilter};

    let component = ComponentId::current();
    let base_level = log_level.unwrap_or("info");
    let directive = filter_directive(component, base_level);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));

    let _ = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .try_init();
}

/// Tracing for tests: debug level, output captured by the test harness
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::new("orchestrator=debug,bridge=debug,shared=debug"))
        .with_test_writer()
        .try_init();
}

/// Get formatted timestamp for consistent logging
pub fn format_timestamp() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.format("%H:%M:%S%.3f").to_string()
}

/// Macro for component-aware info logging
#[macro_export]
macro_rules! process_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(
            process = %$component,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for component-aware warning logging
#[macro_export]
macro_rules! process_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(
            process = %$component,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for component-aware error logging
#[macro_export]
macro_rules! process_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(
            process = %$component,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for component-aware debug logging
#[macro_export]
macro_rules! process_debug {
    ($component:expr, $($arg:tt)*) => {
        tracing::debug!(
            process = %$component,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Contextual logging helper for startup messages
pub fn log_startup(component: &ComponentId, details: &str) {
    info!(
        process = %component,
        timestamp = format_timestamp(),
        "🚀 Starting {}",
        details
    );
}

/// Contextual logging helper for shutdown messages
pub fn log_shutdown(component: &ComponentId, reason: &str) {
    info!(
        process = %component,
        timestamp = format_timestamp(),
        "🛑 Shutting down: {}",
        reason
    );
}

/// Contextual logging helper for error conditions
pub fn log_error(component: &ComponentId, context: &str, error: &dyn std::fmt::Display) {
    error!(
        process = %component,
        timestamp = format_timestamp(),
        error = %error,
        "❌ {} failed: {}",
        context,
        error
    );
}
