//! Port ranges and option sets used across launcher tests

use orchestrator::ProcessOptions;

pub struct TestFixtures;

impl TestFixtures {
    /// Absolute path of the stub database binary
    pub const DBSTUB: &'static str = env!("CARGO_BIN_EXE_dbstub");

    pub const PORTS_DISTINCT: u16 = 25000;
    pub const PORTS_RESTART: u16 = 25100;
    pub const PORTS_CRASH: u16 = 25200;
    pub const PORTS_CLEAN_STOP: u16 = 25300;
    pub const PORTS_BAD_EXIT: u16 = 25400;
    pub const PORTS_FIRE_AND_FORGET: u16 = 25500;
    pub const PORTS_CLEAN_DATA: u16 = 25600;
    pub const PORTS_HANG: u16 = 25700;

    /// Options with two server parameters set
    pub fn with_parameters(x: i64, y: i64) -> ProcessOptions {
        ProcessOptions::builder()
            .set_parameter("x", x)
            .set_parameter("y", y)
            .build()
    }

    pub fn crash_on_startup(code: i32) -> ProcessOptions {
        ProcessOptions::builder().flag("crashOnStartup", code).build()
    }

    /// Stub that starts but never accepts connections
    pub fn hang_on_startup() -> ProcessOptions {
        ProcessOptions::builder().bare_flag("hangOnStartup").build()
    }

    pub fn shutdown_exit_code(code: i32) -> ProcessOptions {
        ProcessOptions::builder().flag("shutdownExitCode", code).build()
    }
}
