//! Turning caller options into a complete, launchable option set

use shared::{resolve_host_name, RunId};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::args::{binary_name, render_args};
use crate::config::{LauncherConfig, TestOptions};
use crate::context::TestContext;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::options::{OptionValue, ProcessKind, ProcessOptions};
use crate::version::{major_minor, VersionTable};
use shared::{process_debug, process_info, ComponentId};

/// Set-parameters unknown to database versions older than the given one
const VERSION_GATED_PARAMETERS: &[(&str, &str)] = &[
    ("writePeriodicNoops", "3.3.12"),
    ("numInitialSyncAttempts", "3.3.12"),
    ("numInitialSyncConnectAttempts", "3.3.12"),
    ("migrationLockAcquisitionMaxWaitMS", "4.1.7"),
];

/// Flags removed from the given version on
const OBSOLETE_FLAGS: &[(&str, &str)] = &[("noAutoSplit", "4.2")];

/// A launch-ready option set plus the values the launcher derived from it
#[derive(Debug, Clone)]
pub struct NormalizedOptions {
    pub kind: ProcessKind,
    pub run_id: RunId,
    pub port: u16,
    /// Resolved, never a symbolic tag
    pub bin_version: String,
    pub dbpath: Option<PathBuf>,
    /// `host:port` identity
    pub host: String,
    pub env: BTreeMap<String, String>,
    pub wait_for_connect: bool,
    pub restart: bool,
    pub clean_data: bool,
    pub force_lock: bool,
    pub skip_validation: bool,
    /// Everything above, plus flags, in option form
    pub options: ProcessOptions,
}

fn is_set(flag: Option<bool>) -> bool {
    flag.unwrap_or(false)
}

fn is_truthy(value: Option<&OptionValue>) -> bool {
    match value {
        None | Some(OptionValue::Null) | Some(OptionValue::Bool(false)) | Some(OptionValue::Int(0)) => false,
        Some(_) => true,
    }
}

/// Substitute `$dataPath`, `$dataDir` and every `path_opts` key; relative
/// results are placed under the data directory
pub fn to_real_path(path: &str, config: &LauncherConfig, path_opts: &BTreeMap<String, String>) -> String {
    let data_path = config.data_path_string();
    let mut path = path
        .replace("$dataPath", &data_path)
        .replace("$dataDir", &config.data_dir_string());
    for (key, value) in path_opts {
        path = path.replace(&format!("${key}"), value);
    }

    if !is_absolute(&path) {
        if !path.is_empty() && !path.ends_with('/') {
            path.push('/');
        }
        path = format!("{data_path}{path}");
    }
    path
}

/// `to_real_path` without a trailing separator
pub fn to_real_dir(path: &str, config: &LauncherConfig, path_opts: &BTreeMap<String, String>) -> String {
    let path = to_real_path(path, config, path_opts);
    match path.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => path,
    }
}

fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with('/')
        || path.starts_with('\\')
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}

/// Fill defaults, merge remembered options on restart and record what to remember
pub fn normalize(
    ctx: &mut TestContext,
    config: &LauncherConfig,
    versions: &VersionTable,
    test_options: &TestOptions,
    kind: ProcessKind,
    raw: ProcessOptions,
) -> OrchestratorResult<NormalizedOptions> {
    let mut opts = raw;
    let wait_for_connect = opts.wait_for_connect.take().unwrap_or(true);
    let restart = is_set(opts.restart);
    let remember = opts.remember.unwrap_or(restart);

    let mut prior_version = None;
    if restart && remember {
        let run_id = opts.run_id.clone().ok_or_else(|| {
            OrchestratorError::invalid_option("runId", "restarting requires the run id of an earlier start")
        })?;
        let saved = ctx.require_saved_options(&run_id)?.clone();
        prior_version = saved.bin_version.clone();
        opts = saved.merged(opts);
        process_debug!(ComponentId::current(), "♻️ Restarting run {} with remembered options", run_id);
    }

    let run_id = opts.run_id.clone().unwrap_or_default();
    opts.run_id = Some(run_id.clone());

    if is_set(opts.forget_port) {
        opts.port = None;
    }

    if opts.bin_version.is_none() && kind == ProcessKind::Router {
        opts.bin_version = test_options.router_bin_version.clone();
    }
    let bin_version = versions.resolve(opts.bin_version.as_deref().unwrap_or(""));
    opts.bin_version = Some(bin_version.clone());

    let port = match opts.port {
        Some(port) => {
            ctx.reserve_port(port);
            port
        }
        None => ctx.allocate_port()?,
    };
    opts.port = Some(port);

    let mut path_opts = opts.path_opts.take().unwrap_or_default();
    path_opts.insert("port".to_string(), port.to_string());
    path_opts.insert("runId".to_string(), run_id.to_string());
    opts.path_opts = Some(path_opts.clone());

    let should_remember =
        (!restart && !is_set(opts.no_remember)) || (restart && is_set(opts.append_options));
    if should_remember {
        ctx.save_options(run_id.clone(), opts.clone());
    }

    if !opts.has_flag("bind_ip") {
        opts.set_flag("bind_ip", "0.0.0.0");
    }

    let mut dbpath = None;
    match kind {
        ProcessKind::Database => {
            let template = opts
                .dbpath
                .clone()
                .unwrap_or_else(|| format!("$dataDir/{}-$port", kind.default_program()));
            let real = to_real_dir(&template, config, &path_opts);
            path_opts.insert("dbpath".to_string(), real.clone());
            opts.dbpath = Some(real.clone());

            for (parameter, required) in VERSION_GATED_PARAMETERS {
                if opts.set_parameter(parameter).is_some()
                    && !versions.is_at_least(&bin_version, required)?
                {
                    process_info!(
                        ComponentId::current(),
                        "Removing '{}' setParameter, unsupported by version {}",
                        parameter,
                        bin_version
                    );
                    opts.remove_set_parameter(parameter);
                }
            }

            let log_file = match (&opts.log_file, is_set(opts.use_log_files)) {
                (None, true) => Some(format!("{real}/{}.log", kind.default_program())),
                (Some(file), _) => Some(to_real_dir(file, config, &path_opts)),
                (None, false) => None,
            };
            if let Some(file) = log_file {
                opts.set_flag("logpath", file.as_str());
                opts.log_file = Some(file);
            }

            if is_set(opts.no_journal) && !opts.has_flag("journal") && !opts.has_flag("configsvr") {
                opts.set_flag("nojournal", OptionValue::bare());
            }
            if is_truthy(opts.flag("noReplSet")) {
                opts.remove_flag("replSet");
            }
            if is_truthy(opts.flag("arbiter")) {
                opts.set_flag("oplogSize", 1);
            }

            dbpath = Some(PathBuf::from(real));
        }
        ProcessKind::Router => {
            if let Some(configdb) = opts.flag("configdb").map(|v| v.to_string()) {
                let sanitized: String = configdb
                    .chars()
                    .map(|c| if matches!(c, ':' | '/' | ',') { '-' } else { c })
                    .collect();
                path_opts.insert("configdb".to_string(), sanitized);
            }

            let default_log = if path_opts.contains_key("configdb") {
                format!("$dataDir/{}-$configdb-$port.log", kind.default_program())
            } else {
                format!("$dataDir/{}-$port.log", kind.default_program())
            };
            let log_file = match (&opts.log_file, is_set(opts.use_log_files)) {
                (None, true) => Some(to_real_dir(&default_log, config, &path_opts)),
                (Some(file), _) => Some(to_real_dir(file, config, &path_opts)),
                (None, false) => None,
            };
            if let Some(file) = log_file {
                opts.set_flag("logpath", file.as_str());
                opts.log_file = Some(file);
            }
        }
    }

    if let Some(prior) = prior_version.as_deref() {
        let moved_forward = versions.compare(&bin_version, prior)? == Ordering::Greater;
        for (flag, removed_in) in OBSOLETE_FLAGS {
            if moved_forward && opts.has_flag(flag) && versions.is_at_least(&bin_version, removed_in)? {
                process_info!(
                    ComponentId::current(),
                    "Removing '{}', obsolete as of {} (restarting {} -> {})",
                    flag,
                    removed_in,
                    prior,
                    bin_version
                );
                opts.remove_flag(flag);
            }
        }
    }
    opts.path_opts = Some(path_opts);

    let use_host_name = opts.use_host_name.unwrap_or(kind.uses_host_name_by_default());
    let host = format!("{}:{}", resolve_host_name(use_host_name), port);
    let clean_data = kind == ProcessKind::Database
        && (is_set(opts.clean_data) || is_set(opts.start_clean) || (!restart && !is_set(opts.no_clean_data)));

    Ok(NormalizedOptions {
        kind,
        run_id,
        port,
        bin_version,
        dbpath,
        host,
        env: opts.env.clone().unwrap_or_default(),
        wait_for_connect,
        restart,
        clean_data,
        force_lock: is_set(opts.force_lock),
        skip_validation: is_set(opts.skip_validation),
        options: opts,
    })
}

/// Full argument vector: rendered options plus run-wide layering
pub fn command_line(
    normalized: &NormalizedOptions,
    config: &LauncherConfig,
    versions: &VersionTable,
    test_options: &TestOptions,
) -> Vec<String> {
    let binary = binary_name(
        config.program(normalized.kind),
        Some(&normalized.bin_version),
        versions.latest(),
    );
    let version = if versions.is_latest(&normalized.bin_version) {
        None
    } else {
        major_minor(&normalized.bin_version).ok()
    };

    test_options.apply(render_args(&binary, &normalized.options), normalized.kind, version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn config() -> LauncherConfig {
        LauncherConfig::builder().data_dir("/data/db").build()
    }

    fn run(
        ctx: &mut TestContext,
        kind: ProcessKind,
        raw: ProcessOptions,
    ) -> OrchestratorResult<NormalizedOptions> {
        normalize(
            ctx,
            &config(),
            &VersionTable::default(),
            &TestOptions::default(),
            kind,
            raw,
        )
    }

    #[test]
    fn test_path_templates() {
        let mut opts = BTreeMap::new();
        opts.insert("port".to_string(), "20000".to_string());
        let config = config();

        assert_eq!(to_real_dir("$dataDir/mongod-$port", &config, &opts), "/data/db/mongod-20000");
        assert_eq!(to_real_dir("shard0", &config, &opts), "/data/db/shard0");
        assert_eq!(to_real_path("$dataPath$port/", &config, &opts), "/data/db/20000/");
        assert_eq!(to_real_dir("/abs/dir/", &config, &opts), "/abs/dir");
    }

    #[test]
    fn test_defaults_filled() {
        let mut ctx = TestContext::with_base_port(23200);
        let normalized = run(&mut ctx, ProcessKind::Database, ProcessOptions::default()).unwrap();

        assert!(normalized.wait_for_connect);
        assert!(normalized.clean_data);
        assert_eq!(normalized.bin_version, "4.4.0");
        assert_eq!(
            normalized.dbpath,
            Some(PathBuf::from(format!("/data/db/mongod-{}", normalized.port)))
        );
        assert_eq!(normalized.options.flag("bind_ip"), Some(&OptionValue::from("0.0.0.0")));
        assert!(normalized.host.ends_with(&format!(":{}", normalized.port)));
        assert!(ctx.saved_options(&normalized.run_id).is_some());
    }

    #[test]
    fn test_restart_merges_remembered() {
        let mut ctx = TestContext::with_base_port(23300);
        let first = run(
            &mut ctx,
            ProcessKind::Database,
            ProcessOptions::builder()
                .set_parameter("x", 1)
                .set_parameter("y", 1)
                .build(),
        )
        .unwrap();

        let overrides = ProcessOptions::builder()
            .run_id(first.run_id.clone())
            .restart()
            .set_parameter("x", 2)
            .build();
        let second = run(&mut ctx, ProcessKind::Database, overrides).unwrap();

        assert_eq!(second.port, first.port);
        assert!(!second.clean_data);
        assert_eq!(second.options.set_parameter("x"), Some(&OptionValue::Int(2)));
        assert_eq!(second.options.set_parameter("y"), Some(&OptionValue::Int(1)));

        // Not remembered without appendOptions
        let saved = ctx.saved_options(&first.run_id).unwrap();
        assert_eq!(saved.set_parameter("x"), Some(&OptionValue::Int(1)));
    }

    #[test]
    fn test_restart_unknown_run() {
        let mut ctx = TestContext::with_base_port(23400);
        let overrides = ProcessOptions::builder().run_id("nope").restart().build();
        assert_matches!(
            run(&mut ctx, ProcessKind::Database, overrides),
            Err(OrchestratorError::UnknownRunId { .. })
        );
    }

    #[test]
    fn test_version_gated_parameters() {
        let mut ctx = TestContext::with_base_port(23500);
        let normalized = run(
            &mut ctx,
            ProcessKind::Database,
            ProcessOptions::builder()
                .bin_version("3.2")
                .set_parameter("writePeriodicNoops", false)
                .set_parameter("logLevel", 1)
                .build(),
        )
        .unwrap();

        assert!(normalized.options.set_parameter("writePeriodicNoops").is_none());
        assert!(normalized.options.set_parameter("logLevel").is_some());
    }

    #[test]
    fn test_obsolete_flag_stripped_on_upgrade() {
        let mut ctx = TestContext::with_base_port(23600);
        let first = run(
            &mut ctx,
            ProcessKind::Router,
            ProcessOptions::builder()
                .bin_version("last-stable")
                .bare_flag("noAutoSplit")
                .flag("configdb", "cfg/localhost:20000")
                .build(),
        )
        .unwrap();
        assert!(first.options.has_flag("noAutoSplit"));
        assert_eq!(first.options.path_opts.as_ref().unwrap()["configdb"], "cfg-localhost-20000");

        let upgraded = run(
            &mut ctx,
            ProcessKind::Router,
            ProcessOptions::builder()
                .run_id(first.run_id.clone())
                .restart()
                .bin_version("latest")
                .build(),
        )
        .unwrap();
        assert!(!upgraded.options.has_flag("noAutoSplit"));
        assert!(upgraded.dbpath.is_none());
    }

    #[test]
    fn test_restart_across_ambiguous_builds_fails() {
        let mut ctx = TestContext::with_base_port(23950);
        let first = run(
            &mut ctx,
            ProcessKind::Router,
            ProcessOptions::builder()
                .bin_version("4.2.1-abc")
                .bare_flag("noAutoSplit")
                .build(),
        )
        .unwrap();

        let result = run(
            &mut ctx,
            ProcessKind::Router,
            ProcessOptions::builder()
                .run_id(first.run_id.clone())
                .restart()
                .bin_version("4.2.1-def")
                .build(),
        );
        assert_matches!(result, Err(OrchestratorError::AmbiguousVersionComparison { .. }));
    }

    #[test]
    fn test_log_files() {
        let mut ctx = TestContext::with_base_port(23700);
        let normalized = run(
            &mut ctx,
            ProcessKind::Database,
            ProcessOptions::builder().port(23750).use_log_files().build(),
        )
        .unwrap();
        assert_eq!(
            normalized.options.flag("logpath"),
            Some(&OptionValue::from("/data/db/mongod-23750/mongod.log"))
        );
    }

    #[test]
    fn test_command_line_layers_test_options() {
        let mut ctx = TestContext::with_base_port(23800);
        let config = config();
        let versions = VersionTable::default();
        let test_options = TestOptions::default();
        let normalized = normalize(
            &mut ctx,
            &config,
            &versions,
            &test_options,
            ProcessKind::Database,
            ProcessOptions::builder().port(23850).bin_version("last-stable").build(),
        )
        .unwrap();

        let argv = command_line(&normalized, &config, &versions, &test_options);
        assert_eq!(argv[0], "mongod-4.2");
        assert!(argv.contains(&"enableTestCommands=1".to_string()));
        assert!(argv.windows(2).any(|w| w[0] == "--port" && w[1] == "23850"));
    }
}
