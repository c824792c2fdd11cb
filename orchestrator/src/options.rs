//! Launch options for database and router processes
//!
//! `ProcessOptions` carries two kinds of keys: logical ones steering the
//! launcher (never rendered onto the command line) and `flags`, which become
//! `--key value` arguments.

use serde::{Deserialize, Serialize};
use shared::RunId;
use std::collections::BTreeMap;
use std::fmt;

/// A command-line flag value
///
/// An empty string renders as a bare flag. A map expands into one
/// `--key sub=value` pair per entry. `Null` is never rendered and, when merged
/// over a remembered value, removes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Map(BTreeMap<String, OptionValue>),
}

impl OptionValue {
    /// Bare flag with no value
    pub fn bare() -> Self {
        OptionValue::Str(String::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, OptionValue::Null)
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, OptionValue>> {
        match self {
            OptionValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// `other` wins; maps merge key by key
    pub fn merged(self, other: OptionValue) -> OptionValue {
        match (self, other) {
            (OptionValue::Map(mut base), OptionValue::Map(overrides)) => {
                merge_maps(&mut base, overrides);
                OptionValue::Map(base)
            }
            (_, other) => other,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Null => Ok(()),
            OptionValue::Bool(b) => write!(f, "{b}"),
            OptionValue::Int(i) => write!(f, "{i}"),
            OptionValue::Float(x) => write!(f, "{x}"),
            OptionValue::Str(s) => f.write_str(s),
            OptionValue::Map(map) => {
                let json = serde_json::to_string(map).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Str(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Str(value)
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        OptionValue::Int(i64::from(value))
    }
}

impl From<u16> for OptionValue {
    fn from(value: u16) -> Self {
        OptionValue::Int(i64::from(value))
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        OptionValue::Float(value)
    }
}

impl From<BTreeMap<String, OptionValue>> for OptionValue {
    fn from(value: BTreeMap<String, OptionValue>) -> Self {
        OptionValue::Map(value)
    }
}

pub(crate) fn merge_maps(base: &mut BTreeMap<String, OptionValue>, overrides: BTreeMap<String, OptionValue>) {
    for (key, value) in overrides {
        let merged = match base.remove(&key) {
            Some(existing) => existing.merged(value),
            None => value,
        };
        base.insert(key, merged);
    }
}

/// Which server binary a process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    /// Storage node with a data directory
    Database,
    /// Query router, no data directory
    Router,
}

impl ProcessKind {
    pub fn default_program(&self) -> &'static str {
        match self {
            ProcessKind::Database => "mongod",
            ProcessKind::Router => "mongos",
        }
    }

    /// Identity uses the machine hostname unless told otherwise
    pub fn uses_host_name_by_default(&self) -> bool {
        matches!(self, ProcessKind::Database)
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessKind::Database => f.write_str("database"),
            ProcessKind::Router => f.write_str("router"),
        }
    }
}

impl std::str::FromStr for ProcessKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "database" | "mongod" => Ok(ProcessKind::Database),
            "router" | "mongos" => Ok(ProcessKind::Router),
            other => Err(format!("Unknown process kind: {other}")),
        }
    }
}

/// Keys consumed by the launcher; never part of the rendered command line
pub const LOGICAL_KEYS: &[&str] = &[
    "runId",
    "env",
    "pathOpts",
    "remember",
    "noRemember",
    "appendOptions",
    "restart",
    "noCleanData",
    "cleanData",
    "startClean",
    "forceLock",
    "useLogFiles",
    "logFile",
    "useHostName",
    "useHostname",
    "noReplSet",
    "forgetPort",
    "arbiter",
    "noJournal",
    "binVersion",
    "waitForConnect",
    "bridgeOptions",
    "skipValidation",
];

pub fn is_logical_key(key: &str) -> bool {
    LOGICAL_KEYS.contains(&key)
}

/// Options for one process launch
///
/// Every field is optional so that a partial set of overrides can be merged
/// over remembered options on restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbpath: Option<String>,
    /// Rendered as `-v`, repeated; capped at 10
    #[serde(default, alias = "v", skip_serializing_if = "Option::is_none")]
    pub verbose: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_opts: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remember: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_remember: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append_options: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_clean_data: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_data: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_clean: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_lock: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_log_files: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    #[serde(default, alias = "useHostname", skip_serializing_if = "Option::is_none")]
    pub use_host_name: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forget_port: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_journal: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_connect: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_validation: Option<bool>,
    /// Everything else, rendered onto the command line
    #[serde(flatten)]
    pub flags: BTreeMap<String, OptionValue>,
}

macro_rules! take_override {
    ($base:ident, $overrides:ident, $($field:ident),+ $(,)?) => {
        $(
            if $overrides.$field.is_some() {
                $base.$field = $overrides.$field;
            }
        )+
    };
}

impl ProcessOptions {
    pub fn builder() -> ProcessOptionsBuilder {
        ProcessOptionsBuilder::new()
    }

    /// `overrides` on top of `self`; set fields win and flag maps merge recursively
    pub fn merged(self, overrides: ProcessOptions) -> ProcessOptions {
        let mut base = self;
        take_override!(
            base,
            overrides,
            run_id,
            port,
            bin_version,
            dbpath,
            verbose,
            remember,
            no_remember,
            append_options,
            restart,
            no_clean_data,
            clean_data,
            start_clean,
            force_lock,
            use_log_files,
            log_file,
            use_host_name,
            forget_port,
            no_journal,
            wait_for_connect,
            skip_validation,
        );

        if let Some(env) = overrides.env {
            base.env.get_or_insert_with(BTreeMap::new).extend(env);
        }
        if let Some(path_opts) = overrides.path_opts {
            base.path_opts.get_or_insert_with(BTreeMap::new).extend(path_opts);
        }
        merge_maps(&mut base.flags, overrides.flags);
        base
    }

    pub fn flag(&self, key: &str) -> Option<&OptionValue> {
        self.flags.get(key).filter(|v| !v.is_null())
    }

    pub fn has_flag(&self, key: &str) -> bool {
        self.flag(key).is_some()
    }

    pub fn set_flag<V: Into<OptionValue>>(&mut self, key: &str, value: V) {
        self.flags.insert(key.to_string(), value.into());
    }

    pub fn remove_flag(&mut self, key: &str) -> Option<OptionValue> {
        self.flags.remove(key)
    }

    pub fn set_parameter(&self, name: &str) -> Option<&OptionValue> {
        self.flags
            .get("setParameter")
            .and_then(OptionValue::as_map)
            .and_then(|params| params.get(name))
    }

    pub fn remove_set_parameter(&mut self, name: &str) -> Option<OptionValue> {
        match self.flags.get_mut("setParameter") {
            Some(OptionValue::Map(params)) => params.remove(name),
            _ => None,
        }
    }

    /// Logical keys that ended up among the flags, e.g. from loose JSON input
    pub fn logical_flags(&self) -> Vec<&str> {
        self.flags
            .keys()
            .map(String::as_str)
            .filter(|key| is_logical_key(key))
            .collect()
    }
}

/// Fluent construction of `ProcessOptions`
#[derive(Debug, Default)]
pub struct ProcessOptionsBuilder {
    options: ProcessOptions,
}

impl ProcessOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_id<R: Into<RunId>>(mut self, run_id: R) -> Self {
        self.options.run_id = Some(run_id.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.options.port = Some(port);
        self
    }

    /// Concrete version or symbolic tag such as `last-stable`
    pub fn bin_version<S: Into<String>>(mut self, version: S) -> Self {
        self.options.bin_version = Some(version.into());
        self
    }

    /// Data directory, may use `$dataDir`, `$port` and `$runId` templates
    pub fn dbpath<S: Into<String>>(mut self, dbpath: S) -> Self {
        self.options.dbpath = Some(dbpath.into());
        self
    }

    pub fn verbose(mut self, level: u32) -> Self {
        self.options.verbose = Some(level);
        self
    }

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.options
            .env
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn path_opt<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.options
            .path_opts
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn remember(mut self, remember: bool) -> Self {
        self.options.remember = Some(remember);
        self
    }

    pub fn no_remember(mut self) -> Self {
        self.options.no_remember = Some(true);
        self
    }

    pub fn append_options(mut self) -> Self {
        self.options.append_options = Some(true);
        self
    }

    pub fn restart(mut self) -> Self {
        self.options.restart = Some(true);
        self
    }

    pub fn no_clean_data(mut self) -> Self {
        self.options.no_clean_data = Some(true);
        self
    }

    pub fn clean_data(mut self) -> Self {
        self.options.clean_data = Some(true);
        self
    }

    pub fn force_lock(mut self) -> Self {
        self.options.force_lock = Some(true);
        self
    }

    pub fn use_log_files(mut self) -> Self {
        self.options.use_log_files = Some(true);
        self
    }

    pub fn log_file<S: Into<String>>(mut self, path: S) -> Self {
        self.options.log_file = Some(path.into());
        self
    }

    pub fn use_host_name(mut self, use_host_name: bool) -> Self {
        self.options.use_host_name = Some(use_host_name);
        self
    }

    pub fn forget_port(mut self) -> Self {
        self.options.forget_port = Some(true);
        self
    }

    pub fn no_journal(mut self) -> Self {
        self.options.no_journal = Some(true);
        self
    }

    /// Skip waiting for the process to accept connections
    pub fn fire_and_forget(mut self) -> Self {
        self.options.wait_for_connect = Some(false);
        self
    }

    pub fn skip_validation(mut self) -> Self {
        self.options.skip_validation = Some(true);
        self
    }

    pub fn flag<V: Into<OptionValue>>(mut self, key: &str, value: V) -> Self {
        self.options.set_flag(key, value);
        self
    }

    /// Flag rendered with no value
    pub fn bare_flag(mut self, key: &str) -> Self {
        self.options.set_flag(key, OptionValue::bare());
        self
    }

    pub fn set_parameter<V: Into<OptionValue>>(mut self, name: &str, value: V) -> Self {
        let mut params = BTreeMap::new();
        params.insert(name.to_string(), value.into());
        let merged = match self.options.flags.remove("setParameter") {
            Some(existing) => existing.merged(OptionValue::Map(params)),
            None => OptionValue::Map(params),
        };
        self.options.flags.insert("setParameter".to_string(), merged);
        self
    }

    pub fn build(self) -> ProcessOptions {
        self.options
    }
}
