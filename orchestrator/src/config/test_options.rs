//! Run-wide options layered onto every database and router command line

use std::collections::BTreeMap;

use crate::args::{has_flag, has_set_parameter};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::options::{OptionValue, ProcessKind};

const ENV_PREFIX: &str = "HARNESS_";

#[derive(Debug, Clone, PartialEq)]
pub struct TestOptions {
    pub enable_test_commands: bool,
    pub auth: bool,
    pub auth_mechanism: Option<String>,
    pub key_file: Option<String>,
    pub storage_engine: Option<String>,
    pub no_journal: bool,
    pub transaction_lifetime_limit_seconds: Option<u64>,
    pub network_message_compressors: Option<String>,
    /// Extra `--setParameter` entries for database processes
    pub set_parameters: BTreeMap<String, OptionValue>,
    /// Extra `--setParameter` entries for routers
    pub set_parameters_router: BTreeMap<String, OptionValue>,
    /// Version routers run when the caller names none
    pub router_bin_version: Option<String>,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            enable_test_commands: true,
            auth: false,
            auth_mechanism: None,
            key_file: None,
            storage_engine: None,
            no_journal: false,
            transaction_lifetime_limit_seconds: None,
            network_message_compressors: None,
            set_parameters: BTreeMap::new(),
            set_parameters_router: BTreeMap::new(),
            router_bin_version: None,
        }
    }
}

impl TestOptions {
    /// Load from `HARNESS_*` environment variables, reading `.env` first if present
    pub fn from_env() -> OrchestratorResult<Self> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup. Map-valued settings are JSON objects.
    pub fn from_lookup<F>(lookup: F) -> OrchestratorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            enable_test_commands: match var("ENABLE_TEST_COMMANDS") {
                Some(value) => parse_bool("ENABLE_TEST_COMMANDS", &value)?,
                None => defaults.enable_test_commands,
            },
            auth: match var("AUTH") {
                Some(value) => parse_bool("AUTH", &value)?,
                None => defaults.auth,
            },
            auth_mechanism: var("AUTH_MECHANISM"),
            key_file: var("KEY_FILE"),
            storage_engine: var("STORAGE_ENGINE"),
            no_journal: match var("NO_JOURNAL") {
                Some(value) => parse_bool("NO_JOURNAL", &value)?,
                None => defaults.no_journal,
            },
            transaction_lifetime_limit_seconds: match var("TRANSACTION_LIFETIME_LIMIT_SECONDS") {
                Some(value) => Some(value.trim().parse().map_err(|_| {
                    OrchestratorError::config(format!(
                        "{ENV_PREFIX}TRANSACTION_LIFETIME_LIMIT_SECONDS must be a number, got '{value}'"
                    ))
                })?),
                None => None,
            },
            network_message_compressors: var("NETWORK_MESSAGE_COMPRESSORS"),
            set_parameters: match var("SET_PARAMETERS") {
                Some(json) => parse_map("SET_PARAMETERS", &json)?,
                None => BTreeMap::new(),
            },
            set_parameters_router: match var("SET_PARAMETERS_ROUTER") {
                Some(json) => parse_map("SET_PARAMETERS_ROUTER", &json)?,
                None => BTreeMap::new(),
            },
            router_bin_version: var("ROUTER_BIN_VERSION"),
        })
    }

    /// Append run-wide flags to `argv`, skipping any the caller already set
    ///
    /// `version` is the `(major, minor)` of a non-default binary; gated flags
    /// are only added for versions that understand them.
    pub fn apply(&self, mut argv: Vec<String>, kind: ProcessKind, version: Option<(u64, u64)>) -> Vec<String> {
        let at_least = |major: u64, minor: u64| version.map_or(true, |v| v >= (major, minor));

        if self.enable_test_commands {
            push_set_parameter(&mut argv, "enableTestCommands", "1");
        }
        if let Some(mechanism) = self.auth_mechanism.as_deref().filter(|m| *m != "SCRAM-SHA-1") {
            push_set_parameter(&mut argv, "authenticationMechanisms", mechanism);
        }
        if self.auth {
            push_set_parameter(&mut argv, "enableLocalhostAuthBypass", "false");
        }
        if at_least(3, 5) {
            push_set_parameter(&mut argv, "disableLogicalSessionCacheRefresh", "true");
        }
        if let Some(key_file) = &self.key_file {
            push_flag(&mut argv, "keyFile", key_file);
        }
        if let Some(compressors) = &self.network_message_compressors {
            push_flag(&mut argv, "networkMessageCompressors", compressors);
        }

        match kind {
            ProcessKind::Router => {
                for (name, value) in &self.set_parameters_router {
                    push_set_parameter(&mut argv, name, &value.to_string());
                }
            }
            ProcessKind::Database => {
                if let Some(engine) = &self.storage_engine {
                    if at_least(3, 0) {
                        push_flag(&mut argv, "storageEngine", engine);
                    }
                }
                if let Some(limit) = self.transaction_lifetime_limit_seconds {
                    if at_least(4, 0) {
                        push_set_parameter(&mut argv, "transactionLifetimeLimitSeconds", &limit.to_string());
                    }
                }
                if at_least(3, 5) {
                    push_set_parameter(&mut argv, "orphanCleanupDelaySecs", "1");
                }
                if self.no_journal
                    && !has_flag(&argv, "nojournal")
                    && !has_flag(&argv, "journal")
                    && !has_flag(&argv, "configsvr")
                {
                    argv.push("--nojournal".to_string());
                }
                for (name, value) in &self.set_parameters {
                    push_set_parameter(&mut argv, name, &value.to_string());
                }
            }
        }

        argv
    }
}

fn push_set_parameter(argv: &mut Vec<String>, name: &str, value: &str) {
    if !has_set_parameter(argv, name) {
        argv.push("--setParameter".to_string());
        argv.push(format!("{name}={value}"));
    }
}

fn push_flag(argv: &mut Vec<String>, flag: &str, value: &str) {
    if !has_flag(argv, flag) {
        argv.push(format!("--{flag}"));
        argv.push(value.to_string());
    }
}

fn parse_bool(name: &str, value: &str) -> OrchestratorResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(OrchestratorError::config(format!(
            "{ENV_PREFIX}{name} must be a boolean, got '{value}'"
        ))),
    }
}

fn parse_map(name: &str, json: &str) -> OrchestratorResult<BTreeMap<String, OptionValue>> {
    serde_json::from_str(json).map_err(|e| {
        OrchestratorError::config(format!("{ENV_PREFIX}{name} must be a JSON object: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_lookup() {
        let options = TestOptions::from_lookup(lookup(&[
            ("HARNESS_AUTH", "true"),
            ("HARNESS_STORAGE_ENGINE", "wiredTiger"),
            ("HARNESS_ENABLE_TEST_COMMANDS", "0"),
            ("HARNESS_SET_PARAMETERS", r#"{"logLevel": 2}"#),
            ("HARNESS_KEY_FILE", ""),
        ]))
        .unwrap();

        assert!(options.auth);
        assert!(!options.enable_test_commands);
        assert_eq!(options.storage_engine.as_deref(), Some("wiredTiger"));
        assert_eq!(options.set_parameters["logLevel"], OptionValue::Int(2));
        assert_eq!(options.key_file, None);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        assert!(TestOptions::from_lookup(lookup(&[("HARNESS_AUTH", "maybe")])).is_err());
        assert!(TestOptions::from_lookup(lookup(&[("HARNESS_SET_PARAMETERS", "[1]")])).is_err());
    }

    #[test]
    fn test_apply_does_not_duplicate() {
        let options = TestOptions {
            storage_engine: Some("wiredTiger".to_string()),
            no_journal: true,
            ..TestOptions::default()
        };
        let base = argv(&[
            "mongod",
            "--port",
            "20000",
            "--storageEngine",
            "inMemory",
            "--setParameter",
            "orphanCleanupDelaySecs=30",
        ]);

        let out = options.apply(base, ProcessKind::Database, None);
        assert_eq!(out.iter().filter(|a| *a == "--storageEngine").count(), 1);
        assert!(out.contains(&"inMemory".to_string()));
        assert!(!out.contains(&"orphanCleanupDelaySecs=1".to_string()));
        assert!(out.contains(&"enableTestCommands=1".to_string()));
        assert!(out.contains(&"--nojournal".to_string()));
    }

    #[test]
    fn test_apply_version_gates() {
        let options = TestOptions {
            transaction_lifetime_limit_seconds: Some(30),
            ..TestOptions::default()
        };

        let old = options.apply(argv(&["mongod-3.4"]), ProcessKind::Database, Some((3, 4)));
        assert!(!old.contains(&"disableLogicalSessionCacheRefresh=true".to_string()));
        assert!(!old.contains(&"transactionLifetimeLimitSeconds=30".to_string()));

        let new = options.apply(argv(&["mongod"]), ProcessKind::Database, None);
        assert!(new.contains(&"transactionLifetimeLimitSeconds=30".to_string()));

        let router = options.apply(argv(&["mongos"]), ProcessKind::Router, None);
        assert!(!router.contains(&"orphanCleanupDelaySecs=1".to_string()));
        assert!(router.contains(&"disableLogicalSessionCacheRefresh=true".to_string()));
    }
}
