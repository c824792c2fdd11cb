//! Rendering options into an argument vector and parsing one back

use std::collections::BTreeMap;

use crate::options::{is_logical_key, OptionValue, ProcessOptions};

/// Repeated `-v` flags are capped at this count
pub const MAX_VERBOSITY: u32 = 10;

/// Program name for `version`, suffixed with `-<version>` unless it is the default
pub fn binary_name(program: &str, version: Option<&str>, default_version: &str) -> String {
    match version {
        Some(v) if !v.is_empty() && v != default_version => format!("{program}-{v}"),
        _ => program.to_string(),
    }
}

/// `argv[0]` followed by one `--key [value]` group per non-logical option
pub fn render_args(binary: &str, options: &ProcessOptions) -> Vec<String> {
    let mut argv = vec![binary.to_string()];

    if let Some(level) = options.verbose {
        let level = level.min(MAX_VERBOSITY) as usize;
        if level > 0 {
            argv.push(format!("-{}", "v".repeat(level)));
        }
    }
    if let Some(port) = options.port {
        push_flag(&mut argv, "port", &OptionValue::from(port));
    }
    if let Some(dbpath) = &options.dbpath {
        push_flag(&mut argv, "dbpath", &OptionValue::from(dbpath.as_str()));
    }

    for (key, value) in &options.flags {
        if is_logical_key(key) {
            continue;
        }
        match value {
            OptionValue::Map(entries) => {
                for (name, entry) in entries {
                    if entry.is_null() {
                        continue;
                    }
                    push_flag(&mut argv, key, &OptionValue::Str(format!("{name}={entry}")));
                }
            }
            other => push_flag(&mut argv, key, other),
        }
    }

    argv
}

fn push_flag(argv: &mut Vec<String>, key: &str, value: &OptionValue) {
    if value.is_null() {
        return;
    }
    argv.push(format!("--{key}"));
    let rendered = value.to_string();
    if !rendered.is_empty() {
        argv.push(rendered);
    }
}

/// True when `argv` already carries `--<flag>` (or a `--<flag>=...` form)
pub fn has_flag(argv: &[String], flag: &str) -> bool {
    let long = format!("--{flag}");
    argv.iter()
        .any(|arg| arg == &long || arg.starts_with(&format!("{long}=")))
}

/// True when some `--setParameter` already sets `name`
pub fn has_set_parameter(argv: &[String], name: &str) -> bool {
    let prefix = format!("{name}=");
    argv.windows(2)
        .any(|pair| pair[0] == "--setParameter" && pair[1].starts_with(&prefix))
}

/// Inverse of `render_args`, as far as it goes
///
/// `--key value` and bare `--key` (empty value) are recognised. Repeated
/// `--setParameter name=value` entries collect into a map. A run of `v`
/// letters records the verbosity count under `verbose`.
pub fn parse_command_line(argv: &[String]) -> BTreeMap<String, OptionValue> {
    let mut parsed = BTreeMap::new();
    let mut i = 1;

    while i < argv.len() {
        let arg = &argv[i];
        i += 1;
        if !arg.starts_with('-') {
            continue;
        }

        let name = arg.trim_start_matches('-');
        if !name.is_empty() && name.chars().all(|c| c == 'v') {
            parsed.insert("verbose".to_string(), OptionValue::Int(name.len() as i64));
            continue;
        }

        let (name, inline) = match name.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (name, None),
        };
        let value = match inline {
            Some(value) => value,
            None if i < argv.len() && !argv[i].starts_with('-') => {
                i += 1;
                argv[i - 1].clone()
            }
            None => String::new(),
        };

        if name == "setParameter" {
            if let Some((param, param_value)) = value.split_once('=') {
                let entry = parsed
                    .entry(name.to_string())
                    .or_insert_with(|| OptionValue::Map(BTreeMap::new()));
                if let OptionValue::Map(params) = entry {
                    params.insert(param.to_string(), OptionValue::from(param_value));
                }
                continue;
            }
        }

        parsed.insert(name.to_string(), OptionValue::Str(value));
    }

    parsed
}

/// Port recorded in a parsed command line
pub fn parsed_port(parsed: &BTreeMap<String, OptionValue>) -> Option<u16> {
    match parsed.get("port")? {
        OptionValue::Str(s) => s.parse().ok(),
        OptionValue::Int(i) => u16::try_from(*i).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_binary_name_suffix() {
        assert_eq!(binary_name("mongod", None, "4.4.0"), "mongod");
        assert_eq!(binary_name("mongod", Some("4.4.0"), "4.4.0"), "mongod");
        assert_eq!(binary_name("mongod", Some(""), "4.4.0"), "mongod");
        assert_eq!(binary_name("mongod", Some("4.2"), "4.4.0"), "mongod-4.2");
    }

    #[test]
    fn test_render_special_cases() {
        let options = ProcessOptions::builder()
            .port(20000)
            .verbose(14)
            .dbpath("/data/db/mongod-20000")
            .bare_flag("shardsvr")
            .flag("oplogSize", 10)
            .set_parameter("x", 1)
            .set_parameter("flag", true)
            .no_clean_data()
            .build();

        let argv = render_args("mongod", &options);
        assert_eq!(
            argv,
            strings(&[
                "mongod",
                "-vvvvvvvvvv",
                "--port",
                "20000",
                "--dbpath",
                "/data/db/mongod-20000",
                "--oplogSize",
                "10",
                "--setParameter",
                "flag=true",
                "--setParameter",
                "x=1",
                "--shardsvr",
            ])
        );
    }

    #[test]
    fn test_render_skips_logical_and_null() {
        let mut options = ProcessOptions::builder().port(1).verbose(0).build();
        options.set_flag("arbiter", true);
        options.set_flag("gone", OptionValue::Null);

        assert_eq!(render_args("mongos", &options), strings(&["mongos", "--port", "1"]));
    }

    #[test]
    fn test_parse_command_line() {
        let argv = strings(&[
            "mongod",
            "-vvv",
            "--port",
            "20001",
            "--nojournal",
            "--setParameter",
            "x=2",
            "--setParameter",
            "y=1",
            "--bind_ip=0.0.0.0",
        ]);
        let parsed = parse_command_line(&argv);

        assert_eq!(parsed_port(&parsed), Some(20001));
        assert_eq!(parsed["verbose"], OptionValue::Int(3));
        assert_eq!(parsed["nojournal"], OptionValue::bare());
        assert_eq!(parsed["bind_ip"], OptionValue::from("0.0.0.0"));
        let params = parsed["setParameter"].as_map().unwrap();
        assert_eq!(params["x"], OptionValue::from("2"));
        assert_eq!(params["y"], OptionValue::from("1"));
    }

    #[test]
    fn test_existing_flag_detection() {
        let argv = strings(&["mongod", "--storageEngine", "wiredTiger", "--setParameter", "a=1"]);
        assert!(has_flag(&argv, "storageEngine"));
        assert!(!has_flag(&argv, "keyFile"));
        assert!(has_set_parameter(&argv, "a"));
        assert!(!has_set_parameter(&argv, "ab"));
    }
}
