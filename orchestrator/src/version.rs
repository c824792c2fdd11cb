//! Binary version aliases and comparison
//!
//! A requested version is either a concrete string (`4.2`, `4.4.1-fade378`) or a
//! symbolic tag resolved through an ordered substitution list, first match wins.

use rand::Rng;
use std::cmp::Ordering;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Tag every empty or absent version request resolves through
pub const LATEST: &str = "latest";
pub const LAST_STABLE: &str = "last-stable";

pub const DEFAULT_LATEST_VERSION: &str = "4.4.0";
pub const DEFAULT_LAST_STABLE_VERSION: &str = "4.2";

/// One `pattern -> version` substitution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSub {
    pub pattern: String,
    pub version: String,
}

impl VersionSub {
    pub fn new<P: Into<String>, V: Into<String>>(pattern: P, version: V) -> Self {
        Self {
            pattern: pattern.into(),
            version: version.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VersionTable {
    latest: String,
    subs: Vec<VersionSub>,
}

impl VersionTable {
    /// Standard table: `latest` and its major line map to `latest_version`,
    /// `last-stable` to `last_stable_version`
    pub fn new(latest_version: &str, last_stable_version: &str) -> OrchestratorResult<Self> {
        let major = major_version(latest_version)?;
        split_version(last_stable_version)?;

        Ok(Self {
            latest: latest_version.to_string(),
            subs: vec![
                VersionSub::new(LATEST, latest_version),
                VersionSub::new(major, latest_version),
                VersionSub::new(LAST_STABLE, last_stable_version),
            ],
        })
    }

    /// Table with a caller-supplied substitution list, evaluated in order
    pub fn with_subs(latest_version: &str, subs: Vec<VersionSub>) -> Self {
        Self {
            latest: latest_version.to_string(),
            subs,
        }
    }

    pub fn latest(&self) -> &str {
        &self.latest
    }

    pub fn subs(&self) -> &[VersionSub] {
        &self.subs
    }

    /// Apply the first matching substitution; unmatched input is returned as is
    pub fn resolve(&self, tag: &str) -> String {
        let tag = tag.trim();
        let tag = if tag.is_empty() { LATEST } else { tag };

        self.subs
            .iter()
            .find(|sub| sub.pattern == tag)
            .map(|sub| sub.version.clone())
            .unwrap_or_else(|| tag.to_string())
    }

    /// True when `tag` names the default binary
    pub fn is_latest(&self, tag: &str) -> bool {
        self.resolve(tag) == self.latest
    }

    /// Compare component-wise up to the shorter of the two versions. A trailing
    /// build suffix (`-githash`) is one more component.
    pub fn compare(&self, a: &str, b: &str) -> OrchestratorResult<Ordering> {
        let left = comparable_components(&self.resolve(a))?;
        let right = comparable_components(&self.resolve(b))?;

        for (x, y) in left.iter().zip(right.iter()) {
            if x == y {
                continue;
            }
            match (x.parse::<u64>(), y.parse::<u64>()) {
                (Ok(nx), Ok(ny)) if nx != ny => return Ok(nx.cmp(&ny)),
                (Ok(_), Ok(_)) => continue,
                _ => {
                    return Err(OrchestratorError::AmbiguousVersionComparison {
                        left: a.to_string(),
                        right: b.to_string(),
                    })
                }
            }
        }

        Ok(Ordering::Equal)
    }

    /// Whether two versions could denote the same binary. Invalid versions are
    /// an error; versions differing only by a build suffix are not the same.
    pub fn are_same(&self, a: &str, b: &str) -> OrchestratorResult<bool> {
        split_version(&self.resolve(a))?;
        split_version(&self.resolve(b))?;

        match self.compare(a, b) {
            Ok(ordering) => Ok(ordering == Ordering::Equal),
            Err(OrchestratorError::AmbiguousVersionComparison { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// `version` is `required` or later. A two-component version counts as the
    /// newest patch of its line.
    pub fn is_at_least(&self, version: &str, required: &str) -> OrchestratorResult<bool> {
        let resolved = self.resolve(version);
        if resolved == self.latest {
            return Ok(true);
        }
        Ok(patch_triple(&resolved)? >= patch_triple(required)?)
    }
}

impl Default for VersionTable {
    fn default() -> Self {
        Self::with_subs(
            DEFAULT_LATEST_VERSION,
            vec![
                VersionSub::new(LATEST, DEFAULT_LATEST_VERSION),
                VersionSub::new("4.4", DEFAULT_LATEST_VERSION),
                VersionSub::new(LAST_STABLE, DEFAULT_LAST_STABLE_VERSION),
            ],
        )
    }
}

/// Dot-separated components; at least two are required
pub fn split_version(version: &str) -> OrchestratorResult<Vec<String>> {
    if version.trim().is_empty() {
        return Err(OrchestratorError::InvalidVersion {
            version: version.to_string(),
            reason: "version strings must not be empty".to_string(),
        });
    }

    let parts: Vec<String> = version.split('.').map(str::to_string).collect();
    if parts.len() < 2 {
        return Err(OrchestratorError::InvalidVersion {
            version: version.to_string(),
            reason: format!("expected at least two components, found {}", parts.len()),
        });
    }
    Ok(parts)
}

/// `3.3.4-fade3783` -> `3.3`
pub fn major_version(version: &str) -> OrchestratorResult<String> {
    Ok(split_version(version)?[..2].join("."))
}

/// `(major, minor)` of a concrete version, used for version-gated flags
pub fn major_minor(version: &str) -> OrchestratorResult<(u64, u64)> {
    let (major, minor, _) = patch_triple(version)?;
    Ok((major, minor))
}

fn comparable_components(version: &str) -> OrchestratorResult<Vec<String>> {
    let mut parts = split_version(version)?;
    if let Some(last) = parts.pop() {
        parts.extend(last.split('-').map(str::to_string));
    }
    Ok(parts)
}

fn patch_triple(version: &str) -> OrchestratorResult<(u64, u64, u64)> {
    let parts = split_version(version)?;
    let number = |index: usize| -> OrchestratorResult<u64> {
        leading_number(&parts[index]).ok_or_else(|| OrchestratorError::InvalidVersion {
            version: version.to_string(),
            reason: format!("component '{}' is not numeric", parts[index]),
        })
    };

    let patch = if parts.len() > 2 { number(2)? } else { u64::MAX };
    Ok((number(0)?, number(1)?, patch))
}

fn leading_number(component: &str) -> Option<u64> {
    let digits: String = component.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Successive versions from a fixed list, wrapping around. Each use advances it.
#[derive(Debug, Clone)]
pub struct VersionCycle {
    versions: Vec<String>,
    position: usize,
}

impl VersionCycle {
    pub fn new(versions: Vec<String>) -> OrchestratorResult<Self> {
        if versions.is_empty() {
            return Err(OrchestratorError::config("version cycle needs at least one version"));
        }
        Ok(Self { versions, position: 0 })
    }

    /// Start at a random position in the list
    pub fn shuffled(versions: Vec<String>) -> OrchestratorResult<Self> {
        let mut cycle = Self::new(versions)?;
        cycle.position = rand::thread_rng().gen_range(0..cycle.versions.len());
        Ok(cycle)
    }

    pub fn current(&self) -> &str {
        &self.versions[self.position]
    }

    pub fn advance(&mut self) {
        self.position = (self.position + 1) % self.versions.len();
    }

    /// Current version, moving the cycle on for the next caller
    pub fn take(&mut self) -> String {
        let version = self.current().to_string();
        self.advance();
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn table() -> VersionTable {
        VersionTable::new("4.4.0", "4.2").unwrap()
    }

    #[test]
    fn test_resolve_substitutions() {
        let versions = table();
        assert_eq!(versions.resolve("latest"), "4.4.0");
        assert_eq!(versions.resolve(""), "4.4.0");
        assert_eq!(versions.resolve("  "), "4.4.0");
        assert_eq!(versions.resolve("4.4"), "4.4.0");
        assert_eq!(versions.resolve("last-stable"), "4.2");
        assert_eq!(versions.resolve("3.6.8"), "3.6.8");
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let versions = table();
        for tag in ["latest", "", "4.4", "last-stable", "4.2", "3.6.8-abc", "nightly"] {
            let once = versions.resolve(tag);
            assert_eq!(versions.resolve(&once), once, "tag {tag}");
        }
    }

    #[test]
    fn test_compare_prefix_overlap() {
        let versions = table();
        assert_eq!(versions.compare("5.0.3", "5.0").unwrap(), Ordering::Equal);
        assert_eq!(versions.compare("5.0", "5.0.3").unwrap(), Ordering::Equal);
        assert_eq!(versions.compare("5.1", "5.0").unwrap(), Ordering::Greater);
        assert_eq!(versions.compare("5.0", "5.1").unwrap(), Ordering::Less);
        assert_eq!(versions.compare("4.2.10", "4.2.9").unwrap(), Ordering::Greater);
        assert_eq!(versions.compare("latest", "last-stable").unwrap(), Ordering::Greater);
        for v in ["4.2", "4.4.0", "3.6.8-fade378", "latest"] {
            assert_eq!(versions.compare(v, v).unwrap(), Ordering::Equal);
        }
    }

    #[test]
    fn test_compare_errors() {
        let versions = table();
        assert_matches!(
            versions.compare("4.2.1-abc", "4.2.1-def"),
            Err(OrchestratorError::AmbiguousVersionComparison { .. })
        );
        assert_matches!(
            versions.compare("4", "4.2"),
            Err(OrchestratorError::InvalidVersion { .. })
        );
    }

    #[test]
    fn test_are_same() {
        let versions = table();
        assert!(versions.are_same("3.2.4", "3.2").unwrap());
        assert!(!versions.are_same("3.2.4", "3.2.3").unwrap());
        assert!(!versions.are_same("4.2.1-abc", "4.2.1-def").unwrap());
        assert!(versions.are_same("latest", "4.4").unwrap());
        assert!(versions.are_same("4.2", "garbage").is_err());
    }

    #[test]
    fn test_is_at_least() {
        let versions = table();
        assert!(versions.is_at_least("latest", "9.9.9").unwrap());
        assert!(versions.is_at_least("3.4", "3.3.12").unwrap());
        assert!(!versions.is_at_least("3.2.1", "3.3.12").unwrap());
        assert!(versions.is_at_least("4.2", "4.1.7").unwrap());
        assert!(!versions.is_at_least("4.0.9", "4.1.7").unwrap());
    }

    #[test]
    fn test_major_version() {
        assert_eq!(major_version("3.3.4-fade3783").unwrap(), "3.3");
        assert_eq!(major_version("3.2").unwrap(), "3.2");
        assert!(major_version("3").is_err());
        assert_eq!(major_minor("4.1.7").unwrap(), (4, 1));
    }

    #[test]
    fn test_version_cycle_wraps() {
        let mut cycle = VersionCycle::new(vec!["4.2".into(), "latest".into()]).unwrap();
        assert_eq!(cycle.take(), "4.2");
        assert_eq!(cycle.take(), "latest");
        assert_eq!(cycle.take(), "4.2");
        assert!(VersionCycle::new(Vec::new()).is_err());

        let shuffled = VersionCycle::shuffled(vec!["4.0".into(), "4.2".into()]).unwrap();
        assert!(["4.0", "4.2"].contains(&shuffled.current()));
    }
}
