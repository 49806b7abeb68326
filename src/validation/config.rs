//! Check selection loaded from YAML
//!
//! ```yaml
//! checks:
//!   doNotAutoAddDefaults: false
//!   addAllBuiltIn: false
//!   include: [latest-tag]
//!   exclude: [run-as-non-root]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::checks::{self, CheckSpec, BUILT_IN_CHECKS};
use crate::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksConfig {
    #[serde(default)]
    pub checks: CheckSelection,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSelection {
    /// Start from an empty set instead of the default checks
    #[serde(default)]
    pub do_not_auto_add_defaults: bool,
    /// Start from every built-in check
    #[serde(default)]
    pub add_all_built_in: bool,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl ChecksConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Loads the file at `path`, or the default selection when no path is
    /// given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&raw)?;
        info!("Loaded check configuration from {}", path.display());
        Ok(config)
    }

    /// The enabled checks, in built-in order.
    ///
    /// Unknown names in `include` or `exclude` are rejected, as is a
    /// selection that leaves nothing enabled.
    pub fn resolve(&self) -> Result<Vec<&'static CheckSpec>> {
        let selection = &self.checks;
        for name in selection.include.iter().chain(&selection.exclude) {
            if checks::find(name).is_none() {
                return Err(Error::ConfigError(format!("Unknown check \"{}\"", name)));
            }
        }

        let enabled: Vec<&'static CheckSpec> = BUILT_IN_CHECKS
            .iter()
            .filter(|check| {
                let base = selection.add_all_built_in
                    || (!selection.do_not_auto_add_defaults && check.default_enabled);
                let included = selection.include.iter().any(|n| n == check.name);
                let excluded = selection.exclude.iter().any(|n| n == check.name);
                (base || included) && !excluded
            })
            .collect();

        if enabled.is_empty() {
            return Err(Error::ConfigError(
                "Check configuration enables no checks".to_string(),
            ));
        }
        Ok(enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn names(checks: &[&CheckSpec]) -> Vec<&'static str> {
        checks.iter().map(|c| c.name).collect()
    }

    #[test]
    fn test_default_selection() {
        let enabled = ChecksConfig::default().resolve().unwrap();
        assert_eq!(enabled.len(), 10);
        assert!(!names(&enabled).contains(&"latest-tag"));
    }

    #[test]
    fn test_include_and_exclude() {
        let config = ChecksConfig::from_yaml(
            r#"
checks:
  include: [latest-tag]
  exclude: [run-as-non-root]
"#,
        )
        .unwrap();
        let enabled = names(&config.resolve().unwrap());
        assert!(enabled.contains(&"latest-tag"));
        assert!(!enabled.contains(&"run-as-non-root"));
        assert!(enabled.contains(&"host-pid"));
    }

    #[test]
    fn test_only_included() {
        let config = ChecksConfig::from_yaml(
            r#"
checks:
  doNotAutoAddDefaults: true
  include: [host-network, host-pid]
"#,
        )
        .unwrap();
        assert_eq!(
            names(&config.resolve().unwrap()),
            vec!["host-network", "host-pid"]
        );
    }

    #[test]
    fn test_all_built_in() {
        let config = ChecksConfig::from_yaml("checks:\n  addAllBuiltIn: true\n").unwrap();
        assert_eq!(config.resolve().unwrap().len(), BUILT_IN_CHECKS.len());
    }

    #[test]
    fn test_unknown_check_rejected() {
        let config = ChecksConfig::from_yaml("checks:\n  exclude: [unset-something]\n").unwrap();
        let err = config.resolve().unwrap_err();
        assert!(err.to_string().contains("unset-something"));
    }

    #[test]
    fn test_empty_selection_rejected() {
        let config = ChecksConfig::from_yaml("checks:\n  doNotAutoAddDefaults: true\n").unwrap();
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "checks:\n  include: [minimum-three-replicas]").unwrap();

        let config = ChecksConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.checks.include, vec!["minimum-three-replicas"]);
        assert_eq!(ChecksConfig::load(None).unwrap(), ChecksConfig::default());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ChecksConfig::load(Some(Path::new("/nonexistent/checks.yaml"))).unwrap_err();
        assert_eq!(err.metric_label(), "io");
    }
}
