//! Settings of the plugin, read from an optional TOML file.
//!
//! ```toml
//! robot_output = "reports/output.xml"
//! failure_style = "line"
//! suite_separator = "/"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::utils;

/// Default path of the Robot Framework output.
pub const DEFAULT_ROBOT_OUTPUT: &str = "output.xml";

/// How captured failures are rendered into report messages.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailureStyle {
    /// `location: Type: message`
    #[default]
    Short,
    /// `Type: message`
    Line,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PluginConfig {
    pub robot_output: PathBuf,
    pub failure_style: FailureStyle,
    /// Joins path segments into suite identities
    pub suite_separator: String,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            robot_output: PathBuf::from(DEFAULT_ROBOT_OUTPUT),
            failure_style: FailureStyle::default(),
            suite_separator: String::from("/"),
        }
    }
}

impl PluginConfig {
    /// 从文件中读取
    pub fn from_file(path: &Path) -> Result<Self> {
        utils::read_toml_from_file(path)
    }

    /// Applies command line overrides on top of the file settings.
    pub fn with_robot_output(mut self, robot_output: Option<&Path>) -> Self {
        if let Some(path) = robot_output {
            self.robot_output = path.to_path_buf();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tracerobot.toml");
        fs::write(&path, "failure_style = \"line\"\n").unwrap();

        let config = PluginConfig::from_file(&path).unwrap();
        assert_eq!(config.failure_style, FailureStyle::Line);
        assert_eq!(config.robot_output, PathBuf::from("output.xml"));
        assert_eq!(config.suite_separator, "/");
    }

    #[test]
    fn test_cli_output_overrides_file() {
        let config = PluginConfig {
            robot_output: PathBuf::from("from_file.xml"),
            ..PluginConfig::default()
        };
        let config = config.with_robot_output(Some(Path::new("cli.xml")));
        assert_eq!(config.robot_output, PathBuf::from("cli.xml"));
        assert_eq!(
            PluginConfig::default().with_robot_output(None).robot_output,
            PathBuf::from(DEFAULT_ROBOT_OUTPUT)
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tracerobot.toml");
        fs::write(&path, "robot_outptu = \"x.xml\"\n").unwrap();
        assert!(PluginConfig::from_file(&path).is_err());
        assert!(PluginConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
