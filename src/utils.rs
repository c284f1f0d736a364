//! Utility helpers shared across the tracerobot crate.
//!
//! Path splitting and prefix comparison used by the suite tracker, and the
//! TOML loader used by the configuration layer.

use anyhow::{Context, Result};
use log::error;
use serde::de::DeserializeOwned;
use std::{fs, path::Path};

/// Splits a test location such as `tests/unit/test_io.py` into its path
/// segments.
///
/// Both `/` and `\` are accepted as separators so that locations reported on
/// Windows hosts map onto the same suites. Empty segments and `.` are dropped.
///
/// # Parameters
///
/// - `location`: The file path reported by the runner.
///
/// # Returns
///
/// The segments in order, outermost first.
pub fn split_location(location: &str) -> Vec<String> {
    location
        .split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .map(str::to_string)
        .collect()
}

/// Length of the longest common prefix of two segment sequences.
///
/// Comparison is element-wise and stops at the first mismatch or at the end
/// of the shorter sequence.
pub fn common_prefix_len<'a, A, B>(current: A, target: B) -> usize
where
    A: IntoIterator<Item = &'a str>,
    B: IntoIterator<Item = &'a str>,
{
    current
        .into_iter()
        .zip(target)
        .take_while(|(first, second)| first == second)
        .count()
}

/// Reads a TOML file into an arbitrary struct.
///
/// # Errors
///
/// Returns an error if the file cannot be read or its contents do not
/// deserialize into `T`.
pub fn read_toml_from_file<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: T = match toml::de::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to parse TOML file: {e}");
            return Err(e).with_context(|| format!("Invalid TOML in {}", path.display()));
        }
    };
    Ok(config)
}
