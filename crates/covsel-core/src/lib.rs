/*
 *        Copyright (c) 2023 Dinu Blanovschi
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        https://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! Types shared between the `covsel` core library and whatever process
//! embeds it as a test-runner hook.

use std::collections::BTreeMap;
use std::path::Path;

/// Identifies a single test as the runner sees it, independent of which
/// revision it last recorded coverage under.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct TestDesc {
    pub name: String,
}

impl TestDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Default extensions considered "source" for the interest predicate
/// described in the selection engine's filtering step.
pub const DEFAULT_SOURCE_EXTENSIONS: &[&str] = &["rs", "py", "js", "ts", "go", "rb"];

/// Default interest predicate: an executable file, or a file whose
/// extension is in [`DEFAULT_SOURCE_EXTENSIONS`].
pub fn is_default_interesting_path(path: &Path) -> bool {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if DEFAULT_SOURCE_EXTENSIONS.contains(&ext) {
            return true;
        }
    }

    is_executable(path)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}

/// The wire shape of the machine-readable report emitted by the reporter.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct ReportJson {
    pub stats: ReportStats,
    /// Only files with a non-empty missing set are present.
    pub missing: BTreeMap<String, Vec<u32>>,
}

#[derive(Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct ReportStats {
    pub covered: u64,
    pub total: u64,
}

/// Names of the nine recognized configuration keys, for config sources
/// that need to know the closed set (e.g. to reject unknown keys).
pub const CONFIG_KEYS: &[&str] = &[
    "db",
    "parent",
    "discover",
    "report",
    "report_output",
    "record",
    "skip_missing",
    "max_distance",
    "test_missing",
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn default_interest_matches_source_extensions() {
        assert!(is_default_interesting_path(&PathBuf::from("src/lib.rs")));
        assert!(is_default_interesting_path(&PathBuf::from("a/b/c.py")));
        assert!(!is_default_interesting_path(&PathBuf::from("README.md")));
    }
}
