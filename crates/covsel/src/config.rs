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

//! The flat, closed configuration record every other component is
//! constructed from, plus a `figment`-based loader for the development
//! CLI. Embedding libraries may just build a [`Config`] directly and skip
//! [`Config::load`] entirely.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CovselError, CovselResult};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db: String,
    pub parent: String,
    pub discover: bool,
    pub report: bool,
    pub report_output: String,
    pub record: bool,
    pub skip_missing: bool,
    pub max_distance: u32,
    pub test_missing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db: "sqlite:///coverage.db".to_owned(),
            parent: "origin/master".to_owned(),
            discover: false,
            report: true,
            report_output: "-".to_owned(),
            record: false,
            skip_missing: true,
            max_distance: 4,
            test_missing: true,
        }
    }
}

impl Config {
    /// Merges, in ascending priority: defaults, `covsel.toml` in the
    /// current directory (if present), then `COVSEL_*` environment
    /// variables. CLI flags, if any, are expected to be applied by the
    /// caller on top of the returned value.
    pub fn load() -> CovselResult<Self> {
        use figment::providers::{Env, Format, Toml};
        use figment::Figment;

        let config: Config = Figment::from(figment::providers::Serialized::defaults(
            Config::default(),
        ))
        .merge(Toml::file("covsel.toml"))
        .merge(Env::prefixed("COVSEL_"))
        .extract()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CovselResult<()> {
        if self.record && self.discover {
            return Err(CovselError::ConfigConflict);
        }
        Ok(())
    }

    pub fn sqlite_path(&self) -> PathBuf {
        resolve_sqlite_dsn(&self.db)
    }

    pub fn report_destination(&self) -> ReportDestination {
        match self.report_output.as_str() {
            "-" => ReportDestination::RunnerStream,
            "sys://stdout" => ReportDestination::Stdout,
            "sys://stderr" => ReportDestination::Stderr,
            path => ReportDestination::File(PathBuf::from(path)),
        }
    }

    /// The default interest predicate named in the selection engine's
    /// filtering step: an executable file, or a file with a recognized
    /// source extension.
    pub fn default_interest_predicate() -> InterestPredicate {
        InterestPredicate(Arc::new(covsel_core::is_default_interesting_path))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReportDestination {
    RunnerStream,
    Stdout,
    Stderr,
    File(PathBuf),
}

/// A user-supplied filter over file paths, boxed so the selection engine
/// can be handed either the default or something project-specific.
#[derive(Clone)]
pub struct InterestPredicate(Arc<dyn Fn(&Path) -> bool + Send + Sync>);

impl InterestPredicate {
    pub fn new(f: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        InterestPredicate(Arc::new(f))
    }

    pub fn is_interesting(&self, path: &Path) -> bool {
        (self.0)(path)
    }
}

impl Default for InterestPredicate {
    fn default() -> Self {
        Config::default_interest_predicate()
    }
}

/// Strips a `sqlite:///` (or bare) DSN down to a filesystem path, the way
/// the store's `open` expects.
pub fn resolve_sqlite_dsn(dsn: &str) -> PathBuf {
    dsn.strip_prefix("sqlite:///")
        .map(PathBuf::from)
        .or_else(|| dsn.strip_prefix("sqlite://").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(dsn))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rejects_conflict() {
        let mut config = Config::default();
        config.record = true;
        config.discover = true;
        assert!(matches!(config.validate(), Err(CovselError::ConfigConflict)));
    }

    #[test]
    fn dsn_resolution() {
        assert_eq!(
            resolve_sqlite_dsn("sqlite:///coverage.db"),
            PathBuf::from("coverage.db")
        );
        assert_eq!(
            resolve_sqlite_dsn("/abs/coverage.db"),
            PathBuf::from("/abs/coverage.db")
        );
    }

    #[test]
    fn report_output_variants() {
        let mut config = Config::default();
        assert_eq!(config.report_destination(), ReportDestination::RunnerStream);
        config.report_output = "sys://stdout".to_owned();
        assert_eq!(config.report_destination(), ReportDestination::Stdout);
        config.report_output = "out.json".to_owned();
        assert_eq!(
            config.report_destination(),
            ReportDestination::File(PathBuf::from("out.json"))
        );
    }
}
