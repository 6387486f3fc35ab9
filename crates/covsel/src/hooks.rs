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

//! The runner-facing surface: `{wantTest, beforeTest, afterTest, onReport}`,
//! bundled here as a [`Session`] that carries a run through
//! `configured -> began -> (before_test -> after_test)* -> reported ->
//! ended`.
//!
//! A host integration is expected to own one [`Session`] per test run,
//! call [`Session::begin`] once, bracket every test with
//! [`Session::before_test`]/[`Session::after_test`], and finish with
//! [`Session::report`].

use covsel_core::ReportJson;
use log::info;

use crate::config::{Config, InterestPredicate};
use crate::diff::parse_unified_diff;
use crate::error::CovselResult;
use crate::recorder::CoverageRecorder;
use crate::report::Reporter;
use crate::selection::{self, SelectionResult, WantTest};
use crate::store::CoverageStore;
use crate::tracer::Tracer;
use crate::vcs::VcsAdapter;

pub struct Session<V> {
    config: Config,
    store: CoverageStore,
    vcs: V,
    revision_id: i64,
    selection: SelectionResult,
    tracer: Tracer,
    reporter: Reporter,
    tracing_active: bool,
}

impl<V: VcsAdapter> Session<V> {
    /// Resolves the current revision, computes the diff against
    /// `config.parent`'s merge base when either `discover` or `report` is
    /// enabled, and runs selection against it. With neither flag set the
    /// diff is never computed at all, since nothing downstream needs it.
    ///
    /// Uses [`Config::default_interest_predicate`] to decide which touched
    /// files are worth selecting on. Call [`Session::begin_with_interest`]
    /// instead to supply a project-specific one.
    pub fn begin(config: Config, store: CoverageStore, vcs: V) -> CovselResult<Self> {
        Self::begin_with_interest(config, store, vcs, Config::default_interest_predicate())
    }

    /// Same as [`Session::begin`], but lets the caller hand in its own
    /// [`InterestPredicate`] instead of the default source-extension
    /// heuristic.
    pub fn begin_with_interest(
        config: Config,
        mut store: CoverageStore,
        vcs: V,
        interest: InterestPredicate,
    ) -> CovselResult<Self> {
        config.validate()?;

        let (revision_name, commit_time) = vcs.head_revision()?;
        let revision_id = store.add_revision(&revision_name, commit_time)?;
        info!("began session at revision {revision_name:?} (id {revision_id})");

        let selection = if config.discover || config.report {
            let base = vcs.merge_base(&config.parent)?;
            let diff_bytes = vcs.diff(&base)?;
            let diff_text = String::from_utf8_lossy(&diff_bytes);
            let patch = parse_unified_diff(&diff_text)?;
            let (diff_lines, new_files) = selection::accumulate_diff_lines(&patch, &interest);

            // The coverage lookup (and its `MissingCoverage` failure mode)
            // is a `discover`-only concern; a report-only pass just wants
            // the diff map; it still reports 0% rather than aborting.
            let pending_tests = if config.discover {
                selection::lookup_pending_tests(
                    &store,
                    revision_id,
                    &diff_lines,
                    &new_files,
                    config.skip_missing,
                )?
            } else {
                Default::default()
            };

            SelectionResult {
                diff_lines,
                pending_tests,
            }
        } else {
            SelectionResult {
                diff_lines: Default::default(),
                pending_tests: Default::default(),
            }
        };

        let reporter = Reporter::new(selection.diff_lines.clone());

        Ok(Session {
            config,
            store,
            vcs,
            revision_id,
            selection,
            tracer: Tracer::new(),
            reporter,
            tracing_active: false,
        })
    }

    /// Whether `name` should be run this session. Always `Yes` when
    /// `discover` is off, since the runner should fall back to running
    /// everything.
    pub fn want_test(&mut self, name: &str) -> CovselResult<WantTest> {
        if !self.config.discover {
            return Ok(WantTest::Yes);
        }
        self.selection
            .want_test(&self.store, self.revision_id, self.config.test_missing, name)
    }

    pub fn before_test(&mut self, _name: &str) {
        if self.config.record || self.config.report {
            let recorder = CoverageRecorder::new(&mut self.store, self.revision_id, &self.config);
            recorder.before_test(&mut self.tracer);
            self.tracing_active = true;
        }
    }

    /// Feeds one executed-line event to the tracer bracketed by the
    /// current `before_test`/`after_test` pair. Host integrations that
    /// drive their own instrumentation call this (or `tracer_mut`)
    /// directly instead of going through [`Tracer`] themselves.
    pub fn on_line(&mut self, file: &str, line: u32) -> CovselResult<()> {
        self.tracer.on_line(file, line)
    }

    pub fn tracer_mut(&mut self) -> &mut Tracer {
        &mut self.tracer
    }

    pub fn after_test(&mut self, name: &str) -> CovselResult<()> {
        if !self.tracing_active {
            return Ok(());
        }
        self.tracing_active = false;

        let mut recorder = CoverageRecorder::new(&mut self.store, self.revision_id, &self.config);
        let newly_covered =
            recorder.after_test(&mut self.tracer, name, &self.selection.diff_lines)?;
        if self.config.report {
            self.reporter.merge_covered(newly_covered);
        }
        Ok(())
    }

    /// Emits the accumulated report, if `report` is enabled. `None` both
    /// when reporting is disabled and when the destination is a sink
    /// (stdout/stderr/file) that doesn't hand data back.
    pub fn report(&self) -> CovselResult<Option<ReportJson>> {
        if !self.config.report {
            return Ok(None);
        }
        self.reporter.emit(&self.config.report_destination())
    }

    pub fn end(self) -> (Config, CoverageStore, V) {
        (self.config, self.store, self.vcs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeVcs {
        base: String,
        diff: Vec<u8>,
    }

    impl VcsAdapter for FakeVcs {
        fn merge_base(&self, _parent_ref: &str) -> CovselResult<String> {
            Ok(self.base.clone())
        }

        fn head_revision(&self) -> CovselResult<(String, i64)> {
            Ok(("head".to_owned(), 0))
        }

        fn diff(&self, _revision_name: &str) -> CovselResult<Vec<u8>> {
            Ok(self.diff.clone())
        }
    }

    #[test]
    fn discover_off_always_wants_every_test() {
        let vcs = FakeVcs {
            base: "base".to_owned(),
            diff: Vec::new(),
        };
        let mut config = Config::default();
        config.discover = false;
        config.report = false;

        let store = CoverageStore::open_in_memory().unwrap();
        let mut session = Session::begin(config, store, vcs).unwrap();
        assert_eq!(session.want_test("anything").unwrap(), WantTest::Yes);
    }

    #[test]
    fn full_record_then_report_cycle() {
        let diff = b"\
--- a/lib.src
+++ b/lib.src
@@ -1,1 +1,1 @@
-old
+new
"
        .to_vec();
        let vcs = FakeVcs {
            base: "base".to_owned(),
            diff,
        };
        let mut config = Config::default();
        config.discover = false;
        config.record = true;
        config.report = true;
        config.skip_missing = true;

        let store = CoverageStore::open_in_memory().unwrap();
        let mut session = Session::begin(config, store, vcs).unwrap();

        session.before_test("t1");
        session.tracer.on_line("lib.src", 1).unwrap();
        session.after_test("t1").unwrap();

        let report = session.report().unwrap().unwrap();
        assert_eq!(report.stats.covered, 1);
        assert_eq!(report.stats.total, 1);
        assert!(report.missing.is_empty());
    }

    #[test]
    fn custom_interest_predicate_narrows_selection() {
        let diff = b"\
--- a/lib.src
+++ b/lib.src
@@ -1,1 +1,1 @@
-old
+new
--- a/notes.txt
+++ b/notes.txt
@@ -1,1 +1,1 @@
-old
+new
"
        .to_vec();
        let vcs = FakeVcs {
            base: "base".to_owned(),
            diff,
        };
        let mut config = Config::default();
        config.discover = true;
        config.skip_missing = true;

        let store = CoverageStore::open_in_memory().unwrap();
        let interest =
            InterestPredicate::new(|path| path.extension() == Some(std::ffi::OsStr::new("src")));
        let session =
            Session::begin_with_interest(config, store, vcs, interest).unwrap();

        assert!(session.selection.diff_lines.contains_key("lib.src"));
        assert!(!session.selection.diff_lines.contains_key("notes.txt"));
    }
}
