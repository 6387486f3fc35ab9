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

//! From a parsed diff and the coverage store, computes the set of tests
//! the runner should be asked to execute.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use log::warn;

use crate::config::InterestPredicate;
use crate::diff::{DiffLine, LineAction, Patch, DEV_NULL};
use crate::error::{CovselError, CovselResult};
use crate::store::CoverageStore;

/// `file -> changed new-side line numbers`, accumulated while selecting.
pub type DiffMap = BTreeMap<String, BTreeSet<u32>>;

pub struct SelectionResult {
    pub diff_lines: DiffMap,
    pub pending_tests: HashSet<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WantTest {
    Yes,
    Unknown,
    No,
}

fn strip_ab_prefix(path: &str) -> String {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
        .to_owned()
}

fn is_kept_line(line: &DiffLine) -> Option<u32> {
    match line.action {
        LineAction::Add | LineAction::Unmod => line.new_lineno,
        LineAction::Del => None,
    }
}

/// Filters and accumulates a parsed diff into a diff map, independent of
/// the coverage store: this is the part both `discover` and `report` need
/// (report has to know which lines are part of the diff even when no
/// test selection happens at all). Deletions and header-only patches
/// contribute nothing. Returns the diff map plus the subset of its files
/// that are brand new, since those are later exempt from the coverage
/// lookup.
pub fn accumulate_diff_lines(patch: &Patch, interest: &InterestPredicate) -> (DiffMap, HashSet<String>) {
    let mut diff_lines: DiffMap = BTreeMap::new();
    let mut new_files: HashSet<String> = HashSet::new();

    for file_patch in patch {
        if file_patch.is_header {
            continue;
        }
        let Some(new_path) = file_patch.new_path.as_deref() else {
            continue;
        };
        if new_path == DEV_NULL {
            continue;
        }

        let is_new_file = file_patch.old_path.as_deref() == Some(DEV_NULL);
        let file = strip_ab_prefix(new_path);

        if !interest.is_interesting(Path::new(&file)) {
            continue;
        }

        let entry = diff_lines.entry(file.clone()).or_default();
        for chunk in &file_patch.chunks {
            for line in &chunk.lines {
                if let Some(n) = is_kept_line(line) {
                    entry.insert(n);
                }
            }
        }

        if is_new_file {
            new_files.insert(file);
        }
    }

    (diff_lines, new_files)
}

/// The coverage-lookup half of selection: strictly a `discover`-mode
/// concern, never run for a `report`-only pass, since it can fail the
/// whole run (`MissingCoverage`) over files report mode would happily
/// just mark as uncovered.
pub fn lookup_pending_tests(
    store: &CoverageStore,
    revision_id: i64,
    diff_lines: &DiffMap,
    new_files: &HashSet<String>,
    skip_missing: bool,
) -> CovselResult<HashSet<String>> {
    let mut pending_tests = HashSet::new();
    for (file, lines) in diff_lines {
        if new_files.contains(file) {
            continue;
        }

        let tests = store.get_coverage(revision_id, file, lines)?;
        if !tests.is_empty() {
            pending_tests.extend(tests);
        } else if !store.has_coverage(revision_id, file)? {
            if skip_missing {
                warn!("{file:?} has no recorded coverage; skipping (skip_missing=true)");
            } else {
                return Err(CovselError::MissingCoverage(PathBuf::from(file)));
            }
        }
    }
    Ok(pending_tests)
}

/// Runs the full filter/accumulate/lookup procedure against an already
/// parsed diff. Equivalent to calling [`accumulate_diff_lines`] followed
/// by [`lookup_pending_tests`]; callers that need the `discover`/`report`
/// gating distinction should call those two directly instead.
pub fn select(
    store: &CoverageStore,
    revision_id: i64,
    patch: &Patch,
    interest: &InterestPredicate,
    skip_missing: bool,
) -> CovselResult<SelectionResult> {
    let (diff_lines, new_files) = accumulate_diff_lines(patch, interest);
    let pending_tests = lookup_pending_tests(store, revision_id, &diff_lines, &new_files, skip_missing)?;
    Ok(SelectionResult {
        diff_lines,
        pending_tests,
    })
}

impl SelectionResult {
    /// The `wantTest(name)` capability the runner consults per test.
    /// A `test_missing` hit also enrolls `name` into `pending_tests`, so
    /// its coverage still gets recorded even though it wasn't selected by
    /// a diff match.
    pub fn want_test(
        &mut self,
        store: &CoverageStore,
        revision_id: i64,
        test_missing: bool,
        name: &str,
    ) -> CovselResult<WantTest> {
        if self.pending_tests.contains(name) {
            return Ok(WantTest::Yes);
        }

        if test_missing && !store.has_test(revision_id, name)? {
            self.pending_tests.insert(name.to_owned());
            return Ok(WantTest::Unknown);
        }

        Ok(WantTest::No)
    }
}
