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

//! Turns the diff map and the accumulated per-test coverage into a
//! coverage-against-diff report, either as [`covsel_core::ReportJson`] or
//! as the human-readable summary printed by `covsel-cli`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;

use covsel_core::{ReportJson, ReportStats};

use crate::config::ReportDestination;
use crate::error::CovselResult;
use crate::selection::DiffMap;

pub struct Reporter {
    diff_lines: DiffMap,
    covered: BTreeMap<String, BTreeSet<u32>>,
}

impl Reporter {
    pub fn new(diff_lines: DiffMap) -> Self {
        Reporter {
            diff_lines,
            covered: BTreeMap::new(),
        }
    }

    /// Folds in the file/line pairs one test's [`CoverageRecorder::after_test`]
    /// found to be both executed and part of the diff.
    ///
    /// [`CoverageRecorder::after_test`]: crate::recorder::CoverageRecorder::after_test
    pub fn merge_covered(&mut self, newly_covered: BTreeMap<String, BTreeSet<u32>>) {
        for (file, lines) in newly_covered {
            self.covered.entry(file).or_default().extend(lines);
        }
    }

    pub fn stats(&self) -> ReportStats {
        let total: u64 = self.diff_lines.values().map(|lines| lines.len() as u64).sum();
        let covered: u64 = self
            .diff_lines
            .iter()
            .map(|(file, lines)| {
                self.covered
                    .get(file)
                    .map(|hit| lines.intersection(hit).count())
                    .unwrap_or(0) as u64
            })
            .sum();
        ReportStats { covered, total }
    }

    pub fn missing(&self) -> BTreeMap<String, Vec<u32>> {
        let mut missing = BTreeMap::new();
        for (file, lines) in &self.diff_lines {
            let hit = self.covered.get(file);
            let uncovered: Vec<u32> = lines
                .iter()
                .copied()
                .filter(|line| hit.map(|h| !h.contains(line)).unwrap_or(true))
                .collect();
            if !uncovered.is_empty() {
                missing.insert(file.clone(), uncovered);
            }
        }
        missing
    }

    pub fn to_json(&self) -> ReportJson {
        ReportJson {
            stats: self.stats(),
            missing: self.missing(),
        }
    }

    /// Renders the percent-and-missing-lines summary, or `None` when the
    /// diff touched nothing at all: reporting "100%" of a zero-line diff
    /// would be misleading rather than informative.
    pub fn human_readable(&self) -> Option<String> {
        let stats = self.stats();
        if stats.total == 0 {
            return None;
        }
        let pct = 100.0 * stats.covered as f64 / stats.total as f64;

        let mut out = format!(
            "Coverage against diff is {pct:.1}% ({} / {} lines)\n",
            stats.covered, stats.total
        );
        for (file, lines) in self.missing() {
            let rendered = lines
                .iter()
                .map(|l| l.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(out, "  {file}: missing lines {rendered}");
        }
        Some(out)
    }

    /// Sends the report to `destination`. `RunnerStream` hands the caller
    /// back the structured report instead of writing anywhere, since that
    /// destination means "give it to the embedding runner's own protocol".
    /// `Stdout`/`Stderr` print nothing for an empty diff rather than a
    /// misleading 100%.
    pub fn emit(&self, destination: &ReportDestination) -> CovselResult<Option<ReportJson>> {
        match destination {
            ReportDestination::RunnerStream => Ok(Some(self.to_json())),
            ReportDestination::Stdout => {
                if let Some(summary) = self.human_readable() {
                    print!("{summary}");
                }
                Ok(None)
            }
            ReportDestination::Stderr => {
                if let Some(summary) = self.human_readable() {
                    eprint!("{summary}");
                }
                Ok(None)
            }
            ReportDestination::File(path) => {
                let json = serde_json::to_string_pretty(&self.to_json())?;
                fs::write(path, json)?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff_map(entries: &[(&str, &[u32])]) -> DiffMap {
        entries
            .iter()
            .map(|(file, lines)| ((*file).to_owned(), lines.iter().copied().collect()))
            .collect()
    }

    #[test]
    fn stats_and_missing_track_partial_coverage() {
        let mut reporter = Reporter::new(diff_map(&[("lib.src", &[1, 2, 3])]));
        reporter.merge_covered(BTreeMap::from([(
            "lib.src".to_owned(),
            BTreeSet::from([1, 2]),
        )]));

        let stats = reporter.stats();
        assert_eq!(stats.covered, 2);
        assert_eq!(stats.total, 3);
        assert_eq!(
            reporter.missing().get("lib.src"),
            Some(&vec![3])
        );
    }

    #[test]
    fn fully_covered_diff_has_no_missing_entries() {
        let mut reporter = Reporter::new(diff_map(&[("lib.src", &[1])]));
        reporter.merge_covered(BTreeMap::from([(
            "lib.src".to_owned(),
            BTreeSet::from([1]),
        )]));
        assert!(reporter.missing().is_empty());
    }

    #[test]
    fn empty_diff_suppresses_the_summary() {
        let reporter = Reporter::new(DiffMap::new());
        assert!(reporter.human_readable().is_none());
    }

    #[test]
    fn non_empty_diff_still_renders_a_summary() {
        let reporter = Reporter::new(diff_map(&[("lib.src", &[1])]));
        assert!(reporter
            .human_readable()
            .unwrap()
            .starts_with("Coverage against diff is 0.0%"));
    }
}
