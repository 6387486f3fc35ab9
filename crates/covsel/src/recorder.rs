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

//! Ties a [`Tracer`] to the [`CoverageStore`] across one test's lifetime.
//!
//! `before_test`/`after_test` bracket exactly one test; everything that
//! touches the store inside `after_test` happens within a single
//! transaction (delegated to [`CoverageStore::record`]), so a test that
//! panics mid-trace never leaves a half-written row behind. A test that
//! executed nothing still runs the same path: recording empty data clears
//! whatever coverage that test had at a previous revision.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::Config;
use crate::error::CovselResult;
use crate::selection::DiffMap;
use crate::store::CoverageStore;
use crate::tracer::Tracer;

pub struct CoverageRecorder<'a> {
    store: &'a mut CoverageStore,
    revision_id: i64,
    record: bool,
    report: bool,
    max_distance: u32,
}

impl<'a> CoverageRecorder<'a> {
    pub fn new(store: &'a mut CoverageStore, revision_id: i64, config: &Config) -> Self {
        CoverageRecorder {
            store,
            revision_id,
            record: config.record,
            report: config.report,
            max_distance: config.max_distance,
        }
    }

    pub fn before_test(&self, tracer: &mut Tracer) {
        tracer.start();
    }

    /// Stops `tracer`, then, depending on the active mode:
    /// - `record`: replaces `test_name`'s stored coverage with what was
    ///   just traced.
    /// - `report`: intersects what was traced against `diff_lines`,
    ///   returning the file/line pairs newly explained by this test so the
    ///   caller can fold them into a running report accumulator.
    pub fn after_test(
        &mut self,
        tracer: &mut Tracer,
        test_name: &str,
        diff_lines: &DiffMap,
    ) -> CovselResult<BTreeMap<String, BTreeSet<u32>>> {
        let executed = tracer.stop();

        if self.record {
            let data: BTreeMap<String, BTreeMap<u32, u32>> = executed
                .iter()
                .map(|(file, lines)| (file.clone(), lines.clone()))
                .collect();
            self.store
                .record(self.revision_id, test_name, &data, self.max_distance)?;
        }

        let mut newly_covered = BTreeMap::new();
        if self.report {
            for (file, lines) in &executed {
                let Some(diff_set) = diff_lines.get(file) else {
                    continue;
                };
                let hit: BTreeSet<u32> = lines
                    .keys()
                    .copied()
                    .filter(|line| diff_set.contains(line))
                    .collect();
                if !hit.is_empty() {
                    newly_covered.insert(file.clone(), hit);
                }
            }
        }

        Ok(newly_covered)
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
    fn record_mode_persists_and_report_mode_intersects() {
        let mut store = CoverageStore::open_in_memory().unwrap();
        let rev = store.add_revision("r1", 0).unwrap();

        let mut config = Config::default();
        config.record = true;
        config.report = true;

        let diff_lines = diff_map(&[("lib.src", &[5, 6])]);

        let mut tracer = Tracer::new();
        let mut recorder = CoverageRecorder::new(&mut store, rev, &config);
        recorder.before_test(&mut tracer);
        tracer.on_line("lib.src", 5).unwrap();
        tracer.on_line("lib.src", 99).unwrap();
        let covered = recorder
            .after_test(&mut tracer, "t1", &diff_lines)
            .unwrap();

        assert_eq!(covered.get("lib.src"), Some(&BTreeSet::from([5])));
        assert!(store.has_test(rev, "t1").unwrap());
    }

    #[test]
    fn empty_trace_clears_stale_coverage() {
        let mut store = CoverageStore::open_in_memory().unwrap();
        let rev = store.add_revision("r1", 0).unwrap();
        let mut data = BTreeMap::new();
        data.insert("lib.src".to_owned(), BTreeMap::from([(5, 0)]));
        store.record(rev, "t1", &data, 4).unwrap();

        let mut config = Config::default();
        config.record = true;

        let diff_lines = DiffMap::new();
        let mut tracer = Tracer::new();
        let mut recorder = CoverageRecorder::new(&mut store, rev, &config);
        recorder.before_test(&mut tracer);
        let _covered = recorder
            .after_test(&mut tracer, "t1", &diff_lines)
            .unwrap();

        let lines: BTreeSet<u32> = [5].into_iter().collect();
        assert!(store.get_coverage(rev, "lib.src", &lines).unwrap().is_empty());
    }

    #[test]
    fn report_only_mode_never_writes_to_the_store() {
        let mut store = CoverageStore::open_in_memory().unwrap();
        let rev = store.add_revision("r1", 0).unwrap();

        let mut config = Config::default();
        config.record = false;
        config.report = true;

        let diff_lines = diff_map(&[("lib.src", &[5])]);
        let mut tracer = Tracer::new();
        let mut recorder = CoverageRecorder::new(&mut store, rev, &config);
        recorder.before_test(&mut tracer);
        tracer.on_line("lib.src", 5).unwrap();
        recorder
            .after_test(&mut tracer, "t1", &diff_lines)
            .unwrap();

        assert!(!store.has_test(rev, "t1").unwrap());
    }
}
