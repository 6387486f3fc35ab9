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

//! The persistent relational index of revisions, tests, and line-test
//! associations, backed by SQLite through `rusqlite`.
//!
//! Reads of `get_coverage`/`has_coverage` are shadowed by a private,
//! per-`(revision, file)` cache; every write that can affect a file
//! drops that file's cache entry rather than trying to patch it in place.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

use lazy_static::lazy_static;
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};

use crate::error::{CovselError, CovselResult};

lazy_static! {
    static ref MIGRATIONS: Migrations<'static> = Migrations::new(vec![M::up(
        "
        CREATE TABLE revisions (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            commit_time INTEGER NOT NULL
        );
        CREATE TABLE tests (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            revision_id INTEGER NOT NULL REFERENCES revisions(id) ON DELETE CASCADE
        );
        CREATE TABLE coverage (
            id INTEGER PRIMARY KEY,
            file TEXT NOT NULL,
            line INTEGER NOT NULL,
            distance INTEGER NOT NULL,
            test_id INTEGER NOT NULL REFERENCES tests(id) ON DELETE CASCADE,
            revision_id INTEGER NOT NULL REFERENCES revisions(id) ON DELETE CASCADE,
            UNIQUE(file, line, test_id)
        );
        CREATE INDEX idx_coverage_test_id ON coverage(test_id);
        CREATE INDEX idx_coverage_revision_id ON coverage(revision_id);
        "
    ),]);
}

type CacheKey = (i64, String);
type CacheEntry = HashMap<u32, HashSet<String>>;

pub struct CoverageStore {
    conn: Connection,
    cache: RefCell<HashMap<CacheKey, CacheEntry>>,
}

impl CoverageStore {
    pub fn open(path: &Path) -> CovselResult<Self> {
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::from_connection(conn).and_then(|mut s| {
            s.upgrade()?;
            Ok(s)
        })
    }

    pub fn open_in_memory() -> CovselResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let mut store = Self::from_connection(conn)?;
        store.upgrade()?;
        Ok(store)
    }

    fn from_connection(conn: Connection) -> CovselResult<Self> {
        Ok(CoverageStore {
            conn,
            cache: RefCell::new(HashMap::new()),
        })
    }

    /// Ensures the schema exists; safe to call on an already-current
    /// database.
    pub fn upgrade(&mut self) -> CovselResult<()> {
        MIGRATIONS.to_latest(&mut self.conn)?;
        Ok(())
    }

    pub fn add_revision(&self, name: &str, commit_time: i64) -> CovselResult<i64> {
        self.conn.execute(
            "INSERT INTO revisions (name, commit_time) VALUES (?1, ?2)
             ON CONFLICT(name) DO NOTHING",
            params![name, commit_time],
        )?;
        self.get_revision_id(name)
    }

    pub fn get_revision_id(&self, name: &str) -> CovselResult<i64> {
        self.conn
            .query_row(
                "SELECT id FROM revisions WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| CovselError::UnknownRevision(name.to_owned()))
    }

    pub fn remove_revision(&self, id: i64) -> CovselResult<()> {
        self.conn
            .execute("DELETE FROM revisions WHERE id = ?1", params![id])?;
        self.cache.borrow_mut().retain(|(rev, _), _| *rev != id);
        Ok(())
    }

    /// Keeps the newest `keep_n` revisions by `commit_time`, removing the
    /// rest (cascading their tests and coverage rows). Returns the count
    /// removed.
    pub fn trim_revisions(&mut self, keep_n: u32) -> CovselResult<usize> {
        let tx = self.conn.transaction()?;
        let stale_ids: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM revisions ORDER BY commit_time DESC LIMIT -1 OFFSET ?1",
            )?;
            stmt.query_map(params![keep_n], |row| row.get(0))?
                .collect::<Result<_, _>>()?
        };
        for id in &stale_ids {
            tx.execute("DELETE FROM revisions WHERE id = ?1", params![id])?;
        }
        tx.commit()?;

        let removed = stale_ids.len();
        if removed > 0 {
            let stale: HashSet<i64> = stale_ids.into_iter().collect();
            self.cache.borrow_mut().retain(|(rev, _), _| !stale.contains(rev));
        }
        Ok(removed)
    }

    pub fn add_test(&self, revision_id: i64, name: &str) -> CovselResult<i64> {
        self.conn.execute(
            "INSERT INTO tests (name, revision_id) VALUES (?1, ?2)",
            params![name, revision_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn remove_test(&self, revision_id: i64, name: &str) -> CovselResult<()> {
        self.conn.execute(
            "DELETE FROM tests WHERE name = ?1 AND revision_id = ?2",
            params![name, revision_id],
        )?;
        self.cache.borrow_mut().retain(|(rev, _), _| *rev != revision_id);
        Ok(())
    }

    pub fn has_test(&self, revision_id: i64, name: &str) -> CovselResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM tests WHERE name = ?1 AND revision_id = ?2",
                params![name, revision_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn add_coverage(
        &self,
        revision_id: i64,
        test_id: i64,
        file: &str,
        lines: &BTreeMap<u32, u32>,
    ) -> CovselResult<()> {
        for (&line, &distance) in lines {
            self.conn.execute(
                "INSERT OR REPLACE INTO coverage (file, line, distance, test_id, revision_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![file, line, distance, test_id, revision_id],
            )?;
        }
        self.cache
            .borrow_mut()
            .remove(&(revision_id, file.to_owned()));
        Ok(())
    }

    pub fn remove_coverage(&self, revision_id: i64, test_id: i64) -> CovselResult<()> {
        self.conn.execute(
            "DELETE FROM coverage WHERE revision_id = ?1 AND test_id = ?2",
            params![revision_id, test_id],
        )?;
        self.cache.borrow_mut().retain(|(rev, _), _| *rev != revision_id);
        Ok(())
    }

    pub fn has_coverage(&self, revision_id: i64, file: &str) -> CovselResult<bool> {
        if let Some(entry) = self.cache.borrow().get(&(revision_id, file.to_owned())) {
            return Ok(!entry.is_empty());
        }

        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM coverage WHERE revision_id = ?1 AND file = ?2 LIMIT 1",
                params![revision_id, file],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_coverage(
        &self,
        revision_id: i64,
        file: &str,
        lines: &BTreeSet<u32>,
    ) -> CovselResult<HashSet<String>> {
        let key = (revision_id, file.to_owned());

        if !self.cache.borrow().contains_key(&key) {
            let mut stmt = self.conn.prepare(
                "SELECT coverage.line, tests.name
                 FROM coverage
                 JOIN tests ON tests.id = coverage.test_id
                 WHERE coverage.revision_id = ?1 AND coverage.file = ?2",
            )?;
            let mut entry: CacheEntry = HashMap::new();
            let rows = stmt.query_map(params![revision_id, file], |row| {
                Ok((row.get::<_, i64>(0)? as u32, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (line, test_name) = row?;
                entry.entry(line).or_default().insert(test_name);
            }
            debug!("populated coverage cache for {file:?} at revision {revision_id}");
            self.cache.borrow_mut().insert(key.clone(), entry);
        }

        let cache = self.cache.borrow();
        let entry = cache.get(&key).expect("just populated");
        let mut result = HashSet::new();
        for line in lines {
            if let Some(tests) = entry.get(line) {
                result.extend(tests.iter().cloned());
            }
        }
        Ok(result)
    }

    /// Replaces `test_name`'s coverage at `revision_id` with `data`
    /// (`file -> {line -> distance}`), keeping only rows whose distance is
    /// below `max_distance`, all inside one transaction.
    pub fn record(
        &mut self,
        revision_id: i64,
        test_name: &str,
        data: &BTreeMap<String, BTreeMap<u32, u32>>,
        max_distance: u32,
    ) -> CovselResult<()> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "DELETE FROM tests WHERE name = ?1 AND revision_id = ?2",
            params![test_name, revision_id],
        )?;
        tx.execute(
            "INSERT INTO tests (name, revision_id) VALUES (?1, ?2)",
            params![test_name, revision_id],
        )?;
        let test_id = tx.last_insert_rowid();

        for (file, lines) in data {
            for (&line, &distance) in lines {
                if distance >= max_distance {
                    continue;
                }
                tx.execute(
                    "INSERT OR REPLACE INTO coverage (file, line, distance, test_id, revision_id)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![file, line, distance, test_id, revision_id],
                )?;
            }
        }

        tx.commit()?;

        let mut cache = self.cache.borrow_mut();
        for file in data.keys() {
            cache.remove(&(revision_id, file.clone()));
        }
        if data.is_empty() {
            warn!("recorded empty coverage for test {test_name:?}; any prior rows were cleared");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linemap(pairs: &[(u32, u32)]) -> BTreeMap<u32, u32> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn record_then_get_coverage_round_trips() {
        let mut store = CoverageStore::open_in_memory().unwrap();
        let rev = store.add_revision("r1", 1000).unwrap();

        let mut data = BTreeMap::new();
        data.insert("lib.src".to_owned(), linemap(&[(5, 0), (6, 1)]));
        store.record(rev, "t1", &data, 4).unwrap();

        let lines: BTreeSet<u32> = [5, 6, 7].into_iter().collect();
        let tests = store.get_coverage(rev, "lib.src", &lines).unwrap();
        assert_eq!(tests, HashSet::from(["t1".to_owned()]));
        assert!(store.has_coverage(rev, "lib.src").unwrap());
    }

    #[test]
    fn record_is_idempotent() {
        let mut store = CoverageStore::open_in_memory().unwrap();
        let rev = store.add_revision("r1", 1000).unwrap();
        let mut data = BTreeMap::new();
        data.insert("lib.src".to_owned(), linemap(&[(1, 0)]));

        store.record(rev, "t1", &data, 4).unwrap();
        store.record(rev, "t1", &data, 4).unwrap();

        let lines: BTreeSet<u32> = [1].into_iter().collect();
        let tests = store.get_coverage(rev, "lib.src", &lines).unwrap();
        assert_eq!(tests.len(), 1);
    }

    #[test]
    fn record_respects_max_distance() {
        let mut store = CoverageStore::open_in_memory().unwrap();
        let rev = store.add_revision("r1", 1000).unwrap();
        let mut data = BTreeMap::new();
        data.insert(
            "lib.src".to_owned(),
            linemap(&[(10, 1), (11, 5), (12, 2)]),
        );

        store.record(rev, "t1", &data, 3).unwrap();

        let lines: BTreeSet<u32> = [10, 11, 12].into_iter().collect();
        let covered = store.get_coverage(rev, "lib.src", &lines).unwrap();
        assert_eq!(covered.len(), 1);
        assert!(store.has_coverage(rev, "lib.src").unwrap());

        // line 11 should not be present at all
        let lines_11: BTreeSet<u32> = [11].into_iter().collect();
        assert!(store.get_coverage(rev, "lib.src", &lines_11).unwrap().is_empty());
    }

    #[test]
    fn get_coverage_unknown_file_is_empty_and_cached() {
        let store = CoverageStore::open_in_memory().unwrap();
        let rev = store.add_revision("r1", 1000).unwrap();
        let lines: BTreeSet<u32> = [1, 2].into_iter().collect();
        assert!(store.get_coverage(rev, "nope.src", &lines).unwrap().is_empty());
        assert!(!store.has_coverage(rev, "nope.src").unwrap());
        // second call should hit the cache and still agree
        assert!(store.get_coverage(rev, "nope.src", &lines).unwrap().is_empty());
    }

    #[test]
    fn unknown_revision_name_errors() {
        let store = CoverageStore::open_in_memory().unwrap();
        let err = store.get_revision_id("nope").unwrap_err();
        assert!(matches!(err, CovselError::UnknownRevision(_)));
    }

    #[test]
    fn remove_revision_cascades() {
        let mut store = CoverageStore::open_in_memory().unwrap();
        let rev = store.add_revision("r1", 1000).unwrap();
        let mut data = BTreeMap::new();
        data.insert("lib.src".to_owned(), linemap(&[(1, 0)]));
        store.record(rev, "t1", &data, 4).unwrap();

        store.remove_revision(rev).unwrap();

        assert!(store.get_revision_id("r1").is_err());
        assert!(!store.has_test(rev, "t1").unwrap());
    }

    #[test]
    fn remove_test_invalidates_cache() {
        let mut store = CoverageStore::open_in_memory().unwrap();
        let rev = store.add_revision("r1", 1000).unwrap();
        let mut data = BTreeMap::new();
        data.insert("lib.src".to_owned(), linemap(&[(5, 0)]));
        store.record(rev, "t1", &data, 4).unwrap();

        let lines: BTreeSet<u32> = [5].into_iter().collect();
        // populate the cache
        assert_eq!(
            store.get_coverage(rev, "lib.src", &lines).unwrap(),
            HashSet::from(["t1".to_owned()])
        );

        store.remove_test(rev, "t1").unwrap();

        assert!(store.get_coverage(rev, "lib.src", &lines).unwrap().is_empty());
    }
}
