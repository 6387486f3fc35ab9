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

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum CovselError {
    #[error("malformed diff at line {line}: {reason}")]
    MalformedDiff { line: usize, reason: String },
    #[error("unknown revision: {0} (do you need to rebase, or record coverage for it first?)")]
    UnknownRevision(String),
    #[error("missing test coverage for {0:?}")]
    MissingCoverage(PathBuf),
    #[error("vcs command failed: {0}")]
    VcsFailure(String),
    #[error("storage error: {0}")]
    StorageFailure(#[from] rusqlite::Error),
    #[error("migration error: {0}")]
    MigrationFailure(#[from] rusqlite_migration::Error),
    #[error("config conflict: `record` and `discover` may not both be true in one run")]
    ConfigConflict,
    #[error("failed to load configuration: {0}")]
    ConfigLoad(#[from] figment::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("tracer is idle; cannot record a line event")]
    TracerIdle,
}

pub type CovselResult<T = ()> = Result<T, CovselError>;
