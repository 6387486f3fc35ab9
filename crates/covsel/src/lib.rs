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

//! `covsel` turns a unified diff and a SQLite-backed coverage index into a
//! selected set of tests to run, and turns what those tests actually
//! execute back into a coverage-against-diff report.
//!
//! A host test runner drives a [`hooks::Session`] for the lifetime of one
//! run: [`hooks::Session::begin`], then [`hooks::Session::want_test`] /
//! [`hooks::Session::before_test`] / [`hooks::Session::after_test`] per
//! test, then [`hooks::Session::report`].

pub mod config;
pub mod diff;
pub mod error;
pub mod hooks;
pub mod recorder;
pub mod report;
pub mod selection;
pub mod store;
pub mod tracer;
pub mod vcs;

pub use config::Config;
pub use error::{CovselError, CovselResult};
pub use hooks::Session;
pub use store::CoverageStore;
pub use tracer::Tracer;
pub use vcs::{GitVcsAdapter, VcsAdapter};
