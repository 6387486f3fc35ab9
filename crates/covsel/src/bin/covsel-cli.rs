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

//! A development-only diagnostic front-end over the `covsel` library: no
//! host integration reaches for this at test-run time, but it's what you
//! reach for to inspect a diff, a selection decision, or a stored report
//! by hand.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use covsel::config::{Config, ReportDestination};
use covsel::diff::parse_unified_diff;
use covsel::report::Reporter;
use covsel::store::CoverageStore;
use covsel::{selection, CovselResult};

#[derive(Parser)]
#[command(name = "covsel-cli", about = "diagnostics for the covsel test-selection index")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a unified diff and print the files and chunks it touches.
    ParseDiff { path: PathBuf },
    /// Run selection against a diff and a stored revision, printing the
    /// tests that would be asked to run.
    Select {
        diff: PathBuf,
        #[arg(long)]
        revision: String,
    },
    /// Print the coverage-against-diff report already on file for a
    /// revision (no tests are run; this reflects past `record` runs).
    Report {
        diff: PathBuf,
        #[arg(long)]
        revision: String,
    },
}

fn main_impl() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    let store = CoverageStore::open(&config.sqlite_path())?;

    match cli.command {
        Command::ParseDiff { path } => parse_diff(&path)?,
        Command::Select { diff, revision } => select(&store, &config, &diff, &revision)?,
        Command::Report { diff, revision } => report(&store, &config, &diff, &revision)?,
    }

    Ok(())
}

fn parse_diff(path: &PathBuf) -> CovselResult<()> {
    let text = fs::read_to_string(path)?;
    let patch = parse_unified_diff(&text)?;
    for file_patch in &patch {
        if file_patch.is_header {
            continue;
        }
        println!(
            "{} -> {}",
            file_patch.old_path.as_deref().unwrap_or("?"),
            file_patch.new_path.as_deref().unwrap_or("?")
        );
        for chunk in &file_patch.chunks {
            println!(
                "  @@ -{},{} +{},{} @@",
                chunk.old_start, chunk.old_len, chunk.new_start, chunk.new_len
            );
        }
    }
    Ok(())
}

fn select(store: &CoverageStore, config: &Config, diff: &PathBuf, revision: &str) -> CovselResult<()> {
    let revision_id = store.get_revision_id(revision)?;
    let text = fs::read_to_string(diff)?;
    let patch = parse_unified_diff(&text)?;
    let interest = Config::default_interest_predicate();
    let result = selection::select(store, revision_id, &patch, &interest, config.skip_missing)?;

    if result.pending_tests.is_empty() {
        println!("(no tests selected)");
    }
    for name in &result.pending_tests {
        println!("{name}");
    }
    Ok(())
}

fn report(store: &CoverageStore, config: &Config, diff: &PathBuf, revision: &str) -> CovselResult<()> {
    let revision_id = store.get_revision_id(revision)?;
    let text = fs::read_to_string(diff)?;
    let patch = parse_unified_diff(&text)?;
    let interest = Config::default_interest_predicate();
    let result = selection::select(store, revision_id, &patch, &interest, true)?;

    let mut reporter = Reporter::new(result.diff_lines.clone());
    let mut covered = BTreeMap::new();
    for (file, lines) in &result.diff_lines {
        let tests = store.get_coverage(revision_id, file, lines)?;
        if !tests.is_empty() {
            covered.insert(file.clone(), lines.clone());
        }
    }
    reporter.merge_covered(covered);

    match config.report_destination() {
        ReportDestination::RunnerStream => {
            println!("{}", serde_json::to_string_pretty(&reporter.to_json())?);
        }
        destination => {
            reporter.emit(&destination)?;
        }
    }
    Ok(())
}

fn main() {
    pretty_env_logger::try_init_custom_env("COVSEL_LOG").ok();
    if let Err(err) = main_impl() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
