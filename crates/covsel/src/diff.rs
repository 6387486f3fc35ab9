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

//! Turns a unified-diff text buffer into a [`Patch`], a list of
//! [`FilePatch`]es with per-line old/new line numbers.
//!
//! The parser is a small state machine (`HEADER` / `FILE_INTRO` / `CHUNK`)
//! rather than anything exception- or iterator-adapter-driven, so that a
//! malformed chunk header can be reported with the offending line instead
//! of silently truncating the patch.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{CovselError, CovselResult};

lazy_static! {
    static ref CHUNK_HEADER_RE: Regex =
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap();
}

pub const DEV_NULL: &str = "/dev/null";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineAction {
    Unmod,
    Add,
    Del,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffLine {
    pub old_lineno: Option<u32>,
    pub new_lineno: Option<u32>,
    pub action: LineAction,
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Chunk {
    pub old_start: u32,
    pub old_len: u32,
    pub new_start: u32,
    pub new_len: u32,
    pub lines: Vec<DiffLine>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilePatch {
    pub is_header: bool,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub chunks: Vec<Chunk>,
    /// Raw lines, only populated for header-only patches (the optional
    /// preamble, or a header run with no following file intro).
    pub header_lines: Vec<String>,
}

impl FilePatch {
    fn new_header(lines: Vec<String>) -> Self {
        FilePatch {
            is_header: true,
            header_lines: lines,
            ..Default::default()
        }
    }

    fn new_file(old_path: Option<String>, new_path: Option<String>) -> Self {
        FilePatch {
            is_header: false,
            old_path,
            new_path,
            ..Default::default()
        }
    }
}

pub type Patch = Vec<FilePatch>;

/// Extracts the filename (first whitespace-delimited token) from a
/// `--- `/`+++ ` intro line, already stripped of its 4-character prefix.
fn extract_path(rest: &str) -> Option<String> {
    let token = rest.split_whitespace().next()?;
    Some(token.to_owned())
}

struct Lines<'a> {
    lines: Vec<&'a str>,
    idx: usize,
}

impl<'a> Lines<'a> {
    fn new(input: &'a str) -> Self {
        Lines {
            lines: input.lines().collect(),
            idx: 0,
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.idx).copied()
    }

    fn advance(&mut self) {
        self.idx += 1;
    }

    fn line_number(&self) -> usize {
        self.idx + 1
    }
}

pub fn parse_unified_diff(input: &str) -> CovselResult<Patch> {
    let mut lines = Lines::new(input);
    let mut patch = Patch::new();

    loop {
        // HEADER: accumulate until a `--- ` line, or end of input.
        let mut header_buf = Vec::new();
        while let Some(line) = lines.peek() {
            if line.starts_with("--- ") {
                break;
            }
            header_buf.push(line.to_owned());
            lines.advance();
        }

        if lines.peek().is_none() {
            if header_buf.iter().any(|l| !l.trim().is_empty()) {
                patch.push(FilePatch::new_header(header_buf));
            }
            break;
        }

        if header_buf.iter().any(|l| !l.trim().is_empty()) {
            patch.push(FilePatch::new_header(header_buf));
        }

        // FILE_INTRO
        let old_line = lines.peek().expect("checked above");
        lines.advance();
        let Some(new_line) = lines.peek() else {
            // `--- ` with nothing after it: treat as a trailing header.
            patch.push(FilePatch::new_header(vec![old_line.to_owned()]));
            break;
        };
        if !new_line.starts_with("+++ ") {
            // Not a well-formed intro pair; fold both lines back into a
            // header and keep scanning rather than failing the whole run.
            patch.push(FilePatch::new_header(vec![
                old_line.to_owned(),
                new_line.to_owned(),
            ]));
            continue;
        }
        lines.advance();

        let old_path = extract_path(&old_line[4..]);
        let new_path = extract_path(&new_line[4..]);
        patch.push(FilePatch::new_file(old_path, new_path));

        // CHUNK (possibly several, back to back)
        loop {
            let Some(line) = lines.peek() else { break };

            if !line.starts_with("@@") {
                break;
            }

            let Some(caps) = CHUNK_HEADER_RE.captures(line) else {
                return Err(CovselError::MalformedDiff {
                    line: lines.line_number(),
                    reason: format!("invalid chunk header: {line:?}"),
                });
            };

            let old_start: u32 = caps[1].parse().unwrap();
            let old_len: u32 = caps
                .get(2)
                .map(|m| m.as_str().parse().unwrap())
                .unwrap_or(1);
            let new_start: u32 = caps[3].parse().unwrap();
            let new_len: u32 = caps
                .get(4)
                .map(|m| m.as_str().parse().unwrap())
                .unwrap_or(1);

            lines.advance();

            let mut old_cur: i64 = old_start as i64 - 1;
            let mut new_cur: i64 = new_start as i64 - 1;
            let old_end = old_cur + old_len as i64;
            let new_end = new_cur + new_len as i64;

            let mut chunk_lines = Vec::new();

            while old_cur < old_end || new_cur < new_end {
                let Some(body) = lines.peek() else { break };
                lines.advance();

                let (action, text): (LineAction, &str) = match body.chars().next() {
                    Some('+') => (LineAction::Add, &body[1..]),
                    Some('-') => (LineAction::Del, &body[1..]),
                    _ => (LineAction::Unmod, body),
                };

                let (affects_old, affects_new) = match action {
                    LineAction::Add => (false, true),
                    LineAction::Del => (true, false),
                    LineAction::Unmod => (true, true),
                };

                if affects_old {
                    old_cur += 1;
                }
                if affects_new {
                    new_cur += 1;
                }

                chunk_lines.push(DiffLine {
                    old_lineno: affects_old.then_some(old_cur as u32),
                    new_lineno: affects_new.then_some(new_cur as u32),
                    action,
                    text: text.to_owned(),
                });
            }

            patch.last_mut().expect("just pushed a file patch").chunks.push(Chunk {
                old_start,
                old_len,
                new_start,
                new_len,
                lines: chunk_lines,
            });
        }
    }

    Ok(patch)
}
