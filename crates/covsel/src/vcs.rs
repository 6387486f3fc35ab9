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

//! The contract a version-control backend must satisfy, plus a `git2`
//! backed reference implementation.
//!
//! Implementations are opaque beyond this contract: other host
//! integrations are expected to shell out to a different VCS's CLI
//! instead, which is why the trait only talks in revision names and raw
//! diff bytes.

use std::path::Path;

use crate::error::{CovselError, CovselResult};

pub trait VcsAdapter {
    /// The common ancestor of `HEAD` and `parent_ref`.
    fn merge_base(&self, parent_ref: &str) -> CovselResult<String>;

    /// The current revision's name and commit time (unix seconds).
    fn head_revision(&self) -> CovselResult<(String, i64)>;

    /// A unified diff from `revision_name` to the working tree.
    fn diff(&self, revision_name: &str) -> CovselResult<Vec<u8>>;
}

pub struct GitVcsAdapter {
    repo: git2::Repository,
}

impl GitVcsAdapter {
    pub fn open(path: &Path) -> CovselResult<Self> {
        let repo = git2::Repository::open(path).map_err(git_failure)?;
        Ok(GitVcsAdapter { repo })
    }

    pub fn open_from_env() -> CovselResult<Self> {
        let repo = git2::Repository::open_from_env().map_err(git_failure)?;
        Ok(GitVcsAdapter { repo })
    }
}

impl VcsAdapter for GitVcsAdapter {
    fn merge_base(&self, parent_ref: &str) -> CovselResult<String> {
        let head_oid = self.repo.head().map_err(git_failure)?.target().ok_or_else(|| {
            CovselError::VcsFailure("HEAD does not point at a direct reference".to_owned())
        })?;
        let parent_oid = self
            .repo
            .revparse_single(parent_ref)
            .map_err(git_failure)?
            .id();
        let base = self.repo.merge_base(head_oid, parent_oid).map_err(git_failure)?;
        Ok(base.to_string())
    }

    fn head_revision(&self) -> CovselResult<(String, i64)> {
        let commit = self.repo.head().map_err(git_failure)?.peel_to_commit().map_err(git_failure)?;
        Ok((commit.id().to_string(), commit.time().seconds()))
    }

    fn diff(&self, revision_name: &str) -> CovselResult<Vec<u8>> {
        let tree = self
            .repo
            .revparse_single(revision_name)
            .map_err(git_failure)?
            .peel_to_tree()
            .map_err(git_failure)?;

        let mut diff_options = git2::DiffOptions::new();
        diff_options.context_lines(3);

        let diff = self
            .repo
            .diff_tree_to_workdir_with_index(Some(&tree), Some(&mut diff_options))
            .map_err(git_failure)?;

        let mut buf = Vec::new();
        diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
            match line.origin() {
                '+' | '-' | ' ' => buf.push(line.origin() as u8),
                _ => {}
            }
            buf.extend_from_slice(line.content());
            true
        })
        .map_err(git_failure)?;

        Ok(buf)
    }
}

fn git_failure(e: git2::Error) -> CovselError {
    CovselError::VcsFailure(e.message().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn commit_file(repo: &git2::Repository, content: &str, message: &str) -> git2::Oid {
        fs::write(repo.workdir().unwrap().join("lib.rs"), content).unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new("lib.rs")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

        let sig = git2::Signature::now("covsel tests", "tests@covsel.invalid").unwrap();
        let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }

    #[test]
    fn git_adapter_resolves_merge_base_head_and_diff() {
        let dir = tempfile::tempdir().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();

        let initial = commit_file(&repo, "fn main() {}\n", "initial");
        repo.reference("refs/heads/parent", initial, false, "parent branch")
            .unwrap();
        let head = commit_file(&repo, "fn main() { println!(\"hi\"); }\n", "second");

        let adapter = GitVcsAdapter::open(dir.path()).unwrap();

        let (head_name, _commit_time) = adapter.head_revision().unwrap();
        assert_eq!(head_name, head.to_string());

        let base = adapter.merge_base("parent").unwrap();
        assert_eq!(base, initial.to_string());

        let diff = adapter.diff(&base).unwrap();
        let diff_text = String::from_utf8(diff).unwrap();
        assert!(diff_text.contains("lib.rs"));
        assert!(diff_text.contains("println"));
    }
}
