use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use crate::error::{Error, Result};

/// Read-only version-control queries needed for scope detection.
pub trait VcsQuery {
    /// `git diff --name-only <range>` where `range` is a single revision
    /// expression (`a...b`, `a..b`) or a pair of revisions.
    fn diff_name_only(&self, revs: &[&str]) -> Result<String>;

    /// `git merge-base <a> <b>`
    fn merge_base(&self, a: &str, b: &str) -> Result<String>;

    /// Whether `rev` resolves to a commit.
    fn rev_exists(&self, rev: &str) -> bool;

    /// Parent hashes of `rev`.
    fn parents(&self, rev: &str) -> Result<Vec<String>>;

    /// Files touched by a merge commit relative to its first parent.
    fn merge_commit_files(&self, rev: &str) -> Result<String>;
}

/// `VcsQuery` backed by the `git` CLI in a working tree.
pub struct GitCli {
    repo_root: PathBuf,
}

impl GitCli {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        debug!(?args, "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .map_err(|e| Error::Git(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl VcsQuery for GitCli {
    fn diff_name_only(&self, revs: &[&str]) -> Result<String> {
        let mut args = vec!["diff", "--name-only"];
        args.extend_from_slice(revs);
        self.run(&args)
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<String> {
        let out = self.run(&["merge-base", a, b])?;
        let hash = out.trim();
        if hash.is_empty() {
            return Err(Error::Git(format!("no merge base between {a} and {b}")));
        }
        Ok(hash.to_string())
    }

    fn rev_exists(&self, rev: &str) -> bool {
        let spec = format!("{rev}^{{commit}}");
        self.run(&["rev-parse", "--verify", "--quiet", &spec]).is_ok()
    }

    fn parents(&self, rev: &str) -> Result<Vec<String>> {
        let out = self.run(&["show", "--format=%P", "-s", rev])?;
        Ok(out.split_whitespace().map(str::to_string).collect())
    }

    fn merge_commit_files(&self, rev: &str) -> Result<String> {
        self.run(&[
            "diff-tree",
            "--no-commit-id",
            "--name-only",
            "-r",
            "-m",
            "--first-parent",
            rev,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_in_non_git_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitCli::new(dir.path());
        let err = git.diff_name_only(&["HEAD~1", "HEAD"]).unwrap_err();
        assert!(err.to_string().contains("git diff --name-only HEAD~1 HEAD failed"));
    }

    #[test]
    fn rev_exists_false_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!GitCli::new(dir.path()).rev_exists("HEAD"));
    }
}
