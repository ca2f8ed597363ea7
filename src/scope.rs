//! Changed-file scope detection.
//!
//! In `changed` mode the resolver walks an ordered chain of strategies and
//! keeps the first non-empty, sanitized file list. Running out of strategies
//! is not an error: the scope records why and the prompt tells the agent to
//! analyze the current repository state instead.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::fallback::{AttemptOutcome, Strategy, first_success};
use crate::git::VcsQuery;
use crate::github::PullRequestFiles;

pub const FULL_REPOSITORY_DIRECTIVE: &str = "Analyze the entire codebase in this repository.";
pub const NO_CHANGES_DIRECTIVE: &str =
    "No changed files detected. Analyze the current repository state.";
pub const CHANGED_FILES_PREFIX: &str = "Focus ONLY on these files changed in this PR:";

const INSPECTION_NOTE: &str = "\
You may run read-only git commands to inspect the changes, for example:
- git diff --name-only origin/main...HEAD (or HEAD~1 HEAD)
- git diff origin/main...HEAD -- <filename>
- git show --name-only HEAD
Do not modify the working tree.";

static DIAGNOSTIC_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(fatal|warning|error|usage|hint)\s*:").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMode {
    All,
    #[default]
    Changed,
}

impl fmt::Display for ScopeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeMode::All => write!(f, "all"),
            ScopeMode::Changed => write!(f, "changed"),
        }
    }
}

impl FromStr for ScopeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(ScopeMode::All),
            "changed" => Ok(ScopeMode::Changed),
            other => Err(Error::ConfigValidation(format!(
                "unknown scope: {other} (expected: all, changed)"
            ))),
        }
    }
}

/// How much of the repository the agent is asked to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeContext {
    mode: ScopeMode,
    changed_files: Vec<String>,
    narrative: Vec<String>,
}

impl ScopeContext {
    pub fn all() -> Self {
        Self {
            mode: ScopeMode::All,
            changed_files: Vec::new(),
            narrative: vec!["scope=all: change detection skipped".to_string()],
        }
    }

    pub fn changed(changed_files: Vec<String>, narrative: Vec<String>) -> Self {
        Self {
            mode: ScopeMode::Changed,
            changed_files,
            narrative,
        }
    }

    pub fn mode(&self) -> ScopeMode {
        self.mode
    }

    pub fn changed_files(&self) -> &[String] {
        &self.changed_files
    }

    /// Diagnostic trail of the strategies attempted. Never part of the prompt.
    pub fn narrative(&self) -> &[String] {
        &self.narrative
    }

    /// The scope block handed to the prompt composer.
    pub fn directive(&self) -> String {
        match self.mode {
            ScopeMode::All => FULL_REPOSITORY_DIRECTIVE.to_string(),
            ScopeMode::Changed if self.changed_files.is_empty() => {
                format!("{NO_CHANGES_DIRECTIVE}\n\n{INSPECTION_NOTE}")
            }
            ScopeMode::Changed => format!(
                "{CHANGED_FILES_PREFIX} {}\n\n{INSPECTION_NOTE}",
                self.changed_files.join(" ")
            ),
        }
    }
}

/// Ordered change-detection strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeStrategy {
    /// Diff from the detected base branch to `HEAD`.
    BaseDiff,
    /// `HEAD~1..HEAD`, for shallow clones holding a single commit of history.
    PreviousCommit,
    /// The hosting platform's pull request file list.
    PullRequestApi,
    /// Explicit merge-base between base and `HEAD`, for rebased or diverged refs.
    MergeBase,
    /// Files introduced by a merge commit at `HEAD`.
    MergeCommit,
}

impl ScopeStrategy {
    pub const DEFAULT_CHAIN: [ScopeStrategy; 5] = [
        ScopeStrategy::BaseDiff,
        ScopeStrategy::PreviousCommit,
        ScopeStrategy::PullRequestApi,
        ScopeStrategy::MergeBase,
        ScopeStrategy::MergeCommit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeStrategy::BaseDiff => "base-diff",
            ScopeStrategy::PreviousCommit => "previous-commit",
            ScopeStrategy::PullRequestApi => "pull-request-api",
            ScopeStrategy::MergeBase => "merge-base",
            ScopeStrategy::MergeCommit => "merge-commit",
        }
    }
}

impl Strategy for ScopeStrategy {
    fn name(&self) -> String {
        self.as_str().to_string()
    }
}

/// Pull request coordinates for the API strategy.
#[derive(Debug, Clone, Default)]
pub struct PullRequestRef {
    pub repository: Option<String>,
    pub number: Option<u64>,
}

pub struct ScopeResolver<'a> {
    vcs: &'a dyn VcsQuery,
    api: Option<&'a dyn PullRequestFiles>,
    base_branch: String,
    pull_request: PullRequestRef,
    strategies: &'static [ScopeStrategy],
}

impl<'a> ScopeResolver<'a> {
    pub fn new(vcs: &'a dyn VcsQuery, base_branch: impl Into<String>) -> Self {
        Self {
            vcs,
            api: None,
            base_branch: base_branch.into(),
            pull_request: PullRequestRef::default(),
            strategies: &ScopeStrategy::DEFAULT_CHAIN,
        }
    }

    pub fn with_api(mut self, api: &'a dyn PullRequestFiles, pull_request: PullRequestRef) -> Self {
        self.api = Some(api);
        self.pull_request = pull_request;
        self
    }

    pub fn resolve(&self, mode: ScopeMode) -> ScopeContext {
        if mode == ScopeMode::All {
            info!("scope=all, analyzing entire repository");
            return ScopeContext::all();
        }

        info!(base = %self.base_branch, "detecting changed files");
        let base = self.detect_base_ref();
        let mut narrative = vec![match base {
            Some(ref b) => format!("base ref: {b}"),
            None => format!("base ref: {} not found locally", self.base_branch),
        }];

        let resolution = first_success(self.strategies, |strategy| {
            let raw = self.run_strategy(*strategy, base.as_deref())?;
            let files = sanitize_file_list(&raw);
            Ok((!files.is_empty()).then_some(files))
        });

        for attempt in &resolution.attempts {
            match (&attempt.outcome, &resolution.winner) {
                (AttemptOutcome::Succeeded, Some((_, files))) => {
                    narrative.push(format!("{}: {} file(s)", attempt.strategy, files.len()));
                }
                _ => narrative.push(attempt.to_string()),
            }
        }

        match resolution.winner {
            Some((strategy, files)) => {
                info!(strategy, count = files.len(), "detected changed files");
                narrative.push(format!("selected {strategy}"));
                ScopeContext::changed(files, narrative)
            }
            None => {
                let exhausted =
                    Error::ScopeDetectionExhausted("no strategy detected changed files".into());
                warn!(error = %exhausted, "continuing without a changed-file list");
                narrative.push(exhausted.to_string());
                ScopeContext::changed(Vec::new(), narrative)
            }
        }
    }

    /// Prefer the remote-tracking ref, fall back to a local branch.
    fn detect_base_ref(&self) -> Option<String> {
        let branch = self.base_branch.trim_start_matches("refs/heads/");
        let remote = format!("origin/{branch}");
        [remote, branch.to_string()]
            .into_iter()
            .find(|candidate| self.vcs.rev_exists(candidate))
    }

    fn run_strategy(&self, strategy: ScopeStrategy, base: Option<&str>) -> Result<String> {
        match strategy {
            ScopeStrategy::BaseDiff => {
                let base = base.ok_or_else(|| missing_base(&self.base_branch))?;
                let three_dot = format!("{base}...HEAD");
                match self.vcs.diff_name_only(&[three_dot.as_str()]) {
                    Ok(out) => Ok(out),
                    Err(_) => {
                        let two_dot = format!("{base}..HEAD");
                        self.vcs.diff_name_only(&[two_dot.as_str()])
                    }
                }
            }
            ScopeStrategy::PreviousCommit => self.vcs.diff_name_only(&["HEAD~1", "HEAD"]),
            ScopeStrategy::PullRequestApi => {
                let api = self
                    .api
                    .ok_or_else(|| Error::GitHub("no API client configured".into()))?;
                let (Some(repo), Some(number)) =
                    (self.pull_request.repository.as_deref(), self.pull_request.number)
                else {
                    return Err(Error::GitHub(
                        "repository or pull request number unknown".into(),
                    ));
                };
                Ok(api.pull_request_files(repo, number)?.join("\n"))
            }
            ScopeStrategy::MergeBase => {
                let base = base.ok_or_else(|| missing_base(&self.base_branch))?;
                let merge_base = self.vcs.merge_base(base, "HEAD")?;
                self.vcs.diff_name_only(&[merge_base.as_str(), "HEAD"])
            }
            ScopeStrategy::MergeCommit => {
                let parents = self.vcs.parents("HEAD")?;
                if parents.len() < 2 {
                    return Err(Error::Git("HEAD is not a merge commit".into()));
                }
                self.vcs.merge_commit_files("HEAD")
            }
        }
    }
}

fn missing_base(branch: &str) -> Error {
    Error::Git(format!("base branch {branch} not available (shallow clone?)"))
}

/// Drop git diagnostics and blank lines, trim, and de-duplicate while keeping
/// first-seen order.
pub fn sanitize_file_list(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !DIAGNOSTIC_LINE.is_match(line))
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Scripted VCS: returns canned output per query and records every call.
    #[derive(Default)]
    struct FakeVcs {
        existing_refs: Vec<&'static str>,
        base_diff: Option<&'static str>,
        three_dot_fails: bool,
        previous: Option<&'static str>,
        merge_base_diff: Option<&'static str>,
        parents: Vec<&'static str>,
        merge_files: Option<&'static str>,
        calls: RefCell<Vec<String>>,
    }

    fn scripted(value: Option<&'static str>, what: &str) -> Result<String> {
        value
            .map(str::to_string)
            .ok_or_else(|| Error::Git(format!("{what} unavailable")))
    }

    impl VcsQuery for FakeVcs {
        fn diff_name_only(&self, revs: &[&str]) -> Result<String> {
            let joined = revs.join(" ");
            self.calls.borrow_mut().push(format!("diff {joined}"));
            if joined.contains("...") && self.three_dot_fails {
                Err(Error::Git("no merge base".into()))
            } else if joined.contains("..") {
                scripted(self.base_diff, "base diff")
            } else if joined == "HEAD~1 HEAD" {
                scripted(self.previous, "previous commit")
            } else {
                scripted(self.merge_base_diff, "merge-base diff")
            }
        }

        fn merge_base(&self, a: &str, b: &str) -> Result<String> {
            self.calls.borrow_mut().push(format!("merge-base {a} {b}"));
            Ok("abc123".to_string())
        }

        fn rev_exists(&self, rev: &str) -> bool {
            self.existing_refs.contains(&rev)
        }

        fn parents(&self, rev: &str) -> Result<Vec<String>> {
            self.calls.borrow_mut().push(format!("parents {rev}"));
            Ok(self.parents.iter().map(|p| p.to_string()).collect())
        }

        fn merge_commit_files(&self, rev: &str) -> Result<String> {
            self.calls.borrow_mut().push(format!("diff-tree {rev}"));
            scripted(self.merge_files, "merge files")
        }
    }

    struct FakeApi(Vec<&'static str>);

    impl PullRequestFiles for FakeApi {
        fn pull_request_files(&self, _repository: &str, _number: u64) -> Result<Vec<String>> {
            Ok(self.0.iter().map(|f| f.to_string()).collect())
        }
    }

    #[test]
    fn all_mode_short_circuits() {
        let vcs = FakeVcs::default();
        let scope = ScopeResolver::new(&vcs, "main").resolve(ScopeMode::All);
        assert_eq!(scope.mode(), ScopeMode::All);
        assert_eq!(scope.directive(), FULL_REPOSITORY_DIRECTIVE);
        assert!(vcs.calls.borrow().is_empty());
    }

    #[test]
    fn base_diff_wins_and_short_circuits() {
        let vcs = FakeVcs {
            existing_refs: vec!["origin/main"],
            base_diff: Some("src/a.rs\nsrc/b.rs\n"),
            previous: Some("other.rs"),
            ..Default::default()
        };
        let scope = ScopeResolver::new(&vcs, "main").resolve(ScopeMode::Changed);
        assert_eq!(scope.changed_files(), ["src/a.rs", "src/b.rs"]);
        assert_eq!(*vcs.calls.borrow(), vec!["diff origin/main...HEAD"]);
        assert!(scope.narrative().iter().any(|l| l == "base-diff: 2 file(s)"));
        assert_eq!(scope.narrative().last().unwrap(), "selected base-diff");
    }

    #[test]
    fn base_diff_retries_with_two_dot_range() {
        let vcs = FakeVcs {
            existing_refs: vec!["origin/main"],
            base_diff: Some("src/a.rs\n"),
            three_dot_fails: true,
            previous: Some("other.rs"),
            ..Default::default()
        };
        let scope = ScopeResolver::new(&vcs, "main").resolve(ScopeMode::Changed);
        assert_eq!(scope.changed_files(), ["src/a.rs"]);
        assert_eq!(
            *vcs.calls.borrow(),
            vec!["diff origin/main...HEAD", "diff origin/main..HEAD"]
        );
        assert_eq!(
            scope.narrative(),
            [
                "base ref: origin/main",
                "base-diff: 1 file(s)",
                "selected base-diff"
            ]
        );
    }

    #[test]
    fn local_branch_used_when_remote_missing() {
        let vcs = FakeVcs {
            existing_refs: vec!["main"],
            base_diff: Some("x.rs"),
            ..Default::default()
        };
        ScopeResolver::new(&vcs, "main").resolve(ScopeMode::Changed);
        assert_eq!(*vcs.calls.borrow(), vec!["diff main...HEAD"]);
    }

    #[test]
    fn shallow_clone_falls_back_to_previous_commit() {
        let vcs = FakeVcs {
            previous: Some("warning: something odd\nlib.rs\n"),
            ..Default::default()
        };
        let scope = ScopeResolver::new(&vcs, "main").resolve(ScopeMode::Changed);
        assert_eq!(scope.changed_files(), ["lib.rs"]);
        assert!(scope.narrative()[0].contains("not found locally"));
        assert!(scope.narrative().iter().any(|l| l.starts_with("base-diff: failed")));
    }

    #[test]
    fn api_strategy_used_when_history_is_insufficient() {
        let vcs = FakeVcs::default();
        let api = FakeApi(vec!["api/one.rs", "api/two.rs"]);
        let scope = ScopeResolver::new(&vcs, "main")
            .with_api(
                &api,
                PullRequestRef {
                    repository: Some("acme/widgets".into()),
                    number: Some(7),
                },
            )
            .resolve(ScopeMode::Changed);
        assert_eq!(scope.changed_files(), ["api/one.rs", "api/two.rs"]);
        assert!(!vcs.calls.borrow().iter().any(|c| c.starts_with("merge-base")));
    }

    #[test]
    fn merge_base_used_when_base_diff_empty() {
        let vcs = FakeVcs {
            existing_refs: vec!["origin/main"],
            base_diff: Some(""),
            previous: Some("fatal: bad revision 'HEAD~1'\n"),
            merge_base_diff: Some("merged.rs"),
            ..Default::default()
        };
        let scope = ScopeResolver::new(&vcs, "main").resolve(ScopeMode::Changed);
        assert_eq!(scope.changed_files(), ["merged.rs"]);
        assert!(vcs.calls.borrow().contains(&"merge-base origin/main HEAD".to_string()));
    }

    #[test]
    fn merge_commit_is_last_resort() {
        let vcs = FakeVcs {
            parents: vec!["p1", "p2"],
            merge_files: Some("from-merge.rs"),
            ..Default::default()
        };
        let scope = ScopeResolver::new(&vcs, "main").resolve(ScopeMode::Changed);
        assert_eq!(scope.changed_files(), ["from-merge.rs"]);
    }

    #[test]
    fn exhaustion_is_not_fatal() {
        let vcs = FakeVcs {
            parents: vec!["p1"],
            ..Default::default()
        };
        let scope = ScopeResolver::new(&vcs, "main").resolve(ScopeMode::Changed);
        assert_eq!(scope.mode(), ScopeMode::Changed);
        assert!(scope.changed_files().is_empty());
        assert!(scope.directive().starts_with(NO_CHANGES_DIRECTIVE));
        assert!(
            scope
                .narrative()
                .last()
                .unwrap()
                .contains("no strategy detected changed files")
        );
    }

    #[test]
    fn directive_lists_files_without_strategy_identity() {
        let scope = ScopeContext::changed(
            vec!["a.rs".into(), "b.rs".into()],
            vec!["merge-base: 2 file(s)".into(), "selected merge-base".into()],
        );
        let directive = scope.directive();
        assert!(directive.starts_with("Focus ONLY on these files changed in this PR: a.rs b.rs"));
        assert!(directive.contains("read-only git commands"));
        assert!(!directive.contains("merge-base:"));
    }

    #[test]
    fn sanitize_drops_diagnostics_blanks_and_duplicates() {
        let raw = "  src/a.rs \nFatal: not a git repository\n\nerror: x\nhint: y\nsrc/a.rs\nusage: git diff\nsrc/b.rs";
        assert_eq!(sanitize_file_list(raw), vec!["src/a.rs", "src/b.rs"]);
    }

    #[test]
    fn sanitize_keeps_paths_that_merely_contain_keywords() {
        assert_eq!(
            sanitize_file_list("docs/error-handling.md\nwarning.rs"),
            vec!["docs/error-handling.md", "warning.rs"]
        );
    }

    #[test]
    fn scope_mode_parses_case_insensitively() {
        assert_eq!("ALL".parse::<ScopeMode>().unwrap(), ScopeMode::All);
        assert_eq!(" changed ".parse::<ScopeMode>().unwrap(), ScopeMode::Changed);
        assert!("everything".parse::<ScopeMode>().is_err());
    }
}
