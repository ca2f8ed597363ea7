use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::github::GitHubClient;

/// Pull request that receives the review comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentTarget {
    /// `owner/name`
    pub repository: String,
    pub number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// Comment URL or file path.
    pub location: String,
}

/// Destination for a finished report.
pub trait ReportSink {
    type Target: ?Sized;

    fn publish(&self, target: &Self::Target, markdown: &str) -> Result<Published>;
}

/// Posts comments on issues and pull requests.
pub trait IssueComments {
    /// Returns the URL of the created comment.
    fn create_issue_comment(&self, repository: &str, number: u64, body: &str) -> Result<String>;
}

impl IssueComments for GitHubClient {
    fn create_issue_comment(&self, repository: &str, number: u64, body: &str) -> Result<String> {
        GitHubClient::create_issue_comment(self, repository, number, body)
    }
}

/// Posts the report as a pull request comment.
pub struct GitHubCommentSink<C = GitHubClient> {
    client: C,
}

impl<C: IssueComments> GitHubCommentSink<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

impl<C: IssueComments> ReportSink for GitHubCommentSink<C> {
    type Target = CommentTarget;

    fn publish(&self, target: &CommentTarget, markdown: &str) -> Result<Published> {
        let url = self
            .client
            .create_issue_comment(&target.repository, target.number, markdown)?;
        info!(
            repository = %target.repository,
            pr = target.number,
            url = %url,
            "posted review comment"
        );
        Ok(Published { location: url })
    }
}

/// Writes the report to a file, creating parent directories.
#[derive(Default)]
pub struct FileSink;

impl ReportSink for FileSink {
    type Target = Path;

    fn publish(&self, target: &Path, markdown: &str) -> Result<Published> {
        if let Some(parent) = target.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, markdown)?;
        info!(path = %target.display(), chars = markdown.chars().count(), "wrote report");
        Ok(Published {
            location: PathBuf::from(target).display().to_string(),
        })
    }
}
