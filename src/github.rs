use std::thread;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::env::GitHubContext;
use crate::error::{Error, Result};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;
const PER_PAGE: usize = 100;
/// GitHub stops listing pull request files after 3000 entries.
const MAX_PAGES: usize = 30;
const USER_AGENT: &str = concat!("autoagent/", env!("CARGO_PKG_VERSION"));

/// Enumerates the files of a pull request through the hosting platform.
pub trait PullRequestFiles {
    fn pull_request_files(&self, repository: &str, number: u64) -> Result<Vec<String>>;
}

#[derive(Debug, Deserialize)]
struct PullFile {
    filename: String,
}

/// Blocking GitHub REST client.
pub struct GitHubClient {
    api_url: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn from_context(ctx: &GitHubContext) -> Self {
        Self::new(ctx.api_url.clone(), ctx.token.clone())
    }

    fn authorize(&self, request: ureq::Request) -> ureq::Request {
        let request = request
            .set("Accept", "application/vnd.github+json")
            .set("User-Agent", USER_AGENT)
            .set("X-GitHub-Api-Version", "2022-11-28");
        match self.token {
            Some(ref token) => request.set("Authorization", &format!("Bearer {token}")),
            None => request,
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let response = retry_with_backoff(|| {
            let mut request = self.authorize(ureq::get(url));
            for (key, value) in query {
                request = request.query(key, value);
            }
            request.call()
        })?;
        response
            .into_json()
            .map_err(|e| Error::GitHub(format!("failed to parse response from {url}: {e}")))
    }

    /// Create a comment on an issue or pull request. Returns the comment URL.
    pub fn create_issue_comment(&self, repository: &str, number: u64, body: &str) -> Result<String> {
        let url = format!("{}/repos/{repository}/issues/{number}/comments", self.api_url);
        let payload = serde_json::json!({ "body": body });
        let response = retry_with_backoff(|| self.authorize(ureq::post(&url)).send_json(&payload))?;
        let json: serde_json::Value = response
            .into_json()
            .map_err(|e| Error::GitHub(format!("failed to parse comment response: {e}")))?;
        Ok(json
            .get("html_url")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

impl PullRequestFiles for GitHubClient {
    fn pull_request_files(&self, repository: &str, number: u64) -> Result<Vec<String>> {
        let url = format!("{}/repos/{repository}/pulls/{number}/files", self.api_url);
        let mut files = Vec::new();
        for page in 1..=MAX_PAGES {
            let batch: Vec<PullFile> = self.get_json(
                &url,
                &[("per_page", PER_PAGE.to_string()), ("page", page.to_string())],
            )?;
            let count = batch.len();
            debug!(page, count, "fetched pull request files page");
            files.extend(batch.into_iter().map(|f| f.filename));
            if count < PER_PAGE {
                break;
            }
        }
        Ok(files)
    }
}

fn retry_with_backoff<F>(mut call: F) -> Result<ureq::Response>
where
    F: FnMut() -> std::result::Result<ureq::Response, ureq::Error>,
{
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    for attempt in 1..=MAX_RETRIES {
        match call() {
            Ok(response) => return Ok(response),
            Err(ref e) if attempt < MAX_RETRIES && is_retryable(e) => {
                warn!(
                    attempt,
                    error = %e,
                    backoff_ms,
                    "retrying GitHub API after transient error"
                );
                thread::sleep(Duration::from_millis(backoff_ms));
                backoff_ms *= 2;
            }
            Err(e) => return Err(Error::GitHub(format!("request failed: {e}"))),
        }
    }
    Err(Error::GitHub("request failed after retries".to_string()))
}

/// Only retry rate-limits (429), server errors (5xx), and transport errors.
fn is_retryable(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::Status(code, _) => *code == 429 || *code >= 500,
        ureq::Error::Transport(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_trailing_slash_is_trimmed() {
        let client = GitHubClient::new("https://ghe.example.com/api/v3/", None);
        assert_eq!(client.api_url, "https://ghe.example.com/api/v3");
    }

    #[test]
    fn unreachable_host_is_github_error() {
        let client = GitHubClient::new("http://127.0.0.1:9", None);
        let err = client.pull_request_files("acme/widgets", 1).unwrap_err();
        assert!(matches!(err, Error::GitHub(_)), "got: {err}");
    }

    #[test]
    fn pull_file_deserializes_filename_only() {
        let files: Vec<PullFile> =
            serde_json::from_str(r#"[{"filename":"src/a.rs","status":"modified"}]"#).unwrap();
        assert_eq!(files[0].filename, "src/a.rs");
    }
}
