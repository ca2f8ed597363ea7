//! Environment variable access passed explicitly through the pipeline.
//!
//! Production code uses [`Env::real()`]; tests build an [`Env::from_vars`]
//! snapshot instead of mutating the process environment.

use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct Env {
    overrides: Option<HashMap<String, String>>,
}

impl Env {
    /// Read from the real process environment.
    pub fn real() -> Self {
        Self { overrides: None }
    }

    /// Backed by explicit key-value pairs only.
    pub fn from_vars(vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        Self {
            overrides: Some(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Look up a variable. Empty values count as unset.
    pub fn var(&self, name: &str) -> Option<String> {
        let value = match &self.overrides {
            Some(map) => map.get(name).cloned(),
            None => std::env::var(name).ok(),
        };
        value.filter(|v| !v.trim().is_empty())
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.var(name).is_some()
    }
}

/// Pull-request coordinates derived from the CI environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitHubContext {
    /// `owner/name`
    pub repository: Option<String>,
    pub pr_number: Option<u64>,
    pub base_ref: Option<String>,
    pub token: Option<String>,
    pub api_url: String,
}

pub const DEFAULT_API_URL: &str = "https://api.github.com";

impl GitHubContext {
    pub fn from_env(env: &Env) -> Self {
        let pr_number = env
            .var("GITHUB_EVENT_NUMBER")
            .and_then(|n| n.trim().parse::<u64>().ok())
            .or_else(|| env.var("GITHUB_REF").and_then(|r| pr_number_from_ref(&r)));

        Self {
            repository: env.var("GITHUB_REPOSITORY"),
            pr_number,
            base_ref: env.var("GITHUB_BASE_REF"),
            token: env.var("GITHUB_TOKEN").or_else(|| env.var("GH_TOKEN")),
            api_url: env
                .var("GITHUB_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        }
    }
}

/// Parse `refs/pull/<n>/merge` (or `/head`) into `n`.
fn pr_number_from_ref(git_ref: &str) -> Option<u64> {
    let rest = git_ref.strip_prefix("refs/pull/")?;
    let (number, _) = rest.split_once('/')?;
    number.parse().ok()
}
