use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::cli::Cli;
use crate::env::{Env, GitHubContext};
use crate::error::{Error, Result};
use crate::report::DEFAULT_MAX_COMMENT_CHARS;
use crate::runner::DEFAULT_AGENT_TIMEOUT;
use crate::scope::ScopeMode;

pub const DEFAULT_CONFIG_FILE: &str = ".autoagent.toml";
pub const DEFAULT_AGENT: &str = "cursor";
pub const DEFAULT_BASE_BRANCH: &str = "main";
pub const DEFAULT_RESULTS_PATH: &str = "results.json";
pub const DEFAULT_REPORT_PATH: &str = "autoagent-report.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    /// Default directive for `EnvFilter` when `RUST_LOG` is unset.
    pub fn directive(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directive())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(Error::ConfigValidation(format!(
                "unknown logging level: {other} (expected: info, debug)"
            ))),
        }
    }
}

/// A list given either as a TOML array or as a single string holding a
/// YAML/JSON list or whitespace/comma-separated items.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum InputList {
    Items(Vec<String>),
    Text(String),
}

impl InputList {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            InputList::Items(items) => items
                .into_iter()
                .map(|i| i.trim().to_string())
                .filter(|i| !i.is_empty())
                .collect(),
            InputList::Text(text) => parse_input_list(&text),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub rules: Option<InputList>,
    pub custom_files: Option<InputList>,
    pub custom: Option<String>,
    pub agent: Option<String>,
    pub scope: Option<ScopeMode>,
    pub install_agent: Option<bool>,
    pub logging: Option<LogLevel>,
    pub model: Option<String>,
    pub base_branch: Option<String>,
    pub agent_timeout: Option<u64>,
    pub rules_dir: Option<String>,
    pub prompts_dir: Option<String>,
    pub max_comment_chars: Option<usize>,
    pub results_path: Option<String>,
    pub report_path: Option<String>,
    pub post_comment: Option<bool>,
    pub pr_number: Option<u64>,
    pub repository: Option<String>,
    pub workspace: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub rules: Vec<String>,
    pub custom_files: Vec<String>,
    pub custom: Option<String>,
    pub agent: String,
    pub scope: ScopeMode,
    pub install_agent: bool,
    pub logging: LogLevel,
    pub model: Option<String>,
    pub base_branch: String,
    pub agent_timeout: Duration,
    pub rules_dir: Option<PathBuf>,
    pub prompts_dir: Option<PathBuf>,
    pub max_comment_chars: usize,
    pub results_path: PathBuf,
    pub report_path: PathBuf,
    pub post_comment: bool,
    pub pr_number: Option<u64>,
    pub repository: Option<String>,
    pub workspace: PathBuf,
}

impl Config {
    /// Read the config file (explicit `--config`, else `.autoagent.toml` in
    /// the workspace when present) and merge CLI flags and environment over it.
    /// The workspace for the lookup comes from `--workspace`, then
    /// `GITHUB_WORKSPACE`, then the current directory.
    pub fn load(cli: &Cli, env: &Env) -> Result<Self> {
        let file_config = match cli.config.as_deref() {
            Some(path) => read_config(Path::new(path))?,
            None => {
                let workspace = cli
                    .workspace
                    .clone()
                    .or_else(|| env.var("GITHUB_WORKSPACE"))
                    .unwrap_or_else(|| ".".to_string());
                let default = Path::new(&workspace).join(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    read_config(&default)?
                } else {
                    ConfigFile::default()
                }
            }
        };
        merge(file_config, cli, env)
    }
}

fn read_config(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Err(Error::ConfigNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ConfigFile) -> Result<()> {
    if let Some(ref agent) = config.agent
        && agent.trim().is_empty()
    {
        return Err(Error::ConfigValidation("agent must not be empty".to_string()));
    }
    if let Some(timeout) = config.agent_timeout
        && timeout == 0
    {
        return Err(Error::ConfigValidation(
            "agent_timeout must be > 0".to_string(),
        ));
    }
    if let Some(chars) = config.max_comment_chars
        && chars == 0
    {
        return Err(Error::ConfigValidation(
            "max_comment_chars must be > 0".to_string(),
        ));
    }
    Ok(())
}

/// CLI flags win over the file, which wins over the CI environment, which
/// wins over built-in defaults.
pub fn merge(file: ConfigFile, cli: &Cli, env: &Env) -> Result<Config> {
    let github = GitHubContext::from_env(env);

    let scope: ScopeMode = match cli.scope.as_deref() {
        Some(s) => s.parse()?,
        None => file.scope.unwrap_or_default(),
    };
    let logging: LogLevel = match cli.logging.as_deref() {
        Some(l) => l.parse()?,
        None => match file.logging {
            Some(level) => level,
            None => env
                .var("LOGGING_LEVEL")
                .map(|l| l.parse())
                .transpose()?
                .unwrap_or_default(),
        },
    };

    let agent_timeout = cli.agent_timeout.or(file.agent_timeout);
    if agent_timeout == Some(0) {
        return Err(Error::ConfigValidation(
            "agent_timeout must be > 0".to_string(),
        ));
    }
    let max_comment_chars = cli
        .max_comment_chars
        .or(file.max_comment_chars)
        .unwrap_or(DEFAULT_MAX_COMMENT_CHARS);
    if max_comment_chars == 0 {
        return Err(Error::ConfigValidation(
            "max_comment_chars must be > 0".to_string(),
        ));
    }

    Ok(Config {
        rules: list(cli.rules.as_deref(), file.rules),
        custom_files: list(cli.custom_files.as_deref(), file.custom_files),
        custom: cli.custom.clone().or(file.custom),
        agent: cli
            .agent
            .clone()
            .or(file.agent)
            .unwrap_or_else(|| DEFAULT_AGENT.to_string())
            .trim()
            .to_ascii_lowercase(),
        scope,
        install_agent: cli.install_agent || file.install_agent.unwrap_or(false),
        logging,
        model: cli.model.clone().or(file.model).or_else(|| env.var("MODEL")),
        base_branch: cli
            .base_branch
            .clone()
            .or(file.base_branch)
            .or(github.base_ref)
            .unwrap_or_else(|| DEFAULT_BASE_BRANCH.to_string()),
        agent_timeout: agent_timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_AGENT_TIMEOUT),
        rules_dir: cli.rules_dir.clone().or(file.rules_dir).map(PathBuf::from),
        prompts_dir: cli
            .prompts_dir
            .clone()
            .or(file.prompts_dir)
            .map(PathBuf::from),
        max_comment_chars,
        results_path: PathBuf::from(
            cli.results_path
                .clone()
                .or(file.results_path)
                .unwrap_or_else(|| DEFAULT_RESULTS_PATH.to_string()),
        ),
        report_path: PathBuf::from(
            cli.report_path
                .clone()
                .or(file.report_path)
                .unwrap_or_else(|| DEFAULT_REPORT_PATH.to_string()),
        ),
        post_comment: cli.post_comment || file.post_comment.unwrap_or(false),
        pr_number: cli.pr_number.or(file.pr_number).or(github.pr_number),
        repository: cli
            .repository
            .clone()
            .or(file.repository)
            .or(github.repository),
        workspace: cli
            .workspace
            .clone()
            .or(file.workspace)
            .or_else(|| env.var("GITHUB_WORKSPACE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
    })
}

fn list(cli: Option<&str>, file: Option<InputList>) -> Vec<String> {
    match cli {
        Some(text) => parse_input_list(text),
        None => file.map(InputList::into_vec).unwrap_or_default(),
    }
}

/// Parse a YAML or JSON list, falling back to whitespace/comma-separated
/// items. Blank entries are dropped.
pub fn parse_input_list(input: &str) -> Vec<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed == "[]" {
        return Vec::new();
    }

    if let Ok(serde_yaml_ng::Value::Sequence(items)) = serde_yaml_ng::from_str(trimmed) {
        return items
            .into_iter()
            .filter_map(|item| match item {
                serde_yaml_ng::Value::String(s) => Some(s),
                serde_yaml_ng::Value::Number(n) => Some(n.to_string()),
                serde_yaml_ng::Value::Bool(b) => Some(b.to_string()),
                _ => None,
            })
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    trimmed
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
