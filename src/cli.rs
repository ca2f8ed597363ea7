use clap::{Parser, Subcommand};

/// Run code-review rules through AI command-line agents.
#[derive(Parser, Debug, Clone)]
#[command(name = "autoagent", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<CliCommand>,

    /// Predefined rules to run (YAML/JSON list or space/comma separated)
    #[arg(long, global = true)]
    pub rules: Option<String>,

    /// Custom rule files to run (YAML/JSON list or space/comma separated)
    #[arg(long, global = true)]
    pub custom_files: Option<String>,

    /// Inline custom prompt (max 5000 characters)
    #[arg(long, global = true)]
    pub custom: Option<String>,

    /// Agent to use (cursor, claude, gemini, codex, amp, opencode)
    #[arg(long, global = true)]
    pub agent: Option<String>,

    /// Analysis scope (changed, all)
    #[arg(long, global = true)]
    pub scope: Option<String>,

    /// Record that the agent CLI should be provisioned by the workflow
    #[arg(long, global = true)]
    pub install_agent: bool,

    /// Log level (info, debug)
    #[arg(long, global = true)]
    pub logging: Option<String>,

    /// Model for the agent to use (default: per-agent, or $MODEL)
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Base branch for change detection (default: $GITHUB_BASE_REF or main)
    #[arg(long, global = true)]
    pub base_branch: Option<String>,

    /// Per-invocation agent timeout in seconds
    #[arg(long, global = true)]
    pub agent_timeout: Option<u64>,

    /// Directory of `<name>.prompt` files overriding or extending built-in rules
    #[arg(long, global = true)]
    pub rules_dir: Option<String>,

    /// Directory with `base.prompt` / `comment.prompt` overrides
    #[arg(long, global = true)]
    pub prompts_dir: Option<String>,

    /// Maximum report size in characters
    #[arg(long, global = true)]
    pub max_comment_chars: Option<usize>,

    /// Where to write the results JSON
    #[arg(long, global = true)]
    pub results_path: Option<String>,

    /// Where to write the rendered report
    #[arg(long, global = true)]
    pub report_path: Option<String>,

    /// Post the report as a pull request comment
    #[arg(long, global = true)]
    pub post_comment: bool,

    /// Pull request number (default: from GITHUB_EVENT_NUMBER / GITHUB_REF)
    #[arg(long, global = true)]
    pub pr_number: Option<u64>,

    /// Repository as owner/name (default: $GITHUB_REPOSITORY)
    #[arg(long, global = true)]
    pub repository: Option<String>,

    /// Repository checkout to analyze (default: $GITHUB_WORKSPACE or .)
    #[arg(long, global = true)]
    pub workspace: Option<String>,

    /// Path to config file (default: .autoagent.toml if present)
    #[arg(long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CliCommand {
    /// Run the review pipeline (default)
    Run,

    /// Render a results JSON file into the Markdown report
    Render {
        /// Results JSON to read (default: the configured results path)
        #[arg(long)]
        input: Option<String>,
    },

    /// List available rules
    Rules,
}
