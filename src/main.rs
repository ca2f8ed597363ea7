use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use autoagent::cli::{Cli, CliCommand};
use autoagent::config::{Config, LogLevel};
use autoagent::env::{Env, GitHubContext};
use autoagent::error::Result;
use autoagent::git::GitCli;
use autoagent::github::GitHubClient;
use autoagent::orchestrator::{Orchestrator, RunRequest};
use autoagent::prompts::PromptEngine;
use autoagent::report::{self, ReportOptions};
use autoagent::results::ResultSet;
use autoagent::rules::RuleRegistry;
use autoagent::runner::{AgentRegistry, Dispatcher};
use autoagent::scope::PullRequestRef;
use autoagent::submission::{CommentTarget, FileSink, GitHubCommentSink, ReportSink};

fn init_logging(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let env = Env::real();

    let config = match Config::load(&cli, &env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    init_logging(config.logging);

    let result = match cli.command.clone().unwrap_or(CliCommand::Run) {
        CliCommand::Run => run(&config, &env).await,
        CliCommand::Render { input } => render(&config, input.as_deref()),
        CliCommand::Rules => list_rules(&config),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn rule_registry(config: &Config) -> Result<RuleRegistry> {
    match &config.rules_dir {
        Some(dir) => RuleRegistry::with_overrides(&config.workspace.join(dir)),
        None => Ok(RuleRegistry::builtin()),
    }
}

fn report_options(config: &Config, agent: Option<String>) -> ReportOptions {
    ReportOptions {
        max_chars: config.max_comment_chars,
        agent,
    }
}

async fn run(config: &Config, env: &Env) -> Result<()> {
    info!(
        agent = %config.agent,
        scope = %config.scope,
        rules = ?config.rules,
        custom_files = ?config.custom_files,
        custom_chars = config.custom.as_deref().map(|c| c.chars().count()).unwrap_or(0),
        workspace = %config.workspace.display(),
        "autoagent starting"
    );
    if config.install_agent {
        info!(agent = %config.agent, "install_agent set; agent provisioning is handled by the workflow");
    }

    let github = GitHubContext::from_env(env);
    let prompts = PromptEngine::new(config.prompts_dir.as_deref(), env)?;
    let dispatcher = Dispatcher::new(
        AgentRegistry::with_defaults(),
        env.clone(),
        config.workspace.clone(),
    )
    .with_timeout(config.agent_timeout);

    let mut orchestrator = Orchestrator::new(
        rule_registry(config)?,
        prompts,
        dispatcher,
        GitCli::new(&config.workspace),
        &config.base_branch,
        &config.workspace,
    );
    if config.repository.is_some() && config.pr_number.is_some() {
        orchestrator = orchestrator.with_pull_request_api(
            Box::new(GitHubClient::from_context(&github)),
            PullRequestRef {
                repository: config.repository.clone(),
                number: config.pr_number,
            },
        );
    }

    let results = orchestrator.run(&RunRequest::from(config)).await?;
    results.save(&config.results_path)?;
    info!(path = %config.results_path.display(), "results saved");
    for result in &results {
        info!(rule = %result.label, chars = result.output.chars().count(), succeeded = result.succeeded, "result");
    }

    let markdown = report::render(&results, &report_options(config, Some(config.agent.clone())));
    FileSink.publish(&config.report_path, &markdown)?;

    if config.post_comment {
        match (&config.repository, config.pr_number) {
            (Some(repository), Some(number)) => {
                let sink = GitHubCommentSink::new(GitHubClient::from_context(&github));
                let target = CommentTarget {
                    repository: repository.clone(),
                    number,
                };
                let published = sink.publish(&target, &markdown)?;
                eprintln!("[autoagent] Comment: {}", published.location);
            }
            _ => warn!("post_comment set but repository or pull request number is unknown"),
        }
    }
    Ok(())
}

fn render(config: &Config, input: Option<&str>) -> Result<()> {
    let path = input
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| config.results_path.clone());
    let results = ResultSet::load(&path)?;
    let markdown = report::render(&results, &report_options(config, None));
    FileSink.publish(&config.report_path, &markdown)?;
    println!("{markdown}");
    Ok(())
}

fn list_rules(config: &Config) -> Result<()> {
    let registry = rule_registry(config)?;
    for name in registry.names() {
        println!("{name}");
    }
    Ok(())
}
