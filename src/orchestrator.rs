use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::git::VcsQuery;
use crate::github::PullRequestFiles;
use crate::prompts::PromptEngine;
use crate::results::{ResultSet, RuleResult};
use crate::rules::{RuleRegistry, RuleRequest, RuleResolver};
use crate::runner::{Dispatcher, ProcessExecutor, SpawnExecutor};
use crate::scope::{PullRequestRef, ScopeMode, ScopeResolver};

/// Outputs shorter than this are flagged in the log.
const SHORT_OUTPUT_CHARS: usize = 10;

/// What to run: the rules plus agent and scope selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub rules: RuleRequest,
    pub agent: String,
    pub model: Option<String>,
    pub scope: ScopeMode,
}

impl From<&Config> for RunRequest {
    fn from(config: &Config) -> Self {
        Self {
            rules: RuleRequest {
                rules: config.rules.clone(),
                custom_files: config.custom_files.clone(),
                custom: config.custom.clone(),
            },
            agent: config.agent.clone(),
            model: config.model.clone(),
            scope: config.scope,
        }
    }
}

/// Observer for per-rule progress.
pub trait ProgressReporter: Send + Sync {
    fn rules_started(&self, agent: &str, labels: &[String]);
    fn rule_complete(&self, result: &RuleResult);
}

/// Default reporter that prints to stderr.
pub struct StderrReporter;

impl ProgressReporter for StderrReporter {
    fn rules_started(&self, agent: &str, labels: &[String]) {
        eprintln!(
            "[autoagent] Running {} rule(s) with {agent}: {}",
            labels.len(),
            labels.join(", ")
        );
    }

    fn rule_complete(&self, result: &RuleResult) {
        if result.succeeded {
            eprintln!("[autoagent] Rule complete: {}", result.label);
        } else {
            eprintln!("[autoagent] Rule failed: {}", result.label);
        }
    }
}

pub struct Orchestrator<V, E = SpawnExecutor, P = StderrReporter> {
    rules: RuleRegistry,
    prompts: PromptEngine,
    dispatcher: Dispatcher<E>,
    vcs: V,
    pull_request_api: Option<(Box<dyn PullRequestFiles>, PullRequestRef)>,
    base_branch: String,
    workspace: PathBuf,
    reporter: P,
}

impl<V: VcsQuery, E: ProcessExecutor> Orchestrator<V, E> {
    pub fn new(
        rules: RuleRegistry,
        prompts: PromptEngine,
        dispatcher: Dispatcher<E>,
        vcs: V,
        base_branch: impl Into<String>,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        Self {
            rules,
            prompts,
            dispatcher,
            vcs,
            pull_request_api: None,
            base_branch: base_branch.into(),
            workspace: workspace.into(),
            reporter: StderrReporter,
        }
    }
}

impl<V: VcsQuery, E: ProcessExecutor, P: ProgressReporter> Orchestrator<V, E, P> {
    pub fn with_reporter<Q: ProgressReporter>(self, reporter: Q) -> Orchestrator<V, E, Q> {
        Orchestrator {
            rules: self.rules,
            prompts: self.prompts,
            dispatcher: self.dispatcher,
            vcs: self.vcs,
            pull_request_api: self.pull_request_api,
            base_branch: self.base_branch,
            workspace: self.workspace,
            reporter,
        }
    }

    pub fn reporter(&self) -> &P {
        &self.reporter
    }

    /// Enables the pull-request-API scope strategy.
    pub fn with_pull_request_api(
        mut self,
        api: Box<dyn PullRequestFiles>,
        pull_request: PullRequestRef,
    ) -> Self {
        self.pull_request_api = Some((api, pull_request));
        self
    }

    /// Run every resolved rule through the agent, in order.
    ///
    /// Rule, agent and prompt problems abort before any agent is invoked.
    /// Agent failures are recorded as that rule's output and the run carries on.
    pub async fn run(&self, request: &RunRequest) -> Result<ResultSet> {
        let resolved = RuleResolver::new(&self.rules, &self.workspace).resolve(&request.rules)?;
        self.dispatcher.registry().get(&request.agent)?;

        let mut scope_resolver = ScopeResolver::new(&self.vcs, self.base_branch.clone());
        if let Some((api, pull_request)) = &self.pull_request_api {
            scope_resolver = scope_resolver.with_api(api.as_ref(), pull_request.clone());
        }
        let scope = scope_resolver.resolve(request.scope);
        for line in scope.narrative() {
            debug!(%line, "scope detection");
        }
        info!(
            scope = %scope.mode(),
            changed_files = scope.changed_files().len(),
            "scope resolved"
        );

        let directive = scope.directive();
        let mut prompts = Vec::with_capacity(resolved.len());
        for rule in &resolved {
            let prompt = self.prompts.compose(&self.prompts.parts(&directive, &rule.body))?;
            prompts.push((rule.label.clone(), prompt));
        }

        let labels: Vec<String> = prompts.iter().map(|(label, _)| label.clone()).collect();
        self.reporter.rules_started(&request.agent, &labels);

        let mut results = ResultSet::new();
        for (label, prompt) in prompts {
            info!(rule = %label, "executing rule");
            let result = match self
                .dispatcher
                .dispatch(&request.agent, &prompt, request.model.as_deref())
                .await
            {
                Ok(dispatch) if dispatch.succeeded => RuleResult::new(label, dispatch.output),
                Ok(dispatch) => RuleResult::failed(label, dispatch.output),
                Err(e) => {
                    warn!(rule = %label, error = %e, "rule dispatch failed");
                    RuleResult::failed(label, format!("Error: {e}"))
                }
            };
            if result.succeeded && result.output.chars().count() < SHORT_OUTPUT_CHARS {
                warn!(rule = %result.label, "rule returned empty or very short output");
            }
            self.reporter.rule_complete(&result);
            results.push(result);
        }

        info!(
            rules = results.len(),
            failed = results.failed_count(),
            "review run complete"
        );
        Ok(results)
    }
}
