//! Agent dispatch: a registry of CLI agent backends, each with an ordered list
//! of command-line shapes to try until one succeeds.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::future::Future;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::env::Env;
use crate::error::{Error, Result};
use crate::fallback::{AttemptRecord, Strategy, first_success_async};
use crate::process::{ProcessConfig, ProcessOutput, spawn_and_stream};

pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(300);

const MODEL_PLACEHOLDER: &str = "{model}";
const PROMPT_PLACEHOLDER: &str = "{prompt}";
const PROMPT_FILE_PLACEHOLDER: &str = "{prompt_file}";
const STDERR_TAIL_LINES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDelivery {
    /// Prompt passed through `{prompt}` / `{prompt_file}` placeholders only.
    Argument,
    /// Prompt written to a temporary file attached as stdin.
    Stdin,
}

/// One command-line shape for invoking an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub delivery: PromptDelivery,
}

impl CommandTemplate {
    pub fn new(label: &str, program: &str, args: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            delivery: PromptDelivery::Argument,
        }
    }

    pub fn stdin(mut self) -> Self {
        self.delivery = PromptDelivery::Stdin;
        self
    }

    fn needs_prompt_file(&self) -> bool {
        self.delivery == PromptDelivery::Stdin
            || self.args.iter().any(|a| a == PROMPT_FILE_PLACEHOLDER)
    }

    /// Fill placeholders. `{prompt}` and `{prompt_file}` must be whole
    /// arguments; `{model}` may appear inside one (`--model={model}`).
    pub fn render_args(&self, model: &str, prompt: &str, prompt_file: Option<&Path>) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| match arg.as_str() {
                PROMPT_PLACEHOLDER => prompt.to_string(),
                PROMPT_FILE_PLACEHOLDER => prompt_file
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                other => other.replace(MODEL_PLACEHOLDER, model),
            })
            .collect()
    }
}

impl Strategy for CommandTemplate {
    fn name(&self) -> String {
        self.label.clone()
    }
}

/// A backend CLI and the ways to invoke it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTarget {
    pub name: String,
    pub default_model: String,
    pub variants: Vec<CommandTemplate>,
    pub credential_env: String,
}

/// Capability set of a registered agent backend.
pub trait AgentBackend: Send + Sync {
    fn target(&self) -> &AgentTarget;

    /// Model to request, given an optional caller override.
    fn model(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_string)
            .unwrap_or_else(|| self.target().default_model.clone())
    }

    /// Environment variable holding the credential for `model`.
    fn credential_var(&self, _model: &str) -> String {
        self.target().credential_env.clone()
    }

    /// Extra environment for the child process.
    fn environment(&self, model: &str, env: &Env) -> Vec<(String, String)> {
        let var = self.credential_var(model);
        env.var(&var).map(|value| vec![(var, value)]).unwrap_or_default()
    }
}

/// Backend driven entirely by its `AgentTarget`, optionally with a
/// `$HOME`-relative directory prepended to `PATH`.
pub struct CliBackend {
    target: AgentTarget,
    home_bin_dir: Option<&'static str>,
}

impl CliBackend {
    pub fn new(target: AgentTarget) -> Self {
        Self {
            target,
            home_bin_dir: None,
        }
    }

    pub fn with_home_bin_dir(mut self, dir: &'static str) -> Self {
        self.home_bin_dir = Some(dir);
        self
    }
}

impl AgentBackend for CliBackend {
    fn target(&self) -> &AgentTarget {
        &self.target
    }

    fn environment(&self, model: &str, env: &Env) -> Vec<(String, String)> {
        let var = self.credential_var(model);
        let mut vars: Vec<(String, String)> =
            env.var(&var).map(|value| vec![(var, value)]).unwrap_or_default();
        if let (Some(dir), Some(home)) = (self.home_bin_dir, env.var("HOME")) {
            let bin = Path::new(&home).join(dir);
            let path = match env.var("PATH") {
                Some(existing) => format!("{}:{existing}", bin.display()),
                None => bin.display().to_string(),
            };
            vars.push(("PATH".to_string(), path));
        }
        vars
    }
}

/// OpenCode takes `provider/model` and reads the provider's own API key.
pub struct OpenCodeBackend {
    target: AgentTarget,
}

const OPENCODE_DEFAULT_PROVIDER: &str = "anthropic";
const OPENCODE_PROVIDER_KEYS: &[(&str, &str)] = &[
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("openai", "OPENAI_API_KEY"),
    ("google", "GOOGLE_API_KEY"),
    ("groq", "GROQ_API_KEY"),
    ("cohere", "COHERE_API_KEY"),
    ("mistral", "MISTRAL_API_KEY"),
];

impl OpenCodeBackend {
    pub fn new(target: AgentTarget) -> Self {
        Self { target }
    }

    fn provider(model: &str) -> &str {
        model
            .split_once('/')
            .map(|(provider, _)| provider)
            .unwrap_or(OPENCODE_DEFAULT_PROVIDER)
    }
}

impl AgentBackend for OpenCodeBackend {
    fn target(&self) -> &AgentTarget {
        &self.target
    }

    fn model(&self, requested: Option<&str>) -> String {
        let model = requested.unwrap_or(&self.target.default_model);
        if model.contains('/') {
            model.to_string()
        } else {
            format!("{OPENCODE_DEFAULT_PROVIDER}/{model}")
        }
    }

    fn credential_var(&self, model: &str) -> String {
        let provider = Self::provider(model);
        match OPENCODE_PROVIDER_KEYS.iter().find(|(p, _)| *p == provider) {
            Some((_, var)) => var.to_string(),
            None => {
                warn!(
                    provider,
                    supported = ?OPENCODE_PROVIDER_KEYS.iter().map(|(p, _)| *p).collect::<Vec<_>>(),
                    "unknown opencode provider"
                );
                self.target.credential_env.clone()
            }
        }
    }
}

fn target(
    name: &str,
    default_model: &str,
    credential_env: &str,
    variants: Vec<CommandTemplate>,
) -> AgentTarget {
    AgentTarget {
        name: name.to_string(),
        default_model: default_model.to_string(),
        variants,
        credential_env: credential_env.to_string(),
    }
}

fn default_backends() -> Vec<Box<dyn AgentBackend>> {
    vec![
        Box::new(
            CliBackend::new(target(
                "cursor",
                "gpt-5",
                "CURSOR_API_KEY",
                vec![
                    CommandTemplate::new(
                        "cursor-print-stdin",
                        "cursor-agent",
                        &["-p", "--output-format", "text", "--force", "--model", "{model}"],
                    )
                    .stdin(),
                    CommandTemplate::new(
                        "cursor-print-argument",
                        "cursor-agent",
                        &["-p", "--output-format", "text", "--force", "--model", "{model}", "{prompt}"],
                    ),
                    CommandTemplate::new(
                        "cursor-print-minimal",
                        "cursor-agent",
                        &["-p", "--model", "{model}", "{prompt}"],
                    ),
                ],
            ))
            .with_home_bin_dir(".cursor/bin"),
        ),
        Box::new(CliBackend::new(target(
            "claude",
            "claude-sonnet-4-20250514",
            "ANTHROPIC_API_KEY",
            vec![
                CommandTemplate::new(
                    "claude-print-text",
                    "claude",
                    &["--output-format", "text", "--model", "{model}", "-p", "{prompt}"],
                ),
                CommandTemplate::new("claude-print", "claude", &["--model", "{model}", "-p", "{prompt}"]),
                CommandTemplate::new("claude-print-stdin", "claude", &["-p", "--model", "{model}"]).stdin(),
            ],
        ))),
        Box::new(CliBackend::new(target(
            "gemini",
            "pro",
            "GOOGLE_API_KEY",
            vec![
                CommandTemplate::new(
                    "gemini-print-text",
                    "gemini",
                    &["--output-format", "text", "-m", "{model}", "-p", "{prompt}"],
                ),
                CommandTemplate::new("gemini-print", "gemini", &["-m", "{model}", "-p", "{prompt}"]),
                CommandTemplate::new("gemini-stdin", "gemini", &["-m", "{model}"]).stdin(),
            ],
        ))),
        Box::new(CliBackend::new(target(
            "codex",
            "gpt-5",
            "OPENAI_API_KEY",
            vec![
                CommandTemplate::new("codex-exec", "codex", &["exec", "-m", "{model}", "{prompt}"]),
                CommandTemplate::new("codex-positional", "codex", &["-m", "{model}", "{prompt}"]),
                CommandTemplate::new("codex-exec-stdin", "codex", &["exec", "-m", "{model}", "-"]).stdin(),
            ],
        ))),
        Box::new(CliBackend::new(target(
            "amp",
            "sonnet-4",
            "AMP_API_KEY",
            vec![
                CommandTemplate::new("amp-execute", "amp", &["-x", "{prompt}"]),
                CommandTemplate::new("amp-execute-long", "amp", &["--execute", "{prompt}"]),
                CommandTemplate::new("amp-execute-stdin", "amp", &["-x"]).stdin(),
            ],
        ))),
        Box::new(OpenCodeBackend::new(target(
            "opencode",
            "anthropic/claude-sonnet-4-20250514",
            "OPENCODE_API_KEY",
            vec![
                CommandTemplate::new(
                    "opencode-run-quiet",
                    "opencode",
                    &["run", "--quiet", "--model", "{model}", "{prompt}"],
                ),
                CommandTemplate::new("opencode-run", "opencode", &["run", "--model", "{model}", "{prompt}"]),
                CommandTemplate::new("opencode-run-stdin", "opencode", &["run", "--model", "{model}"]).stdin(),
            ],
        ))),
    ]
}

/// Maps backend names to implementations. Adding a backend means registering
/// another `AgentBackend`.
pub struct AgentRegistry {
    backends: BTreeMap<String, Box<dyn AgentBackend>>,
}

impl AgentRegistry {
    pub fn empty() -> Self {
        Self {
            backends: BTreeMap::new(),
        }
    }

    /// cursor, claude, gemini, codex, amp, opencode.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for backend in default_backends() {
            registry.register(backend);
        }
        registry
    }

    /// Register a backend, replacing any with the same name.
    pub fn register(&mut self, backend: Box<dyn AgentBackend>) {
        self.backends
            .insert(backend.target().name.clone(), backend);
    }

    pub fn get(&self, name: &str) -> Result<&dyn AgentBackend> {
        self.backends
            .get(name)
            .map(|b| b.as_ref())
            .ok_or_else(|| Error::UnsupportedAgent {
                name: name.to_string(),
                supported: self.names().join(", "),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Seam between the dispatcher and real process spawning.
pub trait ProcessExecutor: Send + Sync {
    fn execute(&self, config: ProcessConfig) -> impl Future<Output = Result<ProcessOutput>> + Send;
}

/// Spawns real child processes.
pub struct SpawnExecutor;

impl ProcessExecutor for SpawnExecutor {
    async fn execute(&self, config: ProcessConfig) -> Result<ProcessOutput> {
        spawn_and_stream(config).await
    }
}

/// Outcome of dispatching one prompt.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub output: String,
    pub succeeded: bool,
    /// Label of the variant that succeeded.
    pub variant: Option<String>,
    pub attempts: Vec<AttemptRecord>,
}

pub struct Dispatcher<E = SpawnExecutor> {
    registry: AgentRegistry,
    executor: E,
    env: Env,
    working_dir: PathBuf,
    timeout: Duration,
}

impl Dispatcher<SpawnExecutor> {
    pub fn new(registry: AgentRegistry, env: Env, working_dir: PathBuf) -> Self {
        Self::with_executor(registry, SpawnExecutor, env, working_dir)
    }
}

impl<E: ProcessExecutor> Dispatcher<E> {
    pub fn with_executor(registry: AgentRegistry, executor: E, env: Env, working_dir: PathBuf) -> Self {
        Self {
            registry,
            executor,
            env,
            working_dir,
            timeout: DEFAULT_AGENT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Run `prompt` through `agent`, trying its invocation variants in order.
    ///
    /// Only an unknown agent is an error. When every variant fails, the
    /// returned `Dispatch` carries a failure message as its output.
    pub async fn dispatch(&self, agent: &str, prompt: &str, model: Option<&str>) -> Result<Dispatch> {
        let backend = self.registry.get(agent)?;
        let target = backend.target();
        let model = backend.model(model);
        let credential = backend.credential_var(&model);
        info!(
            agent,
            model = %model,
            credential = %credential,
            credential_present = self.env.is_set(&credential),
            prompt_chars = prompt.chars().count(),
            "dispatching prompt"
        );
        let child_env = backend.environment(&model, &self.env);

        let resolution = first_success_async(&target.variants, |variant| {
            self.attempt(variant, prompt, &model, &child_env)
        })
        .await;

        match resolution.winner {
            Some((variant, output)) => Ok(Dispatch {
                output,
                succeeded: true,
                variant: Some(variant),
                attempts: resolution.attempts,
            }),
            None => {
                let summary = Error::AllInvocationsFailed {
                    agent: target.name.clone(),
                    attempts: resolution.attempts.len(),
                };
                warn!(error = %summary, "agent dispatch failed");
                let mut output = format!("Error: {summary}\n");
                for attempt in &resolution.attempts {
                    let _ = write!(output, "\n- {attempt}");
                }
                Ok(Dispatch {
                    output,
                    succeeded: false,
                    variant: None,
                    attempts: resolution.attempts,
                })
            }
        }
    }

    async fn attempt(
        &self,
        variant: &CommandTemplate,
        prompt: &str,
        model: &str,
        child_env: &[(String, String)],
    ) -> Result<Option<String>> {
        let failed = |reason: String| Error::InvocationFailed {
            variant: variant.label.clone(),
            reason,
        };

        // Lives until the end of this attempt; dropping it deletes the file.
        let prompt_file = if variant.needs_prompt_file() {
            Some(write_prompt_file(prompt).map_err(|e| failed(e.to_string()))?)
        } else {
            None
        };
        let prompt_path = prompt_file.as_ref().map(|f| f.path().to_path_buf());

        let mut config = ProcessConfig::new(
            variant.program.clone(),
            variant.render_args(model, prompt, prompt_path.as_deref()),
            self.working_dir.clone(),
        );
        config.timeout = Some(self.timeout);
        config.log_prefix = format!("agent:{}", variant.label);
        config.env = child_env.to_vec();
        config.quiet = true;
        if variant.delivery == PromptDelivery::Stdin {
            config.stdin_file = prompt_path.clone();
        }

        info!(variant = %variant.label, program = %variant.program, "invoking agent");
        let started = Instant::now();
        let result = self.executor.execute(config).await;
        let elapsed_secs = started.elapsed().as_secs();

        match result {
            Ok(output) if output.success() => {
                let text = output.stdout().trim().to_string();
                info!(
                    variant = %variant.label,
                    elapsed_secs,
                    output_chars = text.chars().count(),
                    "agent invocation succeeded"
                );
                Ok(Some(text))
            }
            Ok(output) => {
                let mut reason = match output.signal {
                    Some(sig) => format!("killed by signal {sig}"),
                    None => format!("exited with code {}", output.exit_code),
                };
                let tail = stderr_tail(&output.stderr_lines);
                if !tail.is_empty() {
                    let _ = write!(reason, ": {tail}");
                }
                warn!(variant = %variant.label, elapsed_secs, %reason, "agent invocation failed");
                Err(failed(reason))
            }
            Err(Error::ProcessTimeout { timeout, .. }) => {
                warn!(variant = %variant.label, ?timeout, "agent invocation timed out");
                Err(failed(format!("timed out after {timeout:?}")))
            }
            Err(e) => {
                warn!(variant = %variant.label, error = %e, "agent invocation failed");
                Err(failed(e.to_string()))
            }
        }
    }
}

fn write_prompt_file(prompt: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("autoagent-prompt-")
        .suffix(".txt")
        .tempfile()?;
    file.write_all(prompt.as_bytes())?;
    file.flush()?;
    Ok(file)
}

fn stderr_tail(lines: &[String]) -> String {
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..]
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}
