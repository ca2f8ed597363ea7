use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

const PARTIAL_OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// Configuration for spawning a child process.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
    pub log_prefix: String,
    pub env: Vec<(String, String)>,
    /// Opened and attached as the child's stdin; `/dev/null` otherwise.
    pub stdin_file: Option<PathBuf>,
    /// Log child output at debug level instead of info/warn.
    pub quiet: bool,
}

impl ProcessConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>, working_dir: PathBuf) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir,
            timeout: None,
            log_prefix: String::new(),
            env: vec![],
            stdin_file: None,
            quiet: false,
        }
    }
}

/// Output from a completed child process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub signal: Option<i32>,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.signal.is_none()
    }

    pub fn stdout(&self) -> String {
        self.stdout_lines.join("\n")
    }
}

/// Spawn a child process, collect its output line-by-line, and enforce the
/// optional timeout.
///
/// The child is placed in its own process group on Unix. SIGINT and SIGTERM
/// received by the parent are forwarded to that group, and a timeout sends
/// SIGTERM followed by SIGKILL to the whole group.
pub async fn spawn_and_stream(config: ProcessConfig) -> Result<ProcessOutput> {
    let stdin = if let Some(ref path) = config.stdin_file {
        let file = std::fs::File::open(path).map_err(|e| {
            Error::Process(format!("failed to open stdin file {}: {e}", path.display()))
        })?;
        Stdio::from(file)
    } else {
        Stdio::null()
    };

    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .current_dir(&config.working_dir)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Process(format!("failed to spawn '{}': {e}", config.command)))?;

    let pid = child
        .id()
        .ok_or_else(|| Error::Process("child has no pid".into()))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Process("stdout not captured".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Process("stderr not captured".into()))?;

    let quiet = config.quiet;
    let prefix_out = config.log_prefix.clone();
    let prefix_err = config.log_prefix;

    let stdout_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        let mut reader = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            if quiet {
                debug!("[{prefix_out}] {line}");
            } else {
                info!("[{prefix_out}] {line}");
            }
            lines.push(line);
        }
        lines
    });

    let stderr_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            if quiet {
                debug!("[{prefix_err}] {line}");
            } else {
                warn!("[{prefix_err}] {line}");
            }
            lines.push(line);
        }
        lines
    });

    #[cfg(unix)]
    let signal_task = {
        let pgid = pid as i32;
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            let (Ok(mut sigint), Ok(mut sigterm)) = (
                signal(SignalKind::interrupt()),
                signal(SignalKind::terminate()),
            ) else {
                return;
            };
            loop {
                tokio::select! {
                    _ = sigint.recv() => {
                        unsafe { libc::killpg(pgid, libc::SIGINT); }
                    }
                    _ = sigterm.recv() => {
                        unsafe { libc::killpg(pgid, libc::SIGTERM); }
                    }
                }
            }
        })
    };
    #[cfg(not(unix))]
    let _ = pid;

    let status = if let Some(dur) = config.timeout {
        match tokio::time::timeout(dur, child.wait()).await {
            Ok(r) => r.map_err(|e| Error::Process(format!("wait error: {e}")))?,
            Err(_) => {
                #[cfg(unix)]
                signal_task.abort();
                #[cfg(unix)]
                unsafe {
                    libc::killpg(pid as i32, libc::SIGTERM);
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
                #[cfg(unix)]
                unsafe {
                    libc::killpg(pid as i32, libc::SIGKILL);
                }
                let _ = child.kill().await;

                // Pipes close once the group is dead; keep whatever was read.
                let stdout_lines = collect_partial(stdout_task).await;
                let stderr_lines = collect_partial(stderr_task).await;
                return Err(Error::ProcessTimeout {
                    timeout: dur,
                    stdout_lines,
                    stderr_lines,
                });
            }
        }
    } else {
        child
            .wait()
            .await
            .map_err(|e| Error::Process(format!("wait error: {e}")))?
    };

    #[cfg(unix)]
    signal_task.abort();

    let stdout_lines = stdout_task
        .await
        .map_err(|e| Error::Process(format!("stdout reader failed: {e}")))?;
    let stderr_lines = stderr_task
        .await
        .map_err(|e| Error::Process(format!("stderr reader failed: {e}")))?;

    let (exit_code, signal) = extract_exit_info(&status);

    Ok(ProcessOutput {
        exit_code,
        signal,
        stdout_lines,
        stderr_lines,
    })
}

/// Wait briefly for a reader to drain. A descendant that escaped the process
/// group may still hold the pipe, so a reader still running after the grace
/// period is aborted.
async fn collect_partial(mut task: tokio::task::JoinHandle<Vec<String>>) -> Vec<String> {
    match tokio::time::timeout(PARTIAL_OUTPUT_GRACE, &mut task).await {
        Ok(Ok(lines)) => lines,
        Ok(Err(_)) => Vec::new(),
        Err(_) => {
            task.abort();
            Vec::new()
        }
    }
}

fn extract_exit_info(status: &std::process::ExitStatus) -> (i32, Option<i32>) {
    if let Some(code) = status.code() {
        return (code, None);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return (128 + sig, Some(sig));
        }
    }
    (-1, None)
}
