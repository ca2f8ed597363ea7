use std::path::PathBuf;
use std::time::Duration;

use autoagent::error::Error;
use autoagent::process::{ProcessConfig, spawn_and_stream};

fn make_config(command: &str, args: &[&str]) -> ProcessConfig {
    let mut config = ProcessConfig::new(
        command,
        args.iter().map(|s| s.to_string()).collect(),
        PathBuf::from("."),
    );
    config.log_prefix = "test".to_string();
    config
}

#[tokio::test]
async fn test_stdout_streaming() {
    let config = make_config("bash", &["-c", "echo line1; echo line2; echo line3"]);
    let output = spawn_and_stream(config).await.unwrap();
    assert!(output.success());
    assert_eq!(output.exit_code, 0);
    assert_eq!(output.signal, None);
    assert_eq!(output.stdout_lines, vec!["line1", "line2", "line3"]);
    assert_eq!(output.stdout(), "line1\nline2\nline3");
}

#[tokio::test]
async fn test_mixed_stdout_stderr() {
    let config = make_config(
        "bash",
        &["-c", "echo out1; echo err1 >&2; echo out2; echo err2 >&2"],
    );
    let output = spawn_and_stream(config).await.unwrap();
    assert!(output.success());
    assert_eq!(output.stdout_lines, vec!["out1", "out2"]);
    assert_eq!(output.stderr_lines, vec!["err1", "err2"]);
}

#[tokio::test]
async fn test_nonzero_exit_code() {
    let config = make_config("bash", &["-c", "exit 42"]);
    let output = spawn_and_stream(config).await.unwrap();
    assert!(!output.success());
    assert_eq!(output.exit_code, 42);
    assert_eq!(output.signal, None);
}

#[tokio::test]
#[cfg(unix)]
async fn test_signal_killed() {
    let config = make_config("bash", &["-c", "kill -9 $$"]);
    let output = spawn_and_stream(config).await.unwrap();
    assert!(!output.success());
    assert_eq!(output.signal, Some(9));
}

#[tokio::test]
async fn test_timeout_keeps_partial_output() {
    let mut config = make_config("bash", &["-c", "echo started; exec sleep 30"]);
    config.timeout = Some(Duration::from_millis(500));
    let err = spawn_and_stream(config).await.unwrap_err();
    assert!(err.to_string().contains("timed out"));
    match err {
        Error::ProcessTimeout { stdout_lines, .. } => assert_eq!(stdout_lines, vec!["started"]),
        other => panic!("expected timeout, got {other}"),
    }
}

#[tokio::test]
async fn test_spawn_failure() {
    let config = make_config("nonexistent_binary_xyz_123", &[]);
    let err = spawn_and_stream(config).await.unwrap_err();
    assert!(err.to_string().contains("failed to spawn"));
}

#[tokio::test]
async fn test_env_vars() {
    let mut config = make_config("bash", &["-c", "echo $AUTOAGENT_TEST_VAR"]);
    config.env = vec![("AUTOAGENT_TEST_VAR".to_string(), "hello_world".to_string())];
    let output = spawn_and_stream(config).await.unwrap();
    assert!(output.success());
    assert_eq!(output.stdout_lines, vec!["hello_world"]);
}

#[tokio::test]
async fn test_stdin_file_is_attached() {
    let dir = tempfile::TempDir::new().unwrap();
    let prompt = dir.path().join("prompt.txt");
    std::fs::write(&prompt, "first\nsecond\n").unwrap();

    let mut config = make_config("cat", &[]);
    config.stdin_file = Some(prompt);
    let output = spawn_and_stream(config).await.unwrap();
    assert_eq!(output.stdout_lines, vec!["first", "second"]);
}

#[tokio::test]
async fn test_missing_stdin_file() {
    let mut config = make_config("cat", &[]);
    config.stdin_file = Some(PathBuf::from("/nonexistent/prompt.txt"));
    let err = spawn_and_stream(config).await.unwrap_err();
    assert!(err.to_string().contains("failed to open stdin file"));
}

#[tokio::test]
async fn test_stdin_is_null_by_default() {
    let config = make_config("cat", &[]);
    let output = tokio::time::timeout(Duration::from_secs(5), spawn_and_stream(config))
        .await
        .expect("cat should see EOF immediately")
        .unwrap();
    assert!(output.success());
    assert!(output.stdout_lines.is_empty());
}

#[tokio::test]
#[cfg(unix)]
async fn test_timeout_kills_descendants() {
    let dir = tempfile::TempDir::new().unwrap();
    let pid_file = dir.path().join("descendant.pid");

    // The shell ignores TERM; its background child must still die with the group.
    let mut config = make_config(
        "bash",
        &[
            "-c",
            &format!(
                "sleep 30 & echo $! > {}; trap '' TERM; wait",
                pid_file.display()
            ),
        ],
    );
    config.timeout = Some(Duration::from_millis(300));
    let result = spawn_and_stream(config).await;
    assert!(matches!(result, Err(Error::ProcessTimeout { .. })));

    let pid: i32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let alive = unsafe { libc::kill(pid, 0) } == 0;
    assert!(!alive, "descendant {pid} survived timeout");
}
