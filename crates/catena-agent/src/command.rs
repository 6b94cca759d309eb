//! Agents backed by shell commands.
//!
//! The agent name is a command line run through `sh -c`. The JSON input is
//! written to stdin and stdout is parsed as the JSON output.

use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use catena_config::AgentRef;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::AgentError;
use crate::invoker::Framework;

/// Exit status a command uses to ask for a retry (`EX_TEMPFAIL`).
pub const EXIT_TEMPFAIL: i32 = 75;

#[derive(Debug, Clone)]
pub struct CommandFramework {
  shell: String,
}

impl CommandFramework {
  pub const TAG: &'static str = "command";

  pub fn new() -> Self {
    Self {
      shell: "sh".to_string(),
    }
  }
}

impl Default for CommandFramework {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl Framework for CommandFramework {
  fn tag(&self) -> &str {
    Self::TAG
  }

  async fn invoke(
    &self,
    agent: &AgentRef,
    input: serde_json::Value,
  ) -> Result<serde_json::Value, AgentError> {
    let payload = serde_json::to_vec(&input)
      .map_err(|e| AgentError::Permanent(format!("failed to serialize input: {}", e)))?;

    let mut child = Command::new(&self.shell)
      .arg("-c")
      .arg(&agent.name)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
      .map_err(|e| AgentError::Transient(format!("failed to spawn '{}': {}", agent.name, e)))?;

    // Stdin must be written while stdout drains; both pipes are bounded.
    let stdin = child.stdin.take();
    let write = async move {
      let Some(mut stdin) = stdin else {
        return Ok(());
      };
      match stdin.write_all(&payload).await {
        // A command that exits without reading stdin closes the pipe early.
        Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
        other => other,
      }
    };

    let (written, output) = tokio::join!(write, child.wait_with_output());
    let output = output
      .map_err(|e| AgentError::Transient(format!("failed to wait for '{}': {}", agent.name, e)))?;
    written.map_err(|e| AgentError::Transient(format!("failed to write input: {}", e)))?;

    debug!(agent = %agent, status = %output.status, "command finished");

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
      let message = format!("'{}' exited with {}: {}", agent.name, output.status, stderr);
      return match output.status.code() {
        Some(EXIT_TEMPFAIL) => Err(AgentError::Transient(message)),
        _ => Err(AgentError::Permanent(message)),
      };
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if stdout.trim().is_empty() {
      return Ok(serde_json::Value::Null);
    }

    serde_json::from_str(stdout.trim())
      .map_err(|e| AgentError::Permanent(format!("invalid JSON output from '{}': {}", agent.name, e)))
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use serde_json::json;

  async fn run(command: &str, input: serde_json::Value) -> Result<serde_json::Value, AgentError> {
    CommandFramework::new()
      .invoke(&AgentRef::new("command", command), input)
      .await
  }

  #[tokio::test]
  async fn test_cat_round_trips_input() {
    let output = run("cat", json!({"x": [1, 2]})).await.unwrap();
    assert_eq!(output, json!({"x": [1, 2]}));
  }

  #[tokio::test]
  async fn test_empty_stdout_is_null() {
    let output = run("true", json!({"x": 1})).await.unwrap();
    assert_eq!(output, serde_json::Value::Null);
  }

  #[tokio::test]
  async fn test_tempfail_exit_is_transient() {
    let err = run("exit 75", json!(null)).await.unwrap_err();
    assert!(matches!(err, AgentError::Transient(_)));
  }

  #[tokio::test]
  async fn test_other_exit_is_permanent() {
    let err = run("echo boom >&2; exit 3", json!(null)).await.unwrap_err();
    match err {
      AgentError::Permanent(message) => assert!(message.contains("boom")),
      other => panic!("expected permanent error, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_large_payload_round_trips() {
    let blob = "x".repeat(1024 * 1024);
    let output = tokio::time::timeout(
      std::time::Duration::from_secs(10),
      run("cat", json!({ "blob": blob })),
    )
    .await
    .expect("command agent did not finish")
    .unwrap();
    assert_eq!(output["blob"].as_str().map(str::len), Some(1024 * 1024));
  }

  #[tokio::test]
  async fn test_command_ignoring_stdin_succeeds() {
    let blob = "y".repeat(1024 * 1024);
    let output = run("echo '{\"ok\": true}'", json!({ "blob": blob })).await.unwrap();
    assert_eq!(output, json!({ "ok": true }));
  }

  #[tokio::test]
  async fn test_invalid_json_is_permanent() {
    let err = run("echo not-json", json!(null)).await.unwrap_err();
    assert!(matches!(err, AgentError::Permanent(_)));
  }
}
