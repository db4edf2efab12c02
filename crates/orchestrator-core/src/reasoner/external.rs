//! External reasoner: opaque child-process invocation.
//!
//! The configured command gets the prompt on stdin and returns its answer
//! on stdout. Every call is bounded by a timeout and killed on expiry.
//! Children inherit `CONTEXT_ORCHESTRATOR_INTERNAL=1` so the surrounding
//! CLI wrapper does not re-record the invocation as a new conversation.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

use super::INTERNAL_ENV_FLAG;
use crate::error::{CoreError, Result};

/// Child-process reasoner.
#[derive(Debug, Clone)]
pub struct ExternalReasoner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ExternalReasoner {
    /// Build from the configured command line. Returns `None` for an empty
    /// command (external reasoning disabled).
    pub fn from_command(command: &str, timeout: Duration) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one prompt through the child process. Non-zero exit, timeout,
    /// or empty output are all errors; the router decides what to do with
    /// them.
    pub async fn invoke(&self, prompt: &str) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(INTERNAL_ENV_FLAG, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CoreError::Init(format!("failed to spawn {}: {}", self.program, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            drop(stdin);
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(program = %self.program, "external reasoner timed out");
                return Err(CoreError::Timeout);
            }
        };

        if !output.status.success() {
            return Err(CoreError::Init(format!(
                "external reasoner exited with {}",
                output.status
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(CoreError::Init(
                "external reasoner produced no output".to_string(),
            ));
        }
        Ok(text)
    }
}

// ============================================================================
// TESTS
// ============================================================================
