//! External "reload a named service" action.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time;

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("failed to run reload command: {0}")]
    Io(#[source] std::io::Error),

    #[error("reload exited with status {}: {stderr}", exit_status(.code))]
    Exit { code: Option<i32>, stderr: String },

    #[error("reload timed out after {0:?}")]
    Timeout(Duration),
}

fn exit_status(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

/// Makes the proxy daemon pick up a rewritten config file.
#[async_trait]
pub trait ServiceReloader: Send + Sync {
    async fn reload(&self) -> Result<(), ReloadError>;
}

/// Runs a command and treats a zero exit status as a successful reload.
#[derive(Debug, Clone)]
pub struct CommandReloader {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandReloader {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// `systemctl reload <service>`.
    pub fn systemctl(service: &str, timeout: Duration) -> Self {
        Self::new("systemctl", vec!["reload".to_string(), service.to_string()], timeout)
    }
}

#[async_trait]
impl ServiceReloader for CommandReloader {
    async fn reload(&self) -> Result<(), ReloadError> {
        tracing::debug!(program = %self.program, args = ?self.args, "Running reload command");

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ReloadError::Io)?;

        // Dropping the wait future on timeout kills the child.
        let output = match time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(ReloadError::Io)?,
            Err(_) => return Err(ReloadError::Timeout(self.timeout)),
        };

        if output.status.success() {
            Ok(())
        } else {
            Err(ReloadError::Exit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
