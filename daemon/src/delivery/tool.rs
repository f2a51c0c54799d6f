//! External tool invocation

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::FleetError;

/// Captured result of a finished tool
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// One tool invocation
#[derive(Debug, Default)]
pub struct ToolCommand<'a> {
    pub program: &'a str,
    pub args: Vec<String>,
    pub cwd: Option<&'a Path>,
    pub envs: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
}

impl<'a> ToolCommand<'a> {
    pub fn new(program: &'a str) -> Self {
        Self {
            program,
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, cwd: &'a Path) -> Self {
        self.cwd = Some(cwd);
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.envs.push((key.to_string(), value.into()));
        self
    }

    pub fn stdin(mut self, data: Vec<u8>) -> Self {
        self.stdin = Some(data);
        self
    }

    /// Run to completion, capturing stdout and stderr.
    ///
    /// Only a failure to spawn is an error; a non-zero exit is reported
    /// through `ToolOutput::success`.
    pub async fn run(self) -> Result<ToolOutput, FleetError> {
        debug!("Running {} {:?}", self.program, self.args);

        let mut command = Command::new(self.program);
        command
            .args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = self.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            FleetError::CommandError(format!("Failed to run {}: {}", self.program, e))
        })?;

        // Feed stdin from a separate task so a chatty child cannot deadlock us
        let feeder = match (child.stdin.take(), self.stdin) {
            (Some(mut pipe), Some(data)) => Some(tokio::spawn(async move {
                let result = pipe.write_all(&data).await;
                drop(pipe);
                result
            })),
            _ => None,
        };

        let output = child.wait_with_output().await.map_err(|e| {
            FleetError::CommandError(format!("Failed to wait for {}: {}", self.program, e))
        })?;

        if let Some(feeder) = feeder {
            match feeder.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to write stdin of {}: {}", self.program, e),
                Err(e) => warn!("Stdin writer of {} panicked: {}", self.program, e),
            }
        }

        Ok(ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
