// Copyright (C) 2025-present The QueryWatch Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Corrective action run when the query rate crosses the threshold: capture
//! a diagnostic snapshot of the supervised process, then restart it.
//!
//! Failures are logged and never retried.

use crate::config::ActionConfig;
use querywatch_analytics::Timestamp;
use std::{
    process::{ExitStatus, Output, Stdio},
    time::Duration,
};
use tokio::process::Command;
use tracing::{error, info};

#[derive(Debug, strum_macros::Display)]
pub enum ActionError {
    #[strum(to_string = "command is empty")]
    EmptyCommand,

    #[strum(to_string = "io error: {0}")]
    IoError(std::io::Error),

    #[strum(to_string = "command timed out after {0:?}")]
    Timeout(Duration),

    #[strum(to_string = "command exited with {status}: {stderr}")]
    CommandFailed { status: ExitStatus, stderr: String },
}

impl std::error::Error for ActionError {}

impl From<std::io::Error> for ActionError {
    fn from(err: std::io::Error) -> Self {
        ActionError::IoError(err)
    }
}

#[derive(Debug, Clone)]
pub struct CorrectiveAction {
    diagnostic_command: Vec<String>,
    restart_command: Vec<String>,
    command_timeout: Duration,
}

impl CorrectiveAction {
    pub fn new(
        diagnostic_command: Vec<String>,
        restart_command: Vec<String>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            diagnostic_command,
            restart_command,
            command_timeout,
        }
    }

    pub fn from_config(config: &ActionConfig) -> Self {
        Self::new(
            config.diagnostic_command.clone(),
            config.restart_command.clone(),
            config.command_timeout,
        )
    }

    /// Snapshot, then restart. An empty diagnostic command skips the
    /// snapshot.
    pub async fn run(&self, timestamp: Timestamp, rolling_average: f64) -> Result<(), ActionError> {
        info!("{timestamp}: running corrective action for rolling average {rolling_average:.1}");
        if !self.diagnostic_command.is_empty() {
            match run_command(&self.diagnostic_command, self.command_timeout).await {
                Ok(output) => {
                    for line in String::from_utf8_lossy(&output.stdout).lines() {
                        info!("{line}");
                    }
                }
                // The restart still goes ahead without a snapshot
                Err(err) => error!("Diagnostic command failed: {err}"),
            }
        }
        match run_command(&self.restart_command, self.command_timeout).await {
            Ok(_) => {
                info!("'{}' succeeded, process restarted", self.restart_command.join(" "));
                Ok(())
            }
            Err(err) => {
                error!("'{}' failed: {err}", self.restart_command.join(" "));
                Err(err)
            }
        }
    }
}

async fn run_command(command: &[String], timeout: Duration) -> Result<Output, ActionError> {
    let (program, args) = command.split_first().ok_or(ActionError::EmptyCommand)?;
    let mut child = Command::new(program);
    child.args(args).stdin(Stdio::null()).kill_on_drop(true);
    let output = tokio::time::timeout(timeout, child.output())
        .await
        .map_err(|_| ActionError::Timeout(timeout))??;
    if !output.status.success() {
        return Err(ActionError::CommandFailed {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}
