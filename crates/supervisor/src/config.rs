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

use serde_with::serde_as;
use std::{path::PathBuf, str::FromStr, time::Duration};

pub const PROGRAM_NAME: &str = "querywatch";

const DEFAULT_PATTERN: &str = r"push-apple\.com\.akadns\.net";
const DEFAULT_PROCESS_NAME: &str = "mDNSResponder";

pub(crate) const fn default_rolling_interval() -> u32 {
    15
}

pub(crate) const fn default_threshold() -> u64 {
    100
}

pub(crate) const fn default_reporting_interval() -> u32 {
    60
}

pub(crate) const fn default_buffer_size() -> usize {
    100
}

pub(crate) const fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_lock_path() -> PathBuf {
    PathBuf::from(format!("/var/run/{PROGRAM_NAME}.lock"))
}

fn default_database_path() -> PathBuf {
    PathBuf::from(format!("/var/log/{PROGRAM_NAME}.db"))
}

#[derive(Debug, Clone, strum_macros::Display)]
pub enum ConfigurationError {
    #[strum(to_string = "rolling.interval must be greater than 0")]
    InvalidRollingInterval,

    #[strum(to_string = "rolling.threshold must be greater than 0")]
    InvalidThreshold,

    #[strum(to_string = "reporting.interval must be greater than 0")]
    InvalidReportingInterval,

    #[strum(to_string = "{0}.buffer_size must be greater than 0")]
    InvalidBufferSize(&'static str),

    #[strum(to_string = "capture.command must not be empty")]
    EmptyCaptureCommand,

    #[strum(to_string = "invalid capture pattern: {0}")]
    InvalidPattern(String),

    #[strum(to_string = "invalid logging level '{0}'")]
    InvalidLoggingLevel(String),
}

impl std::error::Error for ConfigurationError {}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub rolling: RollingConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub action: ActionConfig,
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            logging: LoggingConfig::default(),
            capture: CaptureConfig::default(),
            rolling: RollingConfig::default(),
            reporting: ReportingConfig::default(),
            action: ActionConfig::default(),
            lock_path: default_lock_path(),
            database_path: default_database_path(),
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.logging.validate()?;
        self.rolling.validate()?;
        self.reporting.validate()?;
        self.capture.validate()?;
        Ok(())
    }

    /// Move the lock and the database under `/tmp`, so a development instance
    /// runs next to a production one without touching its data.
    pub fn into_dev_mode(mut self) -> Self {
        self.lock_path = PathBuf::from(format!("/tmp/{PROGRAM_NAME}.lock"));
        self.database_path = PathBuf::from(format!("/tmp/{PROGRAM_NAME}.db"));
        self
    }
}

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub threads: Option<usize>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        tracing::Level::from_str(&self.level)
            .map(|_| ())
            .map_err(|_| ConfigurationError::InvalidLoggingLevel(self.level.clone()))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CaptureConfig {
    /// Program and arguments emitting one line per captured packet
    pub command: Vec<String>,
    /// Only packets attributed to this process are counted
    pub process_name: String,
    /// Regular expression matched against the rest of the line
    pub pattern: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            command: [
                "/usr/sbin/tcpdump",
                "-l",
                "port",
                "53",
                "-tt",
                "-k",
                "NP",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            process_name: DEFAULT_PROCESS_NAME.to_string(),
            pattern: DEFAULT_PATTERN.to_string(),
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.command.is_empty() {
            return Err(ConfigurationError::EmptyCaptureCommand);
        }
        crate::capture::LineMatcher::new(&self.process_name, &self.pattern)
            .map(|_| ())
            .map_err(|err| ConfigurationError::InvalidPattern(err.to_string()))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RollingConfig {
    /// Window length in seconds
    #[serde(default = "default_rolling_interval")]
    pub interval: u32,

    /// Queries per second averaged over the window
    #[serde(default = "default_threshold")]
    pub threshold: u64,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            interval: default_rolling_interval(),
            threshold: default_threshold(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl RollingConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.interval == 0 {
            return Err(ConfigurationError::InvalidRollingInterval);
        }
        if self.threshold == 0 {
            return Err(ConfigurationError::InvalidThreshold);
        }
        if self.buffer_size == 0 {
            return Err(ConfigurationError::InvalidBufferSize("rolling"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReportingConfig {
    /// Bucket width in seconds
    #[serde(default = "default_reporting_interval")]
    pub interval: u32,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            interval: default_reporting_interval(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl ReportingConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.interval == 0 {
            return Err(ConfigurationError::InvalidReportingInterval);
        }
        if self.buffer_size == 0 {
            return Err(ConfigurationError::InvalidBufferSize("reporting"));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ActionConfig {
    /// Run before the restart, its output is logged
    pub diagnostic_command: Vec<String>,

    pub restart_command: Vec<String>,

    /// Upper bound for each command run
    #[serde(default = "default_command_timeout")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub command_timeout: Duration,
}

impl Default for ActionConfig {
    fn default() -> Self {
        let ps = format!(
            r#"/bin/ps -o pid,%cpu,rss,etime,command -p "$(/usr/bin/pgrep {DEFAULT_PROCESS_NAME} | /usr/bin/tr '\n' , )""#
        );
        Self {
            diagnostic_command: vec!["/bin/zsh".to_string(), "-c".to_string(), ps],
            restart_command: vec![
                "/usr/bin/killall".to_string(),
                DEFAULT_PROCESS_NAME.to_string(),
            ],
            command_timeout: default_command_timeout(),
        }
    }
}
