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

//! Timestamp source fed by a packet capture process.
//!
//! The capture command (by default `tcpdump` with epoch timestamps and
//! process metadata) writes one line per packet. [`LineMatcher`] keeps the
//! lines attributed to the watched process that match the configured
//! pattern and extracts their integer-second timestamp; [`Capture`] fans
//! every extracted timestamp out to all subscribed aggregator inputs.

use querywatch_analytics::Timestamp;
use regex::Regex;
use std::process::{ExitStatus, Stdio};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    process::Command,
};
use tracing::{debug, info};

/// Prefix of diagnostics tcpdump interleaves with its packet lines
const DIAGNOSTIC_PREFIX: &str = "tcpdump:";

#[derive(Debug, strum_macros::Display)]
pub enum CaptureError {
    #[strum(to_string = "capture command is empty")]
    EmptyCommand,

    #[strum(to_string = "failed to run capture command: {0}")]
    IoError(std::io::Error),

    #[strum(to_string = "capture command has no stdout")]
    MissingStdout,

    #[strum(to_string = "capture command exited with {0}")]
    CommandFailed(ExitStatus),

    #[strum(to_string = "invalid timestamp '{0}' in capture output")]
    InvalidTimestamp(String),

    #[strum(to_string = "aggregator input closed while forwarding timestamps")]
    OutputClosed,
}

impl std::error::Error for CaptureError {}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::IoError(err)
    }
}

/// Extracts arrival timestamps from capture output lines
#[derive(Debug, Clone)]
pub struct LineMatcher {
    re: Regex,
}

impl LineMatcher {
    pub fn new(process_name: &str, pattern: &str) -> Result<Self, regex::Error> {
        let re = Regex::new(&format!(
            // Epoch timestamp with microsecond precision, the watched process
            // name, then the user pattern in its own group so it cannot
            // alter the preceding parts
            r"^(?P<timestamp>\d+)\.\d{{6}} .*proc {}.*(?:{})",
            regex::escape(process_name),
            pattern
        ))?;
        Ok(Self { re })
    }

    /// `Ok(None)` when the line is not a matching query
    pub fn timestamp(&self, line: &str) -> Result<Option<Timestamp>, CaptureError> {
        let captures = match self.re.captures(line) {
            Some(captures) => captures,
            None => return Ok(None),
        };
        let raw = &captures["timestamp"];
        raw.parse::<Timestamp>()
            .map(Some)
            .map_err(|_| CaptureError::InvalidTimestamp(raw.to_string()))
    }
}

pub struct Capture {
    command: Vec<String>,
    matcher: LineMatcher,
    outputs: Vec<async_channel::Sender<Timestamp>>,
}

impl Capture {
    pub fn new(
        command: Vec<String>,
        matcher: LineMatcher,
        outputs: Vec<async_channel::Sender<Timestamp>>,
    ) -> Self {
        Self {
            command,
            matcher,
            outputs,
        }
    }

    /// Spawn the capture command and forward its timestamps until it exits.
    pub async fn run(self) -> Result<(), CaptureError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(CaptureError::EmptyCommand)?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child.stdout.take().ok_or(CaptureError::MissingStdout)?;
        info!("Monitoring started with '{}'", self.command.join(" "));

        let forwarded = forward_lines(BufReader::new(stdout), &self.matcher, &self.outputs).await?;
        debug!("Capture output ended after {forwarded} matching lines");

        let status = child.wait().await?;
        if !status.success() {
            return Err(CaptureError::CommandFailed(status));
        }
        Ok(())
    }
}

/// Send the timestamp of every matching line to all outputs, in line order.
///
/// Invalid UTF-8 is replaced rather than rejected. Returns the number of matching lines once the reader is exhausted.
pub async fn forward_lines<R: AsyncBufRead + Unpin>(
    reader: R,
    matcher: &LineMatcher,
    outputs: &[async_channel::Sender<Timestamp>],
) -> Result<u64, CaptureError> {
    let mut segments = reader.split(b'\n');
    let mut forwarded = 0;
    while let Some(segment) = segments.next_segment().await? {
        // Packet payloads are not guaranteed to be UTF-8
        let line = String::from_utf8_lossy(&segment);
        let line = line.strip_suffix('\r').unwrap_or(&line);
        if line.starts_with(DIAGNOSTIC_PREFIX) {
            info!("{line}");
            continue;
        }
        if let Some(timestamp) = matcher.timestamp(line)? {
            for output in outputs {
                output
                    .send(timestamp)
                    .await
                    .map_err(|_| CaptureError::OutputClosed)?;
            }
            forwarded += 1;
        }
    }
    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    const QUERY_LINE: &str = "1700000000.123456 (proc mDNSResponder:412:[NP]) IP 10.0.0.2.53 > 10.0.0.1.5353: 1234+ A? 12-courier.push-apple.com.akadns.net. (45)";

    fn matcher() -> LineMatcher {
        LineMatcher::new("mDNSResponder", r"push-apple\.com\.akadns\.net").unwrap()
    }

    #[test]
    fn test_matching_line() {
        assert_eq!(matcher().timestamp(QUERY_LINE).unwrap(), Some(1700000000));
    }

    #[test]
    fn test_other_process_is_ignored() {
        let line = QUERY_LINE.replace("mDNSResponder", "curl");
        assert_eq!(matcher().timestamp(&line).unwrap(), None);
    }

    #[test]
    fn test_other_domain_is_ignored() {
        let line = QUERY_LINE.replace("push-apple.com.akadns.net", "example.com");
        assert_eq!(matcher().timestamp(&line).unwrap(), None);
    }

    #[test]
    fn test_millisecond_timestamp_is_ignored() {
        let line = QUERY_LINE.replace("1700000000.123456", "1700000000.123");
        assert_eq!(matcher().timestamp(&line).unwrap(), None);
    }

    #[test]
    fn test_pattern_alternation_stays_grouped() {
        // Without the group, "|example" would match any line containing it
        let matcher = LineMatcher::new("mDNSResponder", "akadns|example").unwrap();
        assert_eq!(matcher.timestamp("x example").unwrap(), None);
        assert_eq!(matcher.timestamp(QUERY_LINE).unwrap(), Some(1700000000));
    }

    #[test]
    fn test_timestamp_overflow() {
        let line = QUERY_LINE.replace("1700000000", "99999999999999999999");
        assert!(matches!(
            matcher().timestamp(&line),
            Err(CaptureError::InvalidTimestamp(_))
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_forward_lines_fans_out() {
        let input = [
            QUERY_LINE.to_string(),
            "tcpdump: listening on pktap, link-type PKTAP".to_string(),
            QUERY_LINE.replace("1700000000", "1700000001"),
            QUERY_LINE.replace("mDNSResponder", "curl"),
        ]
        .join("\n");
        let (first_tx, first_rx) = async_channel::unbounded();
        let (second_tx, second_rx) = async_channel::unbounded();

        let forwarded = forward_lines(input.as_bytes(), &matcher(), &[first_tx, second_tx])
            .await
            .unwrap();

        assert_eq!(forwarded, 2);
        for rx in [first_rx, second_rx] {
            assert_eq!(rx.recv().await.unwrap(), 1700000000);
            assert_eq!(rx.recv().await.unwrap(), 1700000001);
            assert!(rx.is_empty());
        }
        assert!(logs_contain("tcpdump: listening on pktap"));
    }

    #[tokio::test]
    async fn test_forward_lines_skips_invalid_utf8() {
        let mut input = b"1700000000.000001 (proc curl:99:[NP]) IP 10.0.0.2.5353 > 224.0.0.251.5353: 0 PTR? caf\xe9.local. (30)\n".to_vec();
        input.extend_from_slice(QUERY_LINE.as_bytes());
        input.extend_from_slice(b"\r\n");
        let (tx, rx) = async_channel::unbounded();

        let forwarded = forward_lines(input.as_slice(), &matcher(), &[tx]).await.unwrap();

        assert_eq!(forwarded, 1);
        assert_eq!(rx.recv().await.unwrap(), 1700000000);
    }

    #[tokio::test]
    async fn test_forward_lines_output_closed() {
        let (tx, rx) = async_channel::unbounded();
        drop(rx);
        let result = forward_lines(QUERY_LINE.as_bytes(), &matcher(), &[tx]).await;
        assert!(matches!(result, Err(CaptureError::OutputClosed)));
    }

    #[tokio::test]
    async fn test_run_empty_command() {
        let capture = Capture::new(vec![], matcher(), vec![]);
        assert!(matches!(
            capture.run().await,
            Err(CaptureError::EmptyCommand)
        ));
    }

    #[tokio::test]
    async fn test_run_forwards_command_output() {
        let (tx, rx) = async_channel::unbounded();
        let capture = Capture::new(
            vec!["echo".to_string(), QUERY_LINE.to_string()],
            matcher(),
            vec![tx],
        );
        capture.run().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), 1700000000);
    }

    #[tokio::test]
    async fn test_run_command_failure() {
        let capture = Capture::new(vec!["false".to_string()], matcher(), vec![]);
        assert!(matches!(
            capture.run().await,
            Err(CaptureError::CommandFailed(_))
        ));
    }
}
