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


use querywatch_supervisor::{config::SupervisorConfig, init_supervision, store::StatsStore};
use std::{path::Path, time::Duration};

const QUERY_LINE: &str = "(proc mDNSResponder:412:[NP]) IP 10.0.0.2.53 > 10.0.0.1.5353: 1234+ A? 12-courier.push-apple.com.akadns.net. (45)";

fn config(command: Vec<String>, database_path: &Path) -> SupervisorConfig {
    let mut config = SupervisorConfig::default();
    config.capture.command = command;
    config.action.diagnostic_command = vec![];
    config.action.restart_command = vec!["true".to_string()];
    config.database_path = database_path.to_path_buf();
    config
}

/// `printf` command emitting one query line per timestamp
fn printf_queries(timestamps: &[i64]) -> Vec<String> {
    let lines: String = timestamps
        .iter()
        .map(|ts| format!("{ts}.000000 {QUERY_LINE}\\n"))
        .collect();
    vec!["printf".to_string(), lines]
}

/// Reports are written by spawned tasks that may outlive the supervision
async fn wait_for_count(store: &StatsStore, minute: i64) -> Option<u64> {
    for _ in 0..100 {
        if let Some(count) = store.count(minute).unwrap() {
            return Some(count);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}

#[tokio::test]
async fn test_capture_output_is_counted_per_interval() {
    let dir = tempfile::tempdir().unwrap();
    let database_path = dir.path().join("stats.db");
    // Buckets 1699999980 and 1700000040, the last line closes the second one
    let command = printf_queries(&[
        1699999981, 1699999982, 1699999982, 1700000045, 1700000101,
    ]);
    let meter = opentelemetry::global::meter("test");

    let result = init_supervision(config(command, &database_path), meter).await;
    assert!(result.is_ok(), "unexpected result: {result:?}");

    let store = StatsStore::open(&database_path).unwrap();
    assert_eq!(wait_for_count(&store, 1699999980).await, Some(3));
    assert_eq!(wait_for_count(&store, 1700000040).await, Some(1));
    // Still accumulating when the capture ended
    assert_eq!(store.count(1700000100).unwrap(), None);
}

#[tokio::test]
async fn test_failing_capture_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let database_path = dir.path().join("stats.db");
    let meter = opentelemetry::global::meter("test");

    let result = init_supervision(config(vec!["false".to_string()], &database_path), meter).await;
    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("capture command exited with"));
}

#[tokio::test]
async fn test_invalid_database_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not-a-directory");
    std::fs::write(&file, b"").unwrap();
    let meter = opentelemetry::global::meter("test");

    let result = init_supervision(
        config(printf_queries(&[1]), &file.join("stats.db")),
        meter,
    )
    .await;
    assert!(result.is_err());
}
