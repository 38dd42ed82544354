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

//! Durable per-interval query counts in SQLite.
//!
//! A count recorded for an interval start that already has a row is added to
//! the stored value, so an interval reported twice (e.g. once before and
//! once after a supervisor restart) accumulates instead of being
//! overwritten.

use querywatch_analytics::Timestamp;
use rusqlite::{params, Connection, OptionalExtension};
use std::{
    path::Path,
    sync::{Arc, Mutex},
};
use tracing::{debug, info};

#[derive(Debug, strum_macros::Display)]
pub enum StoreError {
    #[strum(to_string = "sqlite error: {0}")]
    SqliteError(rusqlite::Error),

    #[strum(to_string = "io error: {0}")]
    IoError(std::io::Error),

    #[strum(to_string = "count {0} does not fit the database")]
    CountOutOfRange(u64),

    #[strum(to_string = "stats store connection lock is poisoned")]
    Poisoned,

    #[strum(to_string = "blocking write task failed: {0}")]
    JoinError(tokio::task::JoinError),
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::SqliteError(err)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::IoError(err)
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::JoinError(err)
    }
}

/// Shared handle to the stats database.
///
/// Opened once by the composition root; clones share the same connection.
#[derive(Debug, Clone)]
pub struct StatsStore {
    conn: Arc<Mutex<Connection>>,
}

impl StatsStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self::init(Connection::open(path)?)?;
        info!("Stats store opened at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS stat (minute INTEGER UNIQUE NOT NULL, count INTEGER NOT NULL)",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Add `count` to the row of `minute`, creating it if needed.
    pub fn record(&self, minute: Timestamp, count: u64) -> Result<(), StoreError> {
        let count = i64::try_from(count).map_err(|_| StoreError::CountOutOfRange(count))?;
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO stat(minute, count) VALUES(?1, ?2)
             ON CONFLICT(minute) DO UPDATE SET count = count + excluded.count",
            params![minute, count],
        )?;
        debug!("Recorded {count} queries for {minute}");
        Ok(())
    }

    /// [`Self::record`] on the blocking thread pool.
    pub async fn record_async(&self, minute: Timestamp, count: u64) -> Result<(), StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.record(minute, count)).await?
    }

    pub fn count(&self, minute: Timestamp) -> Result<Option<u64>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let count: Option<i64> = conn
            .query_row(
                "SELECT count FROM stat WHERE minute = ?1",
                params![minute],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.map(|count| count as u64))
    }
}
