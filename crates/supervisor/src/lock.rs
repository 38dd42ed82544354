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

use std::{
    fs::{File, OpenOptions},
    os::fd::AsRawFd,
    path::{Path, PathBuf},
};

#[derive(Debug, strum_macros::Display)]
pub enum LockError {
    #[strum(to_string = "another instance already holds '{0:?}'")]
    AlreadyRunning(PathBuf),

    #[strum(to_string = "failed to acquire lock on '{0:?}': {1}")]
    IoError(PathBuf, std::io::Error),
}

impl std::error::Error for LockError {}

/// Exclusive advisory lock making sure a single supervisor runs at a time.
///
/// Held until dropped.
#[derive(Debug)]
pub struct InstanceLock {
    _file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Take the lock without waiting.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|err| LockError::IoError(path.clone(), err))?;
        // SAFETY: the descriptor is owned by `file` and stays open for the
        // duration of the call.
        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(LockError::AlreadyRunning(path));
            }
            return Err(LockError::IoError(path, err));
        }
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_instance_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("querywatch.lock");

        let lock = InstanceLock::acquire(&path).unwrap();
        assert_eq!(lock.path(), path.as_path());
        assert!(matches!(
            InstanceLock::acquire(&path),
            Err(LockError::AlreadyRunning(_))
        ));

        drop(lock);
        assert!(InstanceLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("querywatch.lock");
        assert!(matches!(
            InstanceLock::acquire(path),
            Err(LockError::IoError(_, _))
        ));
    }
}
