// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Advisory TTL lock file.
//!
//! A queue is locked while `queue.lock` exists and `born + ttl` lies in the
//! future. Nothing enforces the lock; cooperating processes check it before
//! writing. Expiry is lazy: a stale file is only removed when somebody
//! probes it.
//!
//! The file is created with `create_new`, so two processes that both saw the
//! lock as free cannot both create it. A file that does not parse as a lock
//! record (including one caught between creation and the first write) is
//! treated as held, and must be removed by hand if it never becomes valid.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use tracing::{debug, warn};

use crate::{
    Result,
    error::{EncodeSnafu, InvalidArgumentSnafu, IoSnafu},
};

/// Content of `queue.lock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Lifetime in seconds.
    pub ttl:  u64,
    /// Unix timestamp (seconds) of creation.
    pub born: i64,
}

impl LockRecord {
    pub const fn new(ttl: u64, born: i64) -> Self { Self { ttl, born } }

    pub fn expires_at(&self) -> i64 {
        self.born
            .saturating_add(i64::try_from(self.ttl).unwrap_or(i64::MAX))
    }

    pub fn is_fresh(&self, now: i64) -> bool { self.expires_at() > now }
}

/// Outcome of [`LockFile::acquire`].
#[derive(Debug)]
pub enum Acquire {
    Acquired,
    /// A fresh (or unreadable) lock file is already present.
    HeldByOther,
    /// The lock file could not be written.
    Failed(io::Error),
}

/// The lock file of one queue directory plus this instance's belief about
/// whether it owns it.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    /// The record this instance wrote, while it believes it holds the lock.
    held: Option<LockRecord>,
}

impl LockFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            held: None,
        }
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Whether this instance created the current lock. Never re-checked
    /// against the file.
    pub const fn is_held(&self) -> bool { self.held.is_some() }

    /// Tries to take the lock for `ttl_secs` seconds.
    ///
    /// Asking again while this instance already holds the lock reports
    /// [`Acquire::HeldByOther`] and keeps the existing ownership.
    pub fn acquire(&mut self, ttl_secs: u64) -> Result<Acquire> {
        ensure!(
            ttl_secs > 0,
            InvalidArgumentSnafu {
                reason: "lock ttl must be a positive number of seconds",
            }
        );

        if self.probe() {
            return Ok(Acquire::HeldByOther);
        }

        let record = LockRecord::new(ttl_secs, now());
        let body = serde_json::to_vec(&record).context(EncodeSnafu { path: &self.path })?;

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = ?self.path, "Lost race for lock file");
                return Ok(Acquire::HeldByOther);
            }
            Err(e) => return Ok(Acquire::Failed(e)),
        };

        if let Err(e) = file.write_all(&body).and_then(|()| file.sync_all()) {
            drop(file);
            let _ = fs::remove_file(&self.path);
            return Ok(Acquire::Failed(e));
        }

        self.held = Some(record);
        Ok(Acquire::Acquired)
    }

    /// Deletes the lock file if this instance holds it.
    ///
    /// Returns whether a lock was held. The file is only removed while it
    /// still carries the record this instance wrote; a lock reclaimed by
    /// another holder after expiry is left in place. A file that was already
    /// removed is not an error.
    pub fn release(&mut self) -> bool {
        let Some(ours) = self.held.take() else {
            return false;
        };

        match self.read_record() {
            Ok(Some(current)) if current == ours => {
                if let Err(e) = fs::remove_file(&self.path)
                    && e.kind() != io::ErrorKind::NotFound
                {
                    warn!(path = ?self.path, error = %e, "Failed to remove lock file");
                }
            }
            Ok(None) if !self.path.exists() => {}
            Ok(current) => {
                warn!(
                    path = ?self.path,
                    ?current,
                    born = ours.born,
                    "Lock file was taken over by another holder, leaving it in place"
                );
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Cannot read lock file on release, leaving it in place");
            }
        }
        true
    }

    /// Whether some holder currently owns the lock.
    ///
    /// A stale file is deleted on the way. Unparseable content counts as
    /// held.
    pub fn probe(&self) -> bool {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return false,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Cannot read lock file, treating as held");
                return true;
            }
        };

        let Ok(record) = serde_json::from_slice::<LockRecord>(&content) else {
            warn!(path = ?self.path, "Invalid lock file structure, treating as held");
            return true;
        };

        if record.is_fresh(now()) {
            return true;
        }

        debug!(path = ?self.path, born = record.born, ttl = record.ttl, "Removing stale lock file");
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = ?self.path, error = %e, "Failed to remove stale lock file");
        }
        false
    }

    /// Reads the lock record without touching it.
    ///
    /// Returns `None` if there is no lock file or it does not parse.
    pub fn read_record(&self) -> Result<Option<LockRecord>> {
        match fs::read(&self.path) {
            Ok(content) => Ok(serde_json::from_slice(&content).ok()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(IoSnafu { path: &self.path }),
        }
    }
}

/// Current unix time in seconds.
pub(crate) fn now() -> i64 { chrono::Utc::now().timestamp() }
