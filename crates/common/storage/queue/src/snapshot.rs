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

//! Persisted queue identity.
//!
//! A queue writes `queue-state.json` when it is dropped. The registry reads
//! it back on startup to rehydrate the queue without probing permissions
//! again. Only identity is stored; the records themselves stay in the line
//! file.
//!
//! ```json
//! {
//!   "version": 1,
//!   "name": "orders",
//!   "base_path": "/var/spool/lineq",
//!   "dir": "/var/spool/lineq/orders",
//!   "queue_file": "/var/spool/lineq/orders/queue.txt",
//!   "staging_file": "/var/spool/lineq/orders/queue.tmp",
//!   "lock_file": "/var/spool/lineq/orders/queue.lock",
//!   "mode": "read_write"
//! }
//! ```
//!
//! A snapshot that fails to parse or disagrees with the directory it was
//! found in is rejected; callers rebuild the queue from scratch.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};

use crate::{
    AccessMode, Result,
    error::{EncodeSnafu, IoSnafu, SnapshotCorruptedSnafu},
    path::{LOCK_FILE, QUEUE_FILE, SNAPSHOT_FILE, STAGING_FILE, queue_dir, write_atomic},
};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub version:      u32,
    pub name:         String,
    pub base_path:    PathBuf,
    pub dir:          PathBuf,
    pub queue_file:   PathBuf,
    pub staging_file: PathBuf,
    pub lock_file:    PathBuf,
    pub mode:         AccessMode,
}

impl QueueSnapshot {
    pub fn new(base_path: &Path, name: &str, mode: AccessMode) -> Self {
        let dir = queue_dir(base_path, name);
        Self {
            version: SNAPSHOT_VERSION,
            name: name.to_owned(),
            base_path: base_path.to_path_buf(),
            queue_file: dir.join(QUEUE_FILE),
            staging_file: dir.join(STAGING_FILE),
            lock_file: dir.join(LOCK_FILE),
            dir,
            mode,
        }
    }

    /// Location of the snapshot file for this queue.
    pub fn path(&self) -> PathBuf { self.dir.join(SNAPSHOT_FILE) }

    /// Writes the snapshot into the queue directory, replacing any previous
    /// one atomically.
    pub fn write(&self) -> Result<()> {
        let path = self.path();
        let data = serde_json::to_vec_pretty(self).context(EncodeSnafu { path: &path })?;
        write_atomic(&path, &data)
    }

    /// Reads the snapshot stored in `dir`, if any.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(SNAPSHOT_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context(IoSnafu { path }),
        };

        match serde_json::from_slice(&data) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => SnapshotCorruptedSnafu {
                path,
                reason: e.to_string(),
            }
            .fail(),
        }
    }

    /// Checks that the snapshot describes queue `name` under `base_path` and
    /// that its files are still in place.
    pub fn validate(&self, base_path: &Path, name: &str) -> Result<()> {
        let path = self.path();
        let expected = Self::new(base_path, name, self.mode);

        ensure!(
            self.version == SNAPSHOT_VERSION,
            SnapshotCorruptedSnafu {
                path: &path,
                reason: format!("unsupported version {}", self.version),
            }
        );
        ensure!(
            self.name == expected.name && self.base_path == expected.base_path,
            SnapshotCorruptedSnafu {
                path: &path,
                reason: format!(
                    "describes {:?} in {}, expected {name:?} in {}",
                    self.name,
                    self.base_path.display(),
                    base_path.display()
                ),
            }
        );
        ensure!(
            *self == expected,
            SnapshotCorruptedSnafu {
                path: &path,
                reason: "derived paths do not match the queue directory",
            }
        );
        ensure!(
            self.dir.is_dir() && self.queue_file.is_file(),
            SnapshotCorruptedSnafu {
                path: &path,
                reason: "queue directory or line file is missing",
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use test_case::test_case;

    use super::*;

    fn queue_on_disk(temp_dir: &TempDir, name: &str) -> QueueSnapshot {
        let snapshot = QueueSnapshot::new(temp_dir.path(), name, AccessMode::ReadWrite);
        fs::create_dir_all(&snapshot.dir).unwrap();
        fs::write(&snapshot.queue_file, "").unwrap();
        snapshot
    }

    #[test]
    fn test_derived_paths() {
        let snapshot = QueueSnapshot::new(Path::new("/base"), "orders", AccessMode::ReadOnly);
        assert_eq!(snapshot.dir, PathBuf::from("/base/orders"));
        assert_eq!(snapshot.queue_file, PathBuf::from("/base/orders/queue.txt"));
        assert_eq!(snapshot.staging_file, PathBuf::from("/base/orders/queue.tmp"));
        assert_eq!(snapshot.lock_file, PathBuf::from("/base/orders/queue.lock"));
        assert_eq!(snapshot.path(), PathBuf::from("/base/orders/queue-state.json"));
    }

    #[test]
    fn test_write_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = queue_on_disk(&temp_dir, "orders");
        snapshot.write().unwrap();

        let loaded = QueueSnapshot::load(&snapshot.dir).unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        loaded.validate(temp_dir.path(), "orders").unwrap();
    }

    #[test]
    fn test_load_missing() {
        let temp_dir = TempDir::new().unwrap();
        assert!(QueueSnapshot::load(temp_dir.path()).unwrap().is_none());
    }

    #[test_case(b"garbage" ; "not json")]
    #[test_case(br#"{"version": 1, "name": "orders"}"# ; "missing fields")]
    fn test_load_corrupted(content: &[u8]) {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(SNAPSHOT_FILE), content).unwrap();

        assert!(matches!(
            QueueSnapshot::load(temp_dir.path()),
            Err(crate::QueueError::SnapshotCorrupted { .. })
        ));
    }

    fn bump_version(s: &mut QueueSnapshot) { s.version += 1; }

    fn rename_queue(s: &mut QueueSnapshot) { s.name = "other".into(); }

    fn move_lock(s: &mut QueueSnapshot) { s.lock_file = PathBuf::from("/tmp/queue.lock"); }

    fn delete_line_file(s: &mut QueueSnapshot) { fs::remove_file(&s.queue_file).unwrap(); }

    #[test_case(bump_version ; "unsupported version")]
    #[test_case(rename_queue ; "other queue")]
    #[test_case(move_lock ; "foreign path")]
    #[test_case(delete_line_file ; "missing line file")]
    fn test_validate_rejects(tamper: fn(&mut QueueSnapshot)) {
        let temp_dir = TempDir::new().unwrap();
        let mut snapshot = queue_on_disk(&temp_dir, "orders");
        tamper(&mut snapshot);

        assert!(snapshot.validate(temp_dir.path(), "orders").is_err());
    }
}
