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

//! Main queue struct and lifecycle management.
//!
//! A [`Queue`] is one named directory under the base path. Writers lock it,
//! stage records into `queue.tmp` and merge them into `queue.txt` on unlock.
//! Consumers lock it and drain the oldest records.
//!
//! ## Usage
//!
//! ```ignore
//! let mut queue = QueueBuilder::new("/var/spool/lineq").build("orders")?;
//!
//! // Producer
//! if queue.lock()? {
//!     queue.add_item("42", "thick-cut bacon")?;
//!     queue.unlock()?;
//! }
//!
//! // Consumer
//! if queue.lock()? {
//!     while let Some(items) = queue.drain_oldest(10)? {
//!         for item in items {
//!             println!("{} => {}", item.key, item.value);
//!         }
//!     }
//!     queue.unlock()?;
//! }
//! ```
//!
//! Dropping a queue merges pending staged records, releases a held lock and
//! writes `queue-state.json`.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter},
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use snafu::{ResultExt, ensure};
use tracing::{debug, error, info, warn};

use crate::{
    AccessMode, MergeOrder, QueueConfig, Result,
    error::{
        EncodeSnafu, FatalSnafu, InvalidArgumentSnafu, IoSnafu, NotLockedSnafu, ReadOnlySnafu,
        SetupSnafu,
    },
    event::{EventSink, QueueEvent, Sinks, TracingSink},
    line_store::{self, LineStore},
    lock::{Acquire, LockFile},
    message::{ItemValue, QueueItem, validate_key},
    path::{
        LOCK_FILE, QUEUE_FILE, STAGING_FILE, probe_mode, queue_dir, validate_name,
        write_index_marker,
    },
    snapshot::QueueSnapshot,
};

/// A persistent, lock-guarded line queue.
///
/// All operations are blocking file I/O. One instance is meant to be used
/// from one thread; cooperating processes coordinate through the lock file.
#[derive(Debug)]
pub struct Queue {
    name:         String,
    base_path:    PathBuf,
    dir:          PathBuf,
    config:       Arc<QueueConfig>,
    /// Fixed at construction.
    mode:         AccessMode,
    store:        LineStore,
    staging_path: PathBuf,
    /// Opened on the first `add_item` of a lock cycle, closed by the merge.
    staging:      Option<File>,
    lock:         LockFile,
    sinks:        Sinks,
    /// Last event sent to the sinks.
    status:       Option<QueueEvent>,
}

impl Queue {
    /// Opens queue `name` under `config.base_path`, creating its directory
    /// and line file if needed.
    ///
    /// Events go to a [`TracingSink`]; use
    /// [`QueueBuilder`](crate::QueueBuilder) to attach others.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a bad name or an empty base path. A directory
    /// or line file that cannot be created is fatal.
    pub fn open(config: QueueConfig, name: &str) -> Result<Self> {
        Self::with_sinks(
            Arc::new(config),
            name,
            Sinks::new(vec![Arc::new(TracingSink)]),
        )
    }

    pub(crate) fn with_sinks(config: Arc<QueueConfig>, name: &str, sinks: Sinks) -> Result<Self> {
        validate_name(name)?;
        ensure!(
            !config.base_path.as_os_str().is_empty(),
            InvalidArgumentSnafu {
                reason: "base path is empty",
            }
        );

        let dir = queue_dir(&config.base_path, name);
        if !dir.is_dir() {
            ensure!(
                !config.read_only,
                FatalSnafu {
                    path:   &dir,
                    reason: "queue directory does not exist and the queue is read-only",
                }
            );
            fs::create_dir_all(&dir).context(SetupSnafu { path: &dir })?;
        }

        let mode = if config.read_only {
            AccessMode::ReadOnly
        } else {
            probe_mode(&dir)?
        };

        let store = LineStore::new(dir.join(QUEUE_FILE));
        if mode.is_writable() {
            store
                .ensure_exists()
                .context(SetupSnafu { path: store.path() })?;
            if config.write_index_marker {
                write_index_marker(&dir)?;
            }
        } else {
            ensure!(
                store.exists(),
                FatalSnafu {
                    path:   store.path(),
                    reason: "line file is missing and the queue is read-only",
                }
            );
        }

        info!(queue = name, path = ?dir, %mode, "Queue initialized");

        let mut queue = Self {
            name: name.to_owned(),
            base_path: config.base_path.clone(),
            staging_path: dir.join(STAGING_FILE),
            lock: LockFile::new(dir.join(LOCK_FILE)),
            dir,
            config,
            mode,
            store,
            staging: None,
            sinks,
            status: None,
        };
        queue.notify(QueueEvent::Initialized);
        Ok(queue)
    }

    /// Rebuilds a queue from a validated snapshot without probing the
    /// directory again.
    pub(crate) fn from_snapshot(
        config: Arc<QueueConfig>,
        snapshot: QueueSnapshot,
        sinks: Sinks,
    ) -> Self {
        let mode = if config.read_only {
            AccessMode::ReadOnly
        } else {
            snapshot.mode
        };

        debug!(queue = %snapshot.name, path = ?snapshot.dir, %mode, "Queue rehydrated from snapshot");

        let mut queue = Self {
            name: snapshot.name,
            base_path: snapshot.base_path,
            dir: snapshot.dir,
            config,
            mode,
            store: LineStore::new(snapshot.queue_file),
            staging_path: snapshot.staging_file,
            staging: None,
            lock: LockFile::new(snapshot.lock_file),
            sinks,
            status: None,
        };
        queue.notify(QueueEvent::Initialized);
        queue
    }

    /// Takes the lock with the configured default TTL.
    pub fn lock(&mut self) -> Result<bool> { self.lock_with_ttl(self.config.default_lock_ttl_secs) }

    /// Tries to take the lock for `ttl_secs` seconds.
    ///
    /// Returns `false` if another holder owns a fresh lock or the lock file
    /// cannot be written. Calling this while already holding the lock also
    /// returns `false`; the existing lock stays in place.
    ///
    /// # Errors
    ///
    /// `ReadOnly` on a read-only queue, `InvalidArgument` for a zero TTL.
    pub fn lock_with_ttl(&mut self, ttl_secs: u64) -> Result<bool> {
        self.ensure_writable()?;

        match self.lock.acquire(ttl_secs)? {
            Acquire::Acquired => {
                if self.staging_path.is_file() {
                    // A crashed holder may have left a torn last record;
                    // new appends must start on a fresh line.
                    let repaired = match line_store::terminate_last_line(&self.staging_path) {
                        Ok(repaired) => repaired,
                        Err(e) => {
                            self.lock.release();
                            return Err(e);
                        }
                    };
                    info!(
                        queue = %self.name,
                        path = ?self.staging_path,
                        repaired,
                        "Adopting staging file left by a previous holder"
                    );
                }
                self.notify(QueueEvent::Locked);
                Ok(true)
            }
            Acquire::HeldByOther => {
                self.notify(QueueEvent::LockedByOther);
                Ok(false)
            }
            Acquire::Failed(e) => {
                warn!(queue = %self.name, path = ?self.lock.path(), error = %e, "Failed to write lock file");
                self.notify(QueueEvent::FailedToLock);
                Ok(false)
            }
        }
    }

    /// Merges staged records and releases the lock.
    ///
    /// Returns `false` if this instance did not hold the lock. The lock is
    /// released even if the merge fails; the merge error is returned and the
    /// staging file is left for the next holder.
    pub fn unlock(&mut self) -> Result<bool> {
        if !self.lock.is_held() {
            return Ok(false);
        }

        let merged = self.merge_staging();
        self.lock.release();
        self.notify(QueueEvent::Unlocked);

        merged.map(|_| true)
    }

    /// Stages one record. It becomes visible once the lock cycle is merged.
    ///
    /// Returns `Ok(false)` if the staging file cannot be written.
    ///
    /// # Errors
    ///
    /// `ReadOnly`, `NotLocked`, or `InvalidArgument` for an empty key or one
    /// containing a tab or line break.
    pub fn add_item<V: Into<ItemValue>>(&mut self, key: &str, value: V) -> Result<bool> {
        self.ensure_writable()?;
        self.ensure_locked()?;
        validate_key(key)?;

        let value = value.into();
        let written = self
            .staging_writer()
            .and_then(|file| line_store::append(file, key, &value));

        if let Err(e) = written {
            warn!(queue = %self.name, path = ?self.staging_path, key, error = %e, "Failed to stage item");
            return Ok(false);
        }
        Ok(true)
    }

    /// Stages `value` serialized as compact JSON.
    pub fn add_json<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<bool> {
        let value = serde_json::to_value(value).context(EncodeSnafu {
            path: &self.staging_path,
        })?;
        self.add_item(key, value)
    }

    /// Removes and returns up to `count` of the oldest records, oldest
    /// first.
    ///
    /// Returns `Ok(None)` when there is nothing to drain.
    ///
    /// # Errors
    ///
    /// `ReadOnly`, `NotLocked` and `InvalidArgument` (zero `count`) are
    /// checked in that order before any file is read.
    pub fn drain_oldest(&mut self, count: usize) -> Result<Option<Vec<QueueItem>>> {
        self.ensure_writable()?;
        self.ensure_locked()?;
        ensure!(
            count > 0,
            InvalidArgumentSnafu {
                reason: "drain count must be positive",
            }
        );

        if self.status != Some(QueueEvent::Processing) {
            self.notify(QueueEvent::Processing);
        }

        let items = self.store.read_oldest(count)?;
        if items.is_empty() {
            return Ok(None);
        }

        let remaining = self.store.drop_oldest(count)?;
        debug!(queue = %self.name, drained = items.len(), remaining, "Drained records");
        if remaining == 0 {
            self.notify(QueueEvent::ReachedEnd);
        }
        Ok(Some(items))
    }

    /// Folds the staging file into the line file and returns the number of
    /// records merged.
    ///
    /// Both files are copied into the swap file in [`MergeOrder`] and the
    /// result is renamed over the line file; the staging file is removed
    /// afterwards.
    pub fn merge_staging(&mut self) -> Result<usize> {
        self.ensure_writable()?;
        self.ensure_locked()?;

        // Close the handle before reading the file back.
        drop(self.staging.take());

        let staged = LineStore::new(&self.staging_path);
        if !staged.exists() {
            return Ok(0);
        }

        let count = staged.count()?;
        if count > 0 {
            let swap = self.store.swap_path().to_path_buf();
            let file = File::create(&swap).context(IoSnafu { path: &swap })?;
            let mut writer = BufWriter::new(file);

            let (first, second) = match self.config.merge_order {
                MergeOrder::StagedFirst => (&staged, &self.store),
                MergeOrder::Fifo => (&self.store, &staged),
            };
            first.copy_records_into(&mut writer, &swap)?;
            second.copy_records_into(&mut writer, &swap)?;

            line_store::finish(writer, &swap)?;
            self.store.replace_with(&swap)?;
        }

        fs::remove_file(staged.path()).context(IoSnafu { path: staged.path() })?;
        debug!(queue = %self.name, merged = count, order = %self.config.merge_order, "Merged staging file");
        Ok(count)
    }

    /// Number of records in the line file. Staged records are not counted.
    pub fn item_count(&self) -> Result<usize> { self.store.count() }

    /// Whether the line file holds a record with `key`.
    pub fn key_exists(&self, key: &str) -> Result<bool> { self.store.key_exists(key) }

    pub fn snapshot(&self) -> QueueSnapshot { QueueSnapshot::new(&self.base_path, &self.name, self.mode) }

    pub fn name(&self) -> &str { &self.name }

    pub fn base_path(&self) -> &Path { &self.base_path }

    pub fn dir(&self) -> &Path { &self.dir }

    pub fn queue_file(&self) -> &Path { self.store.path() }

    pub fn staging_file(&self) -> &Path { &self.staging_path }

    pub fn lock_file(&self) -> &Path { self.lock.path() }

    pub const fn mode(&self) -> AccessMode { self.mode }

    pub fn config(&self) -> &QueueConfig { &self.config }

    /// Whether this instance holds the lock. The lock file is not consulted.
    pub const fn is_locked(&self) -> bool { self.lock.is_held() }

    /// Whether any holder owns a fresh lock. Removes a stale lock file.
    pub fn probe_lock(&self) -> bool { self.lock.probe() }

    /// The last event sent to the sinks.
    pub const fn status(&self) -> Option<QueueEvent> { self.status }

    pub fn attach(&mut self, sink: Arc<dyn EventSink>) { self.sinks.attach(sink); }

    pub fn detach(&mut self, sink: &Arc<dyn EventSink>) { self.sinks.detach(sink); }

    fn notify(&mut self, event: QueueEvent) {
        self.status = Some(event);
        self.sinks.queue_event(&self.name, event);
    }

    fn ensure_writable(&self) -> Result<()> {
        ensure!(self.mode.is_writable(), ReadOnlySnafu { name: &self.name });
        Ok(())
    }

    fn ensure_locked(&self) -> Result<()> {
        ensure!(self.lock.is_held(), NotLockedSnafu { name: &self.name });
        Ok(())
    }

    fn staging_writer(&mut self) -> io::Result<&mut File> {
        let file = match self.staging.take() {
            Some(file) => file,
            None => OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.staging_path)?,
        };
        Ok(self.staging.insert(file))
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if let Err(e) = self.unlock() {
            error!(queue = %self.name, error = %e, "Failed to merge staging file on drop");
        }

        if self.config.persist_snapshot
            && self.mode.is_writable()
            && let Err(e) = self.snapshot().write()
        {
            warn!(queue = %self.name, error = %e, "Failed to write queue snapshot");
        }
    }
}
