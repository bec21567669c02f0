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

//! Discovery and caching of the queues under one base path.
//!
//! On open the registry scans the base path for queue directories. Each one
//! is rehydrated from its `queue-state.json` when that snapshot is valid and
//! rebuilt from the directory otherwise.

use std::{
    collections::{HashMap, hash_map::Entry},
    fs,
    path::Path,
    sync::Arc,
};

use snafu::{ResultExt, ensure};
use tracing::{debug, info, warn};

use crate::{
    Queue, QueueConfig, Result,
    error::{ConflictSnafu, FatalSnafu, InvalidArgumentSnafu, SetupSnafu},
    event::{EventSink, RegistryEvent, Sinks, TracingSink},
    path::{queue_dir, scan_queue_dirs},
    snapshot::QueueSnapshot,
};

/// Queues under one base path, indexed by name.
#[derive(Debug)]
pub struct QueueRegistry {
    config: Arc<QueueConfig>,
    queues: HashMap<String, Queue>,
    /// Attached to every registered queue.
    sinks:  Sinks,
}

impl QueueRegistry {
    /// Opens the registry at `config.base_path` with a [`TracingSink`].
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the base path is empty; fatal if it is not a
    /// readable directory or a discovered queue cannot be opened.
    pub fn open(config: QueueConfig) -> Result<Self> {
        Self::with_sinks(config, Sinks::new(vec![Arc::new(TracingSink)]))
    }

    pub(crate) fn with_sinks(config: QueueConfig, sinks: Sinks) -> Result<Self> {
        let base = config.base_path.clone();
        ensure!(
            !base.as_os_str().is_empty(),
            InvalidArgumentSnafu {
                reason: "base path is empty",
            }
        );
        ensure!(
            base.is_dir(),
            FatalSnafu {
                path:   &base,
                reason: "base path is not a directory",
            }
        );
        fs::read_dir(&base).context(SetupSnafu { path: &base })?;

        let mut registry = Self {
            config: Arc::new(config),
            queues: HashMap::new(),
            sinks,
        };

        for (name, _) in scan_queue_dirs(&base)? {
            match load_queue(&registry.config, &registry.sinks, &name) {
                Ok(queue) => {
                    registry.queues.insert(name.clone(), queue);
                    registry
                        .sinks
                        .registry_event(RegistryEvent::QueueAdded, Some(&name));
                }
                Err(e) if !e.is_fatal() => {
                    warn!(queue = %name, error = %e, "Skipping unusable queue directory");
                }
                Err(e) => return Err(e),
            }
        }

        info!(path = ?base, queues = registry.queues.len(), "Queue registry initialized");
        registry
            .sinks
            .registry_event(RegistryEvent::Initialized, None);
        Ok(registry)
    }

    /// Returns queue `name`, creating its directory if it does not exist.
    pub fn get(&mut self, name: &str) -> Result<&mut Queue> {
        let Self {
            config,
            queues,
            sinks,
        } = self;

        match queues.entry(name.to_owned()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let queue = load_queue(config, sinks, name)?;
                sinks.registry_event(RegistryEvent::QueueAdded, Some(name));
                Ok(entry.insert(queue))
            }
        }
    }

    /// Registers a queue opened elsewhere and attaches the registry's sinks
    /// to it.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the queue lives under another base path,
    /// `Conflict` if a queue with the same name is already registered.
    pub fn add(&mut self, mut queue: Queue) -> Result<()> {
        let name = queue.name().to_owned();
        ensure!(
            queue.base_path() == self.base_path(),
            InvalidArgumentSnafu {
                reason: format!(
                    "queue \"{name}\" lives under {}, not {}",
                    queue.base_path().display(),
                    self.base_path().display()
                ),
            }
        );
        ensure!(!self.queues.contains_key(&name), ConflictSnafu { name });

        for sink in self.sinks.iter() {
            queue.attach(Arc::clone(sink));
        }
        self.queues.insert(name.clone(), queue);
        self.sinks
            .registry_event(RegistryEvent::QueueAdded, Some(&name));
        Ok(())
    }

    /// Unregisters queue `name` and hands it back, detached from the
    /// registry's sinks. Returns `None` if it was not registered.
    pub fn remove(&mut self, name: &str) -> Option<Queue> {
        let mut queue = self.queues.remove(name)?;
        for sink in self.sinks.iter() {
            queue.detach(sink);
        }
        self.sinks
            .registry_event(RegistryEvent::QueueRemoved, Some(name));
        Some(queue)
    }

    /// Unregisters the queue with the same name as `queue`.
    pub fn remove_queue(&mut self, queue: &Queue) -> Option<Queue> { self.remove(queue.name()) }

    pub fn contains(&self, name: &str) -> bool { self.queues.contains_key(name) }

    /// Registered queue names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<_> = self.queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize { self.queues.len() }

    pub fn is_empty(&self) -> bool { self.queues.is_empty() }

    pub fn base_path(&self) -> &Path { &self.config.base_path }

    pub fn config(&self) -> &QueueConfig { &self.config }

    /// Attaches `sink` to the registry and every queue it holds.
    pub fn attach(&mut self, sink: Arc<dyn EventSink>) {
        for queue in self.queues.values_mut() {
            queue.attach(Arc::clone(&sink));
        }
        self.sinks.attach(sink);
    }
}

/// Rehydrates queue `name` from its snapshot, or opens it from the
/// directory when there is no usable snapshot.
fn load_queue(config: &Arc<QueueConfig>, sinks: &Sinks, name: &str) -> Result<Queue> {
    let dir = queue_dir(&config.base_path, name);

    let snapshot = QueueSnapshot::load(&dir).and_then(|snapshot| match snapshot {
        Some(snapshot) => snapshot
            .validate(&config.base_path, name)
            .map(|()| Some(snapshot)),
        None => Ok(None),
    });

    match snapshot {
        Ok(Some(snapshot)) => {
            return Ok(Queue::from_snapshot(
                Arc::clone(config),
                snapshot,
                sinks.clone(),
            ));
        }
        Ok(None) => debug!(queue = name, "No snapshot, opening queue directory"),
        Err(e) => warn!(queue = name, error = %e, "Discarding queue snapshot"),
    }

    Queue::with_sinks(Arc::clone(config), name, sinks.clone())
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Mutex};

    use tempfile::TempDir;

    use super::*;
    use crate::{QueueError, path::SNAPSHOT_FILE};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(RegistryEvent, Option<String>)>>);

    impl EventSink for Recorder {
        fn on_queue_event(&self, _queue: &str, _event: crate::QueueEvent) {}

        fn on_registry_event(&self, event: RegistryEvent, queue: Option<&str>) {
            self.0
                .lock()
                .unwrap()
                .push((event, queue.map(str::to_owned)));
        }
    }

    fn config(temp_dir: &TempDir) -> QueueConfig {
        QueueConfig {
            base_path: temp_dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_open_discovers_queues() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("orders")).unwrap();
        fs::create_dir(temp_dir.path().join("emails")).unwrap();
        fs::create_dir(temp_dir.path().join(".cache")).unwrap();

        let registry = QueueRegistry::open(config(&temp_dir)).unwrap();
        assert_eq!(registry.list(), vec!["emails", "orders"]);
        assert!(!registry.contains(".cache"));
        assert_eq!(registry.base_path(), temp_dir.path());
    }

    #[test]
    fn test_open_rejects_bad_base() {
        let empty = QueueConfig {
            base_path: PathBuf::new(),
            ..Default::default()
        };
        assert!(matches!(
            QueueRegistry::open(empty),
            Err(QueueError::InvalidArgument { .. })
        ));

        let temp_dir = TempDir::new().unwrap();
        let missing = QueueConfig {
            base_path: temp_dir.path().join("missing"),
            ..Default::default()
        };
        assert!(QueueRegistry::open(missing).unwrap_err().is_fatal());
    }

    #[test]
    fn test_get_creates_once() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = QueueRegistry::open(config(&temp_dir)).unwrap();
        assert!(registry.is_empty());

        registry.get("orders").unwrap().lock().unwrap();
        assert!(temp_dir.path().join("orders").is_dir());
        assert!(registry.get("orders").unwrap().is_locked());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_add_conflict_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = QueueRegistry::open(config(&temp_dir)).unwrap();
        registry.get("orders").unwrap();

        let duplicate = Queue::open(config(&temp_dir), "orders").unwrap();
        assert!(matches!(
            registry.add(duplicate),
            Err(QueueError::Conflict { .. })
        ));

        let other = Queue::open(config(&temp_dir), "emails").unwrap();
        registry.add(other).unwrap();
        assert_eq!(registry.list(), vec!["emails", "orders"]);

        let removed = registry.remove("orders").unwrap();
        assert_eq!(removed.name(), "orders");
        assert!(registry.remove_queue(&removed).is_none());
        assert!(registry.remove("orders").is_none());
        assert_eq!(registry.list(), vec!["emails"]);
    }

    #[test]
    fn test_add_rejects_foreign_base_path() {
        let temp_dir = TempDir::new().unwrap();
        let other_dir = TempDir::new().unwrap();
        let mut registry = QueueRegistry::open(config(&temp_dir)).unwrap();

        let foreign = Queue::open(config(&other_dir), "orders").unwrap();
        assert!(matches!(
            registry.add(foreign),
            Err(QueueError::InvalidArgument { .. })
        ));
        assert!(!registry.contains("orders"));
    }

    #[test]
    fn test_registry_events() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("orders")).unwrap();

        let recorder = Arc::new(Recorder::default());
        let sinks = Sinks::new(vec![recorder.clone() as Arc<dyn EventSink>]);
        let mut registry = QueueRegistry::with_sinks(config(&temp_dir), sinks).unwrap();
        registry.get("emails").unwrap();
        registry.remove("orders");

        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(events, vec![
            (RegistryEvent::QueueAdded, Some("orders".to_owned())),
            (RegistryEvent::Initialized, None),
            (RegistryEvent::QueueAdded, Some("emails".to_owned())),
            (RegistryEvent::QueueRemoved, Some("orders".to_owned())),
        ]);
    }

    #[test]
    fn test_corrupt_snapshot_is_rebuilt() {
        let temp_dir = TempDir::new().unwrap();
        drop(Queue::open(config(&temp_dir), "orders").unwrap());
        let snapshot_path = temp_dir.path().join("orders").join(SNAPSHOT_FILE);
        fs::write(&snapshot_path, "{ not json").unwrap();

        let mut registry = QueueRegistry::open(config(&temp_dir)).unwrap();
        let queue = registry.get("orders").unwrap();
        assert_eq!(queue.dir(), temp_dir.path().join("orders"));
        assert!(queue.lock().unwrap());
    }
}
