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

//! Lifecycle notifications.
//!
//! Queues and the registry report state transitions to [`EventSink`]s handed
//! to them at construction. Sinks only observe; nothing they do feeds back
//! into queue behaviour.

use std::sync::Arc;

use tracing::{debug, info, warn};

/// State transitions of a single queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum QueueEvent {
    #[display("initialized")]
    Initialized,
    #[display("locked")]
    Locked,
    /// The lock file could not be written.
    #[display("failed_to_lock")]
    FailedToLock,
    /// Another holder owns a fresh lock.
    #[display("locked_by_other")]
    LockedByOther,
    #[display("unlocked")]
    Unlocked,
    /// First drain of a processing run.
    #[display("processing")]
    Processing,
    /// A drain consumed the last record.
    #[display("reached_end")]
    ReachedEnd,
}

/// Changes to the set of queues held by a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum RegistryEvent {
    #[display("initialized")]
    Initialized,
    #[display("queue_added")]
    QueueAdded,
    #[display("queue_removed")]
    QueueRemoved,
}

pub trait EventSink: Send + Sync {
    fn on_queue_event(&self, queue: &str, event: QueueEvent);

    fn on_registry_event(&self, _event: RegistryEvent, _queue: Option<&str>) {}
}

/// Forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_queue_event(&self, queue: &str, event: QueueEvent) {
        match event {
            QueueEvent::FailedToLock => warn!(queue, %event, "Queue event"),
            QueueEvent::LockedByOther => info!(queue, %event, "Queue event"),
            _ => debug!(queue, %event, "Queue event"),
        }
    }

    fn on_registry_event(&self, event: RegistryEvent, queue: Option<&str>) {
        info!(queue, %event, "Registry event");
    }
}

/// The sinks attached to one queue or registry.
#[derive(Clone, Default)]
pub(crate) struct Sinks(Vec<Arc<dyn EventSink>>);

impl Sinks {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        let mut out = Self::default();
        for sink in sinks {
            out.attach(sink);
        }
        out
    }

    /// Adds `sink` unless the same instance is already attached.
    pub fn attach(&mut self, sink: Arc<dyn EventSink>) {
        if !self.0.iter().any(|s| Arc::ptr_eq(s, &sink)) {
            self.0.push(sink);
        }
    }

    pub fn detach(&mut self, sink: &Arc<dyn EventSink>) { self.0.retain(|s| !Arc::ptr_eq(s, sink)); }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn EventSink>> { self.0.iter() }

    pub fn queue_event(&self, queue: &str, event: QueueEvent) {
        for sink in &self.0 {
            sink.on_queue_event(queue, event);
        }
    }

    pub fn registry_event(&self, event: RegistryEvent, queue: Option<&str>) {
        for sink in &self.0 {
            sink.on_registry_event(event, queue);
        }
    }

    pub fn len(&self) -> usize { self.0.len() }
}

impl std::fmt::Debug for Sinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sinks").field("len", &self.len()).finish()
    }
}
