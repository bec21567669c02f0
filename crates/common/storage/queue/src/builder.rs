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

use std::{path::PathBuf, sync::Arc};

use crate::{
    MergeOrder, Queue, QueueConfig, QueueRegistry, Result,
    event::{EventSink, Sinks, TracingSink},
};

pub struct QueueBuilder {
    config:       QueueConfig,
    sinks:        Vec<Arc<dyn EventSink>>,
    tracing_sink: bool,
}

impl QueueBuilder {
    pub fn new<P: Into<PathBuf>>(base_path: P) -> Self {
        Self::from_config(QueueConfig {
            base_path: base_path.into(),
            ..Default::default()
        })
    }

    pub fn from_config(config: QueueConfig) -> Self {
        Self {
            config,
            sinks: Vec::new(),
            tracing_sink: true,
        }
    }

    pub fn default_lock_ttl(mut self, ttl_secs: u64) -> Self {
        self.config.default_lock_ttl_secs = ttl_secs;
        self
    }

    pub fn merge_order(mut self, order: MergeOrder) -> Self {
        self.config.merge_order = order;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    pub fn persist_snapshot(mut self, persist: bool) -> Self {
        self.config.persist_snapshot = persist;
        self
    }

    pub fn write_index_marker(mut self, write: bool) -> Self {
        self.config.write_index_marker = write;
        self
    }

    /// Adds an event sink. The same instance is only attached once.
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Whether events are also forwarded to `tracing`. On by default.
    pub fn tracing_sink(mut self, enabled: bool) -> Self {
        self.tracing_sink = enabled;
        self
    }

    pub fn config(&self) -> &QueueConfig { &self.config }

    pub fn build(self, name: &str) -> Result<Queue> {
        let (config, sinks) = self.into_parts();
        Queue::with_sinks(Arc::new(config), name, sinks)
    }

    pub fn build_registry(self) -> Result<QueueRegistry> {
        let (config, sinks) = self.into_parts();
        QueueRegistry::with_sinks(config, sinks)
    }

    fn into_parts(self) -> (QueueConfig, Sinks) {
        let mut sinks = Sinks::new(self.sinks);
        if self.tracing_sink {
            sinks.attach(Arc::new(TracingSink));
        }
        (self.config, sinks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_LOCK_TTL_SECS;

    #[test]
    fn test_builder_default_config() {
        let builder = QueueBuilder::new("/tmp/test_queue");
        assert_eq!(builder.config.base_path, PathBuf::from("/tmp/test_queue"));
        assert_eq!(builder.config.default_lock_ttl_secs, DEFAULT_LOCK_TTL_SECS);
        assert_eq!(builder.config.merge_order, MergeOrder::StagedFirst);
        assert!(builder.config.persist_snapshot);
        assert!(builder.tracing_sink);

        let (_, sinks) = builder.into_parts();
        assert_eq!(sinks.len(), 1);
    }

    #[test]
    fn test_builder_custom_config() {
        let sink: Arc<dyn EventSink> = Arc::new(TracingSink);
        let builder = QueueBuilder::new("/tmp/test_queue")
            .default_lock_ttl(30)
            .merge_order(MergeOrder::Fifo)
            .read_only(true)
            .persist_snapshot(false)
            .write_index_marker(false)
            .sink(sink.clone())
            .sink(sink)
            .tracing_sink(false);

        let config = builder.config();
        assert_eq!(config.default_lock_ttl_secs, 30);
        assert_eq!(config.merge_order, MergeOrder::Fifo);
        assert!(config.read_only);
        assert!(!config.persist_snapshot);
        assert!(!config.write_index_marker);

        let (_, sinks) = builder.into_parts();
        assert_eq!(sinks.len(), 1);
    }
}
