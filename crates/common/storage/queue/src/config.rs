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

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Lock TTL used by [`Queue::lock`](crate::Queue::lock) when no explicit TTL
/// is given.
pub const DEFAULT_LOCK_TTL_SECS: u64 = 250;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct QueueConfig {
    /// Directory holding one sub-directory per queue group.
    #[default(_code = "PathBuf::from(\"./queues\")")]
    pub base_path:             PathBuf,
    #[default(DEFAULT_LOCK_TTL_SECS)]
    pub default_lock_ttl_secs: u64,
    pub merge_order:           MergeOrder,
    /// Open every queue read-only without probing directory permissions.
    pub read_only:             bool,
    /// Write `queue-state.json` when a queue is dropped.
    #[default = true]
    pub persist_snapshot:      bool,
    /// Drop a static `index.html` into new queue directories.
    #[default = true]
    pub write_index_marker:    bool,
}

/// Where staged records land relative to the records already in the line
/// file when a lock cycle is merged.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum MergeOrder {
    /// Staged records go in front of the existing backlog, so they are
    /// drained before older records that are still waiting.
    #[default]
    #[display("staged_first")]
    StagedFirst,
    /// Staged records go after the existing backlog (strict FIFO across lock
    /// cycles).
    #[display("fifo")]
    Fifo,
}

/// Whether the current process may modify a queue directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    #[display("read_write")]
    ReadWrite,
    #[display("read_only")]
    ReadOnly,
}

impl AccessMode {
    pub const fn is_writable(self) -> bool { matches!(self, Self::ReadWrite) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.base_path, PathBuf::from("./queues"));
        assert_eq!(config.default_lock_ttl_secs, 250);
        assert_eq!(config.merge_order, MergeOrder::StagedFirst);
        assert!(!config.read_only);
        assert!(config.persist_snapshot);
        assert!(config.write_index_marker);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: QueueConfig =
            serde_json::from_str(r#"{"base_path": "/var/spool/lineq", "merge_order": "fifo"}"#)
                .unwrap();
        assert_eq!(config.base_path, PathBuf::from("/var/spool/lineq"));
        assert_eq!(config.merge_order, MergeOrder::Fifo);
        assert_eq!(config.default_lock_ttl_secs, DEFAULT_LOCK_TTL_SECS);
        assert!(config.persist_snapshot);
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(AccessMode::ReadOnly.to_string(), "read_only");
        assert!(AccessMode::ReadWrite.is_writable());
        assert!(!AccessMode::ReadOnly.is_writable());
        assert_eq!(MergeOrder::Fifo.to_string(), "fifo");
    }
}
