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

//! Directory-backed line queues guarded by an advisory TTL lock.
//!
//! Each queue lives in `<base>/<name>/`. A writer locks it, stages records
//! and merges them into the line file on unlock; a consumer locks it and
//! drains the oldest records. [`QueueRegistry`] discovers and caches the
//! queues under one base path.

pub mod builder;
pub mod config;
pub mod error;
pub mod event;
pub mod line_store;
pub mod lock;
pub mod message;
pub mod path;
pub mod queue;
pub mod registry;
pub mod snapshot;

pub use builder::QueueBuilder;
pub use config::{AccessMode, DEFAULT_LOCK_TTL_SECS, MergeOrder, QueueConfig};
pub use error::{QueueError, Result};
pub use event::{EventSink, QueueEvent, RegistryEvent, TracingSink};
pub use lock::{LockFile, LockRecord};
pub use message::{ItemValue, QueueItem};
pub use queue::Queue;
pub use registry::QueueRegistry;
pub use snapshot::{QueueSnapshot, SNAPSHOT_VERSION};
