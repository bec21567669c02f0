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

use std::{io, path::PathBuf};

use lineq_error::{ErrorExt, StatusCode};
use snafu::{Location, Snafu};

/// Queue operation errors.
///
/// Policy violations (`InvalidArgument`, `ReadOnly`, `NotLocked`,
/// `Conflict`) are raised before any file is touched. A failed append is not
/// an error at all; [`Queue::add_item`](crate::Queue::add_item) reports it as
/// `Ok(false)`.
#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum QueueError {
    /// Malformed caller input: zero ttl or count, empty name or path.
    #[snafu(display("Invalid argument: {reason}"))]
    InvalidArgument {
        reason: String,
        #[snafu(implicit)]
        loc:    Location,
    },

    /// A mutating operation on a queue opened in read-only mode.
    #[snafu(display("Queue \"{name}\" is read-only"))]
    ReadOnly {
        name: String,
        #[snafu(implicit)]
        loc:  Location,
    },

    /// A mutating or consuming operation without holding the lock.
    #[snafu(display("Queue \"{name}\" is not locked by this instance"))]
    NotLocked {
        name: String,
        #[snafu(implicit)]
        loc:  Location,
    },

    /// A queue with this name is already registered.
    #[snafu(display("Queue \"{name}\" already exists in this registry"))]
    Conflict {
        name: String,
        #[snafu(implicit)]
        loc:  Location,
    },

    /// The queue directory or its files cannot be set up.
    #[snafu(display("Cannot initialize queue at {}: {reason}", path.display()))]
    Fatal {
        path:   PathBuf,
        reason: String,
        #[snafu(implicit)]
        loc:    Location,
    },

    /// Creating a required directory or file failed.
    #[snafu(display("Cannot create {}", path.display()))]
    Setup {
        path:   PathBuf,
        source: io::Error,
        #[snafu(implicit)]
        loc:    Location,
    },

    /// Filesystem failure while reading or rewriting queue files.
    #[snafu(display("IO error on {}", path.display()))]
    Io {
        path:   PathBuf,
        source: io::Error,
        #[snafu(implicit)]
        loc:    Location,
    },

    /// A persisted snapshot is missing fields or describes another queue.
    #[snafu(display("Corrupted snapshot at {}: {reason}", path.display()))]
    SnapshotCorrupted {
        path:   PathBuf,
        reason: String,
        #[snafu(implicit)]
        loc:    Location,
    },

    /// JSON encoding of a lock record or snapshot failed.
    #[snafu(display("Failed to encode {}", path.display()))]
    Encode {
        path:   PathBuf,
        source: serde_json::Error,
        #[snafu(implicit)]
        loc:    Location,
    },
}

impl QueueError {
    /// Whether the queue instance that raised this error is unusable.
    pub const fn is_fatal(&self) -> bool { matches!(self, Self::Fatal { .. } | Self::Setup { .. }) }
}

impl ErrorExt for QueueError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument { .. } => StatusCode::InvalidArgument,
            Self::ReadOnly { .. } => StatusCode::Forbidden,
            Self::NotLocked { .. } => StatusCode::FailedPrecondition,
            Self::Conflict { .. } => StatusCode::Conflict,
            Self::Io { .. } => StatusCode::Unavailable,
            Self::Fatal { .. }
            | Self::Setup { .. }
            | Self::SnapshotCorrupted { .. }
            | Self::Encode { .. } => StatusCode::Internal,
        }
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use lineq_error::Tier;
    use snafu::IntoError;

    use super::*;

    #[test]
    fn test_policy_errors_are_policy_tier() {
        let err = NotLockedSnafu { name: "jobs" }.build();
        assert_eq!(err.status_code(), StatusCode::FailedPrecondition);
        assert_eq!(err.status_code().tier(), Tier::Policy);
        assert!(!err.is_fatal());

        let err = ReadOnlySnafu { name: "jobs" }.build();
        assert_eq!(err.status_code(), StatusCode::Forbidden);
        assert_eq!(err.output_msg(), "Queue \"jobs\" is read-only");
    }

    #[test]
    fn test_setup_errors_are_fatal() {
        let err = SetupSnafu { path: "/nope" }
            .into_error(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert!(err.is_fatal());
        assert_eq!(err.status_code().tier(), Tier::Fatal);
        assert_eq!(err.root_cause().unwrap().to_string(), "denied");
    }
}
