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

//! Queue directory layout and small filesystem helpers.
//!
//! ```text
//! <base>/<name>/
//! ├── queue.txt          line store, `key\tvalue\n`, oldest first
//! ├── queue.tmp          staging file for the current lock cycle
//! ├── queue.swap         rewrite target, renamed over queue.txt
//! ├── queue.lock         {"ttl": .., "born": ..}
//! ├── queue-state.json   snapshot written on drop
//! └── index.html         static 403 page
//! ```

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use snafu::{IntoError, ResultExt, ensure};
use tracing::{debug, warn};

use crate::{
    AccessMode, Result,
    error::{InvalidArgumentSnafu, IoSnafu, SetupSnafu},
};

pub const QUEUE_FILE: &str = "queue.txt";
pub const STAGING_FILE: &str = "queue.tmp";
pub const SWAP_FILE: &str = "queue.swap";
pub const LOCK_FILE: &str = "queue.lock";
pub const SNAPSHOT_FILE: &str = "queue-state.json";
pub const INDEX_MARKER_FILE: &str = "index.html";

const INDEX_MARKER_HTML: &str = "<html>
<head>
\t<title>403 Forbidden</title>
</head>
<body>
<p>Directory access is forbidden.</p>
</body>
</html>
";

/// Returns the directory of queue `name`: `base/name`.
pub fn queue_dir<P: AsRef<Path>>(base: P, name: &str) -> PathBuf { base.as_ref().join(name) }

/// Rejects names that cannot be used as a single directory component.
pub fn validate_name(name: &str) -> Result<()> {
    ensure!(
        !name.trim().is_empty(),
        InvalidArgumentSnafu {
            reason: "queue name is empty",
        }
    );
    ensure!(
        !name.starts_with('.'),
        InvalidArgumentSnafu {
            reason: format!("queue name \"{name}\" starts with '.'"),
        }
    );
    ensure!(
        !name.contains(['/', '\\', '\0']),
        InvalidArgumentSnafu {
            reason: format!("queue name \"{name}\" contains a path separator"),
        }
    );
    Ok(())
}

/// Determines whether this process can create files in `dir`.
///
/// A hidden probe file is created and removed again. If creation is refused
/// but the directory can still be listed, the queue is read-only.
pub fn probe_mode(dir: &Path) -> Result<AccessMode> {
    let probe = dir.join(format!(".lineq-probe-{}", std::process::id()));

    match OpenOptions::new().write(true).create_new(true).open(&probe) {
        Ok(file) => {
            drop(file);
            if let Err(e) = fs::remove_file(&probe) {
                warn!(path = ?probe, error = %e, "Failed to remove permission probe");
            }
            Ok(AccessMode::ReadWrite)
        }
        // Left behind by an earlier process with the same pid.
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            fs::remove_file(&probe).context(SetupSnafu { path: &probe })?;
            Ok(AccessMode::ReadWrite)
        }
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem
            ) =>
        {
            fs::read_dir(dir).context(SetupSnafu { path: dir })?;
            debug!(path = ?dir, "Queue directory is not writable, opening read-only");
            Ok(AccessMode::ReadOnly)
        }
        Err(e) => Err(e).context(SetupSnafu { path: dir }),
    }
}

/// Writes the static 403 page into `dir` unless one is already there.
///
/// Returns `true` if the file was created.
pub fn write_index_marker(dir: &Path) -> Result<bool> {
    let path = dir.join(INDEX_MARKER_FILE);
    if path.exists() {
        return Ok(false);
    }
    fs::write(&path, INDEX_MARKER_HTML).context(SetupSnafu { path })?;
    Ok(true)
}

/// Lists queue directories directly under `base`, sorted by name.
///
/// Plain files and directories whose name starts with `.` are skipped.
pub fn scan_queue_dirs<P: AsRef<Path>>(base: P) -> Result<Vec<(String, PathBuf)>> {
    let base = base.as_ref();
    let mut dirs = Vec::new();

    for entry in fs::read_dir(base).context(IoSnafu { path: base })? {
        let entry = entry.context(IoSnafu { path: base })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            warn!(path = ?path, "Skipping queue directory with a non UTF-8 name");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        dirs.push((name, path));
    }

    dirs.sort();
    Ok(dirs)
}

/// Replaces `path` with `data` by writing a sibling file and renaming it
/// into place.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = sibling(path, "new");

    let mut file = File::create(&tmp).context(IoSnafu { path: &tmp })?;
    file.write_all(data).context(IoSnafu { path: &tmp })?;
    file.sync_all().context(IoSnafu { path: &tmp })?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        IoSnafu { path }.into_error(e)
    })
}

/// `dir/.name.ext`, next to `path`.
fn sibling(path: &Path, ext: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{ext}"))
}
