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

//! The line file backing a queue.
//!
//! Records are kept oldest first. Reads scan the file top to bottom; every
//! rewrite goes to a sibling swap file which is then renamed over the line
//! file, so an interrupted rewrite leaves the previous file intact.
//!
//! Lines are decoded lossily: bytes that are not valid UTF-8 become U+FFFD
//! instead of failing every read of the file.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use snafu::ResultExt;

use crate::{
    Result,
    error::IoSnafu,
    message::{ItemValue, QueueItem, encode_line, parse_line},
    path::SWAP_FILE,
};

/// A `key\tvalue` line file.
#[derive(Debug, Clone)]
pub struct LineStore {
    path: PathBuf,
    swap: PathBuf,
}

impl LineStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let swap = path.with_file_name(SWAP_FILE);
        Self { path, swap }
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn exists(&self) -> bool { self.path.is_file() }

    /// Creates an empty line file if none exists.
    pub fn ensure_exists(&self) -> io::Result<()> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map(drop)
    }

    /// Number of records. An absent file holds none.
    pub fn count(&self) -> Result<usize> {
        let Some(reader) = self.reader()? else {
            return Ok(0);
        };
        let mut count = 0;
        for line in lossy_lines(reader) {
            let line = line.context(IoSnafu { path: &self.path })?;
            if !line.trim().is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// The oldest `count` records, oldest first.
    pub fn read_oldest(&self, count: usize) -> Result<Vec<QueueItem>> {
        let Some(reader) = self.reader()? else {
            return Ok(Vec::new());
        };
        let mut items = Vec::with_capacity(count.min(1024));
        for line in lossy_lines(reader) {
            if items.len() >= count {
                break;
            }
            let line = line.context(IoSnafu { path: &self.path })?;
            if let Some(item) = parse_line(&line) {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Removes the oldest `count` records and returns how many remain.
    ///
    /// Blank lines are not carried over into the rewritten file.
    pub fn drop_oldest(&self, count: usize) -> Result<usize> {
        let total = self.count()?;
        if count >= total {
            self.truncate()?;
            return Ok(0);
        }

        let Some(reader) = self.reader()? else {
            return Ok(0);
        };
        let file = File::create(&self.swap).context(IoSnafu { path: &self.swap })?;
        let mut writer = BufWriter::new(file);
        let mut remaining = 0;
        for line in lossy_lines(reader)
            .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
            .skip(count)
        {
            let line = line.context(IoSnafu { path: &self.path })?;
            writeln!(writer, "{line}").context(IoSnafu { path: &self.swap })?;
            remaining += 1;
        }
        finish(writer, &self.swap)?;
        self.replace_with_swap()?;
        Ok(remaining)
    }

    /// Empties the file in place.
    pub fn truncate(&self) -> Result<()> {
        File::create(&self.path).context(IoSnafu { path: &self.path })?;
        Ok(())
    }

    /// Linear scan for a record with `key`.
    pub fn key_exists(&self, key: &str) -> Result<bool> {
        let Some(reader) = self.reader()? else {
            return Ok(false);
        };
        for line in lossy_lines(reader) {
            let line = line.context(IoSnafu { path: &self.path })?;
            if parse_line(&line).is_some_and(|item| item.key == key) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Appends every non-blank record of this file to `writer`.
    pub fn copy_records_into<W: Write>(&self, writer: &mut W, target: &Path) -> Result<usize> {
        let Some(reader) = self.reader()? else {
            return Ok(0);
        };
        let mut copied = 0;
        for line in lossy_lines(reader) {
            let line = line.context(IoSnafu { path: &self.path })?;
            if line.trim().is_empty() {
                continue;
            }
            writeln!(writer, "{line}").context(IoSnafu { path: target })?;
            copied += 1;
        }
        Ok(copied)
    }

    /// Renames `source` over the line file.
    pub fn replace_with(&self, source: &Path) -> Result<()> {
        fs::rename(source, &self.path).context(IoSnafu { path: &self.path })
    }

    pub(crate) fn swap_path(&self) -> &Path { &self.swap }

    fn replace_with_swap(&self) -> Result<()> { self.replace_with(&self.swap) }

    fn reader(&self) -> Result<Option<BufReader<File>>> {
        match File::open(&self.path) {
            Ok(file) => Ok(Some(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(IoSnafu { path: &self.path }),
        }
    }
}

/// Iterates the lines of `reader` like [`BufRead::lines`], replacing invalid
/// UTF-8 instead of failing.
fn lossy_lines<R: BufRead>(mut reader: R) -> impl Iterator<Item = io::Result<String>> {
    let mut buf = Vec::new();
    std::iter::from_fn(move || {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                Some(Ok(String::from_utf8_lossy(&buf).into_owned()))
            }
            Err(e) => Some(Err(e)),
        }
    })
}

/// Appends a newline to `path` if its last byte is not one.
///
/// Returns `true` if the file was repaired. An absent or empty file is left
/// alone.
pub(crate) fn terminate_last_line(path: &Path) -> Result<bool> {
    let mut file = match OpenOptions::new().read(true).append(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e).context(IoSnafu { path }),
    };
    let len = file.metadata().context(IoSnafu { path })?.len();
    if len == 0 {
        return Ok(false);
    }

    let mut last = [0_u8; 1];
    file.seek(SeekFrom::End(-1))
        .and_then(|_| file.read_exact(&mut last))
        .context(IoSnafu { path })?;
    if last[0] == b'\n' {
        return Ok(false);
    }

    file.write_all(b"\n")
        .and_then(|()| file.sync_all())
        .context(IoSnafu { path })?;
    Ok(true)
}

/// Writes one record to `writer`.
pub fn append<W: Write>(writer: &mut W, key: &str, value: &ItemValue) -> io::Result<()> {
    writer.write_all(encode_line(key, value).as_bytes())
}

/// Flushes and syncs a buffered rewrite target.
pub(crate) fn finish(writer: BufWriter<File>, path: &Path) -> Result<()> {
    let file = writer
        .into_inner()
        .map_err(io::IntoInnerError::into_error)
        .context(IoSnafu { path })?;
    file.sync_all().context(IoSnafu { path })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn store_with(temp_dir: &TempDir, content: &str) -> LineStore {
        let path = temp_dir.path().join("queue.txt");
        fs::write(&path, content).unwrap();
        LineStore::new(path)
    }

    #[test]
    fn test_absent_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = LineStore::new(temp_dir.path().join("queue.txt"));

        assert!(!store.exists());
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.read_oldest(3).unwrap().is_empty());
        assert!(!store.key_exists("a").unwrap());
    }

    #[test]
    fn test_count_skips_blank_lines() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with(&temp_dir, "a\t1\n\nb\t2\n\n");
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_read_oldest_takes_head() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with(&temp_dir, "a\t1\nb\t2\nc\t3\n");

        let items = store.read_oldest(2).unwrap();
        assert_eq!(items, vec![QueueItem::new("a", "1"), QueueItem::new("b", "2")]);

        let all = store.read_oldest(10).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_drop_oldest_keeps_tail() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with(&temp_dir, "a\t1\n\nb\t2\nc\t3\n");

        assert_eq!(store.drop_oldest(1).unwrap(), 2);
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "b\t2\nc\t3\n");
        assert!(!store.swap_path().exists());
    }

    #[test]
    fn test_drop_everything_truncates() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with(&temp_dir, "a\t1\nb\t2\n");

        assert_eq!(store.drop_oldest(5).unwrap(), 0);
        assert!(store.exists());
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "");
    }

    #[test]
    fn test_key_exists() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with(&temp_dir, "a\t1\nb\t2\na\t3\n");

        assert!(store.key_exists("b").unwrap());
        assert!(!store.key_exists("1").unwrap());
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.txt");
        fs::write(&path, b"a\t\xffbad\r\nb\t2\n").unwrap();
        let store = LineStore::new(path);

        assert_eq!(store.count().unwrap(), 2);
        assert!(store.key_exists("b").unwrap());
        assert_eq!(store.read_oldest(1).unwrap(), vec![QueueItem::new(
            "a",
            "\u{FFFD}bad"
        )]);
        assert_eq!(store.drop_oldest(1).unwrap(), 1);
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "b\t2\n");
    }

    #[test]
    fn test_terminate_last_line() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.tmp");

        assert!(!terminate_last_line(&path).unwrap());
        fs::write(&path, "").unwrap();
        assert!(!terminate_last_line(&path).unwrap());

        fs::write(&path, "a\t1\ntorn\tha").unwrap();
        assert!(terminate_last_line(&path).unwrap());
        assert!(!terminate_last_line(&path).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "a\t1\ntorn\tha\n");
    }

    #[test]
    fn test_append_and_copy() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with(&temp_dir, "old\tx\n\n");

        let mut buf = Vec::new();
        append(&mut buf, "new", &ItemValue::from("y\nz")).unwrap();
        let copied = store
            .copy_records_into(&mut buf, Path::new("memory"))
            .unwrap();

        assert_eq!(copied, 1);
        assert_eq!(String::from_utf8(buf).unwrap(), "new\ty z\nold\tx\n");
    }
}
