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

//! Record types and on-disk line format.
//!
//! Every record is a single line:
//!
//! ```text
//! ┌──────────┬─────┬──────────────────────┬────┐
//! │ key      │ \t  │ value (single line)  │ \n │
//! └──────────┴─────┴──────────────────────┴────┘
//! ```
//!
//! - **key**: non-empty, must not contain a tab or line break
//! - **value**: line breaks are replaced by a space on write; structured
//!   values are stored as compact JSON
//!
//! Blank lines are ignored by every reader. A line without a tab is read as
//! a record with an empty value.

use snafu::ensure;

use crate::{Result, error::InvalidArgumentSnafu};

/// A record drained from the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub key:   String,
    pub value: String,
}

impl QueueItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key:   key.into(),
            value: value.into(),
        }
    }
}

/// A value accepted by [`Queue::add_item`](crate::Queue::add_item).
#[derive(Debug, Clone, PartialEq)]
pub enum ItemValue {
    Text(String),
    /// Stored as compact JSON.
    Structured(serde_json::Value),
}

impl ItemValue {
    /// The single-line form written after the tab.
    pub(crate) fn to_line_value(&self) -> String {
        match self {
            Self::Text(text) => sanitize(text),
            Self::Structured(value) => sanitize(&value.to_string()),
        }
    }
}

impl From<&str> for ItemValue {
    fn from(value: &str) -> Self { Self::Text(value.to_owned()) }
}

impl From<String> for ItemValue {
    fn from(value: String) -> Self { Self::Text(value) }
}

impl From<&String> for ItemValue {
    fn from(value: &String) -> Self { Self::Text(value.clone()) }
}

impl From<serde_json::Value> for ItemValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Self::Text(text),
            other => Self::Structured(other),
        }
    }
}

/// Forces `value` onto one line.
pub(crate) fn sanitize(value: &str) -> String {
    value.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

pub(crate) fn validate_key(key: &str) -> Result<()> {
    ensure!(
        !key.is_empty(),
        InvalidArgumentSnafu {
            reason: "item key is empty",
        }
    );
    ensure!(
        !key.contains(['\t', '\n', '\r']),
        InvalidArgumentSnafu {
            reason: format!("item key {key:?} contains a tab or line break"),
        }
    );
    Ok(())
}

/// Formats one record including the trailing newline.
pub(crate) fn encode_line(key: &str, value: &ItemValue) -> String {
    format!("{key}\t{}\n", value.to_line_value())
}

/// Parses one line, returning `None` for a blank line.
pub(crate) fn parse_line(line: &str) -> Option<QueueItem> {
    if line.trim().is_empty() {
        return None;
    }
    let item = match line.split_once('\t') {
        Some((key, value)) => QueueItem::new(key, value),
        None => QueueItem::new(line, ""),
    };
    Some(item)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    #[test_case("plain", "plain" ; "untouched")]
    #[test_case("a\nb", "a b" ; "newline")]
    #[test_case("a\r\nb", "a b" ; "crlf collapses to one space")]
    #[test_case("a\rb", "a b" ; "lone carriage return")]
    #[test_case("a\n\nb", "a  b" ; "each break replaced")]
    fn test_sanitize(input: &str, expected: &str) {
        assert_eq!(sanitize(input), expected);
    }

    #[test]
    fn test_encode_text_line() {
        let line = encode_line("7", &ItemValue::from("thick-cut\nbacon"));
        assert_eq!(line, "7\tthick-cut bacon\n");
    }

    #[test]
    fn test_encode_structured_line() {
        let value = ItemValue::from(json!({"qty": 2, "item": "rye"}));
        let line = encode_line("order-1", &value);
        assert_eq!(line, "order-1\t{\"item\":\"rye\",\"qty\":2}\n");
    }

    #[test]
    fn test_json_string_is_text() {
        assert_eq!(ItemValue::from(json!("mustard")), ItemValue::Text("mustard".into()));
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(
            parse_line("5\tunsalted butter"),
            Some(QueueItem::new("5", "unsalted butter"))
        );
        assert_eq!(parse_line("lonely"), Some(QueueItem::new("lonely", "")));
        assert_eq!(parse_line("k\ta\tb"), Some(QueueItem::new("k", "a\tb")));
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   "), None);
    }

    #[test_case("" ; "empty")]
    #[test_case("a\tb" ; "tab")]
    #[test_case("a\nb" ; "newline")]
    fn test_invalid_keys(key: &str) {
        assert!(validate_key(key).is_err());
    }
}
