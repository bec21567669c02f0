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

use std::error::Error as StdError;

use serde::Serialize;
use strum::EnumProperty;

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Serialize,
    strum_macros::Display,
    strum_macros::EnumProperty,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StatusCode {
    #[strum(props(tier = "policy"))]
    InvalidArgument,
    #[strum(props(tier = "policy"))]
    NotFound,
    #[strum(props(tier = "policy"))]
    Forbidden,
    #[strum(props(tier = "policy"))]
    Conflict,
    #[strum(props(tier = "policy"))]
    FailedPrecondition,
    #[strum(props(tier = "io"))]
    Unavailable,
    #[strum(props(tier = "fatal"))]
    Internal,
    #[strum(props(tier = "fatal"))]
    Unknown,
}

/// How severe an error is from the caller's point of view.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum_macros::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Tier {
    /// The caller broke a rule (bad argument, missing lock, read-only
    /// target). Nothing was written.
    Policy,
    /// An I/O operation failed part way; retrying may succeed.
    Io,
    /// The component cannot be used any more.
    Fatal,
}

impl StatusCode {
    pub fn tier(self) -> Tier {
        self.get_str("tier")
            .and_then(|value| value.parse::<Tier>().ok())
            .unwrap_or(Tier::Fatal)
    }

    pub fn is_policy(self) -> bool { self.tier() == Tier::Policy }
}

pub trait ErrorExt: StdError {
    fn status_code(&self) -> StatusCode { StatusCode::Unknown }

    fn output_msg(&self) -> String
    where
        Self: Sized,
    {
        match self.status_code() {
            StatusCode::Unknown | StatusCode::Internal => {
                format!("Internal error: {}", self.status_code())
            }
            _ => match self.root_cause() {
                Some(root) => format!("{self}: {root}"),
                None => format!("{self}"),
            },
        }
    }

    fn root_cause(&self) -> Option<&dyn StdError>
    where
        Self: Sized,
    {
        let mut source = self.source()?;
        while let Some(next) = source.source() {
            source = next;
        }
        Some(source)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_status_code_tiers() {
        assert_eq!(StatusCode::InvalidArgument.tier(), Tier::Policy);
        assert_eq!(StatusCode::FailedPrecondition.tier(), Tier::Policy);
        assert_eq!(StatusCode::Unavailable.tier(), Tier::Io);
        assert_eq!(StatusCode::Internal.tier(), Tier::Fatal);
        assert!(StatusCode::Conflict.is_policy());
        assert!(!StatusCode::Unknown.is_policy());
    }

    #[test]
    fn test_status_code_names() {
        assert_eq!(StatusCode::FailedPrecondition.to_string(), "failed_precondition");
        assert_eq!(
            StatusCode::from_str("forbidden").unwrap(),
            StatusCode::Forbidden
        );
    }
}
