//! Record and device identity types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error parsing an identifier from text.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseIdError {
    pub kind: &'static str,
    pub value: String,
}

/// Lifetime-unique record identifier.
///
/// Assigned from a persisted counter at creation time. Ids are never
/// re-derived from log contents, so losing a log cannot cause reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u32);

impl RecordId {
    /// The id after this one, or `None` when the counter space is exhausted.
    pub fn next(self) -> Option<RecordId> {
        self.0.checked_add(1).map(RecordId)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for RecordId {
    fn from(id: u32) -> Self {
        RecordId(id)
    }
}

impl FromStr for RecordId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(RecordId).map_err(|_| ParseIdError {
            kind: "record id",
            value: s.to_string(),
        })
    }
}

/// Device identifier used by the backend to route submissions.
///
/// Restricted to ASCII alphanumerics, `-` and `_` so it can be placed in a
/// URL path segment unescaped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Parse and validate a device id.
    pub fn parse(s: &str) -> Result<Self, ParseIdError> {
        let valid = !s.is_empty()
            && s.len() <= 64
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(DeviceId(s.to_string()))
        } else {
            Err(ParseIdError {
                kind: "device id",
                value: s.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        DeviceId("node-0".to_string())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = ParseIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DeviceId::parse(&value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}
