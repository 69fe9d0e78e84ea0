//! Protocol durations: `{"value": 30, "unit": "second"}`.
//!
//! Used for deadlines, cache TTLs and `retry_after` hints.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ForrstError;

/// Unit of a [`ProtocolDuration`]. Plural spellings are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[serde(alias = "milliseconds", alias = "ms")]
    Millisecond,
    #[serde(alias = "seconds", alias = "s")]
    Second,
    #[serde(alias = "minutes")]
    Minute,
    #[serde(alias = "hours")]
    Hour,
}

impl TimeUnit {
    fn millis(self) -> u64 {
        match self {
            Self::Millisecond => 1,
            Self::Second => 1_000,
            Self::Minute => 60_000,
            Self::Hour => 3_600_000,
        }
    }
}

/// A duration as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDuration {
    pub value: u64,
    pub unit: TimeUnit,
}

impl ProtocolDuration {
    #[must_use]
    pub const fn millis(value: u64) -> Self {
        Self {
            value,
            unit: TimeUnit::Millisecond,
        }
    }

    #[must_use]
    pub const fn seconds(value: u64) -> Self {
        Self {
            value,
            unit: TimeUnit::Second,
        }
    }

    /// Total length in milliseconds, saturating at `u64::MAX`.
    #[must_use]
    pub fn as_millis(&self) -> u64 {
        self.value.saturating_mul(self.unit.millis())
    }

    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.as_millis())
    }

    /// Parses a duration object, reporting `InvalidArguments` at `pointer`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArguments` when the value is not a `{value, unit}` object
    /// with a non-negative integer value and a known unit.
    pub fn from_value(value: &Value, pointer: &str) -> Result<Self, ForrstError> {
        serde_json::from_value(value.clone()).map_err(|e| ForrstError::InvalidArguments {
            message: format!("invalid duration: {e}"),
            pointer: Some(pointer.to_string()),
        })
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
