//! The async operation record and its status machine.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use forrst_core::ErrorEntry;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Prefix of every operation id.
pub const OPERATION_ID_PREFIX: &str = "op_";

/// Upper bound on the serialized size of `OperationRecord::metadata`.
pub const MAX_METADATA_BYTES: usize = 65_536;

/// Returns the current wall-clock time as milliseconds since Unix epoch.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Whether `id` has the `op_` + 24 lowercase hex shape.
#[must_use]
pub fn is_valid_operation_id(id: &str) -> bool {
    id.strip_prefix(OPERATION_ID_PREFIX).is_some_and(|hex| {
        hex.len() == 24 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    })
}

// ---------------------------------------------------------------------------
// OperationStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of an async operation.
///
/// `Pending -> Processing -> {Completed, Failed}`, or `{Pending, Processing} -> Cancelled`.
/// Terminal states admit no further transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown operation status `{other}`")),
        }
    }
}

// ---------------------------------------------------------------------------
// OperationRecord
// ---------------------------------------------------------------------------

/// The async job of record.
///
/// Mutated only through [`AsyncOperationManager`](super::AsyncOperationManager)
/// transitions, each of which is persisted with a compare-and-swap on
/// `lock_version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub function: String,
    pub version: String,
    pub status: OperationStatus,
    /// Fraction complete in `[0, 1]`; never decreases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<i64>,
    pub lock_version: u64,
}

impl OperationRecord {
    /// A fresh `Pending` record at lock version 1.
    pub fn new(
        id: impl Into<String>,
        function: impl Into<String>,
        version: impl Into<String>,
        owner_id: Option<String>,
        now: i64,
    ) -> Self {
        Self {
            id: id.into(),
            function: function.into(),
            version: version.into(),
            status: OperationStatus::Pending,
            progress: None,
            message: None,
            result: None,
            errors: Vec::new(),
            callback_url: None,
            metadata: Map::new(),
            owner_id,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            lock_version: 1,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether `owner_id` may access this record. `None` is trusted access.
    #[must_use]
    pub fn is_accessible_by(&self, owner_id: Option<&str>) -> bool {
        match (owner_id, self.owner_id.as_deref()) {
            (Some(caller), Some(owner)) => caller == owner,
            _ => true,
        }
    }

    /// The client-facing view returned by the status and list functions.
    ///
    /// Omits the owner and the lock version.
    #[must_use]
    pub fn status_view(&self) -> Value {
        let mut view = json!({
            "operation_id": self.id,
            "function": self.function,
            "version": self.version,
            "status": self.status,
            "progress": self.progress,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
        });
        if let Some(obj) = view.as_object_mut() {
            let optional = [
                ("message", self.message.clone().map(Value::String)),
                ("result", self.result.clone()),
                ("started_at", self.started_at.map(Value::from)),
                ("completed_at", self.completed_at.map(Value::from)),
                ("cancelled_at", self.cancelled_at.map(Value::from)),
            ];
            for (key, value) in optional {
                if let Some(value) = value {
                    obj.insert(key.to_string(), value);
                }
            }
            if !self.errors.is_empty() {
                obj.insert("errors".to_string(), json!(self.errors));
            }
            if !self.metadata.is_empty() {
                obj.insert("metadata".to_string(), Value::Object(self.metadata.clone()));
            }
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!OperationStatus::Pending.is_terminal());
        assert!(!OperationStatus::Processing.is_terminal());
        assert!(OperationStatus::Completed.is_terminal());
        assert!(OperationStatus::Failed.is_terminal());
        assert!(OperationStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_parses_its_own_display() {
        for status in [
            OperationStatus::Pending,
            OperationStatus::Processing,
            OperationStatus::Completed,
            OperationStatus::Failed,
            OperationStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<OperationStatus>(), Ok(status));
        }
        assert!("running".parse::<OperationStatus>().is_err());
    }

    #[test]
    fn operation_id_shape() {
        assert!(is_valid_operation_id("op_0123456789abcdef01234567"));
        assert!(!is_valid_operation_id("op_0123456789ABCDEF01234567"));
        assert!(!is_valid_operation_id("op_0123"));
        assert!(!is_valid_operation_id("xx_0123456789abcdef01234567"));
    }

    #[test]
    fn owner_access_rules() {
        let mut record = OperationRecord::new("op_1", "f", "1.0.0", Some("alice".into()), 0);
        assert!(record.is_accessible_by(Some("alice")));
        assert!(!record.is_accessible_by(Some("bob")));
        assert!(record.is_accessible_by(None));
        record.owner_id = None;
        assert!(record.is_accessible_by(Some("bob")));
    }

    #[test]
    fn status_view_hides_owner_and_lock_version() {
        let record = OperationRecord::new("op_1", "f", "1.0.0", Some("alice".into()), 42);
        let view = record.status_view();
        assert_eq!(view["operation_id"], "op_1");
        assert_eq!(view["status"], "pending");
        assert!(view.get("owner_id").is_none());
        assert!(view.get("lock_version").is_none());
        assert!(view.get("result").is_none());
    }
}
