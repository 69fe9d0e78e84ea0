//! Request and response envelopes.
//!
//! These structs are the wire contract of the protocol. The JSON shape is:
//!
//! ```text
//! Request:  {"protocol":{"name":"forrst","version":"0.1.0"},"id":"<str>",
//!            "call":{"function":"<urn>","version":"<semver>?","arguments":{...}?},
//!            "context":{...}?, "extensions":{"<urn>":{...}}?}
//! Success:  {"protocol":{...},"id":"<str>","result":{...},"extensions":[{"urn":"...","data":{...}}]?}
//! Error:    {"protocol":{...},"id":"<str>","result":null,"errors":[{"code":"<str>","message":"<str>"}]}
//! ```
//!
//! Object maps preserve insertion order (`serde_json` is built with
//! `preserve_order`), so `arguments` round-trip in the order the client sent them.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ErrorCode;

/// Protocol name carried in every envelope header.
pub const PROTOCOL_NAME: &str = "forrst";

/// Protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Context key identifying the calling principal.
///
/// Used for operation ownership and per-caller rate limiting.
pub const CALLER_ID_CONTEXT_KEY: &str = "caller_id";

/// Identity of wire requests that carry no `context.caller_id`.
pub const ANONYMOUS_CALLER: &str = "anonymous";

// ---------------------------------------------------------------------------
// ProtocolHeader
// ---------------------------------------------------------------------------

/// Identifies the wire dialect of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolHeader {
    pub name: String,
    pub version: String,
}

impl ProtocolHeader {
    /// Whether this header names the Forrst protocol.
    #[must_use]
    pub fn is_forrst(&self) -> bool {
        self.name == PROTOCOL_NAME
    }
}

impl Default for ProtocolHeader {
    fn default() -> Self {
        Self {
            name: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// The invocation payload: which function, which version, which arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Function URN, e.g. `urn:acme:forrst:fn:orders.list`.
    pub function: String,
    /// Exact semver, stability alias, or absent for "latest stable".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
}

impl Call {
    /// Creates a call without version selector or arguments.
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            version: None,
            arguments: None,
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn with_arguments(mut self, arguments: Map<String, Value>) -> Self {
        self.arguments = Some(arguments);
        self
    }

    /// Looks up a single argument by name.
    #[must_use]
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.as_ref().and_then(|args| args.get(name))
    }
}

// ---------------------------------------------------------------------------
// ExtensionMetadata
// ---------------------------------------------------------------------------

/// Side bag of per-request values keyed by extension name.
///
/// Lets one extension hand data to a later stage (or to another extension)
/// without mutating the envelope itself, e.g. the deadline extension stores the
/// request start time here during `RequestValidated` and reads it back during
/// `FunctionExecuted`. Never serialized and ignored by envelope equality.
#[derive(Debug, Default)]
pub struct ExtensionMetadata {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl ExtensionMetadata {
    /// Stores `value` under `extension`, replacing any previous value.
    pub fn insert(&self, extension: impl Into<String>, value: Value) {
        self.entries.lock().insert(extension.into(), value);
    }

    /// Returns a copy of the value stored under `extension`.
    #[must_use]
    pub fn get(&self, extension: &str) -> Option<Value> {
        self.entries.lock().get(extension).cloned()
    }

    /// Removes and returns the value stored under `extension`.
    pub fn remove(&self, extension: &str) -> Option<Value> {
        self.entries.lock().remove(extension)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Clone for ExtensionMetadata {
    fn clone(&self) -> Self {
        Self {
            entries: Mutex::new(self.entries.lock().clone()),
        }
    }
}

impl PartialEq for ExtensionMetadata {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// RequestEnvelope
// ---------------------------------------------------------------------------

/// An inbound function invocation.
///
/// Treated as immutable once constructed: the pipeline only ever hands out
/// shared references. Cross-stage state goes into [`RequestEnvelope::metadata`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub protocol: ProtocolHeader,
    pub id: String,
    pub call: Call,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
    /// Extension URN -> client options. Presence opts the request into that extension.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
    #[serde(skip)]
    metadata: ExtensionMetadata,
}

impl RequestEnvelope {
    /// Creates a request for `call` with a freshly generated id.
    #[must_use]
    pub fn new(call: Call) -> Self {
        Self {
            protocol: ProtocolHeader::default(),
            id: uuid::Uuid::new_v4().to_string(),
            call,
            context: None,
            extensions: Map::new(),
            metadata: ExtensionMetadata::default(),
        }
    }

    /// Replaces the generated id with a caller-chosen one.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Opts the request into the extension `urn` with the given options object.
    #[must_use]
    pub fn with_extension(mut self, urn: impl Into<String>, options: Value) -> Self {
        self.extensions.insert(urn.into(), options);
        self
    }

    /// Whether the client included `extensions.<urn>`.
    #[must_use]
    pub fn requests_extension(&self, urn: &str) -> bool {
        self.extensions.contains_key(urn)
    }

    /// Options the client sent for extension `urn`, if it is an object.
    #[must_use]
    pub fn extension_options(&self, urn: &str) -> Option<&Map<String, Value>> {
        self.extensions.get(urn).and_then(Value::as_object)
    }

    /// Looks up a context value.
    #[must_use]
    pub fn context_value(&self, key: &str) -> Option<&Value> {
        self.context.as_ref().and_then(|ctx| ctx.get(key))
    }

    /// The calling principal from `context.caller_id`, if present.
    #[must_use]
    pub fn caller_id(&self) -> Option<&str> {
        self.context_value(CALLER_ID_CONTEXT_KEY)
            .and_then(Value::as_str)
    }

    /// The identity a wire request acts as: `caller_id`, else
    /// [`ANONYMOUS_CALLER`]. Never the trusted (absent) owner.
    #[must_use]
    pub fn caller(&self) -> &str {
        self.caller_id().unwrap_or(ANONYMOUS_CALLER)
    }

    /// Per-request extension side bag.
    #[must_use]
    pub fn metadata(&self) -> &ExtensionMetadata {
        &self.metadata
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Location of the fault inside the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSource {
    /// JSON pointer into the request document, e.g. `/call/arguments/limit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    /// Byte offset into the raw payload, for parse errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
}

impl ErrorSource {
    pub fn pointer(pointer: impl Into<String>) -> Self {
        Self {
            pointer: Some(pointer.into()),
            position: None,
        }
    }

    #[must_use]
    pub fn position(position: u64) -> Self {
        Self {
            pointer: None,
            position: Some(position),
        }
    }
}

/// A single error reported to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
}

impl ErrorEntry {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details = Some(details);
        self
    }
}

// ---------------------------------------------------------------------------
// ResponseEnvelope
// ---------------------------------------------------------------------------

/// Data contributed to a response by one extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionData {
    pub urn: String,
    pub data: Value,
}

/// The single response produced for a request.
///
/// `result` and `errors` are private so the "never both" invariant holds by
/// construction: use [`ResponseEnvelope::success`] or [`ResponseEnvelope::error`].
/// Extensions may only append entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub protocol: ProtocolHeader,
    pub id: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    errors: Vec<ErrorEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    extensions: Vec<ExtensionData>,
}

impl ResponseEnvelope {
    /// A successful response. A `null` result is carried as absent.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            protocol: ProtocolHeader::default(),
            id: id.into(),
            result: if result.is_null() { None } else { Some(result) },
            errors: Vec::new(),
            extensions: Vec::new(),
        }
    }

    /// A response with `result: null` and no errors, for extensions that report
    /// everything through their extension data (e.g. an accepted async operation).
    pub fn empty(id: impl Into<String>) -> Self {
        Self::success(id, Value::Null)
    }

    /// An error response. `errors` should be non-empty.
    pub fn error(id: impl Into<String>, errors: Vec<ErrorEntry>) -> Self {
        Self {
            protocol: ProtocolHeader::default(),
            id: id.into(),
            result: None,
            errors,
            extensions: Vec::new(),
        }
    }

    /// Convenience for a single-entry error response.
    pub fn from_error(id: impl Into<String>, entry: ErrorEntry) -> Self {
        Self::error(id, vec![entry])
    }

    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn errors(&self) -> &[ErrorEntry] {
        &self.errors
    }

    #[must_use]
    pub fn extensions(&self) -> &[ExtensionData] {
        &self.extensions
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Data contributed by extension `urn`, if any.
    #[must_use]
    pub fn extension_data(&self, urn: &str) -> Option<&Value> {
        self.extensions
            .iter()
            .find(|ext| ext.urn == urn)
            .map(|ext| &ext.data)
    }

    /// Appends extension data without touching any other field.
    pub fn push_extension(&mut self, urn: impl Into<String>, data: Value) {
        self.extensions.push(ExtensionData {
            urn: urn.into(),
            data,
        });
    }

    #[must_use]
    pub fn with_extension(mut self, urn: impl Into<String>, data: Value) -> Self {
        self.push_extension(urn, data);
        self
    }

    /// Whether the decoded payload violates the result/errors exclusivity.
    #[must_use]
    pub fn has_result_and_errors(&self) -> bool {
        self.result.is_some() && !self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn new_request_generates_id() {
        let a = RequestEnvelope::new(Call::new("urn:acme:forrst:fn:ping"));
        let b = RequestEnvelope::new(Call::new("urn:acme:forrst:fn:ping"));
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
        assert_eq!(a.protocol, ProtocolHeader::default());
    }

    #[test]
    fn success_serializes_without_errors_key() {
        let resp = ResponseEnvelope::success("req-1", json!({"pong": true}));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["result"]["pong"], true);
        assert!(value.get("errors").is_none());
        assert!(value.get("extensions").is_none());
    }

    #[test]
    fn error_serializes_null_result() {
        let resp = ResponseEnvelope::from_error(
            "req-2",
            ErrorEntry::new(ErrorCode::FunctionNotFound, "nope"),
        );
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value["result"].is_null());
        assert_eq!(value["errors"][0]["code"], "FUNCTION_NOT_FOUND");
        assert!(!resp.is_success());
        assert!(!resp.has_result_and_errors());
    }

    #[test]
    fn push_extension_appends_in_order() {
        let mut resp = ResponseEnvelope::success("req-3", json!(1));
        resp.push_extension("urn:acme:forrst:ext:a", json!({"n": 1}));
        resp.push_extension("urn:acme:forrst:ext:b", json!({"n": 2}));
        assert_eq!(resp.extensions().len(), 2);
        assert_eq!(resp.extension_data("urn:acme:forrst:ext:b"), Some(&json!({"n": 2})));
        assert_eq!(resp.result(), Some(&json!(1)));
    }

    #[test]
    fn caller_id_reads_context() {
        let req = RequestEnvelope::new(Call::new("urn:acme:forrst:fn:ping"))
            .with_context(CALLER_ID_CONTEXT_KEY, json!("user-7"));
        assert_eq!(req.caller_id(), Some("user-7"));
        assert_eq!(req.caller(), "user-7");

        let anonymous = RequestEnvelope::new(Call::new("urn:acme:forrst:fn:ping"));
        assert_eq!(anonymous.caller_id(), None);
        assert_eq!(anonymous.caller(), ANONYMOUS_CALLER);
    }

    #[test]
    fn metadata_bag_is_ignored_by_equality_and_survives_clone() {
        let req = RequestEnvelope::new(Call::new("urn:acme:forrst:fn:ping")).with_id("same");
        let other = req.clone();
        req.metadata().insert("deadline", json!(1234));
        assert_eq!(req, other);
        assert_eq!(req.clone().metadata().get("deadline"), Some(json!(1234)));
        assert!(other.metadata().is_empty());
    }

    #[test]
    fn extension_options_require_object() {
        let req = RequestEnvelope::new(Call::new("urn:acme:forrst:fn:ping"))
            .with_extension("urn:acme:forrst:ext:a", json!({"ttl": 5}))
            .with_extension("urn:acme:forrst:ext:b", json!(true));
        assert!(req.extension_options("urn:acme:forrst:ext:a").is_some());
        assert!(req.extension_options("urn:acme:forrst:ext:b").is_none());
        assert!(req.requests_extension("urn:acme:forrst:ext:b"));
    }
}
