//! Protocol codecs: envelope <-> wire bytes.
//!
//! The pipeline depends only on the envelope model; a [`ProtocolCodec`] adapts a
//! concrete wire format to it. Two codecs ship here:
//!
//! - [`JsonCodec`]: the reference encoding (`application/json`)
//! - [`MsgPackCodec`]: `MessagePack` via `rmp-serde` (`application/msgpack`)
//!
//! Both decode into a generic document first, bound its nesting depth, run
//! [`validate_request`] for structural checks, and only then build the typed
//! envelope. Malformed bytes and excessive depth are `ParseError`; structural
//! contract violations are `InvalidRequest` with a JSON pointer to the field.

use serde::Deserialize;
use serde_json::Value;

use crate::envelope::{RequestEnvelope, ResponseEnvelope, PROTOCOL_NAME};
use crate::error::ForrstError;

/// Default bound on object/array nesting accepted by decoders.
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// Adapter between the envelope model and a wire format.
///
/// Used as `Arc<dyn ProtocolCodec>`.
pub trait ProtocolCodec: Send + Sync {
    /// MIME type written on responses.
    fn content_type(&self) -> &'static str;

    /// Encodes a request envelope.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if serialization fails.
    fn encode_request(&self, request: &RequestEnvelope) -> Result<Vec<u8>, ForrstError>;

    /// Decodes and validates a request envelope.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` for malformed or too deeply nested input and
    /// `InvalidRequest` for structural violations.
    fn decode_request(&self, bytes: &[u8]) -> Result<RequestEnvelope, ForrstError>;

    /// Encodes a response envelope.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if serialization fails.
    fn encode_response(&self, response: &ResponseEnvelope) -> Result<Vec<u8>, ForrstError>;

    /// Decodes a response envelope.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` for malformed input or a response carrying both
    /// `result` and `errors`.
    fn decode_response(&self, bytes: &[u8]) -> Result<ResponseEnvelope, ForrstError>;

    /// Structural validation of a decoded request document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` naming the offending field.
    fn validate(&self, data: &Value) -> Result<(), ForrstError> {
        validate_request(data)
    }

    /// Best-effort extraction of the request id from a payload that failed to
    /// decode, so the error response can still be correlated.
    fn recover_id(&self, bytes: &[u8]) -> Option<String> {
        let _ = bytes;
        None
    }
}

fn id_of(document: &Value) -> Option<String> {
    document
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn parse_error(err: impl std::fmt::Display) -> ForrstError {
    ForrstError::Parse {
        message: err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Structural validation
// ---------------------------------------------------------------------------

/// Escapes a key for use as a JSON pointer segment (RFC 6901).
fn pointer_segment(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn optional_object(parent: &Value, key: &str, pointer: &str) -> Result<(), ForrstError> {
    match parent.get(key) {
        None | Some(Value::Null | Value::Object(_)) => Ok(()),
        Some(_) => Err(ForrstError::invalid_request(
            format!("`{key}` must be an object"),
            pointer,
        )),
    }
}

/// Checks the request document against the envelope contract.
///
/// # Errors
///
/// Returns `InvalidRequest` with a JSON pointer for the first violation found.
pub fn validate_request(data: &Value) -> Result<(), ForrstError> {
    let Some(root) = data.as_object() else {
        return Err(ForrstError::invalid_request("request must be an object", ""));
    };

    let protocol = root
        .get("protocol")
        .and_then(Value::as_object)
        .ok_or_else(|| ForrstError::invalid_request("missing `protocol`", "/protocol"))?;
    match protocol.get("name").and_then(Value::as_str) {
        Some(PROTOCOL_NAME) => {}
        Some(other) => {
            return Err(ForrstError::invalid_request(
                format!("unsupported protocol `{other}`"),
                "/protocol/name",
            ))
        }
        None => {
            return Err(ForrstError::invalid_request(
                "missing `protocol.name`",
                "/protocol/name",
            ))
        }
    }
    if !protocol.get("version").is_some_and(Value::is_string) {
        return Err(ForrstError::invalid_request(
            "missing `protocol.version`",
            "/protocol/version",
        ));
    }

    match root.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => {}
        _ => {
            return Err(ForrstError::invalid_request(
                "`id` must be a non-empty string",
                "/id",
            ))
        }
    }

    let call = root
        .get("call")
        .filter(|c| c.is_object())
        .ok_or_else(|| ForrstError::invalid_request("missing `call`", "/call"))?;
    match call.get("function").and_then(Value::as_str) {
        Some(function) if !function.is_empty() => {}
        _ => {
            return Err(ForrstError::invalid_request(
                "missing `call.function`",
                "/call/function",
            ))
        }
    }
    if !matches!(call.get("version"), None | Some(Value::Null | Value::String(_))) {
        return Err(ForrstError::invalid_request(
            "`call.version` must be a string",
            "/call/version",
        ));
    }
    optional_object(call, "arguments", "/call/arguments")?;
    optional_object(data, "context", "/context")?;
    optional_object(data, "extensions", "/extensions")?;

    if let Some(extensions) = root.get("extensions").and_then(Value::as_object) {
        for (urn, options) in extensions {
            if !options.is_object() {
                return Err(ForrstError::invalid_request(
                    format!("options for extension `{urn}` must be an object"),
                    format!("/extensions/{}", pointer_segment(urn)),
                ));
            }
        }
    }
    Ok(())
}

/// Validates a decoded document and converts it into a typed request.
fn request_from_value(mut data: Value, codec: &dyn ProtocolCodec) -> Result<RequestEnvelope, ForrstError> {
    codec.validate(&data)?;
    if let Some(root) = data.as_object_mut() {
        if root.get("extensions").is_some_and(Value::is_null) {
            root.remove("extensions");
        }
    }
    serde_json::from_value(data).map_err(|e| ForrstError::InvalidRequest {
        message: e.to_string(),
        pointer: None,
    })
}

fn response_checked(response: ResponseEnvelope) -> Result<ResponseEnvelope, ForrstError> {
    if response.has_result_and_errors() {
        return Err(parse_error("response carries both `result` and `errors`"));
    }
    Ok(response)
}

// ---------------------------------------------------------------------------
// Depth bounds
// ---------------------------------------------------------------------------

/// Scans raw JSON for nesting deeper than `max_depth` without building anything.
fn check_json_depth(bytes: &[u8], max_depth: usize) -> Result<(), ForrstError> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (position, &byte) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                if depth > max_depth {
                    return Err(parse_error(format!(
                        "maximum nesting depth of {max_depth} exceeded at byte {position}"
                    )));
                }
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

/// Nesting depth of an already-decoded document.
fn value_depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(value_depth).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(value_depth).max().unwrap_or(0),
        _ => 0,
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// Reference JSON codec.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    max_depth: usize,
}

impl JsonCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_DEPTH)
    }

    #[must_use]
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    fn decode_document(&self, bytes: &[u8]) -> Result<Value, ForrstError> {
        check_json_depth(bytes, self.max_depth)?;
        // Depth is already bounded above, so serde_json's own (lower) limit is lifted.
        let mut de = serde_json::Deserializer::from_slice(bytes);
        de.disable_recursion_limit();
        let value = Value::deserialize(&mut de).map_err(parse_error)?;
        de.end().map_err(parse_error)?;
        Ok(value)
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolCodec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode_request(&self, request: &RequestEnvelope) -> Result<Vec<u8>, ForrstError> {
        serde_json::to_vec(request).map_err(parse_error)
    }

    fn decode_request(&self, bytes: &[u8]) -> Result<RequestEnvelope, ForrstError> {
        let data = self.decode_document(bytes)?;
        request_from_value(data, self)
    }

    fn encode_response(&self, response: &ResponseEnvelope) -> Result<Vec<u8>, ForrstError> {
        serde_json::to_vec(response).map_err(parse_error)
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<ResponseEnvelope, ForrstError> {
        let data = self.decode_document(bytes)?;
        response_checked(serde_json::from_value(data).map_err(parse_error)?)
    }

    fn recover_id(&self, bytes: &[u8]) -> Option<String> {
        id_of(&self.decode_document(bytes).ok()?)
    }
}

// ---------------------------------------------------------------------------
// MsgPackCodec
// ---------------------------------------------------------------------------

/// `MessagePack` codec using named (map) encoding so field names survive.
#[derive(Debug, Clone)]
pub struct MsgPackCodec {
    max_depth: usize,
}

impl MsgPackCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_DEPTH)
    }

    #[must_use]
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    fn decode_document(&self, bytes: &[u8]) -> Result<Value, ForrstError> {
        let value: Value = rmp_serde::from_slice(bytes).map_err(parse_error)?;
        if value_depth(&value) > self.max_depth {
            return Err(parse_error(format!(
                "maximum nesting depth of {} exceeded",
                self.max_depth
            )));
        }
        Ok(value)
    }
}

impl Default for MsgPackCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolCodec for MsgPackCodec {
    fn content_type(&self) -> &'static str {
        "application/msgpack"
    }

    fn encode_request(&self, request: &RequestEnvelope) -> Result<Vec<u8>, ForrstError> {
        rmp_serde::to_vec_named(request).map_err(parse_error)
    }

    fn decode_request(&self, bytes: &[u8]) -> Result<RequestEnvelope, ForrstError> {
        let data = self.decode_document(bytes)?;
        request_from_value(data, self)
    }

    fn encode_response(&self, response: &ResponseEnvelope) -> Result<Vec<u8>, ForrstError> {
        rmp_serde::to_vec_named(response).map_err(parse_error)
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<ResponseEnvelope, ForrstError> {
        let data = self.decode_document(bytes)?;
        response_checked(serde_json::from_value(data).map_err(parse_error)?)
    }

    fn recover_id(&self, bytes: &[u8]) -> Option<String> {
        id_of(&self.decode_document(bytes).ok()?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::{json, Map};

    use super::*;
    use crate::envelope::{Call, ErrorEntry};
    use crate::error::ErrorCode;

    fn sample_request() -> RequestEnvelope {
        let mut args = Map::new();
        args.insert("zeta".into(), json!(1));
        args.insert("alpha".into(), json!({"nested": [1, 2, 3]}));
        RequestEnvelope::new(
            Call::new("urn:acme:forrst:fn:orders.list")
                .with_version("2.0.0")
                .with_arguments(args),
        )
        .with_id("req-1")
        .with_context("caller_id", json!("user-1"))
        .with_extension("urn:cline:forrst:ext:deadline", json!({"value": 5, "unit": "second"}))
    }

    fn expect_invalid(body: Value, pointer: &str) {
        let codec = JsonCodec::new();
        let err = codec
            .decode_request(&serde_json::to_vec(&body).unwrap())
            .unwrap_err();
        match err {
            ForrstError::InvalidRequest { pointer: p, .. } => {
                assert_eq!(p.as_deref(), Some(pointer), "body: {body}");
            }
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }

    #[test]
    fn json_round_trip_preserves_argument_order() {
        let codec = JsonCodec::new();
        let req = sample_request();
        let bytes = codec.encode_request(&req).unwrap();
        let decoded = codec.decode_request(&bytes).unwrap();
        assert_eq!(decoded, req);
        let keys: Vec<_> = decoded.call.arguments.unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn msgpack_round_trip() {
        let codec = MsgPackCodec::new();
        let req = sample_request();
        let decoded = codec.decode_request(&codec.encode_request(&req).unwrap()).unwrap();
        assert_eq!(decoded, req);

        let resp = ResponseEnvelope::success("req-1", json!({"total": 3}))
            .with_extension("urn:cline:forrst:ext:caching", json!({"hit": false}));
        let decoded = codec
            .decode_response(&codec.encode_response(&resp).unwrap())
            .unwrap();
        assert_eq!(decoded, resp);
        assert_eq!(codec.content_type(), "application/msgpack");
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = JsonCodec::new().decode_request(b"{\"protocol\":").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParseError);
    }

    #[test]
    fn trailing_garbage_is_parse_error() {
        let codec = JsonCodec::new();
        let mut bytes = codec.encode_request(&sample_request()).unwrap();
        bytes.extend_from_slice(b" {}");
        assert_eq!(codec.decode_request(&bytes).unwrap_err().code(), ErrorCode::ParseError);
    }

    #[test]
    fn nesting_beyond_limit_is_parse_error() {
        let depth = DEFAULT_MAX_DEPTH + 1;
        let mut nested = String::new();
        nested.push_str(&"[".repeat(depth));
        nested.push_str(&"]".repeat(depth));
        let body = format!(
            r#"{{"protocol":{{"name":"forrst","version":"0.1.0"}},"id":"1","call":{{"function":"urn:acme:forrst:fn:x","arguments":{{"deep":{nested}}}}}}}"#
        );
        let err = JsonCodec::new().decode_request(body.as_bytes()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParseError);
    }

    #[test]
    fn nesting_within_limit_is_accepted() {
        let depth = 300;
        let nested = format!("{}{}", "[".repeat(depth), "]".repeat(depth));
        let body = format!(
            r#"{{"protocol":{{"name":"forrst","version":"0.1.0"}},"id":"1","call":{{"function":"urn:acme:forrst:fn:x","arguments":{{"deep":{nested}}}}}}}"#
        );
        assert!(JsonCodec::new().decode_request(body.as_bytes()).is_ok());
    }

    #[test]
    fn brackets_inside_strings_do_not_count_towards_depth() {
        let codec = JsonCodec::with_max_depth(4);
        let body = json!({
            "protocol": {"name": "forrst", "version": "0.1.0"},
            "id": "1",
            "call": {"function": "urn:acme:forrst:fn:x", "arguments": {"s": "[[[[[[\"]]]]"}},
        });
        assert!(codec.decode_request(&serde_json::to_vec(&body).unwrap()).is_ok());
    }

    #[test]
    fn msgpack_depth_is_bounded() {
        let codec = MsgPackCodec::with_max_depth(3);
        let mut req = sample_request();
        let mut args = Map::new();
        args.insert("deep".into(), json!([[[[1]]]]));
        req.call.arguments = Some(args);
        let bytes = codec.encode_request(&req).unwrap();
        assert_eq!(codec.decode_request(&bytes).unwrap_err().code(), ErrorCode::ParseError);
    }

    #[test]
    fn missing_id_is_invalid_request() {
        expect_invalid(
            json!({"protocol": {"name": "forrst", "version": "0.1.0"}, "call": {"function": "urn:acme:forrst:fn:x"}}),
            "/id",
        );
    }

    #[test]
    fn missing_function_is_invalid_request() {
        expect_invalid(
            json!({"protocol": {"name": "forrst", "version": "0.1.0"}, "id": "1", "call": {}}),
            "/call/function",
        );
    }

    #[test]
    fn wrong_protocol_name_is_invalid_request() {
        expect_invalid(
            json!({"protocol": {"name": "jsonrpc", "version": "2.0"}, "id": "1", "call": {"function": "f"}}),
            "/protocol/name",
        );
    }

    #[test]
    fn array_arguments_are_invalid_request() {
        expect_invalid(
            json!({"protocol": {"name": "forrst", "version": "0.1.0"}, "id": "1", "call": {"function": "f", "arguments": [1, 2]}}),
            "/call/arguments",
        );
    }

    #[test]
    fn non_object_extension_options_are_invalid_request() {
        expect_invalid(
            json!({
                "protocol": {"name": "forrst", "version": "0.1.0"},
                "id": "1",
                "call": {"function": "f"},
                "extensions": {"urn:cline:forrst:ext:async": true},
            }),
            "/extensions/urn:cline:forrst:ext:async",
        );
    }

    #[test]
    fn null_extensions_are_treated_as_absent() {
        let body = json!({
            "protocol": {"name": "forrst", "version": "0.1.0"},
            "id": "1",
            "call": {"function": "f", "version": null},
            "extensions": null,
        });
        let req = JsonCodec::new()
            .decode_request(&serde_json::to_vec(&body).unwrap())
            .unwrap();
        assert!(req.extensions.is_empty());
        assert!(req.call.version.is_none());
    }

    #[test]
    fn recovers_id_from_structurally_invalid_request() {
        let body = br#"{"protocol":{"name":"forrst","version":"0.1.0"},"id":"req-9","call":{}}"#;
        let codec = JsonCodec::new();
        assert!(codec.decode_request(body).is_err());
        assert_eq!(codec.recover_id(body).as_deref(), Some("req-9"));
        assert_eq!(codec.recover_id(b"not json"), None);
    }

    #[test]
    fn response_with_result_and_errors_is_rejected() {
        let body = json!({
            "protocol": {"name": "forrst", "version": "0.1.0"},
            "id": "1",
            "result": {"ok": true},
            "errors": [ErrorEntry::new(ErrorCode::Conflict, "boom")],
        });
        let err = JsonCodec::new()
            .decode_response(&serde_json::to_vec(&body).unwrap())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParseError);
    }

    fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 _\\-\\[\\]{}\"]{0,12}".prop_map(Value::String),
        ]
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        arb_scalar().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    prop_compose! {
        fn arb_request()(
            id in "[a-zA-Z0-9-]{1,24}",
            vendor in "[a-z]{1,8}",
            name in "[a-z]{1,8}",
            version in prop::option::of("[0-9]\\.[0-9]\\.[0-9]"),
            arguments in prop::option::of(prop::collection::btree_map("[a-z]{1,6}", arb_value(), 0..5)),
            caller in prop::option::of("[a-z]{1,8}"),
        ) -> RequestEnvelope {
            let mut call = Call::new(format!("urn:{vendor}:forrst:fn:{name}"));
            call.version = version;
            call.arguments = arguments.map(|m| m.into_iter().collect());
            let mut req = RequestEnvelope::new(call).with_id(id);
            if let Some(caller) = caller {
                req = req.with_context("caller_id", Value::String(caller));
            }
            req
        }
    }

    proptest! {
        #[test]
        fn json_decode_inverts_encode(req in arb_request()) {
            let codec = JsonCodec::new();
            let decoded = codec.decode_request(&codec.encode_request(&req).unwrap()).unwrap();
            prop_assert_eq!(decoded, req);
        }
    }
}
