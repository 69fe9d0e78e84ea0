//! Extension interceptor chain.
//!
//! An [`Extension`] subscribes to lifecycle stages of a request and is handed
//! a mutable [`Event`] for each stage it listens to. Listeners may inspect the
//! request, stash data in its metadata bag, append to the response, or
//! short-circuit the request with a response of their own.
//!
//! [`ExtensionPipeline`] owns the registered extensions and dispatches events
//! to them in priority order.

pub mod asynchronous;
pub mod caching;
pub mod deadline;
pub mod pipeline;
pub mod rate_limit;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use forrst_core::{ForrstError, ProtocolDuration, RequestEnvelope, ResponseEnvelope};
use serde_json::{Map, Value};

use crate::function::FunctionRegistration;
use crate::operation::OperationError;

pub use asynchronous::AsyncExtension;
pub use caching::{CachingConfig, CachingExtension};
pub use deadline::{deadline_from_request, DeadlineExtension};
pub use pipeline::ExtensionPipeline;
pub use rate_limit::{RateLimitConfig, RateLimitExtension};

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// Lifecycle stage of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The envelope decoded and passed structural validation.
    RequestValidated,
    /// A function version was resolved and is about to run.
    ExecutingFunction,
    /// The handler returned; the event carries the success response.
    FunctionExecuted,
    /// The final response is about to leave the server.
    SendingResponse,
    /// The request entered the failed state; the event carries the error response.
    RequestFailed,
}

impl EventKind {
    pub const ALL: [Self; 5] = [
        Self::RequestValidated,
        Self::ExecutingFunction,
        Self::FunctionExecuted,
        Self::SendingResponse,
        Self::RequestFailed,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestValidated => "request_validated",
            Self::ExecutingFunction => "executing_function",
            Self::FunctionExecuted => "function_executed",
            Self::SendingResponse => "sending_response",
            Self::RequestFailed => "request_failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interest of an extension in one event kind. Higher priority runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub kind: EventKind,
    pub priority: i32,
}

impl Subscription {
    #[must_use]
    pub const fn new(kind: EventKind, priority: i32) -> Self {
        Self { kind, priority }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One lifecycle stage of one request, as seen by listeners.
///
/// The request is read-only. `response` is present for `FunctionExecuted`,
/// `SendingResponse` and `RequestFailed`, and is set by listeners that
/// short-circuit earlier stages.
pub struct Event<'a> {
    kind: EventKind,
    request: &'a RequestEnvelope,
    function: Option<&'a Arc<FunctionRegistration>>,
    response: Option<ResponseEnvelope>,
    propagation_stopped: bool,
}

impl<'a> Event<'a> {
    #[must_use]
    pub fn new(kind: EventKind, request: &'a RequestEnvelope) -> Self {
        Self {
            kind,
            request,
            function: None,
            response: None,
            propagation_stopped: false,
        }
    }

    #[must_use]
    pub fn with_function(mut self, function: &'a Arc<FunctionRegistration>) -> Self {
        self.function = Some(function);
        self
    }

    #[must_use]
    pub fn with_response(mut self, response: ResponseEnvelope) -> Self {
        self.response = Some(response);
        self
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    #[must_use]
    pub fn request(&self) -> &'a RequestEnvelope {
        self.request
    }

    /// The resolved function, from `ExecutingFunction` onwards.
    #[must_use]
    pub fn function(&self) -> Option<&'a Arc<FunctionRegistration>> {
        self.function
    }

    #[must_use]
    pub fn response(&self) -> Option<&ResponseEnvelope> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut ResponseEnvelope> {
        self.response.as_mut()
    }

    /// Stops later listeners of this event from running.
    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    #[must_use]
    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }

    /// Sets the response and stops propagation in one step.
    pub fn short_circuit(&mut self, response: ResponseEnvelope) {
        self.response = Some(response);
        self.propagation_stopped = true;
    }

    /// Propagation stopped with a response in hand.
    #[must_use]
    pub fn is_short_circuited(&self) -> bool {
        self.propagation_stopped && self.response.is_some()
    }

    #[must_use]
    pub fn into_response(self) -> Option<ResponseEnvelope> {
        self.response
    }

    /// The short-circuit response, if a listener supplied one.
    #[must_use]
    pub fn into_short_circuit(self) -> Option<ResponseEnvelope> {
        if self.propagation_stopped {
            self.response
        } else {
            None
        }
    }
}

/// Listener-visible state of an [`Event`], captured so a failed listener's
/// changes can be undone.
struct EventSnapshot {
    response: Option<ResponseEnvelope>,
    propagation_stopped: bool,
}

impl Event<'_> {
    fn snapshot(&self) -> EventSnapshot {
        EventSnapshot {
            response: self.response.clone(),
            propagation_stopped: self.propagation_stopped,
        }
    }

    fn restore(&mut self, snapshot: EventSnapshot) {
        self.response = snapshot.response;
        self.propagation_stopped = snapshot.propagation_stopped;
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure raised inside a listener.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error(transparent)]
    Protocol(#[from] ForrstError),

    #[error("extension failure: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<OperationError> for ExtensionError {
    fn from(err: OperationError) -> Self {
        Self::Protocol(err.into())
    }
}

impl From<ExtensionError> for ForrstError {
    fn from(err: ExtensionError) -> Self {
        match err {
            ExtensionError::Protocol(err) => err,
            ExtensionError::Internal(err) => ForrstError::Internal(err),
        }
    }
}

/// Errors from assembling a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("extension {urn} is already registered")]
    DuplicateUrn { urn: String },

    #[error("invalid extension urn: {urn}")]
    InvalidUrn { urn: String },
}

impl From<PipelineError> for ForrstError {
    fn from(err: PipelineError) -> Self {
        ForrstError::Conflict {
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Extension
// ---------------------------------------------------------------------------

/// A cross-cutting behavior negotiated per request.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Identity used for opt-in matching and as the response extension key.
    fn urn(&self) -> &str;

    /// Global extensions run on every request; others only when the request
    /// carries `extensions.<urn>`.
    fn is_global(&self) -> bool {
        false
    }

    /// Whether a listener error aborts the request. Non-fatal errors are
    /// logged and the request continues without this extension.
    fn is_error_fatal(&self) -> bool {
        true
    }

    fn subscribed_events(&self) -> Vec<Subscription>;

    /// Advertised through [`ExtensionPipeline::capabilities`].
    fn capability_metadata(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Called once for each subscribed event kind, see [`Event::kind`].
    async fn handle(&self, event: &mut Event<'_>) -> Result<(), ExtensionError>;
}

/// Renders a millisecond span the way extension data reports durations:
/// whole seconds when exact, milliseconds otherwise.
pub(crate) fn duration_value(millis: u64) -> Value {
    if millis >= 1_000 && millis % 1_000 == 0 {
        ProtocolDuration::seconds(millis / 1_000).to_value()
    } else {
        ProtocolDuration::millis(millis).to_value()
    }
}

/// Pointer of the options object of extension `urn` inside a request.
pub(crate) fn options_pointer(urn: &str) -> String {
    format!("/extensions/{}", urn.replace('~', "~0").replace('/', "~1"))
}

#[cfg(test)]
mod tests {
    use forrst_core::{Call, ErrorCode};
    use serde_json::json;

    use super::*;

    #[test]
    fn short_circuit_sets_response_and_stops() {
        let request = RequestEnvelope::new(Call::new("urn:acme:forrst:fn:a"));
        let mut event = Event::new(EventKind::RequestValidated, &request);
        assert!(!event.is_short_circuited());

        event.stop_propagation();
        assert!(event.is_propagation_stopped());
        assert!(!event.is_short_circuited());

        event.short_circuit(ResponseEnvelope::success(&request.id, json!(1)));
        assert!(event.is_short_circuited());
        assert_eq!(event.into_response().unwrap().result(), Some(&json!(1)));
    }

    #[test]
    fn response_without_stop_is_not_a_short_circuit() {
        let request = RequestEnvelope::new(Call::new("urn:acme:forrst:fn:a"));
        let event = Event::new(EventKind::FunctionExecuted, &request)
            .with_response(ResponseEnvelope::empty(&request.id));
        assert!(!event.is_short_circuited());
    }

    #[test]
    fn extension_error_converts_to_protocol_error() {
        let err: ForrstError = ExtensionError::from(ForrstError::invalid_arguments("x")).into();
        assert_eq!(err.code(), ErrorCode::InvalidArguments);

        let err: ForrstError = ExtensionError::from(anyhow::anyhow!("db down")).into();
        assert_eq!(err.code(), ErrorCode::InternalError);
    }

    #[test]
    fn durations_prefer_whole_seconds() {
        assert_eq!(duration_value(60_000), json!({"value": 60, "unit": "second"}));
        assert_eq!(duration_value(1_500), json!({"value": 1500, "unit": "millisecond"}));
        assert_eq!(duration_value(0), json!({"value": 0, "unit": "millisecond"}));
    }
}
