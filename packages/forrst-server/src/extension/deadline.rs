//! Client-supplied deadlines.
//!
//! The request carries `extensions.<deadline urn> = {"value": n, "unit": u}`.
//! The listener validates the options and records when the request started;
//! the boundary timeout itself is enforced by
//! [`DeadlineLayer`](crate::service::middleware::deadline::DeadlineLayer),
//! which reads the same options through [`deadline_from_request`].

use std::time::Duration;

use async_trait::async_trait;
use forrst_core::urn::extensions;
use forrst_core::{ForrstError, ProtocolDuration, RequestEnvelope};
use serde_json::{json, Map, Value};

use super::{duration_value, options_pointer, Event, EventKind, Extension, ExtensionError, Subscription};
use crate::operation::record::now_millis;

/// Parses the deadline a request asked for, if any.
///
/// # Errors
///
/// `InvalidArguments` when the options are not a valid duration or are zero.
pub fn deadline_from_request(request: &RequestEnvelope) -> Result<Option<Duration>, ForrstError> {
    let Some(options) = request.extensions.get(extensions::DEADLINE) else {
        return Ok(None);
    };
    let pointer = options_pointer(extensions::DEADLINE);
    let deadline = ProtocolDuration::from_value(options, &pointer)?;
    if deadline.as_millis() == 0 {
        return Err(ForrstError::InvalidArguments {
            message: "deadline must be greater than zero".to_string(),
            pointer: Some(pointer),
        });
    }
    Ok(Some(deadline.as_duration()))
}

/// Reports how much of the requested deadline a call used.
#[derive(Debug, Default)]
pub struct DeadlineExtension;

impl DeadlineExtension {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn start(event: &Event<'_>) -> Result<(), ExtensionError> {
        let request = event.request();
        if let Some(deadline) = deadline_from_request(request)? {
            request.metadata().insert(
                extensions::DEADLINE,
                json!({
                    "started_at": now_millis(),
                    "deadline_ms": u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                }),
            );
        }
        Ok(())
    }

    fn report(event: &mut Event<'_>) {
        let Some(state) = event.request().metadata().get(extensions::DEADLINE) else {
            return;
        };
        let (Some(started_at), Some(deadline_ms)) =
            (state["started_at"].as_i64(), state["deadline_ms"].as_u64())
        else {
            return;
        };
        let elapsed = u64::try_from(now_millis().saturating_sub(started_at)).unwrap_or(0);
        let remaining = deadline_ms.saturating_sub(elapsed);
        #[allow(clippy::cast_precision_loss)]
        let utilization = elapsed as f64 / deadline_ms as f64;

        if let Some(response) = event.response_mut() {
            response.push_extension(
                extensions::DEADLINE,
                json!({
                    "deadline": duration_value(deadline_ms),
                    "elapsed": ProtocolDuration::millis(elapsed).to_value(),
                    "remaining": ProtocolDuration::millis(remaining).to_value(),
                    "utilization": (utilization * 1000.0).round() / 1000.0,
                }),
            );
        }
    }
}

#[async_trait]
impl Extension for DeadlineExtension {
    fn urn(&self) -> &str {
        extensions::DEADLINE
    }

    fn subscribed_events(&self) -> Vec<Subscription> {
        vec![
            Subscription::new(EventKind::RequestValidated, 100),
            Subscription::new(EventKind::FunctionExecuted, -100),
        ]
    }

    fn capability_metadata(&self) -> Map<String, Value> {
        let mut meta = Map::new();
        meta.insert(
            "units".to_string(),
            json!(["millisecond", "second", "minute", "hour"]),
        );
        meta
    }

    async fn handle(&self, event: &mut Event<'_>) -> Result<(), ExtensionError> {
        match event.kind() {
            EventKind::RequestValidated => Self::start(event),
            EventKind::FunctionExecuted => {
                Self::report(event);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use forrst_core::{Call, ErrorCode, ResponseEnvelope};

    use super::*;

    fn with_deadline(options: Value) -> RequestEnvelope {
        RequestEnvelope::new(Call::new("urn:acme:forrst:fn:a"))
            .with_extension(extensions::DEADLINE, options)
    }

    #[test]
    fn reads_deadline_options() {
        let request = with_deadline(json!({"value": 2, "unit": "second"}));
        assert_eq!(
            deadline_from_request(&request).unwrap(),
            Some(Duration::from_secs(2))
        );

        let plain = RequestEnvelope::new(Call::new("urn:acme:forrst:fn:a"));
        assert_eq!(deadline_from_request(&plain).unwrap(), None);
    }

    #[test]
    fn rejects_zero_and_malformed_deadlines() {
        for options in [json!({"value": 0, "unit": "second"}), json!({"value": "soon"})] {
            let err = deadline_from_request(&with_deadline(options)).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidArguments);
            assert!(matches!(
                err,
                ForrstError::InvalidArguments { pointer: Some(ref p), .. }
                    if p == "/extensions/urn:cline:forrst:ext:deadline"
            ));
        }
    }

    #[tokio::test]
    async fn reports_usage_on_executed_response() {
        let extension = DeadlineExtension::new();
        let request = with_deadline(json!({"value": 30, "unit": "second"}));

        let mut validated = Event::new(EventKind::RequestValidated, &request);
        extension.handle(&mut validated).await.unwrap();
        assert!(request.metadata().get(extensions::DEADLINE).is_some());

        let mut executed = Event::new(EventKind::FunctionExecuted, &request)
            .with_response(ResponseEnvelope::success(&request.id, json!({"ok": true})));
        extension.handle(&mut executed).await.unwrap();

        let response = executed.into_response().unwrap();
        let data = response.extension_data(extensions::DEADLINE).unwrap();
        assert_eq!(data["deadline"], json!({"value": 30, "unit": "second"}));
        assert_eq!(data["elapsed"]["unit"], "millisecond");
        assert!(data["remaining"]["value"].as_u64().unwrap() <= 30_000);
        assert!(data["utilization"].as_f64().unwrap() < 1.0);
    }

    #[tokio::test]
    async fn invalid_options_fail_validation() {
        let extension = DeadlineExtension::new();
        let request = with_deadline(json!({"value": -1, "unit": "second"}));
        let mut event = Event::new(EventKind::RequestValidated, &request);

        let err = ForrstError::from(extension.handle(&mut event).await.unwrap_err());
        assert_eq!(err.code(), ErrorCode::InvalidArguments);
    }
}
