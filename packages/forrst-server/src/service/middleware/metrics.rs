//! Metrics middleware for requests.
//!
//! Wraps each request in a `tracing` span and records
//! `forrst_requests_total{function,outcome}` and
//! `forrst_request_duration_seconds{function}` through the `metrics` facade.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use forrst_core::{ForrstError, RequestEnvelope, ResponseEnvelope};
use metrics::{counter, histogram};
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer {
    node_id: String,
}

impl MetricsLayer {
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            node_id: self.node_id.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Records request duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
    node_id: String,
}

/// Outcome label: `ok`, or the wire code of the first error.
fn outcome(result: &Result<ResponseEnvelope, ForrstError>) -> &'static str {
    match result {
        Ok(response) => response
            .errors()
            .first()
            .map_or("ok", |entry| entry.code.as_str()),
        Err(err) => err.code().as_str(),
    }
}

impl<S> Service<RequestEnvelope> for MetricsService<S>
where
    S: Service<RequestEnvelope, Response = ResponseEnvelope, Error = ForrstError> + Send,
    S::Future: Send + 'static,
{
    type Response = ResponseEnvelope;
    type Error = ForrstError;
    type Future = Pin<Box<dyn Future<Output = Result<ResponseEnvelope, ForrstError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: RequestEnvelope) -> Self::Future {
        let function = request.call.function.clone();
        let span = info_span!(
            "request",
            node = %self.node_id,
            request_id = %request.id,
            function = %function,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(request);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();
                let label = outcome(&result);

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", label);
                tracing::info!(duration_ms, outcome = label, "request complete");

                counter!(
                    "forrst_requests_total",
                    "function" => function.clone(),
                    "outcome" => label
                )
                .increment(1);
                histogram!("forrst_request_duration_seconds", "function" => function)
                    .record(elapsed.as_secs_f64());

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
