//! Pipeline composition: combines all middleware layers into a single service stack.

use std::time::Duration;

use tower::ServiceBuilder;

use super::deadline::{DeadlineLayer, DeadlineService};
use super::load_shed::{AdmissionLayer, AdmissionService};
use super::metrics::{MetricsLayer, MetricsService};
use crate::service::config::ServerConfig;
use crate::service::dispatcher::RequestDispatcher;

/// The full service stack produced by [`build_request_pipeline`].
pub type RequestPipeline = AdmissionService<DeadlineService<MetricsService<RequestDispatcher>>>;

/// Build the request pipeline by wrapping the `RequestDispatcher` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `AdmissionLayer` -- shed with `Unavailable` once `max_concurrent_requests` are in flight
/// 2. `DeadlineLayer` -- answer `DeadlineExceeded` once the request deadline elapses
/// 3. `MetricsLayer` -- record timing and outcome (closest to the actual dispatch)
#[must_use]
pub fn build_request_pipeline(dispatcher: RequestDispatcher, config: &ServerConfig) -> RequestPipeline {
    ServiceBuilder::new()
        .layer(AdmissionLayer::new(config.max_concurrent_requests))
        .layer(DeadlineLayer::new(Duration::from_millis(config.default_timeout_ms)))
        .layer(MetricsLayer::new(config.node_id.clone()))
        .service(dispatcher)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
