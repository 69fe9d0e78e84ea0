//! Tower middleware layers for the request pipeline.
//!
//! - [`load_shed`]: Concurrency limit that sheds excess requests as `Unavailable`
//! - [`deadline`]: Per-request deadline enforcement
//! - [`metrics`]: Request timing and counting via `tracing` spans and `metrics`
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod deadline;
pub mod load_shed;
pub mod metrics;
pub mod pipeline;

pub use deadline::DeadlineLayer;
pub use load_shed::AdmissionLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_request_pipeline, RequestPipeline};
