use forrst_core::DEFAULT_MAX_DEPTH;

use crate::operation::manager::DEFAULT_RETENTION_MS;

/// Server-level configuration for request processing.
///
/// Controls request deadlines, concurrency limits, decoding bounds and the
/// async operation sweep.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Unique identifier for this server node, recorded on request spans.
    pub node_id: String,
    /// Deadline applied when a request does not ask for one, in milliseconds.
    pub default_timeout_ms: u64,
    /// Maximum number of in-flight requests before load shedding.
    pub max_concurrent_requests: u32,
    /// Maximum nesting depth accepted by the codec.
    pub max_decode_depth: usize,
    /// `retry_after` hint in async polling responses, in seconds.
    pub retry_after_seconds: u64,
    /// How long operation records are kept after creation.
    pub operation_retention_ms: i64,
    /// Interval between expiry sweeps in milliseconds.
    pub sweep_interval_ms: u64,
    /// Maximum records deleted per sweep.
    pub sweep_batch_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            default_timeout_ms: 30_000,
            max_concurrent_requests: 1000,
            max_decode_depth: DEFAULT_MAX_DEPTH,
            retry_after_seconds: 5,
            operation_retention_ms: DEFAULT_RETENTION_MS,
            sweep_interval_ms: 60_000,
            sweep_batch_size: 500,
        }
    }
}
