//! Ordered dispatch of lifecycle events to registered extensions.

use std::sync::Arc;

use forrst_core::urn::is_valid_extension_urn;
use forrst_core::ForrstError;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{
    AsyncExtension, CachingConfig, CachingExtension, DeadlineExtension, Event, EventKind,
    Extension, PipelineError,
};
use crate::operation::{AsyncOperationManager, OperationExecutor};

/// The registered extensions of a server, in registration order.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Default)]
pub struct ExtensionPipeline {
    extensions: Vec<Arc<dyn Extension>>,
}

impl ExtensionPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A pipeline with the deadline, caching and async extensions.
    ///
    /// # Errors
    ///
    /// Never in practice; registration errors are propagated for symmetry with
    /// [`register`](Self::register).
    pub fn standard(
        manager: &Arc<AsyncOperationManager>,
        retry_after_seconds: u64,
    ) -> Result<Self, PipelineError> {
        let mut pipeline = Self::new();
        pipeline.register(Arc::new(DeadlineExtension::new()))?;
        pipeline.register(Arc::new(CachingExtension::new(CachingConfig::default())))?;
        pipeline.register(Arc::new(AsyncExtension::new(
            Arc::clone(manager),
            OperationExecutor::new(Arc::clone(manager)),
            retry_after_seconds,
        )))?;
        Ok(pipeline)
    }

    /// Adds an extension.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidUrn`] for a malformed URN and
    /// [`PipelineError::DuplicateUrn`] when the URN is already registered.
    pub fn register(&mut self, extension: Arc<dyn Extension>) -> Result<(), PipelineError> {
        let urn = extension.urn();
        if !is_valid_extension_urn(urn) {
            return Err(PipelineError::InvalidUrn {
                urn: urn.to_string(),
            });
        }
        if self.extensions.iter().any(|e| e.urn() == urn) {
            return Err(PipelineError::DuplicateUrn {
                urn: urn.to_string(),
            });
        }
        debug!(
            urn,
            global = extension.is_global(),
            fatal = extension.is_error_fatal(),
            "extension registered"
        );
        self.extensions.push(extension);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Runs every applicable listener for `event`.
    ///
    /// Listeners of global extensions and of extensions the request opted into
    /// run one after another, highest priority first; equal priorities keep
    /// registration order. An extension subscribed to `kind` more than once
    /// runs once per subscription. The loop ends early when a listener stops
    /// propagation. Callers check [`Event::is_short_circuited`] afterwards.
    ///
    /// # Errors
    ///
    /// The first error raised by a fatal extension. Errors of non-fatal
    /// extensions, and any error raised while handling `RequestFailed`, are
    /// logged and skipped; the failing listener's changes to the response and
    /// to propagation are discarded. Request metadata it wrote is kept.
    pub async fn dispatch(&self, event: &mut Event<'_>) -> Result<(), ForrstError> {
        let kind = event.kind();
        let request = event.request();

        let mut listeners: Vec<(i32, &Arc<dyn Extension>)> = self
            .extensions
            .iter()
            .filter(|ext| ext.is_global() || request.requests_extension(ext.urn()))
            .flat_map(|ext| {
                ext.subscribed_events()
                    .into_iter()
                    .filter(|sub| sub.kind == kind)
                    .map(move |sub| (sub.priority, ext))
            })
            .collect();
        // Stable sort: ties stay in registration order.
        listeners.sort_by(|a, b| b.0.cmp(&a.0));

        for (priority, extension) in listeners {
            let tolerated = kind == EventKind::RequestFailed || !extension.is_error_fatal();
            let snapshot = tolerated.then(|| event.snapshot());
            if let Err(err) = extension.handle(event).await {
                let err = ForrstError::from(err);
                if let Some(snapshot) = snapshot {
                    event.restore(snapshot);
                    warn!(
                        extension = extension.urn(),
                        event = %kind,
                        error = %err,
                        "extension error ignored"
                    );
                } else {
                    debug!(
                        extension = extension.urn(),
                        event = %kind,
                        error = %err,
                        "fatal extension error"
                    );
                    return Err(err);
                }
            }
            if event.is_propagation_stopped() {
                debug!(
                    extension = extension.urn(),
                    event = %kind,
                    priority,
                    short_circuit = event.is_short_circuited(),
                    "propagation stopped"
                );
                break;
            }
        }
        Ok(())
    }

    /// Capability entries of every registered extension.
    #[must_use]
    pub fn capabilities(&self) -> Vec<Value> {
        self.extensions
            .iter()
            .map(|ext| {
                let events: Vec<&str> = ext
                    .subscribed_events()
                    .iter()
                    .map(|sub| sub.kind.as_str())
                    .collect();
                json!({
                    "urn": ext.urn(),
                    "global": ext.is_global(),
                    "fatal": ext.is_error_fatal(),
                    "events": events,
                    "metadata": ext.capability_metadata(),
                })
            })
            .collect()
    }
}
