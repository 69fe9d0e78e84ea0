//! The assembled server: codec, function registry, extension pipeline and the
//! tower request pipeline, wired together once at startup.

use std::sync::Arc;
use std::time::Duration;

use forrst_core::{
    ForrstError, JsonCodec, ProtocolCodec, RequestEnvelope, ResponseEnvelope, PROTOCOL_NAME,
    PROTOCOL_VERSION,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use tracing::{debug, info};

use super::config::ServerConfig;
use super::dispatcher::RequestDispatcher;
use super::middleware::{build_request_pipeline, RequestPipeline};
use super::worker::{BackgroundWorker, OperationSweeper};
use crate::extension::{Extension, ExtensionPipeline, PipelineError};
use crate::function::{register_system_functions, FunctionRegistry, RegistryError};
use crate::operation::{AsyncOperationManager, InMemoryOperationRepository, OperationRepository};

/// Errors from assembling a server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("function registration failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("extension registration failed: {0}")]
    Pipeline(#[from] PipelineError),
}

// ---------------------------------------------------------------------------
// ForrstServerBuilder
// ---------------------------------------------------------------------------

pub struct ForrstServerBuilder {
    config: ServerConfig,
    repository: Option<Arc<dyn OperationRepository>>,
    codec: Option<Arc<dyn ProtocolCodec>>,
    standard_extensions: bool,
    extensions: Vec<Arc<dyn Extension>>,
}

impl ForrstServerBuilder {
    /// Operation store; defaults to [`InMemoryOperationRepository`].
    #[must_use]
    pub fn repository(mut self, repository: Arc<dyn OperationRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Wire codec; defaults to [`JsonCodec`] bounded by `max_decode_depth`.
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn ProtocolCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Leaves out the deadline, caching and async extensions.
    #[must_use]
    pub fn without_standard_extensions(mut self) -> Self {
        self.standard_extensions = false;
        self
    }

    /// Registers an extension after the standard ones.
    #[must_use]
    pub fn extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// # Errors
    ///
    /// [`ServerError::Pipeline`] for duplicate or malformed extension URNs.
    pub fn build(self) -> Result<ForrstServer, ServerError> {
        let config = self.config;
        let repository = self
            .repository
            .unwrap_or_else(|| Arc::new(InMemoryOperationRepository::new()));
        let manager = Arc::new(
            AsyncOperationManager::new(repository).with_retention_ms(config.operation_retention_ms),
        );

        let registry = Arc::new(FunctionRegistry::new());
        register_system_functions(&registry, &manager)?;

        let mut extensions = if self.standard_extensions {
            ExtensionPipeline::standard(&manager, config.retry_after_seconds)?
        } else {
            ExtensionPipeline::new()
        };
        for extension in self.extensions {
            extensions.register(extension)?;
        }
        let extensions = Arc::new(extensions);

        let codec = self
            .codec
            .unwrap_or_else(|| Arc::new(JsonCodec::with_max_depth(config.max_decode_depth)));
        let dispatcher = RequestDispatcher::new(Arc::clone(&registry), Arc::clone(&extensions));
        let pipeline = build_request_pipeline(dispatcher, &config);

        info!(
            node_id = %config.node_id,
            content_type = codec.content_type(),
            extensions = extensions.len(),
            "forrst server ready"
        );
        Ok(ForrstServer {
            config,
            codec,
            registry,
            extensions,
            manager,
            pipeline,
        })
    }
}

// ---------------------------------------------------------------------------
// ForrstServer
// ---------------------------------------------------------------------------

/// Entry point for transports: hand it decoded envelopes or raw bytes.
///
/// Functions may be registered on [`registry`](Self::registry) at any time;
/// the extension set is fixed when the server is built.
pub struct ForrstServer {
    config: ServerConfig,
    codec: Arc<dyn ProtocolCodec>,
    registry: Arc<FunctionRegistry>,
    extensions: Arc<ExtensionPipeline>,
    manager: Arc<AsyncOperationManager>,
    pipeline: RequestPipeline,
}

impl ForrstServer {
    #[must_use]
    pub fn builder(config: ServerConfig) -> ForrstServerBuilder {
        ForrstServerBuilder {
            config,
            repository: None,
            codec: None,
            standard_extensions: true,
            extensions: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn operations(&self) -> &Arc<AsyncOperationManager> {
        &self.manager
    }

    #[must_use]
    pub fn codec(&self) -> &Arc<dyn ProtocolCodec> {
        &self.codec
    }

    /// Processes one request to its response.
    ///
    /// Middleware rejections (overload, deadline) are rendered as error
    /// responses carrying the request id.
    pub async fn handle(&self, request: RequestEnvelope) -> ResponseEnvelope {
        let id = request.id.clone();
        match self.pipeline.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => ResponseEnvelope::from_error(id, err.to_error_entry()),
        }
    }

    /// Decodes `bytes`, processes the request and encodes the response.
    ///
    /// A payload that fails to decode is answered with a `PARSE_ERROR` or
    /// `INVALID_REQUEST` response whose id is recovered from the payload when
    /// possible, else freshly generated.
    ///
    /// # Errors
    ///
    /// Only when the response itself cannot be encoded.
    pub async fn handle_bytes(&self, bytes: &[u8]) -> Result<Vec<u8>, ForrstError> {
        let response = match self.codec.decode_request(bytes) {
            Ok(request) => self.handle(request).await,
            Err(err) => {
                let id = self
                    .codec
                    .recover_id(bytes)
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                debug!(request_id = %id, code = %err.code(), "undecodable request");
                ResponseEnvelope::from_error(id, err.to_error_entry())
            }
        };
        self.codec.encode_response(&response)
    }

    /// Starts the periodic expiry sweep of operation records.
    #[must_use]
    pub fn start_sweeper(&self) -> BackgroundWorker<OperationSweeper> {
        BackgroundWorker::start(
            OperationSweeper::new(Arc::clone(&self.manager), self.config.sweep_batch_size),
            Duration::from_millis(self.config.sweep_interval_ms),
        )
    }

    /// Protocol, function and extension listing for a discovery renderer.
    #[must_use]
    pub fn capabilities(&self) -> Value {
        json!({
            "protocol": { "name": PROTOCOL_NAME, "version": PROTOCOL_VERSION },
            "content_type": self.codec.content_type(),
            "functions": self.registry.functions(),
            "extensions": self.extensions.capabilities(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
