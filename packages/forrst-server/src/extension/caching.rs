//! Result caching for idempotent calls.
//!
//! Entries are keyed by caller, function, version selector and arguments, and
//! live for the TTL the client asked for (or the configured default). The
//! extension is non-fatal: a malformed `ttl` just disables caching for that
//! request.

use async_trait::async_trait;
use forrst_core::urn::extensions;
use forrst_core::{ProtocolDuration, RequestEnvelope, ResponseEnvelope};
use quick_cache::sync::Cache;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{duration_value, options_pointer, Event, EventKind, Extension, ExtensionError, Subscription};
use crate::operation::record::now_millis;

const DELIMITER: &[u8] = &[0];

#[derive(Debug, Clone, Copy)]
pub struct CachingConfig {
    /// Maximum number of cached results.
    pub capacity: usize,
    /// TTL when the request does not name one.
    pub default_ttl: ProtocolDuration,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            default_ttl: ProtocolDuration::seconds(60),
        }
    }
}

#[derive(Clone)]
struct CachedResult {
    result: Value,
    expires_at: i64,
}

pub struct CachingExtension {
    config: CachingConfig,
    cache: Cache<String, CachedResult>,
}

impl CachingExtension {
    #[must_use]
    pub fn new(config: CachingConfig) -> Self {
        Self {
            cache: Cache::new(config.capacity.max(1)),
            config,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn ttl_ms(&self, request: &RequestEnvelope) -> Result<u64, ExtensionError> {
        let ttl = match request
            .extension_options(extensions::CACHING)
            .and_then(|options| options.get("ttl"))
        {
            None | Some(Value::Null) => self.config.default_ttl,
            Some(value) => ProtocolDuration::from_value(
                value,
                &format!("{}/ttl", options_pointer(extensions::CACHING)),
            )?,
        };
        Ok(ttl.as_millis())
    }

    fn lookup(&self, event: &mut Event<'_>) -> Result<(), ExtensionError> {
        let request = event.request();
        let ttl_ms = self.ttl_ms(request)?;
        let key = cache_key(request);
        let now = now_millis();

        if let Some(entry) = self.cache.get(&key) {
            if entry.expires_at > now {
                debug!(function = %request.call.function, "cache hit");
                let response = ResponseEnvelope::success(request.id.clone(), entry.result)
                    .with_extension(extensions::CACHING, json!({ "hit": true }));
                event.short_circuit(response);
                return Ok(());
            }
            self.cache.remove(&key);
        }

        request.metadata().insert(
            extensions::CACHING,
            json!({ "key": key, "ttl_ms": ttl_ms }),
        );
        Ok(())
    }

    fn store(&self, event: &mut Event<'_>) {
        let Some(state) = event.request().metadata().get(extensions::CACHING) else {
            return;
        };
        let (Some(key), Some(ttl_ms)) = (state["key"].as_str(), state["ttl_ms"].as_u64()) else {
            return;
        };
        let Some(response) = event.response_mut() else {
            return;
        };
        if !response.is_success() {
            return;
        }

        if ttl_ms > 0 {
            let expires_at = now_millis().saturating_add(i64::try_from(ttl_ms).unwrap_or(i64::MAX));
            self.cache.insert(
                key.to_string(),
                CachedResult {
                    result: response.result().cloned().unwrap_or(Value::Null),
                    expires_at,
                },
            );
        }
        response.push_extension(
            extensions::CACHING,
            json!({ "hit": false, "ttl": duration_value(ttl_ms) }),
        );
    }
}

/// SHA-256 over caller, function, version selector and arguments.
fn cache_key(request: &RequestEnvelope) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.caller().as_bytes());
    hasher.update(DELIMITER);
    hasher.update(request.call.function.as_bytes());
    hasher.update(DELIMITER);
    hasher.update(request.call.version.as_deref().unwrap_or_default().as_bytes());
    hasher.update(DELIMITER);
    if let Some(arguments) = &request.call.arguments {
        hasher.update(Value::Object(arguments.clone()).to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[async_trait]
impl Extension for CachingExtension {
    fn urn(&self) -> &str {
        extensions::CACHING
    }

    fn is_error_fatal(&self) -> bool {
        false
    }

    fn subscribed_events(&self) -> Vec<Subscription> {
        vec![
            Subscription::new(EventKind::RequestValidated, 50),
            Subscription::new(EventKind::FunctionExecuted, 10),
        ]
    }

    fn capability_metadata(&self) -> Map<String, Value> {
        let mut meta = Map::new();
        meta.insert("default_ttl".to_string(), self.config.default_ttl.to_value());
        meta.insert("capacity".to_string(), json!(self.config.capacity));
        meta
    }

    async fn handle(&self, event: &mut Event<'_>) -> Result<(), ExtensionError> {
        match event.kind() {
            EventKind::RequestValidated => self.lookup(event),
            EventKind::FunctionExecuted => {
                self.store(event);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
