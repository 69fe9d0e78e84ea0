//! Async operation manager: creation, guarded transitions, queries and expiry.
//!
//! Every mutation follows the same loop: load the record, check the transition
//! is legal, apply it, and persist with
//! [`save_if_version_matches`](OperationRepository::save_if_version_matches).
//! A lost race re-reads and retries a bounded number of times before
//! surfacing [`OperationError::Conflict`].

use std::sync::Arc;

use forrst_core::urn::extensions;
use forrst_core::{
    ErrorEntry, ProtocolDuration, RequestEnvelope, ResponseEnvelope, SystemFunction,
    SYSTEM_FUNCTION_VERSION,
};
use rand::Rng;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::callback::validate_callback_url;
use super::error::OperationError;
use super::record::{
    now_millis, OperationRecord, OperationStatus, MAX_METADATA_BYTES, OPERATION_ID_PREFIX,
};
use super::repository::{ListFilter, OperationPage, OperationRepository};

/// Attempts at finding an unused operation id before giving up.
pub const MAX_ID_ATTEMPTS: u32 = 10;

/// CAS attempts per transition before reporting a conflict.
pub const MAX_CAS_ATTEMPTS: u32 = 3;

/// Default retention of operation records: 30 days.
pub const DEFAULT_RETENTION_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// `op_` followed by 12 random bytes as lowercase hex.
#[must_use]
pub fn generate_operation_id() -> String {
    let bytes: [u8; 12] = rand::rng().random();
    format!("{OPERATION_ID_PREFIX}{}", hex::encode(bytes))
}

/// Result of [`AsyncOperationManager::create_async_operation`].
#[derive(Debug, Clone)]
pub struct CreatedOperation {
    /// Immediate polling response for the client.
    pub response: ResponseEnvelope,
    /// The persisted record, to hand to an executor.
    pub record: OperationRecord,
}

/// Owns the lifecycle of async operation records.
pub struct AsyncOperationManager {
    repository: Arc<dyn OperationRepository>,
    retention_ms: i64,
}

impl AsyncOperationManager {
    #[must_use]
    pub fn new(repository: Arc<dyn OperationRepository>) -> Self {
        Self {
            repository,
            retention_ms: DEFAULT_RETENTION_MS,
        }
    }

    #[must_use]
    pub fn with_retention_ms(mut self, retention_ms: i64) -> Self {
        self.retention_ms = retention_ms;
        self
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<dyn OperationRepository> {
        &self.repository
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Creates and persists a `Pending` operation for `request`.
    ///
    /// `version` is the resolved function version. `options` are the client's
    /// async extension options (`callback_url` is read from them). The record
    /// is owned by the request's caller, or by
    /// [`ANONYMOUS_CALLER`](forrst_core::ANONYMOUS_CALLER) when it names none.
    ///
    /// # Errors
    ///
    /// - [`OperationError::MetadataTooLarge`] before anything is persisted
    /// - [`OperationError::InvalidCallbackUrl`] / [`OperationError::InvalidArgument`]
    ///   for a bad `callback_url`
    /// - [`OperationError::IdSpaceExhausted`] when no free id was found
    /// - [`OperationError::Store`] on backend failure
    pub async fn create_async_operation(
        &self,
        request: &RequestEnvelope,
        version: &str,
        options: &Map<String, Value>,
        metadata: Map<String, Value>,
        retry_after_seconds: u64,
    ) -> Result<CreatedOperation, OperationError> {
        let size = serde_json::to_vec(&metadata)
            .map_err(|e| OperationError::Store(e.into()))?
            .len();
        if size > MAX_METADATA_BYTES {
            return Err(OperationError::MetadataTooLarge {
                size,
                limit: MAX_METADATA_BYTES,
            });
        }

        let callback_url = match options.get("callback_url") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(validate_callback_url(raw)?.to_string()),
            Some(_) => {
                return Err(OperationError::InvalidArgument {
                    message: "`callback_url` must be a string".to_string(),
                })
            }
        };

        let id = self.allocate_id().await?;
        let mut record = OperationRecord::new(
            id,
            request.call.function.clone(),
            version,
            Some(request.caller().to_string()),
            now_millis(),
        );
        record.callback_url = callback_url;
        record.metadata = metadata;

        self.repository.save(record.clone(), None).await?;
        info!(
            operation_id = %record.id,
            function = %record.function,
            version = %record.version,
            "async operation created"
        );

        let response = polling_response(&request.id, &record, retry_after_seconds);
        Ok(CreatedOperation { response, record })
    }

    async fn allocate_id(&self) -> Result<String, OperationError> {
        for attempt in 1..=MAX_ID_ATTEMPTS {
            let candidate = generate_operation_id();
            if self.repository.find(&candidate, None).await?.is_none() {
                return Ok(candidate);
            }
            debug!(attempt, candidate = %candidate, "operation id collision");
        }
        Err(OperationError::IdSpaceExhausted {
            attempts: MAX_ID_ATTEMPTS,
        })
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    async fn transition<F>(
        &self,
        id: &str,
        owner_id: Option<&str>,
        mut apply: F,
    ) -> Result<OperationRecord, OperationError>
    where
        F: FnMut(&mut OperationRecord, i64) -> Result<(), OperationError> + Send,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let mut record = self
                .repository
                .find(id, owner_id)
                .await?
                .ok_or_else(|| OperationError::NotFound { id: id.to_string() })?;
            let expected = record.lock_version;
            let now = now_millis();
            apply(&mut record, now)?;
            record.updated_at = now;

            if self
                .repository
                .save_if_version_matches(record.clone(), expected, owner_id)
                .await?
            {
                record.lock_version = expected + 1;
                return Ok(record);
            }
            debug!(operation_id = id, attempt, "stale operation version, retrying");
        }
        Err(OperationError::Conflict { id: id.to_string() })
    }

    /// Moves an operation to `Processing`, stamping `started_at` once.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` for terminal records, `InvalidArgument` for a
    /// regressing `progress`, `Conflict` when the CAS budget is exhausted.
    pub async fn mark_processing(
        &self,
        id: &str,
        progress: Option<f64>,
    ) -> Result<OperationRecord, OperationError> {
        self.transition(id, None, |record, now| {
            ensure_active(record, "start")?;
            if let Some(value) = progress {
                advance_progress(record, value)?;
            }
            record.status = OperationStatus::Processing;
            if record.started_at.is_none() {
                record.started_at = Some(now);
            }
            Ok(())
        })
        .await
    }

    /// Records progress. The value is clamped to `[0, 1]` and may not regress.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` for terminal records, `InvalidArgument` when
    /// the value is lower than the current progress or not a number.
    pub async fn update_progress(
        &self,
        id: &str,
        value: f64,
        message: Option<String>,
    ) -> Result<OperationRecord, OperationError> {
        self.transition(id, None, |record, _| {
            ensure_active(record, "update progress")?;
            advance_progress(record, value)?;
            if let Some(message) = &message {
                record.message = Some(message.clone());
            }
            Ok(())
        })
        .await
    }

    /// Completes an operation with its result.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` for terminal records, `Conflict`.
    pub async fn complete(&self, id: &str, result: Value) -> Result<OperationRecord, OperationError> {
        self.transition(id, None, |record, now| {
            ensure_active(record, "complete")?;
            record.status = OperationStatus::Completed;
            record.progress = Some(1.0);
            record.result = Some(result.clone());
            record.completed_at = Some(now);
            Ok(())
        })
        .await
    }

    /// Fails an operation with the given errors.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` for terminal records, `Conflict`.
    pub async fn fail(
        &self,
        id: &str,
        errors: Vec<ErrorEntry>,
    ) -> Result<OperationRecord, OperationError> {
        self.transition(id, None, |record, now| {
            ensure_active(record, "fail")?;
            record.status = OperationStatus::Failed;
            record.errors.clone_from(&errors);
            record.completed_at = Some(now);
            Ok(())
        })
        .await
    }

    /// Cancels a pending or processing operation on behalf of `owner_id`.
    ///
    /// Cancellation is cooperative: a running handler is not interrupted.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden`, `CannotCancel` for terminal records, `Conflict`.
    pub async fn cancel(
        &self,
        id: &str,
        owner_id: Option<&str>,
    ) -> Result<OperationRecord, OperationError> {
        let record = self
            .transition(id, owner_id, |record, now| {
                if record.is_terminal() {
                    return Err(OperationError::CannotCancel {
                        id: record.id.clone(),
                        status: record.status,
                    });
                }
                record.status = OperationStatus::Cancelled;
                record.cancelled_at = Some(now);
                Ok(())
            })
            .await?;
        info!(operation_id = id, "async operation cancelled");
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// # Errors
    ///
    /// `Forbidden` when owned by someone else, `Store` on backend failure.
    pub async fn find(
        &self,
        id: &str,
        owner_id: Option<&str>,
    ) -> Result<Option<OperationRecord>, OperationError> {
        Ok(self.repository.find(id, owner_id).await?)
    }

    /// # Errors
    ///
    /// `Store` on backend failure or a malformed cursor.
    pub async fn list(
        &self,
        filter: &ListFilter,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<OperationPage, OperationError> {
        Ok(self.repository.list(filter, limit, cursor).await?)
    }

    /// Deletes an operation record. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// `Forbidden` when owned by someone else, `Store` on backend failure.
    pub async fn delete(&self, id: &str, owner_id: Option<&str>) -> Result<bool, OperationError> {
        Ok(self.repository.delete(id, owner_id).await?)
    }

    /// Cooperative cancellation check for long-running handlers.
    ///
    /// # Errors
    ///
    /// `NotFound` when the record is gone, `Store` on backend failure.
    pub async fn is_cancelled(&self, id: &str) -> Result<bool, OperationError> {
        self.repository
            .find(id, None)
            .await?
            .map(|record| record.status == OperationStatus::Cancelled)
            .ok_or_else(|| OperationError::NotFound { id: id.to_string() })
    }

    /// Deletes up to `limit` records older than the retention window at `now`.
    ///
    /// # Errors
    ///
    /// `Store` on backend failure.
    pub async fn delete_expired(&self, now: i64, limit: usize) -> Result<usize, OperationError> {
        let cutoff = now.saturating_sub(self.retention_ms);
        let deleted = self.repository.delete_expired_before(cutoff, limit).await?;
        if deleted > 0 {
            info!(deleted, cutoff, "expired operations deleted");
        }
        Ok(deleted)
    }
}

fn ensure_active(record: &OperationRecord, action: &'static str) -> Result<(), OperationError> {
    if record.is_terminal() {
        return Err(OperationError::InvalidState {
            id: record.id.clone(),
            status: record.status,
            action,
        });
    }
    Ok(())
}

fn advance_progress(record: &mut OperationRecord, value: f64) -> Result<(), OperationError> {
    if value.is_nan() {
        return Err(OperationError::InvalidArgument {
            message: "progress must be a number".to_string(),
        });
    }
    let value = value.clamp(0.0, 1.0);
    let current = record.progress.unwrap_or(0.0);
    if value < current {
        return Err(OperationError::InvalidArgument {
            message: format!("progress may not decrease from {current} to {value}"),
        });
    }
    record.progress = Some(value);
    Ok(())
}

/// The immediate response for an accepted async request.
///
/// `result` is null; everything the client needs to poll lives in the async
/// extension entry.
fn polling_response(
    request_id: &str,
    record: &OperationRecord,
    retry_after_seconds: u64,
) -> ResponseEnvelope {
    ResponseEnvelope::empty(request_id).with_extension(
        extensions::ASYNC,
        json!({
            "operation_id": record.id,
            "status": record.status,
            "poll": {
                "function": SystemFunction::OperationStatus.urn(),
                "version": SYSTEM_FUNCTION_VERSION,
                "arguments": { "operation_id": record.id },
            },
            "retry_after": ProtocolDuration::seconds(retry_after_seconds).to_value(),
        }),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use forrst_core::{Call, ErrorCode, ForrstError};

    use super::*;
    use crate::operation::error::StoreError;
    use crate::operation::memory::InMemoryOperationRepository;
    use crate::operation::record::is_valid_operation_id;

    /// Wraps the in-memory store, counting calls and optionally reporting the
    /// first `taken` id lookups as collisions.
    #[derive(Default)]
    struct InstrumentedRepository {
        inner: InMemoryOperationRepository,
        taken: usize,
        finds: AtomicUsize,
        saves: AtomicUsize,
        /// Number of CAS calls to fail before delegating.
        stale_writes: AtomicUsize,
    }

    #[async_trait]
    impl OperationRepository for InstrumentedRepository {
        async fn find(
            &self,
            id: &str,
            owner_id: Option<&str>,
        ) -> Result<Option<OperationRecord>, StoreError> {
            let n = self.finds.fetch_add(1, Ordering::SeqCst);
            if n < self.taken {
                return Ok(Some(OperationRecord::new(id, "taken", "1.0.0", None, 0)));
            }
            self.inner.find(id, owner_id).await
        }

        async fn save(&self, record: OperationRecord, owner_id: Option<&str>) -> Result<(), StoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save(record, owner_id).await
        }

        async fn save_if_version_matches(
            &self,
            record: OperationRecord,
            expected_version: u64,
            owner_id: Option<&str>,
        ) -> Result<bool, StoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            let stale = self
                .stale_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if stale {
                return Ok(false);
            }
            self.inner
                .save_if_version_matches(record, expected_version, owner_id)
                .await
        }

        async fn delete(&self, id: &str, owner_id: Option<&str>) -> Result<bool, StoreError> {
            self.inner.delete(id, owner_id).await
        }

        async fn list(
            &self,
            filter: &ListFilter,
            limit: usize,
            cursor: Option<&str>,
        ) -> Result<OperationPage, StoreError> {
            self.inner.list(filter, limit, cursor).await
        }

        async fn count_active_by_owner(&self, owner_id: &str) -> Result<usize, StoreError> {
            self.inner.count_active_by_owner(owner_id).await
        }

        async fn delete_expired_before(&self, before: i64, limit: usize) -> Result<usize, StoreError> {
            self.inner.delete_expired_before(before, limit).await
        }
    }

    fn request() -> RequestEnvelope {
        RequestEnvelope::new(Call::new("urn:acme:forrst:fn:report.build"))
            .with_id("req-1")
            .with_context("caller_id", json!("alice"))
    }

    fn manager() -> AsyncOperationManager {
        AsyncOperationManager::new(Arc::new(InMemoryOperationRepository::new()))
    }

    async fn create(manager: &AsyncOperationManager) -> OperationRecord {
        manager
            .create_async_operation(&request(), "1.0.0", &Map::new(), Map::new(), 5)
            .await
            .unwrap()
            .record
    }

    #[tokio::test]
    async fn create_persists_pending_record_and_builds_polling_response() {
        let manager = manager();
        let created = manager
            .create_async_operation(&request(), "1.2.0", &Map::new(), Map::new(), 7)
            .await
            .unwrap();

        let record = &created.record;
        assert!(is_valid_operation_id(&record.id), "{}", record.id);
        assert_eq!(record.status, OperationStatus::Pending);
        assert_eq!(record.lock_version, 1);
        assert_eq!(record.version, "1.2.0");
        assert_eq!(record.owner_id.as_deref(), Some("alice"));

        let response = &created.response;
        assert_eq!(response.id, "req-1");
        assert!(response.result().is_none());
        assert!(response.errors().is_empty());
        let data = response.extension_data(extensions::ASYNC).unwrap();
        assert_eq!(data["operation_id"], json!(record.id));
        assert_eq!(data["status"], "pending");
        assert_eq!(data["poll"]["function"], "urn:cline:forrst:ext:async:fn:status");
        assert_eq!(data["poll"]["arguments"]["operation_id"], json!(record.id));
        assert_eq!(data["retry_after"], json!({"value": 7, "unit": "second"}));

        assert!(manager.find(&record.id, None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn oversized_metadata_is_rejected_before_any_persistence() {
        let repo = Arc::new(InstrumentedRepository::default());
        let manager = AsyncOperationManager::new(repo.clone());

        let mut metadata = Map::new();
        metadata.insert("blob".into(), json!("x".repeat(70_000)));

        let err = manager
            .create_async_operation(&request(), "1.0.0", &Map::new(), metadata, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::MetadataTooLarge { .. }));
        assert_eq!(repo.finds.load(Ordering::SeqCst), 0);
        assert_eq!(repo.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn id_generation_retries_past_collisions() {
        let repo = Arc::new(InstrumentedRepository {
            taken: 3,
            ..InstrumentedRepository::default()
        });
        let manager = AsyncOperationManager::new(repo.clone());

        let record = create(&manager).await;
        assert!(is_valid_operation_id(&record.id));
        assert_eq!(repo.finds.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn id_generation_gives_up_after_budget() {
        let repo = Arc::new(InstrumentedRepository {
            taken: usize::MAX,
            ..InstrumentedRepository::default()
        });
        let manager = AsyncOperationManager::new(repo.clone());

        let err = manager
            .create_async_operation(&request(), "1.0.0", &Map::new(), Map::new(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::IdSpaceExhausted { attempts: 10 }));
        assert_eq!(repo.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejects_unsafe_callback_url() {
        let manager = manager();
        let mut options = Map::new();
        options.insert("callback_url".into(), json!("http://10.0.0.1/hook"));
        let err = manager
            .create_async_operation(&request(), "1.0.0", &options, Map::new(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::InvalidCallbackUrl { .. }));
    }

    #[tokio::test]
    async fn stores_validated_callback_url() {
        let manager = manager();
        let mut options = Map::new();
        options.insert("callback_url".into(), json!("https://hooks.example.com/done"));
        let created = manager
            .create_async_operation(&request(), "1.0.0", &options, Map::new(), 5)
            .await
            .unwrap();
        assert_eq!(
            created.record.callback_url.as_deref(),
            Some("https://hooks.example.com/done")
        );
    }

    #[tokio::test]
    async fn happy_path_transitions() {
        let manager = manager();
        let record = create(&manager).await;

        let processing = manager.mark_processing(&record.id, Some(0.1)).await.unwrap();
        assert_eq!(processing.status, OperationStatus::Processing);
        assert!(processing.started_at.is_some());
        assert_eq!(processing.lock_version, 2);

        let started_at = processing.started_at;
        let again = manager.mark_processing(&record.id, None).await.unwrap();
        assert_eq!(again.started_at, started_at);

        manager
            .update_progress(&record.id, 0.5, Some("halfway".into()))
            .await
            .unwrap();
        let done = manager.complete(&record.id, json!({"rows": 3})).await.unwrap();
        assert_eq!(done.status, OperationStatus::Completed);
        assert_eq!(done.progress, Some(1.0));
        assert_eq!(done.result, Some(json!({"rows": 3})));
        assert_eq!(done.message.as_deref(), Some("halfway"));
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn progress_is_monotone() {
        let manager = manager();
        let record = create(&manager).await;

        manager.update_progress(&record.id, 0.8, None).await.unwrap();
        let err = manager.update_progress(&record.id, 0.5, None).await.unwrap_err();
        assert!(matches!(err, OperationError::InvalidArgument { .. }));
        assert_eq!(ForrstError::from(err).code(), ErrorCode::InvalidArguments);

        let stored = manager.find(&record.id, None).await.unwrap().unwrap();
        assert_eq!(stored.progress, Some(0.8));
    }

    #[tokio::test]
    async fn progress_is_clamped() {
        let manager = manager();
        let record = create(&manager).await;
        let updated = manager.update_progress(&record.id, 7.5, None).await.unwrap();
        assert_eq!(updated.progress, Some(1.0));
        assert!(manager.update_progress(&record.id, f64::NAN, None).await.is_err());
    }

    #[tokio::test]
    async fn cancelling_terminal_operations_is_rejected() {
        let manager = manager();

        let completed = create(&manager).await;
        manager.complete(&completed.id, json!(null)).await.unwrap();
        let err = manager.cancel(&completed.id, None).await.unwrap_err();
        assert!(matches!(
            err,
            OperationError::CannotCancel { status: OperationStatus::Completed, .. }
        ));

        let cancelled = create(&manager).await;
        manager.cancel(&cancelled.id, Some("alice")).await.unwrap();
        let err = manager.cancel(&cancelled.id, None).await.unwrap_err();
        assert!(matches!(
            err,
            OperationError::CannotCancel { status: OperationStatus::Cancelled, .. }
        ));
        assert!(manager.is_cancelled(&cancelled.id).await.unwrap());
    }

    #[tokio::test]
    async fn terminal_records_reject_further_transitions() {
        let manager = manager();
        let record = create(&manager).await;
        manager
            .fail(&record.id, vec![ErrorEntry::new(ErrorCode::InternalError, "boom")])
            .await
            .unwrap();

        assert!(matches!(
            manager.complete(&record.id, json!(1)).await,
            Err(OperationError::InvalidState { .. })
        ));
        assert!(matches!(
            manager.mark_processing(&record.id, None).await,
            Err(OperationError::InvalidState { .. })
        ));
        assert!(matches!(
            manager.update_progress(&record.id, 0.9, None).await,
            Err(OperationError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_checks_owner() {
        let manager = manager();
        let record = create(&manager).await;
        assert!(matches!(
            manager.cancel(&record.id, Some("mallory")).await,
            Err(OperationError::Forbidden { .. })
        ));
    }

    #[tokio::test]
    async fn missing_operation_is_not_found() {
        let manager = manager();
        assert!(matches!(
            manager.complete("op_000000000000000000000000", json!(1)).await,
            Err(OperationError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn stale_writes_are_retried_then_reported_as_conflict() {
        let repo = Arc::new(InstrumentedRepository::default());
        let manager = AsyncOperationManager::new(repo.clone());
        let record = create(&manager).await;

        repo.stale_writes.store(2, Ordering::SeqCst);
        let updated = manager.update_progress(&record.id, 0.4, None).await.unwrap();
        assert_eq!(updated.progress, Some(0.4));

        repo.stale_writes.store(3, Ordering::SeqCst);
        let err = manager.update_progress(&record.id, 0.6, None).await.unwrap_err();
        assert!(matches!(err, OperationError::Conflict { .. }));
        let stored = manager.find(&record.id, None).await.unwrap().unwrap();
        assert_eq!(stored.progress, Some(0.4));
    }

    #[tokio::test]
    async fn delete_expired_honours_retention_and_limit() {
        let repo = Arc::new(InMemoryOperationRepository::new());
        let manager = AsyncOperationManager::new(repo.clone()).with_retention_ms(1_000);
        for i in 0..5 {
            repo.save(
                OperationRecord::new(format!("op_{i}"), "f", "1.0.0", None, i * 100),
                None,
            )
            .await
            .unwrap();
        }
        repo.save(OperationRecord::new("op_new", "f", "1.0.0", None, 5_000), None)
            .await
            .unwrap();

        assert_eq!(manager.delete_expired(2_000, 3).await.unwrap(), 3);
        assert_eq!(manager.delete_expired(2_000, 3).await.unwrap(), 2);
        assert_eq!(manager.delete_expired(2_000, 3).await.unwrap(), 0);
        assert_eq!(repo.len(), 1);
    }
}
