//! Persistence contract for operation records.

use async_trait::async_trait;

use super::error::StoreError;
use super::record::{OperationRecord, OperationStatus};

/// Selection criteria for [`OperationRepository::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<OperationStatus>,
    pub function: Option<String>,
    /// Restricts results to one owner; `None` lists every owner's records.
    pub owner_id: Option<String>,
}

impl ListFilter {
    /// Whether `record` satisfies every criterion.
    #[must_use]
    pub fn matches(&self, record: &OperationRecord) -> bool {
        self.status.is_none_or(|s| record.status == s)
            && self.function.as_deref().is_none_or(|f| record.function == f)
            && self
                .owner_id
                .as_deref()
                .is_none_or(|o| record.owner_id.as_deref() == Some(o))
    }
}

/// One page of [`OperationRepository::list`] results.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationPage {
    pub operations: Vec<OperationRecord>,
    /// Opaque cursor for the next page; `None` on the last page.
    pub next_cursor: Option<String>,
}

/// Authoritative store of operation records.
///
/// Every `owner_id` parameter follows the same rule: when supplied and the
/// stored record has a different non-null owner, the call fails with
/// [`StoreError::Forbidden`]. `None` is trusted access.
#[async_trait]
pub trait OperationRepository: Send + Sync {
    /// Loads a record by id.
    async fn find(
        &self,
        id: &str,
        owner_id: Option<&str>,
    ) -> Result<Option<OperationRecord>, StoreError>;

    /// Unconditionally inserts or replaces a record.
    async fn save(&self, record: OperationRecord, owner_id: Option<&str>) -> Result<(), StoreError>;

    /// Compare-and-swap write.
    ///
    /// Commits `record` only if the stored `lock_version` equals
    /// `expected_version`, storing it with `lock_version = expected_version + 1`.
    /// Returns `false` (leaving the stored record untouched) when the versions
    /// differ or the record no longer exists.
    async fn save_if_version_matches(
        &self,
        record: OperationRecord,
        expected_version: u64,
        owner_id: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Deletes a record. Returns whether it existed.
    async fn delete(&self, id: &str, owner_id: Option<&str>) -> Result<bool, StoreError>;

    /// Lists records matching `filter`, oldest first, at most `limit` per page.
    async fn list(
        &self,
        filter: &ListFilter,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<OperationPage, StoreError>;

    /// Number of non-terminal records owned by `owner_id`.
    async fn count_active_by_owner(&self, owner_id: &str) -> Result<usize, StoreError>;

    /// Deletes up to `limit` records created before `before` (epoch millis),
    /// oldest first. Returns the number deleted.
    async fn delete_expired_before(&self, before: i64, limit: usize) -> Result<usize, StoreError>;
}
