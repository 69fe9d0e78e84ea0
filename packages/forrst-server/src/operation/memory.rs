//! In-memory [`OperationRepository`] backed by [`DashMap`].
//!
//! Suitable for tests and single-process deployments. The compare-and-swap in
//! [`save_if_version_matches`](OperationRepository::save_if_version_matches)
//! runs while holding the entry's shard lock, so concurrent writers to the
//! same record serialize and exactly one of them wins per version.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::error::StoreError;
use super::record::OperationRecord;
use super::repository::{ListFilter, OperationPage, OperationRepository};

fn check_owner(record: &OperationRecord, owner_id: Option<&str>) -> Result<(), StoreError> {
    if record.is_accessible_by(owner_id) {
        Ok(())
    } else {
        Err(StoreError::Forbidden {
            id: record.id.clone(),
        })
    }
}

/// Cursor format: `<created_at>:<id>` of the last record on the previous page.
fn encode_cursor(record: &OperationRecord) -> String {
    format!("{}:{}", record.created_at, record.id)
}

fn decode_cursor(cursor: &str) -> Result<(i64, String), StoreError> {
    cursor
        .split_once(':')
        .and_then(|(ts, id)| Some((ts.parse().ok()?, id.to_string())))
        .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("malformed list cursor `{cursor}`")))
}

/// Operation store holding every record in a [`DashMap`].
pub struct InMemoryOperationRepository {
    records: DashMap<String, OperationRecord>,
}

impl InMemoryOperationRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemoryOperationRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperationRepository for InMemoryOperationRepository {
    async fn find(
        &self,
        id: &str,
        owner_id: Option<&str>,
    ) -> Result<Option<OperationRecord>, StoreError> {
        let Some(entry) = self.records.get(id) else {
            return Ok(None);
        };
        check_owner(entry.value(), owner_id)?;
        Ok(Some(entry.value().clone()))
    }

    async fn save(&self, record: OperationRecord, owner_id: Option<&str>) -> Result<(), StoreError> {
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(mut entry) => {
                check_owner(entry.get(), owner_id)?;
                entry.insert(record);
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
            }
        }
        Ok(())
    }

    async fn save_if_version_matches(
        &self,
        mut record: OperationRecord,
        expected_version: u64,
        owner_id: Option<&str>,
    ) -> Result<bool, StoreError> {
        let Some(mut stored) = self.records.get_mut(&record.id) else {
            return Ok(false);
        };
        check_owner(stored.value(), owner_id)?;
        if stored.lock_version != expected_version {
            return Ok(false);
        }
        record.lock_version = expected_version + 1;
        *stored = record;
        Ok(true)
    }

    async fn delete(&self, id: &str, owner_id: Option<&str>) -> Result<bool, StoreError> {
        if let Some(entry) = self.records.get(id) {
            check_owner(entry.value(), owner_id)?;
        } else {
            return Ok(false);
        }
        Ok(self.records.remove(id).is_some())
    }

    async fn list(
        &self,
        filter: &ListFilter,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<OperationPage, StoreError> {
        let after = cursor.map(decode_cursor).transpose()?;

        let mut matching: Vec<OperationRecord> = self
            .records
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .filter(|entry| {
                after.as_ref().is_none_or(|(ts, id)| {
                    (entry.created_at, entry.id.as_str()) > (*ts, id.as_str())
                })
            })
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        let has_more = matching.len() > limit;
        matching.truncate(limit);
        let next_cursor = if has_more {
            matching.last().map(encode_cursor)
        } else {
            None
        };

        Ok(OperationPage {
            operations: matching,
            next_cursor,
        })
    }

    async fn count_active_by_owner(&self, owner_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.owner_id.as_deref() == Some(owner_id) && !entry.is_terminal())
            .count())
    }

    async fn delete_expired_before(&self, before: i64, limit: usize) -> Result<usize, StoreError> {
        let mut expired: Vec<(i64, String)> = self
            .records
            .iter()
            .filter(|entry| entry.created_at < before)
            .map(|entry| (entry.created_at, entry.key().clone()))
            .collect();
        expired.sort();
        expired.truncate(limit);

        let mut deleted = 0;
        for (_, id) in expired {
            if self
                .records
                .remove_if(&id, |_, record| record.created_at < before)
                .is_some()
            {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
