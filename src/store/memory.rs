//! In-memory repositories for credentials and request attempts.

use crate::protocol::models::{Credential, NewCredential};
use crate::store::attempts::{AttemptLog, AttemptRecord};
use crate::store::credentials::{CredentialQuery, CredentialRepository};
use crate::ApiwardenError;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct CredentialTable {
    rows: BTreeMap<u64, Credential>,
    next_id: u64,
}

/// Mutex-guarded credential repository.
#[derive(Default)]
pub struct MemoryCredentialRepository {
    table: Mutex<CredentialTable>,
}

impl MemoryCredentialRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CredentialTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn matches_query(credential: &Credential, query: &CredentialQuery) -> bool {
    if query
        .environment
        .is_some_and(|env| env != credential.environment)
    {
        return false;
    }
    if query
        .active
        .is_some_and(|active| active != credential.is_active)
    {
        return false;
    }
    // The tenant id is the only scoped attribute a credential carries
    query
        .scopes
        .iter()
        .all(|scope| credential.tenant_id.as_deref() == Some(scope.value.as_str()))
}

impl CredentialRepository for MemoryCredentialRepository {
    fn find_by_client_id(&self, client_id: &str) -> Result<Option<Credential>, ApiwardenError> {
        Ok(self
            .lock()
            .rows
            .values()
            .find(|c| c.client_id == client_id)
            .cloned())
    }

    fn insert(
        &self,
        credential: NewCredential,
        created_at: DateTime<Utc>,
    ) -> Result<Credential, ApiwardenError> {
        let mut table = self.lock();
        if table
            .rows
            .values()
            .any(|c| c.client_id == credential.client_id)
        {
            return Err(ApiwardenError::DuplicateClientId {
                client_id: credential.client_id,
            });
        }
        table.next_id += 1;
        let id = table.next_id;
        let stored = credential.into_credential(id, created_at);
        table.rows.insert(id, stored.clone());
        Ok(stored)
    }

    fn update(&self, credential: &Credential) -> Result<(), ApiwardenError> {
        let mut table = self.lock();
        if table
            .rows
            .values()
            .any(|c| c.id != credential.id && c.client_id == credential.client_id)
        {
            return Err(ApiwardenError::DuplicateClientId {
                client_id: credential.client_id.clone(),
            });
        }
        match table.rows.get_mut(&credential.id) {
            Some(row) => {
                *row = credential.clone();
                Ok(())
            }
            None => Err(ApiwardenError::CredentialNotFound {
                client_id: credential.client_id.clone(),
            }),
        }
    }

    fn touch(&self, id: u64, at: DateTime<Utc>) -> Result<(), ApiwardenError> {
        if let Some(row) = self.lock().rows.get_mut(&id) {
            row.last_used_at = Some(at);
        }
        Ok(())
    }

    fn delete(&self, id: u64) -> Result<bool, ApiwardenError> {
        Ok(self.lock().rows.remove(&id).is_some())
    }

    fn list(&self, query: &CredentialQuery) -> Result<Vec<Credential>, ApiwardenError> {
        Ok(self
            .lock()
            .rows
            .values()
            .filter(|c| matches_query(c, query))
            .cloned()
            .collect())
    }
}

/// Append-only in-memory request log.
#[derive(Default)]
pub struct MemoryAttemptLog {
    records: Mutex<Vec<AttemptRecord>>,
}

impl MemoryAttemptLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every stored record, oldest first.
    pub fn records(&self) -> Vec<AttemptRecord> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AttemptRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AttemptLog for MemoryAttemptLog {
    fn append(&self, record: AttemptRecord) -> Result<(), ApiwardenError> {
        self.lock().push(record);
        Ok(())
    }

    fn count_failures_by_ip(&self, ip: &str, since: DateTime<Utc>) -> Result<u64, ApiwardenError> {
        Ok(self
            .lock()
            .iter()
            .filter(|r| r.counts_toward_ip_block() && r.ip == ip && r.created_at >= since)
            .count() as u64)
    }

    fn count_failures_by_client(
        &self,
        client_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, ApiwardenError> {
        Ok(self
            .lock()
            .iter()
            .filter(|r| {
                r.is_failure()
                    && r.client_id.as_deref() == Some(client_id)
                    && r.created_at >= since
            })
            .count() as u64)
    }

    fn failing_ips(
        &self,
        since: DateTime<Utc>,
        min_failures: u64,
    ) -> Result<Vec<(String, u64)>, ApiwardenError> {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for record in self
            .lock()
            .iter()
            .filter(|r| r.counts_toward_ip_block() && r.created_at >= since)
        {
            *counts.entry(record.ip.clone()).or_default() += 1;
        }
        let mut ips: Vec<(String, u64)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= min_failures)
            .collect();
        ips.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(ips)
    }

    fn delete_before(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize, ApiwardenError> {
        let mut records = self.lock();
        let mut removed = 0;
        records.retain(|r| {
            if removed < limit && r.created_at < cutoff {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }
}
