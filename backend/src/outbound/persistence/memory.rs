//! In-process store implementing every persistence port.
//!
//! Used when no database is configured (development) and as the backing
//! store in tests. A single mutex covers requests, emails and the audit log,
//! so each commit and its audit entries land together, like a database
//! transaction.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::ports::{
    AuditLogRepository, AuditLogRepositoryError, AuditQuery, DeletionRequestRepository,
    DeletionRequestRepositoryError, InboundAnalysis, InboundEmailQuery, InboundEmailRepository,
    InboundEmailRepositoryError,
};
use crate::domain::{
    AuditLogEntry, DeletionRequest, DeletionRequestId, InboundEmail, InboundEmailId,
};

#[derive(Debug, Default)]
struct State {
    requests: HashMap<DeletionRequestId, DeletionRequest>,
    emails: Vec<InboundEmail>,
    audit: Vec<AuditLogEntry>,
}

/// Shared in-memory persistence.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl DeletionRequestRepository for InMemoryStore {
    async fn create(
        &self,
        request: &DeletionRequest,
        audit: &[AuditLogEntry],
    ) -> Result<(), DeletionRequestRepositoryError> {
        let mut state = self.lock();
        let clash = state.requests.values().any(|existing| {
            existing.id == request.id || existing.tracking_id == request.tracking_id
        });
        if clash {
            return Err(DeletionRequestRepositoryError::duplicate(
                request.id.to_string(),
            ));
        }
        state.requests.insert(request.id, request.clone());
        state.audit.extend_from_slice(audit);
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &DeletionRequestId,
    ) -> Result<Option<DeletionRequest>, DeletionRequestRepositoryError> {
        Ok(self.lock().requests.get(id).cloned())
    }

    async fn find_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<DeletionRequest>, DeletionRequestRepositoryError> {
        Ok(self
            .lock()
            .requests
            .values()
            .find(|request| request.issued_message_ids().any(|id| id == message_id))
            .cloned())
    }

    async fn find_by_tracking_id(
        &self,
        tracking_id: &str,
    ) -> Result<Option<DeletionRequest>, DeletionRequestRepositoryError> {
        Ok(self
            .lock()
            .requests
            .values()
            .find(|request| request.tracking_id.as_ref() == tracking_id)
            .cloned())
    }

    async fn list_active(
        &self,
        limit: usize,
    ) -> Result<Vec<DeletionRequest>, DeletionRequestRepositoryError> {
        let state = self.lock();
        let mut active: Vec<_> = state
            .requests
            .values()
            .filter(|request| request.status.awaits_automation())
            .cloned()
            .collect();
        active.sort_by_key(|request| (request.created_at, *request.id.as_uuid()));
        active.truncate(limit);
        Ok(active)
    }

    async fn commit(
        &self,
        request: &DeletionRequest,
        expected_revision: u32,
        audit: &[AuditLogEntry],
    ) -> Result<(), DeletionRequestRepositoryError> {
        let mut state = self.lock();
        let Some(stored) = state.requests.get_mut(&request.id) else {
            return Err(DeletionRequestRepositoryError::not_found(
                request.id.to_string(),
            ));
        };
        if stored.revision != expected_revision {
            return Err(DeletionRequestRepositoryError::revision_mismatch(
                expected_revision,
                stored.revision,
            ));
        }
        *stored = request.clone();
        state.audit.extend_from_slice(audit);
        Ok(())
    }
}

#[async_trait]
impl InboundEmailRepository for InMemoryStore {
    async fn insert(
        &self,
        email: &InboundEmail,
        audit: &[AuditLogEntry],
    ) -> Result<(), InboundEmailRepositoryError> {
        let mut state = self.lock();
        state.emails.push(email.clone());
        state.audit.extend_from_slice(audit);
        Ok(())
    }

    async fn record_analysis(
        &self,
        id: &InboundEmailId,
        analysis: &InboundAnalysis,
    ) -> Result<(), InboundEmailRepositoryError> {
        let mut state = self.lock();
        let Some(email) = state.emails.iter_mut().find(|email| email.id == *id) else {
            return Err(InboundEmailRepositoryError::not_found(id.to_string()));
        };
        email.parsed_status = analysis.intent;
        email.rejection_reason.clone_from(&analysis.rejection_reason);
        if email.deletion_request_id.is_none() {
            email.deletion_request_id = analysis.deletion_request_id;
        }
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &InboundEmailId,
    ) -> Result<Option<InboundEmail>, InboundEmailRepositoryError> {
        Ok(self
            .lock()
            .emails
            .iter()
            .find(|email| email.id == *id)
            .cloned())
    }

    async fn list(
        &self,
        query: InboundEmailQuery,
    ) -> Result<Vec<InboundEmail>, InboundEmailRepositoryError> {
        let state = self.lock();
        let mut emails: Vec<_> = state
            .emails
            .iter()
            .filter(|email| !query.uncorrelated_only || email.deletion_request_id.is_none())
            .cloned()
            .collect();
        emails.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        emails.truncate(query.limit);
        Ok(emails)
    }
}

#[async_trait]
impl AuditLogRepository for InMemoryStore {
    async fn append(&self, entries: &[AuditLogEntry]) -> Result<(), AuditLogRepositoryError> {
        self.lock().audit.extend_from_slice(entries);
        Ok(())
    }

    async fn list(&self, query: AuditQuery) -> Result<Vec<AuditLogEntry>, AuditLogRepositoryError> {
        let state = self.lock();
        Ok(state
            .audit
            .iter()
            .rev()
            .filter(|entry| {
                query
                    .deletion_request_id
                    .is_none_or(|id| entry.deletion_request_id == Some(id))
            })
            .take(query.limit)
            .cloned()
            .collect())
    }
}
