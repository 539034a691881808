//! Port abstraction for the append-only audit log.
//!
//! The port has no update or delete operation.

use async_trait::async_trait;

use crate::domain::{AuditLogEntry, DeletionRequestId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by audit log adapters.
    pub enum AuditLogRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String } => "audit log connection failed: {message}",
        /// Query or insert failed during execution.
        Query { message: String } => "audit log query failed: {message}",
    }
}

/// Audit listing filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditQuery {
    pub deletion_request_id: Option<DeletionRequestId>,
    pub limit: usize,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    /// Append entries that are not part of a request commit.
    async fn append(&self, entries: &[AuditLogEntry]) -> Result<(), AuditLogRepositoryError>;

    /// Newest first.
    async fn list(&self, query: AuditQuery) -> Result<Vec<AuditLogEntry>, AuditLogRepositoryError>;
}

/// Fixture implementation that discards entries.
#[derive(Debug, Default)]
pub struct FixtureAuditLogRepository;

#[async_trait]
impl AuditLogRepository for FixtureAuditLogRepository {
    async fn append(&self, _entries: &[AuditLogEntry]) -> Result<(), AuditLogRepositoryError> {
        Ok(())
    }

    async fn list(
        &self,
        _query: AuditQuery,
    ) -> Result<Vec<AuditLogEntry>, AuditLogRepositoryError> {
        Ok(Vec::new())
    }
}
