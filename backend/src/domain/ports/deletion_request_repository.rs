//! Port abstraction for deletion request persistence.
//!
//! Writes are optimistic: [`DeletionRequestRepository::commit`] only succeeds
//! when the stored revision still equals the revision the caller read, and it
//! stores the accompanying audit entries in the same atomic unit.

use async_trait::async_trait;

use crate::domain::{AuditLogEntry, DeletionRequest, DeletionRequestId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by deletion request repository adapters.
    pub enum DeletionRequestRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String } => "deletion request repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "deletion request repository query failed: {message}",
        /// A request with the same id or tracking id already exists.
        Duplicate { message: String } => "deletion request already exists: {message}",
        /// The request to update does not exist.
        NotFound { id: String } => "deletion request {id} not found",
        /// Another writer committed since the caller read the request.
        RevisionMismatch { expected: u32, actual: u32 } =>
            "revision mismatch: expected {expected}, found {actual}",
    }
}

/// Port for deletion request storage.
///
/// # Revision Semantics
///
/// - New requests are stored at revision 0.
/// - [`commit`](Self::commit) receives the request with its revision already
///   advanced to `expected_revision + 1`.
/// - A stored revision other than `expected_revision` yields
///   [`DeletionRequestRepositoryError::RevisionMismatch`] and nothing is
///   written, audit entries included.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeletionRequestRepository: Send + Sync {
    /// Store a new request together with its creation audit entries.
    async fn create(
        &self,
        request: &DeletionRequest,
        audit: &[AuditLogEntry],
    ) -> Result<(), DeletionRequestRepositoryError>;

    async fn find_by_id(
        &self,
        id: &DeletionRequestId,
    ) -> Result<Option<DeletionRequest>, DeletionRequestRepositoryError>;

    /// Find the request that issued the given `Message-ID` for any stage.
    async fn find_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<DeletionRequest>, DeletionRequestRepositoryError>;

    async fn find_by_tracking_id(
        &self,
        tracking_id: &str,
    ) -> Result<Option<DeletionRequest>, DeletionRequestRepositoryError>;

    /// Requests the scheduler may still act on (see
    /// [`RequestStatus::awaits_automation`]), oldest first, at most `limit`.
    ///
    /// [`RequestStatus::awaits_automation`]: crate::domain::RequestStatus::awaits_automation
    async fn list_active(
        &self,
        limit: usize,
    ) -> Result<Vec<DeletionRequest>, DeletionRequestRepositoryError>;

    /// Conditionally replace the stored request and append audit entries.
    async fn commit(
        &self,
        request: &DeletionRequest,
        expected_revision: u32,
        audit: &[AuditLogEntry],
    ) -> Result<(), DeletionRequestRepositoryError>;
}

/// Fixture implementation that stores nothing and finds nothing.
#[derive(Debug, Default)]
pub struct FixtureDeletionRequestRepository;

#[async_trait]
impl DeletionRequestRepository for FixtureDeletionRequestRepository {
    async fn create(
        &self,
        _request: &DeletionRequest,
        _audit: &[AuditLogEntry],
    ) -> Result<(), DeletionRequestRepositoryError> {
        Ok(())
    }

    async fn find_by_id(
        &self,
        _id: &DeletionRequestId,
    ) -> Result<Option<DeletionRequest>, DeletionRequestRepositoryError> {
        Ok(None)
    }

    async fn find_by_message_id(
        &self,
        _message_id: &str,
    ) -> Result<Option<DeletionRequest>, DeletionRequestRepositoryError> {
        Ok(None)
    }

    async fn find_by_tracking_id(
        &self,
        _tracking_id: &str,
    ) -> Result<Option<DeletionRequest>, DeletionRequestRepositoryError> {
        Ok(None)
    }

    async fn list_active(
        &self,
        _limit: usize,
    ) -> Result<Vec<DeletionRequest>, DeletionRequestRepositoryError> {
        Ok(Vec::new())
    }

    async fn commit(
        &self,
        request: &DeletionRequest,
        _expected_revision: u32,
        _audit: &[AuditLogEntry],
    ) -> Result<(), DeletionRequestRepositoryError> {
        Err(DeletionRequestRepositoryError::not_found(
            request.id.to_string(),
        ))
    }
}
