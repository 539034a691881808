//! Port abstraction for inbound email persistence.
//!
//! Raw replies are stored before anything else happens to them; analysis is
//! recorded afterwards. A stored correlation is never replaced.

use async_trait::async_trait;

use crate::domain::{
    AuditLogEntry, DeletionRequestId, InboundEmail, InboundEmailId, ReplyIntent,
};

use super::define_port_error;

define_port_error! {
    /// Errors raised by inbound email repository adapters.
    pub enum InboundEmailRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String } => "inbound email repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "inbound email repository query failed: {message}",
        /// The email to update does not exist.
        NotFound { id: String } => "inbound email {id} not found",
    }
}

/// Classification and correlation outcome for a stored email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundAnalysis {
    pub intent: ReplyIntent,
    pub rejection_reason: Option<String>,
    pub deletion_request_id: Option<DeletionRequestId>,
}

/// Listing filter for triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundEmailQuery {
    /// Only emails that matched no request.
    pub uncorrelated_only: bool,
    pub limit: usize,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InboundEmailRepository: Send + Sync {
    /// Persist a raw email verbatim with its receipt audit entries.
    async fn insert(
        &self,
        email: &InboundEmail,
        audit: &[AuditLogEntry],
    ) -> Result<(), InboundEmailRepositoryError>;

    /// Store the classification, and the correlation if none is stored yet.
    async fn record_analysis(
        &self,
        id: &InboundEmailId,
        analysis: &InboundAnalysis,
    ) -> Result<(), InboundEmailRepositoryError>;

    async fn find_by_id(
        &self,
        id: &InboundEmailId,
    ) -> Result<Option<InboundEmail>, InboundEmailRepositoryError>;

    /// Newest first.
    async fn list(
        &self,
        query: InboundEmailQuery,
    ) -> Result<Vec<InboundEmail>, InboundEmailRepositoryError>;
}

/// Fixture implementation that accepts writes and returns nothing.
#[derive(Debug, Default)]
pub struct FixtureInboundEmailRepository;

#[async_trait]
impl InboundEmailRepository for FixtureInboundEmailRepository {
    async fn insert(
        &self,
        _email: &InboundEmail,
        _audit: &[AuditLogEntry],
    ) -> Result<(), InboundEmailRepositoryError> {
        Ok(())
    }

    async fn record_analysis(
        &self,
        _id: &InboundEmailId,
        _analysis: &InboundAnalysis,
    ) -> Result<(), InboundEmailRepositoryError> {
        Ok(())
    }

    async fn find_by_id(
        &self,
        _id: &InboundEmailId,
    ) -> Result<Option<InboundEmail>, InboundEmailRepositoryError> {
        Ok(None)
    }

    async fn list(
        &self,
        _query: InboundEmailQuery,
    ) -> Result<Vec<InboundEmail>, InboundEmailRepositoryError> {
        Ok(Vec::new())
    }
}
