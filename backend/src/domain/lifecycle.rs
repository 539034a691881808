//! The single mutation primitive for deletion requests.
//!
//! Every actor (dispatcher, confirmation link, webhook, scheduler) changes a
//! request through [`RequestLifecycle::apply`]: read the current row, let a
//! pure decision function produce the next state plus audit entries, then
//! commit conditionally on the revision that was read. A concurrent writer
//! makes the commit fail; the primitive re-reads and re-decides, up to a
//! bounded number of attempts.
//!
//! Before committing, the primitive checks the decision against the
//! aggregate's invariants, so no caller can regress a status, rewrite a
//! stage message id, change the tracking id or un-use a token.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use tracing::{debug, error, warn};

use super::deletion_request::{
    DeletionRequest, DeletionRequestId, DispatchStage, NewDeletionRequest, RequestStatus,
};
use super::error::Error;
use super::ports::{DeletionRequestRepository, DeletionRequestRepositoryError};
use super::{Actor, AuditAction, AuditLogEntry};

/// Attempts before a contended transition gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// What a decision function wants done with the request it was shown.
#[derive(Debug)]
pub enum Decision<T> {
    /// Persist `request` with `audit`, then return `value`.
    Write {
        request: DeletionRequest,
        audit: Vec<AuditLogEntry>,
        value: T,
    },
    /// Leave the request untouched and return `value`.
    Skip(T),
}

impl<T> Decision<T> {
    pub fn write(request: DeletionRequest, audit: Vec<AuditLogEntry>, value: T) -> Self {
        Self::Write {
            request,
            audit,
            value,
        }
    }
}

/// Failures of the lifecycle primitive.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("deletion request {0} not found")]
    NotFound(DeletionRequestId),
    /// Every attempt lost the race against another writer.
    #[error("transition conflict on {id} after {attempts} attempts")]
    TransitionConflict { id: DeletionRequestId, attempts: u32 },
    /// A decision broke an aggregate invariant; this is a programming error.
    #[error("decision violates request invariants: {0}")]
    InvariantViolation(String),
    /// The decision function refused the change.
    #[error(transparent)]
    Rejected(Error),
    #[error(transparent)]
    Repository(DeletionRequestRepositoryError),
}

impl From<LifecycleError> for Error {
    fn from(value: LifecycleError) -> Self {
        match value {
            LifecycleError::NotFound(id) => {
                Self::not_found(format!("deletion request {id} not found"))
            }
            LifecycleError::Rejected(error) => error,
            LifecycleError::TransitionConflict { .. } | LifecycleError::InvariantViolation(_) => {
                Self::internal("internal server error")
            }
            LifecycleError::Repository(err) => map_repository_error(&err),
        }
    }
}

pub(crate) fn map_repository_error(error: &DeletionRequestRepositoryError) -> Error {
    match error {
        DeletionRequestRepositoryError::Connection { .. } => {
            Error::service_unavailable("deletion request store unavailable")
        }
        DeletionRequestRepositoryError::Duplicate { .. } => {
            Error::conflict("deletion request already exists")
        }
        DeletionRequestRepositoryError::NotFound { .. } => {
            Error::not_found("deletion request not found")
        }
        DeletionRequestRepositoryError::Query { .. }
        | DeletionRequestRepositoryError::RevisionMismatch { .. } => {
            Error::internal("internal server error")
        }
    }
}

/// Optimistic read-decide-write loop over the request store.
#[derive(Clone)]
pub struct RequestLifecycle {
    repo: Arc<dyn DeletionRequestRepository>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl RequestLifecycle {
    pub fn new(repo: Arc<dyn DeletionRequestRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            clock,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.utc()
    }

    pub fn repository(&self) -> &Arc<dyn DeletionRequestRepository> {
        &self.repo
    }

    /// Validate and store a new `pending` request.
    pub async fn create(
        &self,
        draft: NewDeletionRequest,
        actor: Actor,
    ) -> Result<DeletionRequest, Error> {
        draft
            .validate()
            .map_err(|err| Error::invalid_request(err.to_string()))?;
        let now = self.now();
        let request = DeletionRequest::create(draft, now);
        let audit = AuditLogEntry::new(AuditAction::RequestCreated, actor, now)
            .for_request(request.id)
            .with_details(serde_json::json!({
                "brokerName": request.broker_name,
                "operatorEmail": request.operator_email,
                "trackingId": request.tracking_id,
            }));
        self.repo
            .create(&request, std::slice::from_ref(&audit))
            .await
            .map_err(|err| {
                error!(error = %err, "failed to store deletion request");
                map_repository_error(&err)
            })?;
        debug!(deletion_request_id = %request.id, "deletion request created");
        Ok(request)
    }

    /// Read, decide, conditionally write; retry on revision conflicts.
    pub async fn apply<T, F>(
        &self,
        id: &DeletionRequestId,
        actor: Actor,
        mut decide: F,
    ) -> Result<T, LifecycleError>
    where
        T: Send,
        F: FnMut(&DeletionRequest, DateTime<Utc>) -> Result<Decision<T>, Error> + Send,
    {
        for attempt in 1..=self.max_attempts {
            let current = self
                .repo
                .find_by_id(id)
                .await
                .map_err(LifecycleError::Repository)?
                .ok_or(LifecycleError::NotFound(*id))?;
            let now = self.now();

            let (mut next, audit, value) =
                match decide(&current, now).map_err(LifecycleError::Rejected)? {
                    Decision::Skip(value) => return Ok(value),
                    Decision::Write {
                        request,
                        audit,
                        value,
                    } => (request, audit, value),
                };

            check_invariants(&current, &next)?;
            next.revision = current.revision.wrapping_add(1);
            next.updated_at = now;

            match self.repo.commit(&next, current.revision, &audit).await {
                Ok(()) => {
                    if current.status != next.status {
                        debug!(
                            deletion_request_id = %id,
                            actor = %actor,
                            from = %current.status,
                            to = %next.status,
                            "status transition committed"
                        );
                    }
                    return Ok(value);
                }
                Err(DeletionRequestRepositoryError::RevisionMismatch { expected, actual }) => {
                    debug!(
                        deletion_request_id = %id,
                        actor = %actor,
                        attempt,
                        expected,
                        actual,
                        "revision conflict, retrying"
                    );
                    tokio::task::yield_now().await;
                }
                Err(err) => return Err(LifecycleError::Repository(err)),
            }
        }

        warn!(
            deletion_request_id = %id,
            actor = %actor,
            attempts = self.max_attempts,
            "transition conflict: retries exhausted"
        );
        Err(LifecycleError::TransitionConflict {
            id: *id,
            attempts: self.max_attempts,
        })
    }
}

fn check_invariants(
    before: &DeletionRequest,
    after: &DeletionRequest,
) -> Result<(), LifecycleError> {
    let violation = |what: &str| Err(LifecycleError::InvariantViolation(what.to_owned()));

    if after.id != before.id {
        return violation("request id changed");
    }
    if after.tracking_id != before.tracking_id {
        return violation("tracking id changed");
    }
    if after.status != before.status && !before.status.can_transition_to(after.status) {
        return violation(&format!(
            "status {} -> {} is not an edge",
            before.status, after.status
        ));
    }
    for stage in [
        DispatchStage::Initial,
        DispatchStage::FollowUp,
        DispatchStage::Escalation,
    ] {
        if let Some(existing) = before.message_id(stage)
            && after.message_id(stage) != Some(existing)
        {
            return violation(&format!("{stage} message id rewritten"));
        }
    }
    if before.confirmation.as_ref().is_some_and(|token| token.used)
        && !after.confirmation.as_ref().is_some_and(|token| token.used)
    {
        return violation("used confirmation token reset");
    }
    if before.button_confirmed_at.is_some()
        && after.button_confirmed_at != before.button_confirmed_at
    {
        return violation("confirmation timestamp rewritten");
    }
    if before.status.is_terminal() && after.status != before.status {
        return violation("terminal status changed");
    }
    Ok(())
}

/// Status a request must leave through an operator reply, if any.
pub fn reply_target(intent: super::ReplyIntent) -> Option<RequestStatus> {
    match intent {
        super::ReplyIntent::Deleted => Some(RequestStatus::Resolved),
        super::ReplyIntent::Rejected => Some(RequestStatus::Closed),
        super::ReplyIntent::NeedInfo | super::ReplyIntent::Unknown => None,
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
