//! Operator confirmation through the emailed link.
//!
//! `preview` backs `GET` and never changes state, so link scanners in mail
//! gateways cannot burn a token. `confirm` backs `POST`: it consumes the token
//! record and moves the request to `operator_confirmed` in the same
//! revision-checked write, so of any number of concurrent confirmations
//! exactly one succeeds.
//!
//! Both are rate limited per client before the token is looked at, and both
//! collapse token failures into two external answers: `invalid_request` for
//! anything unusable and `conflict` for a link that was already used. The
//! precise kind is only logged.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::lifecycle::{Decision, LifecycleError, RequestLifecycle};
use super::ports::DeletionRequestRepository;
use super::token_codec::{TokenCodec, TokenError, VerifiedToken};
use super::{
    Actor, AuditAction, AuditLogEntry, DeletionRequest, DeletionRequestId, Error, RateDecision,
    RateLimiter, RequestStatus,
};

const INVALID_LINK: &str = "this confirmation link is invalid or has expired";
const USED_LINK: &str = "this confirmation link has already been used";

/// Where a confirmation attempt came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientContext {
    fn rate_key(&self) -> &str {
        self.ip.as_deref().unwrap_or("unknown")
    }
}

/// What the confirmation page shows before the operator submits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationPreview {
    #[schema(value_type = String, format = Uuid)]
    pub deletion_request_id: DeletionRequestId,
    pub broker_name: String,
    pub personal_data_categories: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a successful confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationReceipt {
    #[schema(value_type = String, format = Uuid)]
    pub deletion_request_id: DeletionRequestId,
    pub status: RequestStatus,
    pub confirmed_at: DateTime<Utc>,
}

/// Domain service behind `/operator/confirm`.
pub struct ConfirmationService {
    lifecycle: RequestLifecycle,
    codec: Arc<TokenCodec>,
    limiter: Arc<RateLimiter>,
}

impl ConfirmationService {
    pub fn new(
        lifecycle: RequestLifecycle,
        codec: Arc<TokenCodec>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            lifecycle,
            codec,
            limiter,
        }
    }

    /// Validate `token` without consuming it.
    ///
    /// # Errors
    /// `too_many_requests`, `invalid_request` or `conflict` (already used).
    pub async fn preview(
        &self,
        token: &str,
        client: &ClientContext,
    ) -> Result<ConfirmationPreview, Error> {
        self.admit(client)?;
        let claims = self.verify(token, client)?;
        let request = self
            .lifecycle
            .repository()
            .find_by_id(&claims.deletion_request_id)
            .await
            .map_err(|err| super::lifecycle::map_repository_error(&err))?
            .ok_or_else(|| {
                log_refusal(TokenError::Malformed, client, Some(&claims));
                Error::invalid_request(INVALID_LINK)
            })?;
        check_record(&request, self.lifecycle.now(), client, &claims)?;
        Ok(ConfirmationPreview {
            deletion_request_id: request.id,
            broker_name: request.broker_name,
            personal_data_categories: request.personal_data_categories,
            expires_at: claims.expires_at,
        })
    }

    /// Consume `token` and confirm the deletion.
    ///
    /// # Errors
    /// `too_many_requests`, `invalid_request`, `conflict` (already used or
    /// request not yet sent), or `internal_error` when contention persists.
    pub async fn confirm(
        &self,
        token: &str,
        client: &ClientContext,
    ) -> Result<ConfirmationReceipt, Error> {
        self.admit(client)?;
        let claims = self.verify(token, client)?;
        let id = claims.deletion_request_id;

        let result = self
            .lifecycle
            .apply(&id, Actor::Operator, |request, now| {
                check_record(request, now, client, &claims)?;
                if request.status == RequestStatus::Pending {
                    return Err(Error::conflict("the erasure request has not been sent yet"));
                }
                let mut next = request.clone();
                if let Some(record) = next.confirmation.as_mut() {
                    record.consume(now, client.ip.clone());
                }
                if next.button_confirmed_at.is_none() {
                    next.button_confirmed_at = Some(now);
                }
                let previous = request.status;
                if previous.accepts_confirmation() {
                    next.transition_to(RequestStatus::OperatorConfirmed)
                        .map_err(|err| Error::conflict(err.to_string()))?;
                }
                let audit = AuditLogEntry::new(AuditAction::OperatorConfirmed, Actor::Operator, now)
                    .for_request(id)
                    .with_source(client.ip.clone(), client.user_agent.clone())
                    .with_details(json!({
                        "from": previous,
                        "to": next.status,
                        "tokenExpiresAt": claims.expires_at,
                    }));
                let receipt = ConfirmationReceipt {
                    deletion_request_id: id,
                    status: next.status,
                    confirmed_at: now,
                };
                Ok(Decision::write(next, vec![audit], receipt))
            })
            .await;

        match result {
            Ok(receipt) => {
                info!(
                    deletion_request_id = %id,
                    status = %receipt.status,
                    client_ip = client.ip.as_deref().unwrap_or("unknown"),
                    "operator confirmed deletion"
                );
                Ok(receipt)
            }
            Err(LifecycleError::NotFound(_)) => {
                log_refusal(TokenError::Malformed, client, Some(&claims));
                Err(Error::invalid_request(INVALID_LINK))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn admit(&self, client: &ClientContext) -> Result<(), Error> {
        match self.limiter.check(client.rate_key()) {
            RateDecision::Allowed { .. } => Ok(()),
            RateDecision::Limited { retry_after_secs } => {
                warn!(
                    client_ip = client.rate_key(),
                    retry_after_secs, "confirmation rate limit exceeded"
                );
                Err(Error::too_many_requests("too many confirmation attempts")
                    .with_details(json!({ "retryAfterSecs": retry_after_secs })))
            }
        }
    }

    fn verify(&self, token: &str, client: &ClientContext) -> Result<VerifiedToken, Error> {
        self.codec.verify(token).map_err(|kind| {
            log_refusal(kind, client, None);
            Error::invalid_request(INVALID_LINK)
        })
    }
}

/// The stored token record must exist, be unused and still be valid.
fn check_record(
    request: &DeletionRequest,
    now: DateTime<Utc>,
    client: &ClientContext,
    claims: &VerifiedToken,
) -> Result<(), Error> {
    let Some(record) = request.confirmation.as_ref() else {
        log_refusal(TokenError::Malformed, client, Some(claims));
        return Err(Error::invalid_request(INVALID_LINK));
    };
    if record.used {
        log_refusal(TokenError::AlreadyUsed, client, Some(claims));
        return Err(Error::conflict(USED_LINK));
    }
    if !record.is_consumable(now) {
        log_refusal(TokenError::Expired, client, Some(claims));
        return Err(Error::invalid_request(INVALID_LINK));
    }
    Ok(())
}

fn log_refusal(kind: TokenError, client: &ClientContext, claims: Option<&VerifiedToken>) {
    warn!(
        kind = kind.kind(),
        client_ip = client.ip.as_deref().unwrap_or("unknown"),
        deletion_request_id = claims.map(|c| c.deletion_request_id.to_string()),
        "confirmation token refused"
    );
}

#[cfg(test)]
#[path = "confirmation_service_tests.rs"]
mod tests;
