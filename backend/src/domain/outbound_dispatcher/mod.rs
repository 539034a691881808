//! Outbound dispatcher: composes, delivers and records the initial,
//! follow-up and escalation emails.
//!
//! Each stage is sent at most once per request. A call first claims a
//! short-lived dispatch lease through the lifecycle primitive, so overlapping
//! callers (two scheduler runs, an admin retry) cannot both reach the
//! provider. Delivery retries happen here, with jittered exponential backoff
//! and a per-attempt timeout; the request is only stamped once the provider
//! accepted the message. A hard failure releases the lease and leaves the
//! request in its prior status for the next scheduler pass. When the
//! provider may have accepted the message anyway, the lease is kept until it
//! expires and the dispatch is audited as uncertain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use crate::domain::lifecycle::{Decision, RequestLifecycle};
use crate::domain::ports::{EmailTransport, EmailTransportError, OutboundEmail};
use crate::domain::token_codec::{IssuedToken, TokenCodec};
use crate::domain::{
    Actor, AuditAction, AuditLogEntry, ConfirmationToken, DeletionRequest, DeletionRequestId,
    DispatchLease, DispatchStage, Error, TokenPurpose,
};

mod compose;
mod runtime;

pub(crate) use compose::escape_html;
use compose::{Composition, compose, confirmation_url, stage_message_id};
pub use runtime::{DispatcherRuntime, RandomJitter, TokioSleeper};

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    pub from_address: String,
    /// Copied on escalation emails.
    pub regulator_address: String,
    /// Right-hand side of generated `Message-ID`s.
    pub message_id_domain: String,
    /// Base for confirmation links.
    pub public_base_url: Url,
    /// Validity of the confirmation link in each email.
    pub token_ttl: chrono::Duration,
    /// Bound on one provider call.
    pub send_timeout: Duration,
    /// Provider calls per dispatch, first call included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// After this long an unreleased lease is considered abandoned.
    pub lease_ttl: chrono::Duration,
}

impl DispatcherConfig {
    /// Configuration with default delivery and lease settings.
    pub fn new(public_base_url: Url) -> Self {
        Self {
            from_address: "privacy@erasure.invalid".to_owned(),
            regulator_address: "complaints@regulator.invalid".to_owned(),
            message_id_domain: "erasure.invalid".to_owned(),
            public_base_url,
            token_ttl: chrono::Duration::days(45),
            send_timeout: Duration::from_secs(20),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            lease_ttl: chrono::Duration::minutes(10),
        }
    }

    /// Longest a dispatch can spend delivering: every attempt timing out
    /// plus every backoff at its largest jittered value.
    pub fn retry_budget(&self) -> Duration {
        let max_attempts = self.max_attempts.max(1);
        let sends = self.send_timeout.saturating_mul(max_attempts);
        (1..max_attempts).fold(sends, |total, attempt| {
            let base = retry_base_delay(self, attempt);
            total
                .saturating_add(base)
                .saturating_add(base / 4)
                .saturating_add(Duration::from_millis(1))
        })
    }
}

/// Async sleeping abstraction for retries.
#[async_trait]
pub trait DispatchSleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Retry backoff jitter abstraction.
pub trait BackoffJitter: Send + Sync {
    /// Return a jittered delay from the exponential base delay.
    fn jittered_delay(&self, base: Duration, attempt: u32) -> Duration;
}

/// Result of a dispatch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// The stage's `Message-ID`.
    pub message_id: String,
    /// `false` when the stage had already been sent and nothing was delivered.
    pub sent: bool,
}

enum Claim {
    AlreadySent(String),
    Claimed(Box<DeletionRequest>),
}

struct Delivered {
    provider_message_id: String,
    attempts: u32,
}

struct DeliveryFailure {
    error: EmailTransportError,
    attempts: u32,
}

struct SentRecord<'a> {
    stage: DispatchStage,
    email: &'a OutboundEmail,
    message_id: &'a str,
    delivered: &'a Delivered,
    issued: &'a IssuedToken,
}

/// Domain service sending stage emails.
pub struct OutboundDispatcher {
    lifecycle: RequestLifecycle,
    transport: Arc<dyn EmailTransport>,
    codec: Arc<TokenCodec>,
    sleeper: Arc<dyn DispatchSleeper>,
    jitter: Arc<dyn BackoffJitter>,
    config: DispatcherConfig,
}

impl OutboundDispatcher {
    pub fn new(
        lifecycle: RequestLifecycle,
        transport: Arc<dyn EmailTransport>,
        codec: Arc<TokenCodec>,
        config: DispatcherConfig,
    ) -> Self {
        Self::with_runtime(
            lifecycle,
            transport,
            codec,
            DispatcherRuntime::default(),
            config,
        )
    }

    /// Build a dispatcher with injected sleep and jitter.
    pub fn with_runtime(
        lifecycle: RequestLifecycle,
        transport: Arc<dyn EmailTransport>,
        codec: Arc<TokenCodec>,
        runtime: DispatcherRuntime,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            lifecycle,
            transport,
            codec,
            sleeper: runtime.sleeper,
            jitter: runtime.jitter,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub async fn send_initial(&self, id: &DeletionRequestId, actor: Actor) -> Result<String, Error> {
        Ok(self.dispatch(id, DispatchStage::Initial, actor).await?.message_id)
    }

    pub async fn send_follow_up(
        &self,
        id: &DeletionRequestId,
        actor: Actor,
    ) -> Result<String, Error> {
        Ok(self.dispatch(id, DispatchStage::FollowUp, actor).await?.message_id)
    }

    pub async fn send_escalation(
        &self,
        id: &DeletionRequestId,
        actor: Actor,
    ) -> Result<String, Error> {
        Ok(self.dispatch(id, DispatchStage::Escalation, actor).await?.message_id)
    }

    /// Send `stage` for request `id` unless it was already sent.
    ///
    /// # Errors
    /// - `not_found` if the request does not exist.
    /// - `conflict` if the request is not in the stage's required status or
    ///   another dispatch of it holds a live lease.
    /// - `service_unavailable` if delivery failed after all retries.
    pub async fn dispatch(
        &self,
        id: &DeletionRequestId,
        stage: DispatchStage,
        actor: Actor,
    ) -> Result<DispatchOutcome, Error> {
        let lease_ttl = self.config.lease_ttl;
        let claim = self
            .lifecycle
            .apply(id, actor, |request, now| {
                if let Some(existing) = request.message_id(stage) {
                    return Ok(Decision::Skip(Claim::AlreadySent(existing.to_owned())));
                }
                let required = stage.required_status();
                if request.status != required {
                    return Err(Error::conflict(format!(
                        "cannot send {stage}: request is {}, expected {required}",
                        request.status
                    ))
                    .with_details(json!({ "status": request.status, "stage": stage })));
                }
                if request
                    .dispatch_lease
                    .is_some_and(|lease| lease.is_live(now, lease_ttl))
                {
                    return Err(Error::conflict(format!("{stage} dispatch already in progress")));
                }
                let mut next = request.clone();
                next.dispatch_lease = Some(DispatchLease {
                    stage,
                    claimed_at: now,
                });
                let snapshot = Box::new(next.clone());
                Ok(Decision::write(next, Vec::new(), Claim::Claimed(snapshot)))
            })
            .await?;

        let request = match claim {
            Claim::AlreadySent(message_id) => {
                info!(deletion_request_id = %id, %stage, "stage already sent, skipping");
                return Ok(DispatchOutcome {
                    message_id,
                    sent: false,
                });
            }
            Claim::Claimed(request) => request,
        };

        let message_id = stage_message_id(&request, stage, &self.config.message_id_domain);
        let issued = self
            .codec
            .issue(*id, TokenPurpose::ConfirmDeletion, self.config.token_ttl);
        let email = match confirmation_url(&self.config.public_base_url, &issued.token) {
            Ok(url) => compose(
                &self.config,
                &Composition {
                    request: &request,
                    stage,
                    message_id: &message_id,
                    confirm_url: &url,
                },
            ),
            Err(error) => {
                self.release(id, stage, actor, error.message(), 0).await;
                return Err(error);
            }
        };

        match self.deliver(&email).await {
            Ok(delivered) => {
                let sent = SentRecord {
                    stage,
                    email: &email,
                    message_id: &message_id,
                    delivered: &delivered,
                    issued: &issued,
                };
                if let Err(error) = self.record_sent(id, actor, &sent).await {
                    warn!(deletion_request_id = %id, %stage, %error, "delivered email not recorded");
                    self.hold_uncertain(id, stage, actor, &error.to_string(), delivered.attempts)
                        .await;
                    return Err(error);
                }
                info!(
                    deletion_request_id = %id,
                    %stage,
                    attempts = delivered.attempts,
                    "stage email delivered"
                );
                Ok(DispatchOutcome {
                    message_id,
                    sent: true,
                })
            }
            Err(failure) => {
                warn!(
                    deletion_request_id = %id,
                    %stage,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "stage email delivery failed"
                );
                let reason = failure.error.to_string();
                if matches!(failure.error, EmailTransportError::InvalidResponse { .. }) {
                    self.hold_uncertain(id, stage, actor, &reason, failure.attempts)
                        .await;
                } else {
                    self.release(id, stage, actor, &reason, failure.attempts).await;
                }
                Err(Error::service_unavailable(
                    "email delivery failed; the request will be retried",
                )
                .with_details(json!({ "stage": stage, "attempts": failure.attempts })))
            }
        }
    }

    async fn record_sent(
        &self,
        id: &DeletionRequestId,
        actor: Actor,
        sent: &SentRecord<'_>,
    ) -> Result<(), Error> {
        let SentRecord {
            stage,
            email,
            message_id,
            delivered,
            issued,
        } = *sent;
        let action = match stage {
            DispatchStage::Initial => AuditAction::InitialSent,
            DispatchStage::FollowUp => AuditAction::FollowUpSent,
            DispatchStage::Escalation => AuditAction::EscalationSent,
        };
        self.lifecycle
            .apply(id, actor, |request, now| {
                let mut next = request.clone();
                if next.record_dispatch(stage, message_id.to_owned(), now).is_err()
                    && !next.stamp_stage(stage, message_id.to_owned(), now)
                {
                    return Ok(Decision::Skip(()));
                }
                match next.confirmation.as_mut() {
                    Some(token) => token.reissue(issued.issued_at, issued.expires_at),
                    None => {
                        next.confirmation = Some(ConfirmationToken::issued(
                            *id,
                            TokenPurpose::ConfirmDeletion,
                            issued.issued_at,
                            issued.expires_at,
                        ));
                    }
                }
                let audit = vec![
                    AuditLogEntry::new(action, actor, now)
                        .for_request(*id)
                        .with_details(json!({
                            "messageId": message_id,
                            "providerMessageId": delivered.provider_message_id,
                            "attempts": delivered.attempts,
                            "to": email.to,
                            "cc": email.cc,
                            "status": next.status,
                        })),
                    AuditLogEntry::new(AuditAction::TokenIssued, actor, now)
                        .for_request(*id)
                        .with_details(json!({
                            "purpose": TokenPurpose::ConfirmDeletion,
                            "stage": stage,
                            "expiresAt": issued.expires_at,
                        })),
                ];
                Ok(Decision::write(next, audit, ()))
            })
            .await
            .map_err(Error::from)
    }

    /// Give up on a dispatch whose future was dropped mid-delivery.
    ///
    /// Clears the stage lease and audits `dispatch_failed` so the next pass
    /// can retry without waiting for the lease to expire.
    pub async fn abandon(&self, id: &DeletionRequestId, stage: DispatchStage, actor: Actor) {
        self.release(id, stage, actor, "dispatch abandoned before delivery finished", 0)
            .await;
    }

    /// Clear the lease and audit the failure. Errors are logged only: an
    /// unreleased lease expires on its own.
    async fn release(
        &self,
        id: &DeletionRequestId,
        stage: DispatchStage,
        actor: Actor,
        reason: &str,
        attempts: u32,
    ) {
        let result = self
            .lifecycle
            .apply(id, actor, |request, now| {
                let mut next = request.clone();
                next.release_lease(stage);
                let audit = AuditLogEntry::new(AuditAction::DispatchFailed, actor, now)
                    .for_request(*id)
                    .with_details(json!({
                        "stage": stage,
                        "attempts": attempts,
                        "error": reason,
                    }));
                Ok(Decision::write(next, vec![audit], ()))
            })
            .await;
        if let Err(error) = result {
            warn!(deletion_request_id = %id, %stage, %error, "failed to release dispatch lease");
        }
    }

    /// Keep the lease and audit a delivery that may have reached the
    /// provider, so no pass resends it before the lease expires.
    async fn hold_uncertain(
        &self,
        id: &DeletionRequestId,
        stage: DispatchStage,
        actor: Actor,
        reason: &str,
        attempts: u32,
    ) {
        let result = self
            .lifecycle
            .apply(id, actor, |request, now| {
                let lease_held = request
                    .dispatch_lease
                    .is_some_and(|lease| lease.stage == stage);
                let audit = AuditLogEntry::new(AuditAction::DispatchUncertain, actor, now)
                    .for_request(*id)
                    .with_details(json!({
                        "stage": stage,
                        "attempts": attempts,
                        "error": reason,
                        "leaseHeld": lease_held,
                    }));
                Ok(Decision::write(request.clone(), vec![audit], ()))
            })
            .await;
        if let Err(error) = result {
            warn!(deletion_request_id = %id, %stage, %error, "failed to audit uncertain dispatch");
        }
    }

    async fn deliver(&self, email: &OutboundEmail) -> Result<Delivered, DeliveryFailure> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(
                self.config.send_timeout,
                self.transport.send(email),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(EmailTransportError::timeout(format!(
                    "no answer within {:?}",
                    self.config.send_timeout
                ))),
            };
            match result {
                Ok(provider_message_id) => {
                    return Ok(Delivered {
                        provider_message_id,
                        attempts: attempt,
                    });
                }
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self
                        .jitter
                        .jittered_delay(retry_base_delay(&self.config, attempt), attempt);
                    warn!(attempt, ?delay, %error, "email send failed, backing off");
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    return Err(DeliveryFailure {
                        error,
                        attempts: attempt,
                    });
                }
            }
        }
    }
}

fn retry_base_delay(config: &DispatcherConfig, attempt: u32) -> Duration {
    let exponent = 2_u32.saturating_pow(attempt.saturating_sub(1));
    let base_ms = u64::try_from(config.initial_backoff.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(config.max_backoff.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(u64::from(exponent)).min(max_ms))
}
