//! Time-driven follow-ups and escalations.
//!
//! [`AutomationScheduler::run_once`] is one explicit pass over the requests
//! that still await automation; it reads time only from the injected clock,
//! so tests advance a virtual clock instead of sleeping. [`run_periodic`]
//! is the single production driver.
//!
//! A pass is idempotent: every send goes through the dispatcher, which skips
//! stages that were already sent and refuses stages another caller is
//! sending. Passes within one process are additionally serialised.
//!
//! [`run_periodic`]: AutomationScheduler::run_periodic

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::lifecycle::{RequestLifecycle, map_repository_error};
use super::ports::DeletionRequestRepository;
use super::{
    Actor, DeletionRequest, DispatchStage, Error, ErrorCode, OutboundDispatcher, RequestStatus,
};

/// Scheduler thresholds and bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Age since the initial email after which a follow-up is sent.
    pub follow_up_after: chrono::Duration,
    /// Age since the initial email after which a followed-up request escalates.
    pub escalate_after: chrono::Duration,
    /// Requests examined per pass.
    pub batch_limit: usize,
    /// Bound on one dispatch, retries included. `None` derives it from the
    /// dispatcher's retry budget.
    pub dispatch_timeout: Option<Duration>,
}

/// Headroom over the dispatcher's retry budget for the store writes around
/// delivery.
pub const DISPATCH_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            follow_up_after: chrono::Duration::days(30),
            escalate_after: chrono::Duration::days(60),
            batch_limit: 500,
            dispatch_timeout: None,
        }
    }
}

/// Counts from one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerReport {
    pub scanned: usize,
    pub initials_sent: usize,
    pub follow_ups_sent: usize,
    pub escalations_sent: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Whether the pass stopped early on shutdown.
    pub interrupted: bool,
}

impl SchedulerReport {
    fn record_sent(&mut self, stage: DispatchStage) {
        match stage {
            DispatchStage::Initial => self.initials_sent += 1,
            DispatchStage::FollowUp => self.follow_ups_sent += 1,
            DispatchStage::Escalation => self.escalations_sent += 1,
        }
    }
}

/// Stage due for `request` at `now`, if any.
///
/// Both thresholds are measured from the initial send. Any reply holds back
/// the follow-up; it does not hold back escalation of a followed-up request.
pub fn due_stage(
    request: &DeletionRequest,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> Option<DispatchStage> {
    match request.status {
        RequestStatus::Pending => Some(DispatchStage::Initial),
        RequestStatus::SentInitial => {
            let sent = request.initial_sent_at?;
            (request.last_reply_at.is_none() && now - sent >= config.follow_up_after)
                .then_some(DispatchStage::FollowUp)
        }
        RequestStatus::FollowedUp => {
            let sent = request.initial_sent_at?;
            (now - sent >= config.escalate_after).then_some(DispatchStage::Escalation)
        }
        RequestStatus::Escalated
        | RequestStatus::OperatorConfirmed
        | RequestStatus::Resolved
        | RequestStatus::Closed => None,
    }
}

/// Periodic scan-and-dispatch job.
pub struct AutomationScheduler {
    lifecycle: RequestLifecycle,
    dispatcher: Arc<OutboundDispatcher>,
    config: SchedulerConfig,
    run_lock: Mutex<()>,
}

impl AutomationScheduler {
    pub fn new(
        lifecycle: RequestLifecycle,
        dispatcher: Arc<OutboundDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            lifecycle,
            dispatcher,
            config,
            run_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Bound applied to each dispatch of a pass.
    pub fn dispatch_timeout(&self) -> Duration {
        self.config.dispatch_timeout.unwrap_or_else(|| {
            self.dispatcher
                .config()
                .retry_budget()
                .saturating_add(DISPATCH_TIMEOUT_SLACK)
        })
    }

    /// Run one full pass.
    ///
    /// # Errors
    /// Only when the request store cannot be listed; per-request failures are
    /// counted in the report.
    pub async fn run_once(&self) -> Result<SchedulerReport, Error> {
        self.run_pass(None).await
    }

    /// Run one pass, stopping between requests once `shutdown` reads `true`.
    pub async fn run_pass(
        &self,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<SchedulerReport, Error> {
        let _guard = self.run_lock.lock().await;
        let candidates = self
            .lifecycle
            .repository()
            .list_active(self.config.batch_limit)
            .await
            .map_err(|err| {
                warn!(error = %err, "scheduler could not list requests");
                map_repository_error(&err)
            })?;

        let mut report = SchedulerReport::default();
        for request in candidates {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                report.interrupted = true;
                break;
            }
            report.scanned += 1;
            let Some(stage) = due_stage(&request, self.lifecycle.now(), &self.config) else {
                report.skipped += 1;
                continue;
            };
            self.dispatch(&request, stage, &mut report).await;
        }

        info!(
            scanned = report.scanned,
            initials_sent = report.initials_sent,
            follow_ups_sent = report.follow_ups_sent,
            escalations_sent = report.escalations_sent,
            skipped = report.skipped,
            failed = report.failed,
            interrupted = report.interrupted,
            "scheduler pass finished"
        );
        Ok(report)
    }

    async fn dispatch(
        &self,
        request: &DeletionRequest,
        stage: DispatchStage,
        report: &mut SchedulerReport,
    ) {
        let timeout = self.dispatch_timeout();
        let outcome = tokio::time::timeout(
            timeout,
            self.dispatcher.dispatch(&request.id, stage, Actor::Scheduler),
        )
        .await;
        match outcome {
            Ok(Ok(outcome)) if outcome.sent => report.record_sent(stage),
            Ok(Ok(_)) => report.skipped += 1,
            Ok(Err(error)) if error.code() == ErrorCode::Conflict => {
                debug!(deletion_request_id = %request.id, %stage, %error, "dispatch skipped");
                report.skipped += 1;
            }
            Ok(Err(error)) => {
                warn!(deletion_request_id = %request.id, %stage, %error, "scheduled dispatch failed");
                report.failed += 1;
            }
            Err(_) => {
                warn!(
                    deletion_request_id = %request.id,
                    %stage,
                    ?timeout,
                    "scheduled dispatch timed out"
                );
                self.dispatcher
                    .abandon(&request.id, stage, Actor::Scheduler)
                    .await;
                report.failed += 1;
            }
        }
    }

    /// Tick every `interval` until `shutdown` becomes `true`.
    ///
    /// Missed ticks are skipped rather than bunched.
    pub async fn run_periodic(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "automation scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.run_pass(Some(&shutdown)).await {
                        warn!(%error, "scheduler pass aborted");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("automation scheduler stopped");
    }
}

#[cfg(test)]
#[path = "automation_scheduler_tests.rs"]
mod tests;
