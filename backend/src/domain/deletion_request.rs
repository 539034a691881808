//! Deletion request aggregate and its status graph.
//!
//! A [`DeletionRequest`] is one removal demand sent by a user to one data
//! controller ("operator"). Its [`RequestStatus`] only ever moves forward:
//! every status carries a rank and every allowed edge strictly increases it,
//! so no sequence of transitions can regress a request.
//!
//! ```text
//! pending -> sent_initial -> followed_up -> escalated
//!                 |               |             |
//!                 +---------------+-------------+--> operator_confirmed
//! any non-terminal --(deleted reply)--> resolved
//! any non-terminal --(rejected reply)-> closed
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::confirmation_token::ConfirmationToken;

/// Opaque identifier of a deletion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeletionRequestId(Uuid);

impl DeletionRequestId {
    /// Generate a new random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID (e.g. loaded from storage).
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DeletionRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeletionRequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

const TRACKING_PREFIX: &str = "trk_";
const TRACKING_HEX_LEN: usize = 32;

/// Validation errors for [`TrackingId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackingIdValidationError {
    /// The value does not start with `trk_` followed by 32 lowercase hex digits.
    #[error("tracking id must be `trk_` followed by 32 lowercase hex characters")]
    Malformed,
}

/// Correlation key embedded in outbound `X-Track-ID` headers.
///
/// Assigned once at creation and never changed afterwards.
///
/// # Examples
/// ```
/// use erasure_engine::domain::TrackingId;
///
/// let id = TrackingId::generate();
/// assert!(id.as_ref().starts_with("trk_"));
/// assert_eq!(TrackingId::parse(id.as_ref()), Ok(id));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackingId(String);

impl TrackingId {
    /// Generate a fresh random tracking id.
    pub fn generate() -> Self {
        Self(format!("{TRACKING_PREFIX}{}", Uuid::new_v4().simple()))
    }

    /// Validate an externally supplied tracking id.
    pub fn parse(value: &str) -> Result<Self, TrackingIdValidationError> {
        let trimmed = value.trim();
        let Some(hex_part) = trimmed.strip_prefix(TRACKING_PREFIX) else {
            return Err(TrackingIdValidationError::Malformed);
        };
        let well_formed = hex_part.len() == TRACKING_HEX_LEN
            && hex_part
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !well_formed {
            return Err(TrackingIdValidationError::Malformed);
        }
        Ok(Self(trimmed.to_owned()))
    }
}

impl AsRef<str> for TrackingId {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<TrackingId> for String {
    fn from(value: TrackingId) -> Self {
        value.0
    }
}

impl TryFrom<String> for TrackingId {
    type Error = TrackingIdValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

/// Lifecycle status of a deletion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Created, nothing sent yet.
    Pending,
    /// Initial demand delivered to the operator.
    SentInitial,
    /// Automatic follow-up delivered.
    FollowedUp,
    /// Regulator escalation delivered.
    Escalated,
    /// Operator confirmed deletion through the signed link.
    OperatorConfirmed,
    /// Operator replied that the data was deleted. Terminal.
    Resolved,
    /// Operator rejected the demand. Terminal.
    Closed,
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown request status: {0}")]
pub struct ParseRequestStatusError(String);

impl RequestStatus {
    /// Every status, in rank order.
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::SentInitial,
        Self::FollowedUp,
        Self::Escalated,
        Self::OperatorConfirmed,
        Self::Resolved,
        Self::Closed,
    ];

    /// Stable storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::SentInitial => "sent_initial",
            Self::FollowedUp => "followed_up",
            Self::Escalated => "escalated",
            Self::OperatorConfirmed => "operator_confirmed",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    /// Position along the lifecycle; transitions strictly increase it.
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::SentInitial => 1,
            Self::FollowedUp => 2,
            Self::Escalated => 3,
            Self::OperatorConfirmed => 4,
            Self::Resolved | Self::Closed => 5,
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }

    /// Whether the automation scheduler may still send something: the
    /// initial email (after a failed attempt), a follow-up or an escalation.
    pub fn awaits_automation(self) -> bool {
        matches!(self, Self::Pending | Self::SentInitial | Self::FollowedUp)
    }

    /// Whether the confirmation link may move the request to
    /// [`RequestStatus::OperatorConfirmed`].
    pub fn accepts_confirmation(self) -> bool {
        matches!(self, Self::SentInitial | Self::FollowedUp | Self::Escalated)
    }

    /// Whether `next` is an allowed edge from `self`.
    ///
    /// # Examples
    /// ```
    /// use erasure_engine::domain::RequestStatus;
    ///
    /// assert!(RequestStatus::SentInitial.can_transition_to(RequestStatus::FollowedUp));
    /// assert!(!RequestStatus::Resolved.can_transition_to(RequestStatus::Closed));
    /// ```
    pub fn can_transition_to(self, next: Self) -> bool {
        use RequestStatus::{
            Closed, Escalated, FollowedUp, OperatorConfirmed, Pending, Resolved, SentInitial,
        };

        match (self, next) {
            (Pending, SentInitial)
            | (SentInitial, FollowedUp)
            | (FollowedUp, Escalated)
            | (SentInitial | FollowedUp | Escalated, OperatorConfirmed) => true,
            (from, Resolved | Closed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = ParseRequestStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseRequestStatusError(s.to_owned()))
    }
}

/// Outbound email stage; each stage is sent at most once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStage {
    /// First demand to the operator.
    Initial,
    /// Reminder after the follow-up threshold.
    FollowUp,
    /// Notice copied to the regulator after the escalation threshold.
    Escalation,
}

/// Error returned when parsing an unknown stage string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown dispatch stage: {0}")]
pub struct ParseDispatchStageError(String);

impl DispatchStage {
    /// Stable storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::FollowUp => "follow_up",
            Self::Escalation => "escalation",
        }
    }

    /// Status a request must be in before this stage can be sent.
    pub fn required_status(self) -> RequestStatus {
        match self {
            Self::Initial => RequestStatus::Pending,
            Self::FollowUp => RequestStatus::SentInitial,
            Self::Escalation => RequestStatus::FollowedUp,
        }
    }

    /// Status a request moves to once this stage is recorded.
    pub fn target_status(self) -> RequestStatus {
        match self {
            Self::Initial => RequestStatus::SentInitial,
            Self::FollowUp => RequestStatus::FollowedUp,
            Self::Escalation => RequestStatus::Escalated,
        }
    }
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchStage {
    type Err = ParseDispatchStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(Self::Initial),
            "follow_up" => Ok(Self::FollowUp),
            "escalation" => Ok(Self::Escalation),
            other => Err(ParseDispatchStageError(other.to_owned())),
        }
    }
}

/// Claim on a stage held while its email is being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLease {
    /// Stage being delivered.
    pub stage: DispatchStage,
    /// When the claim was taken.
    pub claimed_at: DateTime<Utc>,
}

impl DispatchLease {
    /// Whether the lease is still held at `now` given its time-to-live.
    pub fn is_live(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now < self.claimed_at + ttl
    }
}

/// Attempted status change that is not an edge of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("transition {from} -> {to} is not allowed")]
pub struct TransitionError {
    /// Current status.
    pub from: RequestStatus,
    /// Rejected target status.
    pub to: RequestStatus,
}

/// Input for creating a new deletion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeletionRequest {
    /// Requesting user.
    pub user_id: Uuid,
    /// Display name of the data controller.
    pub broker_name: String,
    /// Website of the data controller.
    pub broker_url: String,
    /// Address demands are sent to.
    pub operator_email: String,
    /// Categories of personal data to erase, in display order.
    pub personal_data_categories: Vec<String>,
}

/// Validation failures for [`NewDeletionRequest`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NewDeletionRequestError {
    /// Broker name was blank.
    #[error("broker name must not be empty")]
    EmptyBrokerName,
    /// Operator email was not a plausible address.
    #[error("operator email must be a valid address")]
    InvalidOperatorEmail,
    /// Broker URL was not an absolute http(s) URL.
    #[error("broker url must be an absolute http or https URL")]
    InvalidBrokerUrl,
    /// No data category was given.
    #[error("at least one personal data category is required")]
    NoCategories,
}

impl NewDeletionRequest {
    /// Check the draft before it becomes an aggregate.
    pub fn validate(&self) -> Result<(), NewDeletionRequestError> {
        if self.broker_name.trim().is_empty() {
            return Err(NewDeletionRequestError::EmptyBrokerName);
        }
        if !is_plausible_email(&self.operator_email) {
            return Err(NewDeletionRequestError::InvalidOperatorEmail);
        }
        match url::Url::parse(self.broker_url.trim()) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => return Err(NewDeletionRequestError::InvalidBrokerUrl),
        }
        if self
            .personal_data_categories
            .iter()
            .all(|category| category.trim().is_empty())
        {
            return Err(NewDeletionRequestError::NoCategories);
        }
        Ok(())
    }
}

pub(crate) fn is_plausible_email(value: &str) -> bool {
    let value = value.trim();
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.chars().any(char::is_whitespace)
                && !domain.contains('@')
        }
        None => false,
    }
}

/// Persisted state machine instance for one removal demand.
///
/// Fields are public so adapters can rehydrate rows; every committed change
/// goes through the lifecycle primitive, which refuses writes whose status
/// change is not an edge of the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletionRequest {
    pub id: DeletionRequestId,
    pub user_id: Uuid,
    pub broker_name: String,
    pub broker_url: String,
    pub operator_email: String,
    pub personal_data_categories: Vec<String>,
    pub status: RequestStatus,
    pub tracking_id: TrackingId,
    pub initial_message_id: Option<String>,
    pub follow_up_message_id: Option<String>,
    pub escalation_message_id: Option<String>,
    pub initial_sent_at: Option<DateTime<Utc>>,
    pub follow_up_sent_at: Option<DateTime<Utc>>,
    pub escalation_sent_at: Option<DateTime<Utc>>,
    pub button_confirmed_at: Option<DateTime<Utc>>,
    pub last_reply_at: Option<DateTime<Utc>>,
    pub dispatch_lease: Option<DispatchLease>,
    pub confirmation: Option<ConfirmationToken>,
    pub revision: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeletionRequest {
    /// Build a fresh `pending` request from a validated draft.
    pub fn create(draft: NewDeletionRequest, now: DateTime<Utc>) -> Self {
        let NewDeletionRequest {
            user_id,
            broker_name,
            broker_url,
            operator_email,
            personal_data_categories,
        } = draft;
        Self {
            id: DeletionRequestId::random(),
            user_id,
            broker_name: broker_name.trim().to_owned(),
            broker_url: broker_url.trim().to_owned(),
            operator_email: operator_email.trim().to_owned(),
            personal_data_categories: personal_data_categories
                .into_iter()
                .map(|category| category.trim().to_owned())
                .filter(|category| !category.is_empty())
                .collect(),
            status: RequestStatus::Pending,
            tracking_id: TrackingId::generate(),
            initial_message_id: None,
            follow_up_message_id: None,
            escalation_message_id: None,
            initial_sent_at: None,
            follow_up_sent_at: None,
            escalation_sent_at: None,
            button_confirmed_at: None,
            last_reply_at: None,
            dispatch_lease: None,
            confirmation: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move along one edge of the graph.
    pub fn transition_to(&mut self, next: RequestStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Message id recorded for a stage, if that stage was sent.
    pub fn message_id(&self, stage: DispatchStage) -> Option<&str> {
        match stage {
            DispatchStage::Initial => self.initial_message_id.as_deref(),
            DispatchStage::FollowUp => self.follow_up_message_id.as_deref(),
            DispatchStage::Escalation => self.escalation_message_id.as_deref(),
        }
    }

    /// Record a delivered stage: message id, timestamp and status.
    ///
    /// Fails without modifying anything when the stage was already recorded
    /// or the status edge is not allowed.
    pub fn record_dispatch(
        &mut self,
        stage: DispatchStage,
        message_id: String,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let target = stage.target_status();
        if self.message_id(stage).is_some() || !self.status.can_transition_to(target) {
            return Err(TransitionError {
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        self.stamp_stage(stage, message_id, now);
        Ok(())
    }

    /// Record a delivered stage without touching the status.
    ///
    /// Used when the request moved on (e.g. resolved by a reply) while the
    /// email was in flight. Returns `false` if the stage was already stamped.
    pub fn stamp_stage(&mut self, stage: DispatchStage, message_id: String, now: DateTime<Utc>) -> bool {
        if self.message_id(stage).is_some() {
            return false;
        }
        match stage {
            DispatchStage::Initial => {
                self.initial_message_id = Some(message_id);
                self.initial_sent_at = Some(now);
            }
            DispatchStage::FollowUp => {
                self.follow_up_message_id = Some(message_id);
                self.follow_up_sent_at = Some(now);
            }
            DispatchStage::Escalation => {
                self.escalation_message_id = Some(message_id);
                self.escalation_sent_at = Some(now);
            }
        }
        self.release_lease(stage);
        true
    }

    /// Drop the dispatch lease if it is held for `stage`.
    pub fn release_lease(&mut self, stage: DispatchStage) {
        if self
            .dispatch_lease
            .is_some_and(|lease| lease.stage == stage)
        {
            self.dispatch_lease = None;
        }
    }

    /// Every outbound message id issued for this request.
    pub fn issued_message_ids(&self) -> impl Iterator<Item = &str> {
        [
            self.initial_message_id.as_deref(),
            self.follow_up_message_id.as_deref(),
            self.escalation_message_id.as_deref(),
        ]
        .into_iter()
        .flatten()
    }
}

#[cfg(test)]
#[path = "deletion_request_tests.rs"]
mod tests;
