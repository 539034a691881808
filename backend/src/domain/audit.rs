//! Append-only audit trail entries.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use super::deletion_request::DeletionRequestId;

/// State-changing action recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    RequestCreated,
    TokenIssued,
    InitialSent,
    FollowUpSent,
    EscalationSent,
    DispatchFailed,
    /// Delivery may have happened but could not be confirmed.
    DispatchUncertain,
    OperatorConfirmed,
    InboundReceived,
    ReplyResolved,
    ReplyClosed,
}

impl AuditAction {
    const ALL: [Self; 11] = [
        Self::RequestCreated,
        Self::TokenIssued,
        Self::InitialSent,
        Self::FollowUpSent,
        Self::EscalationSent,
        Self::DispatchFailed,
        Self::DispatchUncertain,
        Self::OperatorConfirmed,
        Self::InboundReceived,
        Self::ReplyResolved,
        Self::ReplyClosed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestCreated => "request_created",
            Self::TokenIssued => "token_issued",
            Self::InitialSent => "initial_sent",
            Self::FollowUpSent => "follow_up_sent",
            Self::EscalationSent => "escalation_sent",
            Self::DispatchFailed => "dispatch_failed",
            Self::DispatchUncertain => "dispatch_uncertain",
            Self::OperatorConfirmed => "operator_confirmed",
            Self::InboundReceived => "inbound_received",
            Self::ReplyResolved => "reply_resolved",
            Self::ReplyClosed => "reply_closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == value)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who caused an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// The data controller, through the confirmation link.
    Operator,
    Scheduler,
    Webhook,
    Admin,
    System,
}

impl Actor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::Scheduler => "scheduler",
            Self::Webhook => "webhook",
            Self::Admin => "admin",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            Self::Operator,
            Self::Scheduler,
            Self::Webhook,
            Self::Admin,
            Self::System,
        ]
        .into_iter()
        .find(|actor| actor.as_str() == value)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one state-changing action.
///
/// # Examples
/// ```
/// use chrono::Utc;
/// use erasure_engine::domain::{Actor, AuditAction, AuditLogEntry, DeletionRequestId};
/// use serde_json::json;
///
/// let entry = AuditLogEntry::new(AuditAction::OperatorConfirmed, Actor::Operator, Utc::now())
///     .for_request(DeletionRequestId::random())
///     .with_source(Some("203.0.113.9".into()), None)
///     .with_details(json!({ "status": "operator_confirmed" }));
/// assert_eq!(entry.source_ip.as_deref(), Some("203.0.113.9"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    #[schema(value_type = Option<String>, format = Uuid)]
    pub deletion_request_id: Option<DeletionRequestId>,
    pub action: AuditAction,
    pub actor: Actor,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(action: AuditAction, actor: Actor, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            deletion_request_id: None,
            action,
            actor,
            source_ip: None,
            user_agent: None,
            details: Value::Object(serde_json::Map::new()),
            created_at,
        }
    }

    pub fn for_request(mut self, id: DeletionRequestId) -> Self {
        self.deletion_request_id = Some(id);
        self
    }

    pub fn with_source(mut self, source_ip: Option<String>, user_agent: Option<String>) -> Self {
        self.source_ip = source_ip;
        self.user_agent = user_agent;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}
