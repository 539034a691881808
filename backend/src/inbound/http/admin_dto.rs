//! Request and response bodies for the admin routes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::domain::{
    ConfirmationToken, DeletionRequest, InboundEmail, NewDeletionRequest, ReplyIntent,
    RequestStatus,
};

/// Body for `POST /admin/deletion-requests`.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeletionRequestBody {
    pub user_id: Uuid,
    pub broker_name: String,
    pub broker_url: String,
    pub operator_email: String,
    #[serde(default)]
    pub personal_data_categories: Vec<String>,
    /// Dispatch the initial email straight away.
    #[serde(default)]
    pub send_initial: bool,
}

impl CreateDeletionRequestBody {
    /// Split into the domain draft and the dispatch flag.
    pub fn into_parts(self) -> (NewDeletionRequest, bool) {
        let Self {
            user_id,
            broker_name,
            broker_url,
            operator_email,
            personal_data_categories,
            send_initial,
        } = self;
        (
            NewDeletionRequest {
                user_id,
                broker_name,
                broker_url,
                operator_email,
                personal_data_categories,
            },
            send_initial,
        )
    }
}

/// Confirmation link state as shown to admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationView {
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub used_from_ip: Option<String>,
}

impl From<&ConfirmationToken> for ConfirmationView {
    fn from(token: &ConfirmationToken) -> Self {
        Self {
            issued_at: token.issued_at,
            expires_at: token.expires_at,
            used: token.used,
            used_at: token.used_at,
            used_from_ip: token.used_from_ip.clone(),
        }
    }
}

/// Current state of one deletion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeletionRequestView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub broker_name: String,
    pub broker_url: String,
    pub operator_email: String,
    pub personal_data_categories: Vec<String>,
    pub status: RequestStatus,
    pub tracking_id: String,
    pub initial_message_id: Option<String>,
    pub follow_up_message_id: Option<String>,
    pub escalation_message_id: Option<String>,
    pub initial_sent_at: Option<DateTime<Utc>>,
    pub follow_up_sent_at: Option<DateTime<Utc>>,
    pub escalation_sent_at: Option<DateTime<Utc>>,
    pub button_confirmed_at: Option<DateTime<Utc>>,
    pub last_reply_at: Option<DateTime<Utc>>,
    pub confirmation: Option<ConfirmationView>,
    pub revision: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&DeletionRequest> for DeletionRequestView {
    fn from(request: &DeletionRequest) -> Self {
        Self {
            id: *request.id.as_uuid(),
            user_id: request.user_id,
            broker_name: request.broker_name.clone(),
            broker_url: request.broker_url.clone(),
            operator_email: request.operator_email.clone(),
            personal_data_categories: request.personal_data_categories.clone(),
            status: request.status,
            tracking_id: request.tracking_id.to_string(),
            initial_message_id: request.initial_message_id.clone(),
            follow_up_message_id: request.follow_up_message_id.clone(),
            escalation_message_id: request.escalation_message_id.clone(),
            initial_sent_at: request.initial_sent_at,
            follow_up_sent_at: request.follow_up_sent_at,
            escalation_sent_at: request.escalation_sent_at,
            button_confirmed_at: request.button_confirmed_at,
            last_reply_at: request.last_reply_at,
            confirmation: request.confirmation.as_ref().map(ConfirmationView::from),
            revision: request.revision,
            created_at: request.created_at,
            updated_at: request.updated_at,
        }
    }
}

/// Stored inbound email for triage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InboundEmailView {
    pub id: Uuid,
    pub operator_email: String,
    pub subject: String,
    pub raw_text: String,
    pub raw_html: String,
    /// Lower-cased header names.
    pub correlation_headers: BTreeMap<String, String>,
    pub parsed_status: ReplyIntent,
    pub rejection_reason: Option<String>,
    pub deletion_request_id: Option<Uuid>,
    pub received_at: DateTime<Utc>,
}

impl From<&InboundEmail> for InboundEmailView {
    fn from(email: &InboundEmail) -> Self {
        Self {
            id: *email.id.as_uuid(),
            operator_email: email.operator_email.clone(),
            subject: email.subject.clone(),
            raw_text: email.raw_text.clone(),
            raw_html: email.raw_html.clone(),
            correlation_headers: email
                .correlation_headers
                .iter()
                .map(|(name, value)| (name.to_owned(), value.to_owned()))
                .collect(),
            parsed_status: email.parsed_status,
            rejection_reason: email.rejection_reason.clone(),
            deletion_request_id: email.deletion_request_id.map(|id| *id.as_uuid()),
            received_at: email.received_at,
        }
    }
}

/// Query string for `GET /admin/audit`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
pub struct AuditListQuery {
    /// Only entries for this request.
    pub deletion_request_id: Option<String>,
    /// 1 to 200, default 50.
    pub limit: Option<usize>,
}

/// Query string for `GET /admin/inbound-emails`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct InboundListQuery {
    /// Only emails that matched no request.
    pub uncorrelated: Option<bool>,
    /// 1 to 200, default 50.
    pub limit: Option<usize>,
}
