//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and never
//! leave it. Status, stage, intent, action and actor columns hold the domain
//! enums' storage strings.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use super::schema::{audit_log, confirmation_tokens, deletion_requests, inbound_emails};

// ---------------------------------------------------------------------------
// Deletion requests
// ---------------------------------------------------------------------------

/// Row struct for reading from the deletion_requests table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = deletion_requests)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct DeletionRequestRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub broker_name: String,
    pub broker_url: String,
    pub operator_email: String,
    pub personal_data_categories: Vec<String>,
    pub status: String,
    pub tracking_id: String,
    pub initial_message_id: Option<String>,
    pub follow_up_message_id: Option<String>,
    pub escalation_message_id: Option<String>,
    pub initial_sent_at: Option<DateTime<Utc>>,
    pub follow_up_sent_at: Option<DateTime<Utc>>,
    pub escalation_sent_at: Option<DateTime<Utc>>,
    pub button_confirmed_at: Option<DateTime<Utc>>,
    pub last_reply_at: Option<DateTime<Utc>>,
    pub lease_stage: Option<String>,
    pub lease_claimed_at: Option<DateTime<Utc>>,
    pub revision: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insertable struct for new requests.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = deletion_requests)]
pub(crate) struct NewDeletionRequestRow<'a> {
    pub id: Uuid,
    pub user_id: Uuid,
    pub broker_name: &'a str,
    pub broker_url: &'a str,
    pub operator_email: &'a str,
    pub personal_data_categories: &'a [String],
    pub status: &'a str,
    pub tracking_id: &'a str,
    pub revision: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Changeset for a revision-checked commit.
///
/// Identity and draft fields never change after creation and are omitted.
/// `None` clears a column, so a released lease is written as `NULL`.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = deletion_requests)]
#[diesel(treat_none_as_null = true)]
pub(crate) struct DeletionRequestUpdate<'a> {
    pub status: &'a str,
    pub initial_message_id: Option<&'a str>,
    pub follow_up_message_id: Option<&'a str>,
    pub escalation_message_id: Option<&'a str>,
    pub initial_sent_at: Option<DateTime<Utc>>,
    pub follow_up_sent_at: Option<DateTime<Utc>>,
    pub escalation_sent_at: Option<DateTime<Utc>>,
    pub button_confirmed_at: Option<DateTime<Utc>>,
    pub last_reply_at: Option<DateTime<Utc>>,
    pub lease_stage: Option<&'a str>,
    pub lease_claimed_at: Option<DateTime<Utc>>,
    pub revision: i32,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Confirmation tokens
// ---------------------------------------------------------------------------

/// Row struct for the confirmation_tokens table, used for reads and upserts.
#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = confirmation_tokens)]
#[diesel(primary_key(deletion_request_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub(crate) struct ConfirmationTokenRow {
    pub deletion_request_id: Uuid,
    pub purpose: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub used_from_ip: Option<String>,
}

// ---------------------------------------------------------------------------
// Inbound emails
// ---------------------------------------------------------------------------

/// Row struct for reading from the inbound_emails table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = inbound_emails)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct InboundEmailRow {
    pub id: Uuid,
    pub operator_email: String,
    pub subject: String,
    pub raw_text: String,
    pub raw_html: String,
    pub correlation_headers: serde_json::Value,
    pub parsed_status: String,
    pub rejection_reason: Option<String>,
    pub deletion_request_id: Option<Uuid>,
    pub received_at: DateTime<Utc>,
}

/// Insertable struct for raw inbound emails.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = inbound_emails)]
pub(crate) struct NewInboundEmailRow<'a> {
    pub id: Uuid,
    pub operator_email: &'a str,
    pub subject: &'a str,
    pub raw_text: &'a str,
    pub raw_html: &'a str,
    pub correlation_headers: &'a serde_json::Value,
    pub parsed_status: &'a str,
    pub rejection_reason: Option<&'a str>,
    pub deletion_request_id: Option<Uuid>,
    pub received_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

/// Row struct for reading from the audit_log table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = audit_log)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct AuditLogRow {
    pub id: Uuid,
    pub deletion_request_id: Option<Uuid>,
    pub action: String,
    pub actor: String,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Insertable struct for audit entries; `seq` is assigned by the database.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = audit_log)]
pub(crate) struct NewAuditLogRow<'a> {
    pub id: Uuid,
    pub deletion_request_id: Option<Uuid>,
    pub action: &'a str,
    pub actor: &'a str,
    pub source_ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub details: &'a serde_json::Value,
    pub created_at: DateTime<Utc>,
}
