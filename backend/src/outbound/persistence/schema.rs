//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match `backend/migrations` exactly. Regenerate with
//! `diesel print-schema` after changing a migration.

diesel::table! {
    /// One removal demand per row; `revision` guards optimistic updates.
    deletion_requests (id) {
        id -> Uuid,
        user_id -> Uuid,
        broker_name -> Text,
        broker_url -> Text,
        operator_email -> Text,
        personal_data_categories -> Array<Text>,
        /// One of the `RequestStatus` storage strings.
        status -> Text,
        tracking_id -> Text,
        initial_message_id -> Nullable<Text>,
        follow_up_message_id -> Nullable<Text>,
        escalation_message_id -> Nullable<Text>,
        initial_sent_at -> Nullable<Timestamptz>,
        follow_up_sent_at -> Nullable<Timestamptz>,
        escalation_sent_at -> Nullable<Timestamptz>,
        button_confirmed_at -> Nullable<Timestamptz>,
        last_reply_at -> Nullable<Timestamptz>,
        /// Stage being delivered; null when no lease is held.
        lease_stage -> Nullable<Text>,
        lease_claimed_at -> Nullable<Timestamptz>,
        revision -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Consumption state of the confirmation link, at most one per request.
    confirmation_tokens (deletion_request_id) {
        deletion_request_id -> Uuid,
        purpose -> Text,
        issued_at -> Timestamptz,
        expires_at -> Timestamptz,
        used -> Bool,
        used_at -> Nullable<Timestamptz>,
        used_from_ip -> Nullable<Text>,
    }
}

diesel::table! {
    inbound_emails (id) {
        id -> Uuid,
        operator_email -> Text,
        subject -> Text,
        raw_text -> Text,
        raw_html -> Text,
        correlation_headers -> Jsonb,
        parsed_status -> Text,
        rejection_reason -> Nullable<Text>,
        deletion_request_id -> Nullable<Uuid>,
        received_at -> Timestamptz,
    }
}

diesel::table! {
    /// Append-only; a trigger rejects updates and deletes.
    audit_log (id) {
        id -> Uuid,
        /// Insertion order, used for newest-first listing.
        seq -> Int8,
        deletion_request_id -> Nullable<Uuid>,
        action -> Text,
        actor -> Text,
        source_ip -> Nullable<Text>,
        user_agent -> Nullable<Text>,
        details -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(confirmation_tokens -> deletion_requests (deletion_request_id));
diesel::joinable!(inbound_emails -> deletion_requests (deletion_request_id));
diesel::joinable!(audit_log -> deletion_requests (deletion_request_id));

diesel::allow_tables_to_appear_in_same_query!(
    audit_log,
    confirmation_tokens,
    deletion_requests,
    inbound_emails,
);
