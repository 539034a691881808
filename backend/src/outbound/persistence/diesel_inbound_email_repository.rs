//! PostgreSQL-backed `InboundEmailRepository` implementation using Diesel ORM.
//!
//! Correlation headers are stored as a JSONB object. A stored
//! `deletion_request_id` is only ever filled in, never replaced.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection as _, RunQueryDsl};

use crate::domain::ports::{
    InboundAnalysis, InboundEmailQuery, InboundEmailRepository, InboundEmailRepositoryError,
};
use crate::domain::{
    AuditLogEntry, CorrelationHeaders, DeletionRequestId, InboundEmail, InboundEmailId,
    ReplyIntent,
};

use super::diesel_audit_log_repository::insert_audit_entries;
use super::diesel_helpers::{limit_for_db, map_basic_diesel_error, map_basic_pool_error};
use super::models::{InboundEmailRow, NewInboundEmailRow};
use super::pool::{DbPool, PoolError};
use super::schema::inbound_emails;

/// Diesel-backed implementation of the inbound email repository port.
#[derive(Clone)]
pub struct DieselInboundEmailRepository {
    pool: DbPool,
}

impl DieselInboundEmailRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> InboundEmailRepositoryError {
    map_basic_pool_error(error, InboundEmailRepositoryError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> InboundEmailRepositoryError {
    map_basic_diesel_error(
        error,
        InboundEmailRepositoryError::query,
        InboundEmailRepositoryError::connection,
    )
}

fn encode_headers(
    headers: &CorrelationHeaders,
) -> Result<serde_json::Value, InboundEmailRepositoryError> {
    serde_json::to_value(headers).map_err(|err| {
        InboundEmailRepositoryError::query(format!("serialise correlation headers: {err}"))
    })
}

/// Convert a database row into a domain inbound email.
fn row_to_email(row: InboundEmailRow) -> Result<InboundEmail, InboundEmailRepositoryError> {
    let InboundEmailRow {
        id,
        operator_email,
        subject,
        raw_text,
        raw_html,
        correlation_headers,
        parsed_status,
        rejection_reason,
        deletion_request_id,
        received_at,
    } = row;

    let correlation_headers: CorrelationHeaders = serde_json::from_value(correlation_headers)
        .map_err(|err| {
            InboundEmailRepositoryError::query(format!("decode correlation headers: {err}"))
        })?;
    let parsed_status = ReplyIntent::parse(&parsed_status).ok_or_else(|| {
        InboundEmailRepositoryError::query(format!("unknown reply intent `{parsed_status}`"))
    })?;

    Ok(InboundEmail {
        id: InboundEmailId::from_uuid(id),
        operator_email,
        subject,
        raw_text,
        raw_html,
        correlation_headers,
        parsed_status,
        rejection_reason,
        deletion_request_id: deletion_request_id.map(DeletionRequestId::from_uuid),
        received_at,
    })
}

#[async_trait]
impl InboundEmailRepository for DieselInboundEmailRepository {
    async fn insert(
        &self,
        email: &InboundEmail,
        audit: &[AuditLogEntry],
    ) -> Result<(), InboundEmailRepositoryError> {
        let headers = encode_headers(&email.correlation_headers)?;
        let new_row = NewInboundEmailRow {
            id: *email.id.as_uuid(),
            operator_email: &email.operator_email,
            subject: &email.subject,
            raw_text: &email.raw_text,
            raw_html: &email.raw_html,
            correlation_headers: &headers,
            parsed_status: email.parsed_status.as_str(),
            rejection_reason: email.rejection_reason.as_deref(),
            deletion_request_id: email.deletion_request_id.map(|id| *id.as_uuid()),
            received_at: email.received_at,
        };
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        conn.transaction(|conn| {
            async move {
                diesel::insert_into(inbound_emails::table)
                    .values(&new_row)
                    .execute(conn)
                    .await?;
                insert_audit_entries(conn, audit).await
            }
            .scope_boxed()
        })
        .await
        .map_err(map_diesel_error)
    }

    async fn record_analysis(
        &self,
        id: &InboundEmailId,
        analysis: &InboundAnalysis,
    ) -> Result<(), InboundEmailRepositoryError> {
        let email_id = *id.as_uuid();
        let request_id = analysis.deletion_request_id.map(|id| *id.as_uuid());
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let updated = conn
            .transaction(|conn| {
                async move {
                    let updated = diesel::update(inbound_emails::table.find(email_id))
                        .set((
                            inbound_emails::parsed_status.eq(analysis.intent.as_str()),
                            inbound_emails::rejection_reason.eq(analysis.rejection_reason.as_deref()),
                        ))
                        .execute(conn)
                        .await?;
                    if let Some(request_id) = request_id {
                        diesel::update(
                            inbound_emails::table
                                .find(email_id)
                                .filter(inbound_emails::deletion_request_id.is_null()),
                        )
                        .set(inbound_emails::deletion_request_id.eq(request_id))
                        .execute(conn)
                        .await?;
                    }
                    Ok::<_, diesel::result::Error>(updated)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_diesel_error)?;

        if updated == 0 {
            return Err(InboundEmailRepositoryError::not_found(id.to_string()));
        }
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &InboundEmailId,
    ) -> Result<Option<InboundEmail>, InboundEmailRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let row = inbound_emails::table
            .find(id.as_uuid())
            .select(InboundEmailRow::as_select())
            .first::<InboundEmailRow>(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        row.map(row_to_email).transpose()
    }

    async fn list(
        &self,
        query: InboundEmailQuery,
    ) -> Result<Vec<InboundEmail>, InboundEmailRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let mut statement = inbound_emails::table
            .select(InboundEmailRow::as_select())
            .order((inbound_emails::received_at.desc(), inbound_emails::id.desc()))
            .limit(limit_for_db(query.limit))
            .into_boxed();
        if query.uncorrelated_only {
            statement = statement.filter(inbound_emails::deletion_request_id.is_null());
        }

        let rows: Vec<InboundEmailRow> =
            statement.load(&mut conn).await.map_err(map_diesel_error)?;
        rows.into_iter().map(row_to_email).collect()
    }
}
