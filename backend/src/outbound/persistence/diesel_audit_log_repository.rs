//! PostgreSQL-backed `AuditLogRepository` implementation using Diesel ORM.
//!
//! The table is append-only (a trigger refuses updates and deletes). Other
//! repositories call [`insert_audit_entries`] inside their own transactions
//! so a state change and its audit entries commit together.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::domain::ports::{AuditLogRepository, AuditLogRepositoryError, AuditQuery};
use crate::domain::{Actor, AuditAction, AuditLogEntry, DeletionRequestId};

use super::diesel_helpers::{limit_for_db, map_basic_diesel_error, map_basic_pool_error};
use super::models::{AuditLogRow, NewAuditLogRow};
use super::pool::{DbPool, PoolError};
use super::schema::audit_log;

/// Diesel-backed implementation of the audit log port.
#[derive(Clone)]
pub struct DieselAuditLogRepository {
    pool: DbPool,
}

impl DieselAuditLogRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> AuditLogRepositoryError {
    map_basic_pool_error(error, AuditLogRepositoryError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> AuditLogRepositoryError {
    map_basic_diesel_error(
        error,
        AuditLogRepositoryError::query,
        AuditLogRepositoryError::connection,
    )
}

fn new_rows(entries: &[AuditLogEntry]) -> Vec<NewAuditLogRow<'_>> {
    entries
        .iter()
        .map(|entry| NewAuditLogRow {
            id: entry.id,
            deletion_request_id: entry.deletion_request_id.map(|id| *id.as_uuid()),
            action: entry.action.as_str(),
            actor: entry.actor.as_str(),
            source_ip: entry.source_ip.as_deref(),
            user_agent: entry.user_agent.as_deref(),
            details: &entry.details,
            created_at: entry.created_at,
        })
        .collect()
}

/// Insert audit entries on an existing connection, typically inside a
/// transaction opened by the caller.
pub(crate) async fn insert_audit_entries(
    conn: &mut AsyncPgConnection,
    entries: &[AuditLogEntry],
) -> Result<(), diesel::result::Error> {
    if entries.is_empty() {
        return Ok(());
    }
    diesel::insert_into(audit_log::table)
        .values(&new_rows(entries))
        .execute(conn)
        .await
        .map(|_| ())
}

/// Convert a database row into a domain audit entry.
fn row_to_entry(row: AuditLogRow) -> Result<AuditLogEntry, AuditLogRepositoryError> {
    let AuditLogRow {
        id,
        deletion_request_id,
        action,
        actor,
        source_ip,
        user_agent,
        details,
        created_at,
    } = row;

    let action = AuditAction::parse(&action)
        .ok_or_else(|| AuditLogRepositoryError::query(format!("unknown audit action `{action}`")))?;
    let actor = Actor::parse(&actor)
        .ok_or_else(|| AuditLogRepositoryError::query(format!("unknown audit actor `{actor}`")))?;

    Ok(AuditLogEntry {
        id,
        deletion_request_id: deletion_request_id.map(DeletionRequestId::from_uuid),
        action,
        actor,
        source_ip,
        user_agent,
        details,
        created_at,
    })
}

#[async_trait]
impl AuditLogRepository for DieselAuditLogRepository {
    async fn append(&self, entries: &[AuditLogEntry]) -> Result<(), AuditLogRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        insert_audit_entries(&mut conn, entries)
            .await
            .map_err(map_diesel_error)
    }

    async fn list(&self, query: AuditQuery) -> Result<Vec<AuditLogEntry>, AuditLogRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let mut statement = audit_log::table
            .select(AuditLogRow::as_select())
            .order(audit_log::seq.desc())
            .limit(limit_for_db(query.limit))
            .into_boxed();
        if let Some(id) = query.deletion_request_id {
            statement = statement.filter(audit_log::deletion_request_id.eq(*id.as_uuid()));
        }

        let rows: Vec<AuditLogRow> = statement.load(&mut conn).await.map_err(map_diesel_error)?;
        rows.into_iter().map(row_to_entry).collect()
    }
}
