//! PostgreSQL-backed `DeletionRequestRepository` implementation using Diesel ORM.
//!
//! A request row, its confirmation token row and the audit entries of one
//! change are written in a single transaction. Commits are revision checked:
//! the `UPDATE` only matches the row while its revision still equals the
//! revision the caller read.

use std::str::FromStr;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection as _, AsyncPgConnection, RunQueryDsl};

use crate::domain::ports::{DeletionRequestRepository, DeletionRequestRepositoryError};
use crate::domain::{
    AuditLogEntry, ConfirmationToken, DeletionRequest, DeletionRequestId, DispatchLease,
    DispatchStage, RequestStatus, TokenPurpose, TrackingId,
};

use super::diesel_audit_log_repository::insert_audit_entries;
use super::diesel_helpers::{
    cast_revision, limit_for_db, map_basic_diesel_error, map_basic_pool_error, revision_for_db,
    unique_violation,
};
use super::models::{
    ConfirmationTokenRow, DeletionRequestRow, DeletionRequestUpdate, NewDeletionRequestRow,
};
use super::pool::{DbPool, PoolError};
use super::schema::{confirmation_tokens, deletion_requests};

/// Statuses returned by `list_active`.
const AWAITING_AUTOMATION: [RequestStatus; 3] = [
    RequestStatus::Pending,
    RequestStatus::SentInitial,
    RequestStatus::FollowedUp,
];

/// Diesel-backed implementation of the deletion request repository port.
#[derive(Clone)]
pub struct DieselDeletionRequestRepository {
    pool: DbPool,
}

impl DieselDeletionRequestRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> DeletionRequestRepositoryError {
    map_basic_pool_error(error, DeletionRequestRepositoryError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> DeletionRequestRepositoryError {
    if let Some(constraint) = unique_violation(&error) {
        return DeletionRequestRepositoryError::duplicate(constraint);
    }
    map_basic_diesel_error(
        error,
        DeletionRequestRepositoryError::query,
        DeletionRequestRepositoryError::connection,
    )
}

/// Failure inside a write transaction: either Diesel failed or the write was
/// refused after inspecting the stored row.
#[derive(Debug)]
enum WriteError {
    Diesel(diesel::result::Error),
    Refused(DeletionRequestRepositoryError),
}

impl From<diesel::result::Error> for WriteError {
    fn from(error: diesel::result::Error) -> Self {
        Self::Diesel(error)
    }
}

impl From<WriteError> for DeletionRequestRepositoryError {
    fn from(error: WriteError) -> Self {
        match error {
            WriteError::Diesel(error) => map_diesel_error(error),
            WriteError::Refused(error) => error,
        }
    }
}

fn db_revision(revision: u32) -> Result<i32, DeletionRequestRepositoryError> {
    revision_for_db(revision)
        .ok_or_else(|| DeletionRequestRepositoryError::query("revision out of range"))
}

fn token_row(token: &ConfirmationToken) -> ConfirmationTokenRow {
    ConfirmationTokenRow {
        deletion_request_id: *token.deletion_request_id.as_uuid(),
        purpose: token.purpose.as_str().to_owned(),
        issued_at: token.issued_at,
        expires_at: token.expires_at,
        used: token.used,
        used_at: token.used_at,
        used_from_ip: token.used_from_ip.clone(),
    }
}

fn update_row(
    request: &DeletionRequest,
) -> Result<DeletionRequestUpdate<'_>, DeletionRequestRepositoryError> {
    Ok(DeletionRequestUpdate {
        status: request.status.as_str(),
        initial_message_id: request.initial_message_id.as_deref(),
        follow_up_message_id: request.follow_up_message_id.as_deref(),
        escalation_message_id: request.escalation_message_id.as_deref(),
        initial_sent_at: request.initial_sent_at,
        follow_up_sent_at: request.follow_up_sent_at,
        escalation_sent_at: request.escalation_sent_at,
        button_confirmed_at: request.button_confirmed_at,
        last_reply_at: request.last_reply_at,
        lease_stage: request.dispatch_lease.map(|lease| lease.stage.as_str()),
        lease_claimed_at: request.dispatch_lease.map(|lease| lease.claimed_at),
        revision: db_revision(request.revision)?,
        updated_at: request.updated_at,
    })
}

fn corrupt(column: &str, value: &str) -> DeletionRequestRepositoryError {
    DeletionRequestRepositoryError::query(format!("stored {column} `{value}` is not valid"))
}

fn row_to_token(row: ConfirmationTokenRow) -> Result<ConfirmationToken, DeletionRequestRepositoryError> {
    let purpose =
        TokenPurpose::parse(&row.purpose).ok_or_else(|| corrupt("token purpose", &row.purpose))?;
    Ok(ConfirmationToken {
        deletion_request_id: DeletionRequestId::from_uuid(row.deletion_request_id),
        purpose,
        issued_at: row.issued_at,
        expires_at: row.expires_at,
        used: row.used,
        used_at: row.used_at,
        used_from_ip: row.used_from_ip,
    })
}

/// Convert a request row and its optional token row into the aggregate.
fn row_to_request(
    row: DeletionRequestRow,
    token: Option<ConfirmationTokenRow>,
) -> Result<DeletionRequest, DeletionRequestRepositoryError> {
    let DeletionRequestRow {
        id,
        user_id,
        broker_name,
        broker_url,
        operator_email,
        personal_data_categories,
        status,
        tracking_id,
        initial_message_id,
        follow_up_message_id,
        escalation_message_id,
        initial_sent_at,
        follow_up_sent_at,
        escalation_sent_at,
        button_confirmed_at,
        last_reply_at,
        lease_stage,
        lease_claimed_at,
        revision,
        created_at,
        updated_at,
    } = row;

    let status = RequestStatus::from_str(&status).map_err(|_| corrupt("status", &status))?;
    let tracking_id =
        TrackingId::parse(&tracking_id).map_err(|_| corrupt("tracking id", &tracking_id))?;
    let dispatch_lease = match (lease_stage, lease_claimed_at) {
        (Some(stage), Some(claimed_at)) => Some(DispatchLease {
            stage: DispatchStage::from_str(&stage).map_err(|_| corrupt("lease stage", &stage))?,
            claimed_at,
        }),
        _ => None,
    };

    Ok(DeletionRequest {
        id: DeletionRequestId::from_uuid(id),
        user_id,
        broker_name,
        broker_url,
        operator_email,
        personal_data_categories,
        status,
        tracking_id,
        initial_message_id,
        follow_up_message_id,
        escalation_message_id,
        initial_sent_at,
        follow_up_sent_at,
        escalation_sent_at,
        button_confirmed_at,
        last_reply_at,
        dispatch_lease,
        confirmation: token.map(row_to_token).transpose()?,
        revision: cast_revision(revision),
        created_at,
        updated_at,
    })
}

type RequestRows = (DeletionRequestRow, Option<ConfirmationTokenRow>);

fn rows_to_requests(
    rows: Vec<RequestRows>,
) -> Result<Vec<DeletionRequest>, DeletionRequestRepositoryError> {
    rows.into_iter()
        .map(|(row, token)| row_to_request(row, token))
        .collect()
}

async fn upsert_token(
    conn: &mut AsyncPgConnection,
    token: &ConfirmationToken,
) -> Result<(), diesel::result::Error> {
    let row = token_row(token);
    diesel::insert_into(confirmation_tokens::table)
        .values(&row)
        .on_conflict(confirmation_tokens::deletion_request_id)
        .do_update()
        .set(&row)
        .execute(conn)
        .await
        .map(|_| ())
}

/// Explain a zero-row update: the request is missing or its revision moved.
async fn refusal_for(
    conn: &mut AsyncPgConnection,
    id: &DeletionRequestId,
    expected_revision: u32,
) -> Result<DeletionRequestRepositoryError, diesel::result::Error> {
    let actual: Option<i32> = deletion_requests::table
        .find(*id.as_uuid())
        .select(deletion_requests::revision)
        .first(conn)
        .await
        .optional()?;
    Ok(match actual {
        Some(actual) => DeletionRequestRepositoryError::revision_mismatch(
            expected_revision,
            cast_revision(actual),
        ),
        None => DeletionRequestRepositoryError::not_found(id.to_string()),
    })
}

#[async_trait]
impl DeletionRequestRepository for DieselDeletionRequestRepository {
    async fn create(
        &self,
        request: &DeletionRequest,
        audit: &[AuditLogEntry],
    ) -> Result<(), DeletionRequestRepositoryError> {
        let new_row = NewDeletionRequestRow {
            id: *request.id.as_uuid(),
            user_id: request.user_id,
            broker_name: &request.broker_name,
            broker_url: &request.broker_url,
            operator_email: &request.operator_email,
            personal_data_categories: &request.personal_data_categories,
            status: request.status.as_str(),
            tracking_id: request.tracking_id.as_ref(),
            revision: db_revision(request.revision)?,
            created_at: request.created_at,
            updated_at: request.updated_at,
        };
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        conn.transaction(|conn| {
            async move {
                diesel::insert_into(deletion_requests::table)
                    .values(&new_row)
                    .execute(conn)
                    .await?;
                if let Some(token) = &request.confirmation {
                    upsert_token(conn, token).await?;
                }
                insert_audit_entries(conn, audit).await
            }
            .scope_boxed()
        })
        .await
        .map_err(map_diesel_error)
    }

    async fn find_by_id(
        &self,
        id: &DeletionRequestId,
    ) -> Result<Option<DeletionRequest>, DeletionRequestRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let row: Option<RequestRows> = deletion_requests::table
            .left_join(confirmation_tokens::table)
            .filter(deletion_requests::id.eq(id.as_uuid()))
            .select((
                DeletionRequestRow::as_select(),
                Option::<ConfirmationTokenRow>::as_select(),
            ))
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        row.map(|(row, token)| row_to_request(row, token))
            .transpose()
    }

    async fn find_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<DeletionRequest>, DeletionRequestRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let row: Option<RequestRows> = deletion_requests::table
            .left_join(confirmation_tokens::table)
            .filter(
                deletion_requests::initial_message_id
                    .eq(message_id)
                    .or(deletion_requests::follow_up_message_id.eq(message_id))
                    .or(deletion_requests::escalation_message_id.eq(message_id)),
            )
            .select((
                DeletionRequestRow::as_select(),
                Option::<ConfirmationTokenRow>::as_select(),
            ))
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        row.map(|(row, token)| row_to_request(row, token))
            .transpose()
    }

    async fn find_by_tracking_id(
        &self,
        tracking_id: &str,
    ) -> Result<Option<DeletionRequest>, DeletionRequestRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let row: Option<RequestRows> = deletion_requests::table
            .left_join(confirmation_tokens::table)
            .filter(deletion_requests::tracking_id.eq(tracking_id))
            .select((
                DeletionRequestRow::as_select(),
                Option::<ConfirmationTokenRow>::as_select(),
            ))
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        row.map(|(row, token)| row_to_request(row, token))
            .transpose()
    }

    async fn list_active(
        &self,
        limit: usize,
    ) -> Result<Vec<DeletionRequest>, DeletionRequestRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let rows: Vec<RequestRows> = deletion_requests::table
            .left_join(confirmation_tokens::table)
            .filter(
                deletion_requests::status
                    .eq_any(AWAITING_AUTOMATION.map(RequestStatus::as_str).to_vec()),
            )
            .order((deletion_requests::created_at.asc(), deletion_requests::id.asc()))
            .limit(limit_for_db(limit))
            .select((
                DeletionRequestRow::as_select(),
                Option::<ConfirmationTokenRow>::as_select(),
            ))
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        rows_to_requests(rows)
    }

    async fn commit(
        &self,
        request: &DeletionRequest,
        expected_revision: u32,
        audit: &[AuditLogEntry],
    ) -> Result<(), DeletionRequestRepositoryError> {
        let update = update_row(request)?;
        let expected = db_revision(expected_revision)?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        conn.transaction(|conn| {
            async move {
                let updated = diesel::update(deletion_requests::table)
                    .filter(
                        deletion_requests::id
                            .eq(request.id.as_uuid())
                            .and(deletion_requests::revision.eq(expected)),
                    )
                    .set(&update)
                    .execute(conn)
                    .await?;
                if updated == 0 {
                    let refusal = refusal_for(conn, &request.id, expected_revision).await?;
                    return Err(WriteError::Refused(refusal));
                }
                if let Some(token) = &request.confirmation {
                    upsert_token(conn, token).await?;
                }
                insert_audit_entries(conn, audit).await?;
                Ok::<_, WriteError>(())
            }
            .scope_boxed()
        })
        .await
        .map_err(DeletionRequestRepositoryError::from)
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for row conversion and error mapping.

    use chrono::{Duration, Utc};
    use rstest::{fixture, rstest};
    use uuid::Uuid;

    use super::*;

    #[fixture]
    fn valid_row() -> DeletionRequestRow {
        let now = Utc::now();
        DeletionRequestRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            broker_name: "Acme Data".to_owned(),
            broker_url: "https://acme.example".to_owned(),
            operator_email: "privacy@acme.example".to_owned(),
            personal_data_categories: vec!["email".to_owned(), "phone".to_owned()],
            status: "sent_initial".to_owned(),
            tracking_id: TrackingId::generate().to_string(),
            initial_message_id: Some("<initial@mail.example>".to_owned()),
            follow_up_message_id: None,
            escalation_message_id: None,
            initial_sent_at: Some(now),
            follow_up_sent_at: None,
            escalation_sent_at: None,
            button_confirmed_at: None,
            last_reply_at: None,
            lease_stage: Some("follow_up".to_owned()),
            lease_claimed_at: Some(now),
            revision: 3,
            created_at: now - Duration::days(1),
            updated_at: now,
        }
    }

    #[rstest]
    fn row_converts_to_aggregate(valid_row: DeletionRequestRow) {
        let request = row_to_request(valid_row, None).expect("valid row converts");

        assert_eq!(request.status, RequestStatus::SentInitial);
        assert_eq!(request.revision, 3);
        assert_eq!(
            request.dispatch_lease.map(|lease| lease.stage),
            Some(DispatchStage::FollowUp)
        );
        assert!(request.confirmation.is_none());
    }

    #[rstest]
    fn half_written_lease_is_ignored(mut valid_row: DeletionRequestRow) {
        valid_row.lease_claimed_at = None;

        let request = row_to_request(valid_row, None).expect("row converts");
        assert!(request.dispatch_lease.is_none());
    }

    #[rstest]
    #[case::status("status")]
    #[case::tracking_id("tracking id")]
    #[case::lease_stage("lease stage")]
    fn corrupt_columns_are_query_errors(mut valid_row: DeletionRequestRow, #[case] column: &str) {
        match column {
            "status" => valid_row.status = "archived".to_owned(),
            "tracking id" => valid_row.tracking_id = "TRK-1".to_owned(),
            _ => valid_row.lease_stage = Some("reminder".to_owned()),
        }

        let error = row_to_request(valid_row, None).expect_err("corrupt row");
        assert!(matches!(error, DeletionRequestRepositoryError::Query { .. }));
        assert!(error.to_string().contains(column));
    }

    #[rstest]
    fn token_rows_round_trip_through_the_aggregate(valid_row: DeletionRequestRow) {
        let now = Utc::now();
        let mut token = ConfirmationToken::issued(
            DeletionRequestId::from_uuid(valid_row.id),
            TokenPurpose::ConfirmDeletion,
            now,
            now + Duration::days(45),
        );
        token.consume(now, Some("203.0.113.5".to_owned()));

        let request =
            row_to_request(valid_row, Some(token_row(&token))).expect("row with token converts");

        assert_eq!(request.confirmation, Some(token));
    }

    #[rstest]
    fn update_row_clears_released_lease(valid_row: DeletionRequestRow) {
        let mut request = row_to_request(valid_row, None).expect("row converts");
        request.release_lease(DispatchStage::FollowUp);

        let update = update_row(&request).expect("update row");
        assert_eq!(update.lease_stage, None);
        assert_eq!(update.lease_claimed_at, None);
        assert_eq!(update.status, "sent_initial");
    }

    #[rstest]
    fn write_refusals_pass_through_unchanged() {
        let refusal = DeletionRequestRepositoryError::revision_mismatch(2_u32, 3_u32);
        let mapped = DeletionRequestRepositoryError::from(WriteError::Refused(refusal.clone()));
        assert_eq!(mapped, refusal);
    }

    #[rstest]
    fn diesel_not_found_is_a_query_error() {
        let mapped = DeletionRequestRepositoryError::from(WriteError::Diesel(
            diesel::result::Error::NotFound,
        ));
        assert!(matches!(mapped, DeletionRequestRepositoryError::Query { .. }));
    }

    #[rstest]
    fn pool_error_maps_to_connection_error() {
        let error = map_pool_error(PoolError::checkout("connection refused"));
        assert!(matches!(
            error,
            DeletionRequestRepositoryError::Connection { .. }
        ));
        assert!(error.to_string().contains("connection refused"));
    }
}
