//! Admin API handlers.
//!
//! ```text
//! POST /admin/deletion-requests          create (optionally send the initial email)
//! GET  /admin/deletion-requests/{id}     current state
//! POST /admin/scheduler/run              one scheduler pass
//! GET  /admin/audit                      audit entries, newest first
//! GET  /admin/inbound-emails             stored replies for triage
//! ```
//!
//! Every route requires `Authorization: Bearer <admin token>`.

use actix_web::{HttpResponse, get, post, web};
use tracing::{info, warn};

use crate::domain::ports::{
    AuditLogRepositoryError, AuditQuery, InboundEmailQuery, InboundEmailRepositoryError,
};
use crate::domain::{
    Actor, AuditLogEntry, DeletionRequest, DeletionRequestId, Error, SchedulerReport,
};

use super::ApiResult;
use super::admin_dto::{
    AuditListQuery, CreateDeletionRequestBody, DeletionRequestView, InboundEmailView,
    InboundListQuery,
};
use super::auth::AdminCaller;
use super::state::HttpState;
use super::validation::{parse_limit, parse_request_id};

fn map_audit_error(error: AuditLogRepositoryError) -> Error {
    warn!(%error, "audit log query failed");
    match error {
        AuditLogRepositoryError::Connection { .. } => {
            Error::service_unavailable("audit log unavailable")
        }
        AuditLogRepositoryError::Query { .. } => Error::internal("audit log query failed"),
    }
}

fn map_inbound_error(error: InboundEmailRepositoryError) -> Error {
    warn!(%error, "inbound email query failed");
    match error {
        InboundEmailRepositoryError::Connection { .. } => {
            Error::service_unavailable("inbound email store unavailable")
        }
        InboundEmailRepositoryError::NotFound { .. } | InboundEmailRepositoryError::Query { .. } => {
            Error::internal("inbound email query failed")
        }
    }
}

async fn load_request(state: &HttpState, id: &DeletionRequestId) -> ApiResult<DeletionRequest> {
    state
        .lifecycle
        .repository()
        .find_by_id(id)
        .await
        .map_err(|err| crate::domain::lifecycle::map_repository_error(&err))?
        .ok_or_else(|| Error::not_found(format!("deletion request {id} not found")))
}

/// Create a deletion request.
///
/// With `sendInitial` the initial email is dispatched before responding. A
/// failed dispatch still answers `201`: the request stays `pending` and the
/// scheduler retries it.
#[utoipa::path(
    post,
    path = "/admin/deletion-requests",
    request_body = CreateDeletionRequestBody,
    responses(
        (status = 201, description = "Request created", body = DeletionRequestView),
        (status = 400, description = "Invalid request", body = Error),
        (status = 401, description = "Missing or wrong bearer token", body = Error),
        (status = 403, description = "Admin API disabled", body = Error),
        (status = 503, description = "Store unavailable", body = Error)
    ),
    tags = ["admin"],
    operation_id = "createDeletionRequest",
    security(("AdminBearer" = []))
)]
#[post("/admin/deletion-requests")]
pub async fn create_deletion_request(
    _admin: AdminCaller,
    state: web::Data<HttpState>,
    payload: web::Json<CreateDeletionRequestBody>,
) -> ApiResult<HttpResponse> {
    let (draft, send_initial) = payload.into_inner().into_parts();
    let mut request = state.lifecycle.create(draft, Actor::Admin).await?;
    info!(deletion_request_id = %request.id, send_initial, "deletion request created by admin");

    if send_initial {
        match state.dispatcher.send_initial(&request.id, Actor::Admin).await {
            Ok(_) => request = load_request(&state, &request.id).await?,
            Err(error) => {
                warn!(
                    deletion_request_id = %request.id,
                    %error,
                    "initial dispatch failed; left pending for the scheduler"
                );
            }
        }
    }

    Ok(HttpResponse::Created().json(DeletionRequestView::from(&request)))
}

/// Fetch one deletion request.
#[utoipa::path(
    get,
    path = "/admin/deletion-requests/{id}",
    params(("id" = String, Path, description = "Deletion request id")),
    responses(
        (status = 200, description = "Current state", body = DeletionRequestView),
        (status = 400, description = "Malformed id", body = Error),
        (status = 401, description = "Missing or wrong bearer token", body = Error),
        (status = 404, description = "Unknown request", body = Error)
    ),
    tags = ["admin"],
    operation_id = "getDeletionRequest",
    security(("AdminBearer" = []))
)]
#[get("/admin/deletion-requests/{id}")]
pub async fn get_deletion_request(
    _admin: AdminCaller,
    state: web::Data<HttpState>,
    path: web::Path<String>,
) -> ApiResult<web::Json<DeletionRequestView>> {
    let id = parse_request_id(&path.into_inner(), "id")?;
    let request = load_request(&state, &id).await?;
    Ok(web::Json(DeletionRequestView::from(&request)))
}

/// Run one scheduler pass now.
///
/// Shares the in-process run lock with the periodic driver, so this waits
/// for a pass already in progress.
#[utoipa::path(
    post,
    path = "/admin/scheduler/run",
    responses(
        (status = 200, description = "Pass report", body = SchedulerReport),
        (status = 401, description = "Missing or wrong bearer token", body = Error),
        (status = 503, description = "Store unavailable", body = Error)
    ),
    tags = ["admin"],
    operation_id = "runScheduler",
    security(("AdminBearer" = []))
)]
#[post("/admin/scheduler/run")]
pub async fn run_scheduler(
    _admin: AdminCaller,
    state: web::Data<HttpState>,
) -> ApiResult<web::Json<SchedulerReport>> {
    let report = state.scheduler.run_once().await?;
    Ok(web::Json(report))
}

/// List audit entries, newest first.
#[utoipa::path(
    get,
    path = "/admin/audit",
    params(AuditListQuery),
    responses(
        (status = 200, description = "Audit entries", body = [AuditLogEntry]),
        (status = 400, description = "Invalid filter", body = Error),
        (status = 401, description = "Missing or wrong bearer token", body = Error)
    ),
    tags = ["admin"],
    operation_id = "listAudit",
    security(("AdminBearer" = []))
)]
#[get("/admin/audit")]
pub async fn list_audit(
    _admin: AdminCaller,
    state: web::Data<HttpState>,
    query: web::Query<AuditListQuery>,
) -> ApiResult<web::Json<Vec<AuditLogEntry>>> {
    let AuditListQuery {
        deletion_request_id,
        limit,
    } = query.into_inner();
    let filter = AuditQuery {
        deletion_request_id: deletion_request_id
            .as_deref()
            .map(|raw| parse_request_id(raw, "deletionRequestId"))
            .transpose()?,
        limit: parse_limit(limit)?,
    };
    let entries = state.audit.list(filter).await.map_err(map_audit_error)?;
    Ok(web::Json(entries))
}

/// List stored inbound emails, newest first.
#[utoipa::path(
    get,
    path = "/admin/inbound-emails",
    params(InboundListQuery),
    responses(
        (status = 200, description = "Inbound emails", body = [InboundEmailView]),
        (status = 400, description = "Invalid filter", body = Error),
        (status = 401, description = "Missing or wrong bearer token", body = Error)
    ),
    tags = ["admin"],
    operation_id = "listInboundEmails",
    security(("AdminBearer" = []))
)]
#[get("/admin/inbound-emails")]
pub async fn list_inbound_emails(
    _admin: AdminCaller,
    state: web::Data<HttpState>,
    query: web::Query<InboundListQuery>,
) -> ApiResult<web::Json<Vec<InboundEmailView>>> {
    let InboundListQuery {
        uncorrelated,
        limit,
    } = query.into_inner();
    let filter = InboundEmailQuery {
        uncorrelated_only: uncorrelated.unwrap_or(false),
        limit: parse_limit(limit)?,
    };
    let emails = state
        .inbound_emails
        .list(filter)
        .await
        .map_err(map_inbound_error)?;
    Ok(web::Json(emails.iter().map(InboundEmailView::from).collect()))
}

#[cfg(test)]
#[path = "admin_tests.rs"]
mod tests;
