//! Inbound email webhook.
//!
//! ```text
//! POST /webhook/email   [{"email": ..., "subject": ..., "text": ..., "html": ..., "headers": {...}}]
//! ```
//!
//! Providers retry anything that is not a 2xx, so this handler answers
//! `200 {"accepted": n}` for every payload, readable or not. The only
//! exception is `503` when the inbound store is down, which is exactly when a
//! redelivery is wanted.

use actix_web::error::PayloadError;
use actix_web::web::{Bytes, BytesMut};
use actix_web::{HttpRequest, post, web};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::domain::{Error, MAX_WEBHOOK_BODY_BYTES};

use super::ApiResult;
use super::state::HttpState;

/// Header carrying the optional shared secret.
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Number of events stored from one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WebhookReceipt {
    pub accepted: usize,
}

impl WebhookReceipt {
    const NONE: Self = Self { accepted: 0 };
}

/// Receive a batch of inbound email events.
#[utoipa::path(
    post,
    path = "/webhook/email",
    request_body(content = String, description = "JSON array of email events", content_type = "application/json"),
    responses(
        (status = 200, description = "Delivery processed", body = WebhookReceipt),
        (status = 503, description = "Inbound store unavailable; redeliver", body = Error)
    ),
    tags = ["webhook"],
    operation_id = "receiveEmailWebhook",
    security(("WebhookSecret" = []))
)]
#[post("/webhook/email")]
pub async fn receive_email_webhook(
    req: HttpRequest,
    state: web::Data<HttpState>,
    payload: web::Payload,
) -> ApiResult<web::Json<WebhookReceipt>> {
    let secret = req
        .headers()
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if !state.ingestor.authenticates(secret) {
        warn!(
            peer = ?req.peer_addr(),
            secret_present = secret.is_some(),
            "webhook delivery failed shared-secret check"
        );
        return Ok(web::Json(WebhookReceipt::NONE));
    }

    let body = match read_capped(payload, MAX_WEBHOOK_BODY_BYTES).await {
        Ok(Some(body)) => body,
        Ok(None) => {
            warn!(limit = MAX_WEBHOOK_BODY_BYTES, "webhook body exceeds size limit");
            return Ok(web::Json(WebhookReceipt::NONE));
        }
        Err(error) => {
            warn!(%error, "webhook body could not be read");
            return Ok(web::Json(WebhookReceipt::NONE));
        }
    };

    let stored = state.ingestor.ingest(&body).await?;
    debug!(accepted = stored.len(), "webhook delivery processed");
    Ok(web::Json(WebhookReceipt {
        accepted: stored.len(),
    }))
}

/// Collect `stream` into memory, or `None` once it grows past `cap` bytes.
async fn read_capped<S>(mut stream: S, cap: usize) -> Result<Option<BytesMut>, PayloadError>
where
    S: Stream<Item = Result<Bytes, PayloadError>> + Unpin,
{
    let mut body = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > cap {
            return Ok(None);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(Some(body))
}

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod tests;
