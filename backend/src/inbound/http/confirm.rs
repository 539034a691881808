//! Operator confirmation link handlers.
//!
//! ```text
//! GET  /operator/confirm?token=...   confirmation page, no side effects
//! POST /operator/confirm?token=...   consume the token and confirm
//! ```
//!
//! Mail gateways fetch links to scan them, so only `POST` changes state. The
//! page rendered by `GET` carries a form that posts back to the same URL.

use actix_web::http::header::{CACHE_CONTROL, ContentType};
use actix_web::{HttpRequest, HttpResponse, get, post, web};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::domain::outbound_dispatcher::escape_html;
use crate::domain::{ConfirmationPreview, ConfirmationReceipt, Error};

use super::ApiResult;
use super::client_ip::client_context;
use super::state::HttpState;
use super::validation::missing_field_error;

const REFERRER_POLICY: &str = "referrer-policy";

/// Query string carried by confirmation links.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConfirmQuery {
    /// Signed confirmation token from the email.
    pub token: Option<String>,
}

impl ConfirmQuery {
    fn token(&self) -> ApiResult<&str> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| missing_field_error("token"))
    }
}

/// Show the confirmation page for a still-usable link.
#[utoipa::path(
    get,
    path = "/operator/confirm",
    params(ConfirmQuery),
    responses(
        (status = 200, description = "Confirmation page", content_type = "text/html"),
        (status = 400, description = "Malformed or expired link", body = Error),
        (status = 409, description = "Link already used", body = Error),
        (status = 429, description = "Too many attempts", body = Error)
    ),
    tags = ["operator"],
    operation_id = "previewConfirmation",
    security([])
)]
#[get("/operator/confirm")]
pub async fn preview_confirmation(
    req: HttpRequest,
    state: web::Data<HttpState>,
    query: web::Query<ConfirmQuery>,
) -> ApiResult<HttpResponse> {
    let token = query.token()?;
    let client = client_context(&req, state.trust_forwarded_for);
    let preview = state.confirmations.preview(token, &client).await?;

    Ok(HttpResponse::Ok()
        .content_type(ContentType::html())
        .insert_header((CACHE_CONTROL, "no-store"))
        .insert_header((REFERRER_POLICY, "no-referrer"))
        .body(render_page(&preview, token)))
}

/// Confirm the deletion and consume the link.
#[utoipa::path(
    post,
    path = "/operator/confirm",
    params(ConfirmQuery),
    responses(
        (status = 200, description = "Deletion confirmed", body = ConfirmationReceipt),
        (status = 400, description = "Malformed or expired link", body = Error),
        (status = 409, description = "Link already used", body = Error),
        (status = 429, description = "Too many attempts", body = Error),
        (status = 500, description = "Internal server error", body = Error)
    ),
    tags = ["operator"],
    operation_id = "confirmDeletion",
    security([])
)]
#[post("/operator/confirm")]
pub async fn confirm_deletion(
    req: HttpRequest,
    state: web::Data<HttpState>,
    query: web::Query<ConfirmQuery>,
) -> ApiResult<HttpResponse> {
    let token = query.token()?;
    let client = client_context(&req, state.trust_forwarded_for);
    let receipt = state.confirmations.confirm(token, &client).await?;

    Ok(HttpResponse::Ok()
        .insert_header((CACHE_CONTROL, "no-store"))
        .json(receipt))
}

fn render_page(preview: &ConfirmationPreview, token: &str) -> String {
    let categories: String = preview
        .personal_data_categories
        .iter()
        .map(|category| format!("<li>{}</li>", escape_html(category)))
        .collect();
    let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
    format!(
        concat!(
            "<!doctype html>\n",
            "<html lang=\"en\">\n",
            "<head><meta charset=\"utf-8\">",
            "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">",
            "<meta name=\"robots\" content=\"noindex\">",
            "<title>Confirm data erasure</title></head>\n",
            "<body>\n",
            "<h1>Confirm erasure for {broker}</h1>\n",
            "<p>Please confirm that the following personal data has been erased:</p>\n",
            "<ul>{categories}</ul>\n",
            "<form method=\"post\" action=\"?token={token}\">\n",
            "<button type=\"submit\">Confirm erasure</button>\n",
            "</form>\n",
            "<p>This link is valid until {expires}.</p>\n",
            "</body>\n",
            "</html>\n"
        ),
        broker = escape_html(&preview.broker_name),
        categories = categories,
        token = escape_html(&encoded),
        expires = preview.expires_at.format("%Y-%m-%d %H:%M UTC"),
    )
}

#[cfg(test)]
#[path = "confirm_tests.rs"]
mod tests;
