//! HTTP inbound adapter exposing the operator, webhook, admin and health
//! endpoints.

pub mod admin;
pub mod admin_dto;
pub mod auth;
pub mod client_ip;
pub mod confirm;
pub mod error;
pub mod health;
pub mod state;
#[cfg(test)]
pub mod test_utils;
pub mod validation;
pub mod webhook;

use actix_web::web;

pub use error::ApiResult;

/// Register every route and the extractor error handlers.
///
/// The caller supplies `web::Data<HttpState>` and `web::Data<HealthState>`.
///
/// # Examples
/// ```ignore
/// let app = App::new()
///     .app_data(http_state)
///     .app_data(health_state)
///     .wrap(Trace)
///     .configure(erasure_engine::inbound::http::configure);
/// ```
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(validation::json_config())
        .app_data(validation::query_config())
        .service(confirm::preview_confirmation)
        .service(confirm::confirm_deletion)
        .service(webhook::receive_email_webhook)
        .service(admin::create_deletion_request)
        .service(admin::get_deletion_request)
        .service(admin::run_scheduler)
        .service(admin::list_audit)
        .service(admin::list_inbound_emails)
        .service(health::ready)
        .service(health::live);
}
