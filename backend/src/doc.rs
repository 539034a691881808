//! OpenAPI documentation configuration.
//!
//! [`ApiDoc`] collects every HTTP operation from the inbound layer together
//! with the request, response and error schemas they reference. Two
//! security schemes are registered:
//!
//! - `AdminBearer`: the static admin token sent as `Authorization: Bearer`.
//! - `WebhookSecret`: the optional shared secret on webhook deliveries.
//!
//! Operator confirmation routes declare no security; the signed token in the
//! query string is the credential.
//!
//! The document is served by Swagger UI at `/docs` in debug builds.

use utoipa::openapi::security::{ApiKey, ApiKeyValue, Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::domain::{
    Actor, AuditAction, AuditLogEntry, ConfirmationReceipt, Error, ErrorCode, ReplyIntent,
    RequestStatus, SchedulerReport,
};
use crate::inbound::http::admin_dto::{
    ConfirmationView, CreateDeletionRequestBody, DeletionRequestView, InboundEmailView,
};
use crate::inbound::http::webhook::WebhookReceipt;

/// Register the admin bearer and webhook secret schemes.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi
            .components
            .get_or_insert_with(utoipa::openapi::Components::default);

        components.add_security_scheme(
            "AdminBearer",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
        components.add_security_scheme(
            "WebhookSecret",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                "X-Webhook-Secret",
                "Shared secret configured with the email provider.",
            ))),
        );
    }
}

/// OpenAPI document for the HTTP surface.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Erasure engine API",
        description = "Operator confirmation links, the inbound email webhook, \
                       the admin API and health probes.",
        license(
            name = "Apache-2.0",
            url = "https://www.apache.org/licenses/LICENSE-2.0.html"
        )
    ),
    servers(
        (url = "/", description = "Relative to the deployment base URL")
    ),
    paths(
        crate::inbound::http::confirm::preview_confirmation,
        crate::inbound::http::confirm::confirm_deletion,
        crate::inbound::http::webhook::receive_email_webhook,
        crate::inbound::http::admin::create_deletion_request,
        crate::inbound::http::admin::get_deletion_request,
        crate::inbound::http::admin::run_scheduler,
        crate::inbound::http::admin::list_audit,
        crate::inbound::http::admin::list_inbound_emails,
        crate::inbound::http::health::ready,
        crate::inbound::http::health::live,
    ),
    components(schemas(
        Error,
        ErrorCode,
        RequestStatus,
        ReplyIntent,
        Actor,
        AuditAction,
        AuditLogEntry,
        ConfirmationReceipt,
        SchedulerReport,
        CreateDeletionRequestBody,
        DeletionRequestView,
        ConfirmationView,
        InboundEmailView,
        WebhookReceipt,
    )),
    tags(
        (name = "operator", description = "Signed confirmation links followed by data brokers"),
        (name = "webhook", description = "Inbound email deliveries from the provider"),
        (name = "admin", description = "Operator-facing administration"),
        (name = "health", description = "Endpoints for health checks")
    )
)]
pub struct ApiDoc;
