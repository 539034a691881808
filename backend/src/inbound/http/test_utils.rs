//! Test helpers for inbound HTTP components.

use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::{App, web};

use crate::inbound::http::auth::AdminToken;
use crate::inbound::http::health::HealthState;
use crate::inbound::http::state::{HttpState, HttpStatePorts};
use crate::middleware::Trace;
use crate::test_support::Harness;

pub const ADMIN_TOKEN: &str = "admin-test-token";

/// HTTP state over the harness services, admin routes enabled.
pub fn http_state(harness: &Harness) -> HttpState {
    HttpState::new(HttpStatePorts {
        lifecycle: harness.lifecycle.clone(),
        dispatcher: harness.dispatcher.clone(),
        confirmations: harness.confirmations.clone(),
        ingestor: harness.ingestor.clone(),
        scheduler: harness.scheduler.clone(),
        audit: harness.store.clone(),
        inbound_emails: harness.store.clone(),
    })
    .with_admin_token(AdminToken::new(ADMIN_TOKEN))
}

/// Application with every route, the trace middleware and a ready health
/// state.
pub fn test_app(
    state: HttpState,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let health = HealthState::new();
    health.mark_ready();
    App::new()
        .app_data(web::Data::new(state))
        .app_data(web::Data::new(health))
        .wrap(Trace)
        .configure(super::configure)
}

/// `Authorization` header value for [`ADMIN_TOKEN`].
pub fn admin_auth() -> (&'static str, String) {
    ("authorization", format!("Bearer {ADMIN_TOKEN}"))
}
