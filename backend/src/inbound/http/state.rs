//! Shared HTTP adapter state.
//!
//! Handlers receive this through `actix_web::web::Data`. Everything in it is
//! a domain service or a port, so handlers stay testable over the in-memory
//! store.

use std::sync::Arc;

use crate::domain::ports::{AuditLogRepository, InboundEmailRepository};
use crate::domain::{
    AutomationScheduler, ConfirmationService, OutboundDispatcher, RequestLifecycle,
    WebhookIngestor,
};

use super::auth::AdminToken;

/// Parameter object bundling the services and ports handlers call.
#[derive(Clone)]
pub struct HttpStatePorts {
    pub lifecycle: RequestLifecycle,
    pub dispatcher: Arc<OutboundDispatcher>,
    pub confirmations: Arc<ConfirmationService>,
    pub ingestor: Arc<WebhookIngestor>,
    pub scheduler: Arc<AutomationScheduler>,
    pub audit: Arc<dyn AuditLogRepository>,
    pub inbound_emails: Arc<dyn InboundEmailRepository>,
}

/// Dependency bundle for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub lifecycle: RequestLifecycle,
    pub dispatcher: Arc<OutboundDispatcher>,
    pub confirmations: Arc<ConfirmationService>,
    pub ingestor: Arc<WebhookIngestor>,
    pub scheduler: Arc<AutomationScheduler>,
    pub audit: Arc<dyn AuditLogRepository>,
    pub inbound_emails: Arc<dyn InboundEmailRepository>,
    /// `None` disables every admin route.
    pub admin_token: Option<AdminToken>,
    /// Read the client address from `X-Forwarded-For` instead of the socket.
    pub trust_forwarded_for: bool,
}

impl HttpState {
    /// State with admin routes disabled and socket peer addresses.
    pub fn new(ports: HttpStatePorts) -> Self {
        let HttpStatePorts {
            lifecycle,
            dispatcher,
            confirmations,
            ingestor,
            scheduler,
            audit,
            inbound_emails,
        } = ports;
        Self {
            lifecycle,
            dispatcher,
            confirmations,
            ingestor,
            scheduler,
            audit,
            inbound_emails,
            admin_token: None,
            trust_forwarded_for: false,
        }
    }

    #[must_use]
    pub fn with_admin_token(mut self, token: Option<AdminToken>) -> Self {
        self.admin_token = token;
        self
    }

    #[must_use]
    pub fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}

impl From<HttpStatePorts> for HttpState {
    fn from(ports: HttpStatePorts) -> Self {
        Self::new(ports)
    }
}
