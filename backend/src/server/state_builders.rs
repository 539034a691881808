//! Builders for repositories, the email transport and the domain services.
//!
//! A configured database selects the Diesel repositories (after running
//! migrations); otherwise everything shares one in-memory store. A
//! configured provider selects the HTTP transport; otherwise emails are only
//! logged.

use std::io;
use std::sync::Arc;

use mockable::{Clock, DefaultClock};
use tracing::{info, warn};

use erasure_engine::config::{AppSettings, SettingsError};
use erasure_engine::domain::ports::{
    AuditLogRepository, DeletionRequestRepository, EmailTransport, InboundEmailRepository,
};
use erasure_engine::domain::{
    AutomationScheduler, ConfirmationService, OutboundDispatcher, RateLimiter, ReplyClassifier,
    RequestLifecycle, SigningSecret, TokenCodec, WebhookIngestor,
};
use erasure_engine::inbound::http::auth::AdminToken;
use erasure_engine::inbound::http::state::{HttpState, HttpStatePorts};
use erasure_engine::outbound::email::{
    HttpEmailTransport, LoggingEmailTransport, ProviderCredentials,
};
use erasure_engine::outbound::persistence::{
    DbPool, DieselAuditLogRepository, DieselDeletionRequestRepository,
    DieselInboundEmailRepository, InMemoryStore, PoolConfig, run_pending_migrations,
};

fn settings_error(error: SettingsError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, error)
}

/// The three repository ports, backed by one store.
#[derive(Clone)]
pub(crate) struct Repositories {
    pub(crate) requests: Arc<dyn DeletionRequestRepository>,
    pub(crate) inbound_emails: Arc<dyn InboundEmailRepository>,
    pub(crate) audit: Arc<dyn AuditLogRepository>,
}

impl Repositories {
    pub(crate) fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            requests: store.clone(),
            inbound_emails: store.clone(),
            audit: store,
        }
    }

    fn diesel(pool: &DbPool) -> Self {
        Self {
            requests: Arc::new(DieselDeletionRequestRepository::new(pool.clone())),
            inbound_emails: Arc::new(DieselInboundEmailRepository::new(pool.clone())),
            audit: Arc::new(DieselAuditLogRepository::new(pool.clone())),
        }
    }
}

/// Pick the repositories for `settings`.
///
/// # Errors
/// Migration and pool failures are fatal at startup.
pub(crate) async fn build_repositories(settings: &AppSettings) -> io::Result<Repositories> {
    let Some(url) = settings.database_url() else {
        warn!("ERASURE_DATABASE_URL not set; using the in-memory store (development only)");
        return Ok(Repositories::in_memory());
    };
    run_pending_migrations(url).await.map_err(io::Error::other)?;
    let pool = DbPool::new(PoolConfig::new(url))
        .await
        .map_err(io::Error::other)?;
    Ok(Repositories::diesel(&pool))
}

/// Pick the email transport for `settings`.
///
/// # Errors
/// Half-configured providers and client construction failures.
pub(crate) fn build_transport(settings: &AppSettings) -> io::Result<Arc<dyn EmailTransport>> {
    match settings.email_provider().map_err(settings_error)? {
        Some(provider) => {
            info!(endpoint = %provider.endpoint, "email delivery provider configured");
            let transport = HttpEmailTransport::new(
                ProviderCredentials {
                    endpoint: provider.endpoint,
                    api_key: provider.api_key,
                },
                provider.timeout,
            )
            .map_err(io::Error::other)?;
            Ok(Arc::new(transport))
        }
        None => {
            warn!("no email provider configured; outbound emails are logged only");
            Ok(Arc::new(LoggingEmailTransport::new()))
        }
    }
}

/// Wired services: the HTTP state and the scheduler the periodic driver
/// runs.
pub(crate) struct Services {
    pub(crate) http_state: HttpState,
    pub(crate) scheduler: Arc<AutomationScheduler>,
}

/// Build every domain service over `repositories` and `transport`.
///
/// # Errors
/// Invalid settings, a rejected signing secret or reply patterns that fail
/// to compile.
pub(crate) fn build_services(
    settings: &AppSettings,
    repositories: Repositories,
    transport: Arc<dyn EmailTransport>,
    secret: &SigningSecret,
) -> io::Result<Services> {
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let Repositories {
        requests,
        inbound_emails,
        audit,
    } = repositories;

    let lifecycle = RequestLifecycle::new(requests, clock.clone());
    let codec = Arc::new(
        TokenCodec::new(secret, clock.clone())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?,
    );
    let dispatcher = Arc::new(OutboundDispatcher::new(
        lifecycle.clone(),
        transport,
        codec.clone(),
        settings.dispatcher_config().map_err(settings_error)?,
    ));
    let classifier = Arc::new(ReplyClassifier::standard().map_err(io::Error::other)?);
    let ingestor = Arc::new(
        WebhookIngestor::new(lifecycle.clone(), inbound_emails.clone(), classifier)
            .with_shared_secret(settings.webhook_secret().map(str::to_owned)),
    );
    let confirmations = Arc::new(ConfirmationService::new(
        lifecycle.clone(),
        codec,
        Arc::new(RateLimiter::per_minute(
            settings.confirm_rate_limit_per_minute(),
            clock,
        )),
    ));
    let scheduler = Arc::new(AutomationScheduler::new(
        lifecycle.clone(),
        dispatcher.clone(),
        settings.scheduler_config().map_err(settings_error)?,
    ));

    let admin_token = settings.admin_token().and_then(AdminToken::new);
    if admin_token.is_none() {
        warn!("ERASURE_ADMIN_TOKEN not set; admin API disabled");
    }
    if settings.webhook_secret().is_none() {
        warn!("ERASURE_WEBHOOK_SECRET not set; webhook accepts unauthenticated deliveries");
    }

    let http_state = HttpState::new(HttpStatePorts {
        lifecycle,
        dispatcher,
        confirmations,
        ingestor,
        scheduler: scheduler.clone(),
        audit,
        inbound_emails,
    })
    .with_admin_token(admin_token)
    .with_trust_forwarded_for(settings.trust_forwarded_for);

    Ok(Services {
        http_state,
        scheduler,
    })
}
