//! Shared wiring for the end-to-end suites.
//!
//! [`Engine`] assembles every service over one in-memory store, a clock the
//! test moves by hand and a transport that records what it was asked to
//! send. Nothing here touches the network or a database.

#![allow(dead_code, reason = "each suite uses a different subset")]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::{App, web};
use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use mockable::Clock;
use url::Url;

use erasure_engine::Trace;
use erasure_engine::domain::ports::{EmailTransport, EmailTransportError, OutboundEmail};
use erasure_engine::domain::{
    Actor, AutomationScheduler, BackoffJitter, ConfirmationService, DeletionRequest,
    DeletionRequestId, DispatchSleeper, DispatcherConfig, DispatcherRuntime, NewDeletionRequest,
    OutboundDispatcher, RateLimiter, ReplyClassifier, RequestLifecycle, SchedulerConfig,
    SigningSecret, TokenCodec, WebhookIngestor,
};
use erasure_engine::inbound::http::auth::AdminToken;
use erasure_engine::inbound::http::health::HealthState;
use erasure_engine::inbound::http::state::{HttpState, HttpStatePorts};
use erasure_engine::outbound::persistence::InMemoryStore;

pub const ADMIN_TOKEN: &str = "integration-admin-token";
pub const REGULATOR: &str = "complaints@regulator.example";
pub const BROKER_DPO: &str = "privacy@acme.example";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance_days(&self, days: i64) {
        *lock(&self.0) += TimeDelta::days(days);
    }
}

impl Clock for ManualClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *lock(&self.0)
    }
}

struct NoWait;

#[async_trait]
impl DispatchSleeper for NoWait {
    async fn sleep(&self, _duration: Duration) {}
}

impl BackoffJitter for NoWait {
    fn jittered_delay(&self, base: Duration, _attempt: u32) -> Duration {
        base
    }
}

#[derive(Default)]
pub struct Outbox(Mutex<Vec<OutboundEmail>>);

impl Outbox {
    pub fn messages(&self) -> Vec<OutboundEmail> {
        lock(&self.0).clone()
    }

    pub fn last(&self) -> Option<OutboundEmail> {
        lock(&self.0).last().cloned()
    }
}

#[async_trait]
impl EmailTransport for Outbox {
    async fn send(&self, email: &OutboundEmail) -> Result<String, EmailTransportError> {
        let mut sent = lock(&self.0);
        sent.push(email.clone());
        Ok(format!("outbox-{}", sent.len()))
    }
}

/// 2026-03-02T09:00:00Z
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .expect("valid start instant")
}

pub struct Engine {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub outbox: Arc<Outbox>,
    pub lifecycle: RequestLifecycle,
    pub dispatcher: Arc<OutboundDispatcher>,
    pub ingestor: Arc<WebhookIngestor>,
    pub confirmations: Arc<ConfirmationService>,
    pub scheduler: Arc<AutomationScheduler>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_confirm_limit(1_000)
    }

    pub fn with_confirm_limit(per_minute: u32) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::starting_at(start()));
        let outbox = Arc::new(Outbox::default());
        let lifecycle = RequestLifecycle::new(store.clone(), clock.clone());
        let codec = Arc::new(
            TokenCodec::new(&SigningSecret::new(vec![9; 48]), clock.clone())
                .expect("secret accepted"),
        );

        let mut config = DispatcherConfig::new(
            Url::parse("https://erasure.example/").expect("base url parses"),
        );
        config.regulator_address = REGULATOR.to_owned();
        config.message_id_domain = "mail.erasure.example".to_owned();
        let no_wait = Arc::new(NoWait);
        let dispatcher = Arc::new(OutboundDispatcher::with_runtime(
            lifecycle.clone(),
            outbox.clone(),
            codec.clone(),
            DispatcherRuntime {
                sleeper: no_wait.clone(),
                jitter: no_wait,
            },
            config,
        ));

        let classifier = Arc::new(ReplyClassifier::standard().expect("patterns compile"));
        let ingestor = Arc::new(WebhookIngestor::new(
            lifecycle.clone(),
            store.clone(),
            classifier,
        ));
        let confirmations = Arc::new(ConfirmationService::new(
            lifecycle.clone(),
            codec,
            Arc::new(RateLimiter::per_minute(per_minute, clock.clone())),
        ));
        let scheduler = Arc::new(AutomationScheduler::new(
            lifecycle.clone(),
            dispatcher.clone(),
            SchedulerConfig::default(),
        ));

        Self {
            store,
            clock,
            outbox,
            lifecycle,
            dispatcher,
            ingestor,
            confirmations,
            scheduler,
        }
    }

    pub fn http_state(&self) -> HttpState {
        HttpState::new(HttpStatePorts {
            lifecycle: self.lifecycle.clone(),
            dispatcher: self.dispatcher.clone(),
            confirmations: self.confirmations.clone(),
            ingestor: self.ingestor.clone(),
            scheduler: self.scheduler.clone(),
            audit: self.store.clone(),
            inbound_emails: self.store.clone(),
        })
        .with_admin_token(AdminToken::new(ADMIN_TOKEN))
    }

    /// The full HTTP surface over this engine's services. The app owns its
    /// state, so it outlives the borrow of `self`.
    pub fn app(
        &self,
    ) -> App<
        impl ServiceFactory<
            ServiceRequest,
            Config = (),
            Response = ServiceResponse,
            Error = actix_web::Error,
            InitError = (),
        > + use<>,
    > {
        let health = HealthState::new();
        health.mark_ready();
        App::new()
            .app_data(web::Data::new(self.http_state()))
            .app_data(web::Data::new(health))
            .wrap(Trace)
            .configure(erasure_engine::inbound::http::configure)
    }

    /// Create a request and send its initial email.
    pub async fn sent_request(&self) -> DeletionRequest {
        let created = self
            .lifecycle
            .create(draft(), Actor::Admin)
            .await
            .expect("request created");
        self.dispatcher
            .send_initial(&created.id, Actor::Admin)
            .await
            .expect("initial email sent");
        self.request(&created.id).await
    }

    pub async fn request(&self, id: &DeletionRequestId) -> DeletionRequest {
        self.lifecycle
            .repository()
            .find_by_id(id)
            .await
            .expect("store reachable")
            .expect("request exists")
    }
}

pub fn draft() -> NewDeletionRequest {
    NewDeletionRequest {
        user_id: uuid::Uuid::new_v4(),
        broker_name: "Acme Data".to_owned(),
        broker_url: "https://acme.example".to_owned(),
        operator_email: BROKER_DPO.to_owned(),
        personal_data_categories: vec!["email".to_owned(), "postal address".to_owned()],
    }
}

/// The `token` query parameter of the confirmation link in `email`.
pub fn confirmation_token(email: &OutboundEmail) -> String {
    let link = email
        .text
        .lines()
        .find(|line| line.contains("/operator/confirm?"))
        .expect("email carries a confirmation link");
    Url::parse(link.trim())
        .expect("link parses")
        .query_pairs()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
        .expect("link carries a token")
}

pub fn confirm_uri(token: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
    format!("/operator/confirm?token={encoded}")
}

pub fn admin_auth() -> (&'static str, String) {
    ("authorization", format!("Bearer {ADMIN_TOKEN}"))
}
