//! Shared doubles for unit tests: a settable clock, retry runtime stubs, a
//! scripted email transport and a wired-up service bundle over the
//! in-memory store.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use mockable::Clock;
use url::Url;

use crate::domain::ports::{EmailTransport, EmailTransportError, OutboundEmail};
use crate::domain::{
    AutomationScheduler, BackoffJitter, ConfirmationService, DispatchSleeper, DispatcherConfig,
    DispatcherRuntime, OutboundDispatcher, RateLimiter, ReplyClassifier, RequestLifecycle,
    SchedulerConfig, SigningSecret, TokenCodec, WebhookIngestor,
};
use crate::outbound::persistence::InMemoryStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// 2026-01-01T00:00:00Z
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .expect("valid epoch")
}

pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance_seconds(&self, seconds: i64) {
        *lock(&self.0) += TimeDelta::seconds(seconds);
    }

    pub fn advance_days(&self, days: i64) {
        *lock(&self.0) += TimeDelta::days(days);
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *lock(&self.0) = now;
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *lock(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateSleeper;

#[async_trait]
impl DispatchSleeper for ImmediateSleeper {
    async fn sleep(&self, _duration: Duration) {}
}

#[derive(Default)]
pub struct RecordingSleeper(pub Mutex<Vec<Duration>>);

#[async_trait]
impl DispatchSleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        lock(&self.0).push(duration);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl BackoffJitter for NoJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32) -> Duration {
        base
    }
}

/// Transport that records every message and replays scripted failures
/// before succeeding.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutboundEmail>>,
    failures: Mutex<VecDeque<EmailTransportError>>,
}

impl RecordingTransport {
    pub fn failing_with(errors: impl IntoIterator<Item = EmailTransportError>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failures: Mutex::new(errors.into_iter().collect()),
        }
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        lock(&self.sent).clone()
    }

    pub fn attempts(&self) -> usize {
        self.sent().len()
    }
}

#[async_trait]
impl EmailTransport for RecordingTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<String, EmailTransportError> {
        lock(&self.sent).push(email.clone());
        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }
        Ok(format!("provider-{}", self.attempts()))
    }
}

/// Services wired over one in-memory store, a mutable clock and a
/// recording transport.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<MutableClock>,
    pub transport: Arc<RecordingTransport>,
    pub sleeper: Arc<RecordingSleeper>,
    pub lifecycle: RequestLifecycle,
    pub codec: Arc<TokenCodec>,
    pub dispatcher: Arc<OutboundDispatcher>,
    pub classifier: Arc<ReplyClassifier>,
    pub ingestor: Arc<WebhookIngestor>,
    pub confirmations: Arc<ConfirmationService>,
    pub scheduler: Arc<AutomationScheduler>,
}

/// Confirmation attempts allowed per client per minute in the harness.
pub const CONFIRM_LIMIT: u32 = 10;

impl Harness {
    pub fn new() -> Self {
        Self::with_transport(RecordingTransport::default())
    }

    pub fn with_transport(transport: RecordingTransport) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(MutableClock::new(epoch()));
        let transport = Arc::new(transport);
        let sleeper = Arc::new(RecordingSleeper::default());
        let lifecycle = RequestLifecycle::new(store.clone(), clock.clone());
        let codec = Arc::new(
            TokenCodec::new(&SigningSecret::new(vec![42; 32]), clock.clone())
                .expect("test secret is valid"),
        );
        let dispatcher = Arc::new(OutboundDispatcher::with_runtime(
            lifecycle.clone(),
            transport.clone(),
            codec.clone(),
            DispatcherRuntime {
                sleeper: sleeper.clone(),
                jitter: Arc::new(NoJitter),
            },
            dispatcher_config(),
        ));
        let classifier = Arc::new(ReplyClassifier::standard().expect("patterns compile"));
        let ingestor = Arc::new(WebhookIngestor::new(
            lifecycle.clone(),
            store.clone(),
            classifier.clone(),
        ));
        let confirmations = Arc::new(ConfirmationService::new(
            lifecycle.clone(),
            codec.clone(),
            Arc::new(RateLimiter::per_minute(CONFIRM_LIMIT, clock.clone())),
        ));
        let scheduler = Arc::new(AutomationScheduler::new(
            lifecycle.clone(),
            dispatcher.clone(),
            SchedulerConfig::default(),
        ));
        Self {
            store,
            clock,
            transport,
            sleeper,
            lifecycle,
            codec,
            dispatcher,
            classifier,
            ingestor,
            confirmations,
            scheduler,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn dispatcher_config() -> DispatcherConfig {
    let mut config =
        DispatcherConfig::new(Url::parse("https://erasure.example/").expect("base url"));
    config.regulator_address = "complaints@regulator.example".to_owned();
    config.message_id_domain = "mail.erasure.example".to_owned();
    config
}

/// A valid creation draft for `operator_email`.
pub fn draft(operator_email: &str) -> crate::domain::NewDeletionRequest {
    crate::domain::NewDeletionRequest {
        user_id: uuid::Uuid::new_v4(),
        broker_name: "Acme Data".to_owned(),
        broker_url: "https://acme.example".to_owned(),
        operator_email: operator_email.to_owned(),
        personal_data_categories: vec!["email".to_owned(), "phone".to_owned()],
    }
}

pub mod cap_fs {
    //! Capability-based file writes for configuration tests.

    use std::io;
    use std::path::Path;

    use cap_std::{ambient_authority, fs::Dir};

    pub fn write_file(path: &Path, contents: &[u8]) -> io::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::other("path has no parent"))?;
        let name = path
            .file_name()
            .ok_or_else(|| io::Error::other("path has no file name"))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
        dir.write(name, contents)
    }
}
