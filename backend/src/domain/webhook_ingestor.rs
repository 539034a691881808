//! Inbound webhook ingestion: parse, persist, correlate, classify, apply.
//!
//! Provider payloads are untrusted. Parsing is a total function from bytes to
//! a list of events: anything that is not a JSON array of event objects
//! yields no events, and array elements of the wrong shape are dropped one by
//! one. Nothing here turns payload content into an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use super::lifecycle::{Decision, RequestLifecycle, reply_target};
use super::ports::{
    DeletionRequestRepository, InboundAnalysis, InboundEmailRepository,
    InboundEmailRepositoryError,
};
use super::{
    Actor, AuditAction, AuditLogEntry, Classification, CorrelationHeaders, DeletionRequestId,
    Error, InboundEmail, ReplyClassifier, ReplyIntent,
};

/// Largest webhook body that is parsed at all.
pub const MAX_WEBHOOK_BODY_BYTES: usize = 1024 * 1024;

/// One provider-normalised email event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    /// Sender address.
    pub email: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub headers: CorrelationHeaders,
}

#[derive(Deserialize)]
struct RawEvent {
    email: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    headers: Option<BTreeMap<String, Value>>,
}

impl RawEvent {
    fn into_event(self) -> Option<WebhookEvent> {
        let email = self.email.trim().to_owned();
        if email.is_empty() {
            return None;
        }
        let headers = CorrelationHeaders::from_pairs(
            self.headers
                .unwrap_or_default()
                .into_iter()
                .filter_map(|(name, value)| match value {
                    Value::String(value) => Some((name, value)),
                    _ => None,
                }),
        );
        Some(WebhookEvent {
            email,
            subject: self.subject.unwrap_or_default(),
            text: self.text.unwrap_or_default(),
            html: self.html.unwrap_or_default(),
            headers,
        })
    }
}

/// Result of parsing a raw webhook body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookPayload {
    /// A JSON array; `dropped` elements had the wrong shape.
    Events {
        events: Vec<WebhookEvent>,
        dropped: usize,
    },
    /// Not something we can read: oversize, not JSON, null, not an array.
    Unreadable { reason: &'static str },
}

impl WebhookPayload {
    /// Parse `body` without ever failing.
    ///
    /// # Examples
    /// ```
    /// use erasure_engine::domain::WebhookPayload;
    ///
    /// let payload = WebhookPayload::parse(br#"[{"email": "dpo@acme.example"}, 42]"#);
    /// assert_eq!(payload.events().len(), 1);
    /// assert!(WebhookPayload::parse(b"null").events().is_empty());
    /// ```
    pub fn parse(body: &[u8]) -> Self {
        if body.len() > MAX_WEBHOOK_BODY_BYTES {
            return Self::Unreadable {
                reason: "body too large",
            };
        }
        if body.iter().all(u8::is_ascii_whitespace) {
            return Self::Unreadable {
                reason: "empty body",
            };
        }
        let value = match serde_json::from_slice::<Value>(body) {
            Ok(value) => value,
            Err(_) => {
                return Self::Unreadable {
                    reason: "body is not JSON",
                };
            }
        };
        let Value::Array(items) = value else {
            return Self::Unreadable {
                reason: "body is not an array",
            };
        };

        let total = items.len();
        let events: Vec<_> = items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<RawEvent>(item).ok())
            .filter_map(RawEvent::into_event)
            .collect();
        Self::Events {
            dropped: total - events.len(),
            events,
        }
    }

    pub fn events(&self) -> &[WebhookEvent] {
        match self {
            Self::Events { events, .. } => events,
            Self::Unreadable { .. } => &[],
        }
    }

    fn into_events(self) -> Vec<WebhookEvent> {
        match self {
            Self::Events { events, .. } => events,
            Self::Unreadable { .. } => Vec::new(),
        }
    }
}

/// Turns webhook deliveries into stored, correlated, classified replies.
pub struct WebhookIngestor {
    lifecycle: RequestLifecycle,
    emails: Arc<dyn InboundEmailRepository>,
    classifier: Arc<ReplyClassifier>,
    shared_secret: Option<Zeroizing<String>>,
}

impl WebhookIngestor {
    pub fn new(
        lifecycle: RequestLifecycle,
        emails: Arc<dyn InboundEmailRepository>,
        classifier: Arc<ReplyClassifier>,
    ) -> Self {
        Self {
            lifecycle,
            emails,
            classifier,
            shared_secret: None,
        }
    }

    /// Require `X-Webhook-Secret` to equal `secret` on every delivery.
    #[must_use]
    pub fn with_shared_secret(mut self, secret: Option<String>) -> Self {
        self.shared_secret = secret
            .filter(|value| !value.is_empty())
            .map(Zeroizing::new);
        self
    }

    /// Whether `provided` satisfies the configured shared secret.
    ///
    /// Always true when no secret is configured.
    pub fn authenticates(&self, provided: Option<&str>) -> bool {
        match (&self.shared_secret, provided) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(expected), Some(provided)) => {
                expected.as_bytes().ct_eq(provided.as_bytes()).into()
            }
        }
    }

    /// Parse and ingest a raw webhook body.
    ///
    /// # Errors
    /// Only `service_unavailable`, when the inbound store cannot be reached
    /// at all; the provider should then redeliver.
    pub async fn ingest(&self, body: &[u8]) -> Result<Vec<InboundEmail>, Error> {
        let payload = WebhookPayload::parse(body);
        match &payload {
            WebhookPayload::Unreadable { reason } => {
                warn!(reason, bytes = body.len(), "ignoring unreadable webhook payload");
            }
            WebhookPayload::Events { events, dropped } if *dropped > 0 => {
                warn!(
                    dropped,
                    accepted = events.len(),
                    "dropped malformed webhook events"
                );
            }
            WebhookPayload::Events { .. } => {}
        }
        self.ingest_events(payload.into_events()).await
    }

    /// Ingest already-parsed events, in order.
    pub async fn ingest_events(
        &self,
        events: Vec<WebhookEvent>,
    ) -> Result<Vec<InboundEmail>, Error> {
        let mut stored = Vec::with_capacity(events.len());
        for event in events {
            if let Some(email) = self.ingest_one(event).await? {
                stored.push(email);
            }
        }
        Ok(stored)
    }

    async fn ingest_one(&self, event: WebhookEvent) -> Result<Option<InboundEmail>, Error> {
        let now = self.lifecycle.now();
        let mut email = InboundEmail::received(
            event.email,
            event.subject,
            event.text,
            event.html,
            event.headers,
            now,
        );
        email.deletion_request_id = self.correlate(&email.correlation_headers).await;

        let mut receipt = AuditLogEntry::new(AuditAction::InboundReceived, Actor::Webhook, now)
            .with_details(json!({
                "inboundEmailId": email.id,
                "from": email.operator_email,
                "subject": email.subject,
                "correlated": email.deletion_request_id.is_some(),
            }));
        if let Some(id) = email.deletion_request_id {
            receipt = receipt.for_request(id);
        }
        match self.emails.insert(&email, &[receipt]).await {
            Ok(()) => {}
            Err(InboundEmailRepositoryError::Connection { message }) => {
                error!(%message, "inbound email store unreachable");
                return Err(Error::service_unavailable("inbound email store unavailable"));
            }
            Err(err) => {
                error!(error = %err, inbound_email_id = %email.id, "failed to store inbound email");
                return Ok(None);
            }
        }

        let Classification {
            intent,
            rejection_reason,
        } = self
            .classifier
            .classify(&email.subject, &email.raw_text, &email.raw_html);
        email.parsed_status = intent;
        email.rejection_reason = rejection_reason;
        let analysis = InboundAnalysis {
            intent,
            rejection_reason: email.rejection_reason.clone(),
            deletion_request_id: email.deletion_request_id,
        };
        if let Err(err) = self.emails.record_analysis(&email.id, &analysis).await {
            warn!(error = %err, inbound_email_id = %email.id, "failed to store classification");
        }

        match email.deletion_request_id {
            Some(request_id) => self.apply_reply(request_id, &email).await,
            None => {
                info!(
                    inbound_email_id = %email.id,
                    %intent,
                    "inbound email matched no request; kept for triage"
                );
            }
        }
        Ok(Some(email))
    }

    /// `In-Reply-To`/`References` ids first, then `X-Track-ID`.
    async fn correlate(&self, headers: &CorrelationHeaders) -> Option<DeletionRequestId> {
        let repo = self.lifecycle.repository();
        for message_id in headers.referenced_message_ids() {
            match repo.find_by_message_id(message_id).await {
                Ok(Some(request)) => {
                    debug!(%message_id, deletion_request_id = %request.id, "correlated by message id");
                    return Some(request.id);
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "message id lookup failed"),
            }
        }
        let track_id = headers.track_id()?;
        match repo.find_by_tracking_id(track_id).await {
            Ok(Some(request)) => {
                debug!(%track_id, deletion_request_id = %request.id, "correlated by tracking id");
                Some(request.id)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "tracking id lookup failed");
                None
            }
        }
    }

    async fn apply_reply(&self, request_id: DeletionRequestId, email: &InboundEmail) {
        let intent = email.parsed_status;
        let result = self
            .lifecycle
            .apply(&request_id, Actor::Webhook, |request, now| {
                if request.status.is_terminal() {
                    return Ok(Decision::Skip(None));
                }
                let mut next = request.clone();
                next.last_reply_at = Some(now);
                let mut audit = Vec::new();
                if let Some(target) = reply_target(intent) {
                    next.transition_to(target)
                        .map_err(|err| Error::conflict(err.to_string()))?;
                    let action = match intent {
                        ReplyIntent::Deleted => AuditAction::ReplyResolved,
                        _ => AuditAction::ReplyClosed,
                    };
                    audit.push(
                        AuditLogEntry::new(action, Actor::Webhook, now)
                            .for_request(request_id)
                            .with_details(json!({
                                "inboundEmailId": email.id,
                                "intent": intent,
                                "from": request.status,
                                "rejectionReason": email.rejection_reason,
                            })),
                    );
                }
                let moved_to = (next.status != request.status).then_some(next.status);
                Ok(Decision::write(next, audit, moved_to))
            })
            .await;

        match result {
            Ok(Some(status)) => info!(
                deletion_request_id = %request_id,
                inbound_email_id = %email.id,
                %intent,
                %status,
                "reply moved request"
            ),
            Ok(None) => debug!(
                deletion_request_id = %request_id,
                inbound_email_id = %email.id,
                %intent,
                "reply recorded without transition"
            ),
            Err(err) => error!(
                deletion_request_id = %request_id,
                inbound_email_id = %email.id,
                error = %err,
                "failed to apply reply to request"
            ),
        }
    }
}

#[cfg(test)]
#[path = "webhook_ingestor_tests.rs"]
mod tests;
