//! Transport that records messages in the log instead of delivering them.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::domain::ports::{EmailTransport, EmailTransportError, OutboundEmail};

/// Development transport: logs recipients and headers, never the body.
#[derive(Debug, Default)]
pub struct LoggingEmailTransport {
    sent: AtomicU64,
}

impl LoggingEmailTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmailTransport for LoggingEmailTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<String, EmailTransportError> {
        let sequence = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        let provider_id = format!("logged-{sequence}");
        info!(
            provider_id,
            to = %email.to,
            cc = ?email.cc,
            subject = %email.subject,
            message_id = email.header("Message-ID").unwrap_or_default(),
            track_id = email.header("X-Track-ID").unwrap_or_default(),
            "email delivery disabled; message logged only"
        );
        Ok(provider_id)
    }
}
