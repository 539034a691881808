//! Port for the external email delivery provider.
//!
//! The provider is reached through a single narrow operation: hand over a
//! composed message, get back the provider's message id.

use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors raised by email transport adapters.
    pub enum EmailTransportError {
        /// The provider did not answer in time.
        Timeout { message: String } => "email provider timed out: {message}",
        /// Network failure or provider-side error worth retrying.
        Unavailable { message: String } => "email provider unavailable: {message}",
        /// The provider refused the message; retrying will not help.
        Rejected { message: String } => "email provider rejected message: {message}",
        /// The provider answered with something unreadable.
        InvalidResponse { message: String } => "email provider response invalid: {message}",
    }
}

impl EmailTransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }
}

/// A fully composed outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub cc: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
    /// Extra headers in send order (`Message-ID`, `X-Track-ID`, ...).
    pub headers: Vec<(String, String)>,
}

impl OutboundEmail {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Deliver `email`, returning the provider's message id.
    async fn send(&self, email: &OutboundEmail) -> Result<String, EmailTransportError>;
}

/// Fixture transport that accepts everything.
#[derive(Debug, Default)]
pub struct FixtureEmailTransport;

#[async_trait]
impl EmailTransport for FixtureEmailTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<String, EmailTransportError> {
        Ok(format!(
            "fixture-{}",
            email.header("Message-ID").unwrap_or("message")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(EmailTransportError::timeout("slow"), true)]
    #[case(EmailTransportError::unavailable("503"), true)]
    #[case(EmailTransportError::rejected("bad address"), false)]
    #[case(EmailTransportError::invalid_response("not json"), false)]
    fn retryability(#[case] error: EmailTransportError, #[case] retryable: bool) {
        assert_eq!(error.is_retryable(), retryable);
    }

    #[rstest]
    fn header_lookup_ignores_case() {
        let email = OutboundEmail {
            from: "a@x.example".to_owned(),
            to: "b@y.example".to_owned(),
            cc: Vec::new(),
            subject: "s".to_owned(),
            html: String::new(),
            text: String::new(),
            headers: vec![("X-Track-ID".to_owned(), "trk_1".to_owned())],
        };
        assert_eq!(email.header("x-track-id"), Some("trk_1"));
        assert_eq!(email.header("References"), None);
    }
}
