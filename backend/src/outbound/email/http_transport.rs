//! Reqwest-backed delivery provider adapter.
//!
//! Posts one JSON document per message to the provider endpoint and reads
//! the provider's message id from the response. The adapter owns transport
//! details only: serialisation, bearer authentication, timeout and mapping
//! HTTP failures to retryable or permanent port errors.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::domain::ports::{EmailTransport, EmailTransportError, OutboundEmail};

const USER_AGENT: &str = concat!("erasure-engine/", env!("CARGO_PKG_VERSION"));

/// Provider endpoint and API key.
pub struct ProviderCredentials {
    pub endpoint: Url,
    pub api_key: Zeroizing<String>,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Request body accepted by the provider.
#[derive(Debug, Serialize)]
struct SendRequestDto<'a> {
    from: &'a str,
    to: [&'a str; 1],
    #[serde(skip_serializing_if = "no_cc")]
    cc: &'a [String],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
    headers: BTreeMap<&'a str, &'a str>,
}

impl<'a> From<&'a OutboundEmail> for SendRequestDto<'a> {
    fn from(email: &'a OutboundEmail) -> Self {
        Self {
            from: &email.from,
            to: [&email.to],
            cc: &email.cc,
            subject: &email.subject,
            html: &email.html,
            text: &email.text,
            headers: email
                .headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str()))
                .collect(),
        }
    }
}

fn no_cc(cc: &&[String]) -> bool {
    cc.is_empty()
}

#[derive(Debug, Deserialize)]
struct SendResponseDto {
    id: String,
}

/// Delivery provider reached over HTTPS.
pub struct HttpEmailTransport {
    client: Client,
    credentials: ProviderCredentials,
}

impl HttpEmailTransport {
    /// Build the adapter with a client-level request timeout.
    ///
    /// # Errors
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(credentials: ProviderCredentials, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            credentials,
        })
    }
}

#[async_trait]
impl EmailTransport for HttpEmailTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<String, EmailTransportError> {
        let response = self
            .client
            .post(self.credentials.endpoint.clone())
            .bearer_auth(self.credentials.api_key.as_str())
            .json(&SendRequestDto::from(email))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, body.as_ref()));
        }
        let provider_id = parse_provider_id(body.as_ref())?;
        debug!(provider_id, to = %email.to, "provider accepted message");
        Ok(provider_id)
    }
}

fn parse_provider_id(body: &[u8]) -> Result<String, EmailTransportError> {
    let decoded: SendResponseDto = serde_json::from_slice(body).map_err(|error| {
        EmailTransportError::invalid_response(format!("unexpected provider payload: {error}"))
    })?;
    let id = decoded.id.trim();
    if id.is_empty() {
        return Err(EmailTransportError::invalid_response(
            "provider returned an empty message id",
        ));
    }
    Ok(id.to_owned())
}

fn map_transport_error(error: reqwest::Error) -> EmailTransportError {
    if error.is_timeout() {
        EmailTransportError::timeout(error.to_string())
    } else {
        EmailTransportError::unavailable(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &[u8]) -> EmailTransportError {
    let preview = body_preview(body);
    let message = if preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {preview}", status.as_u16())
    };

    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            EmailTransportError::timeout(message)
        }
        StatusCode::TOO_MANY_REQUESTS => EmailTransportError::unavailable(message),
        _ if status.is_client_error() => EmailTransportError::rejected(message),
        _ => EmailTransportError::unavailable(message),
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let mut preview: String = compact.chars().take(PREVIEW_CHAR_LIMIT).collect();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    //! Non-network coverage for payload shaping and error mapping.

    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn email(cc: Vec<String>) -> OutboundEmail {
        OutboundEmail {
            from: "privacy@erasure.example".to_owned(),
            to: "dpo@acme.example".to_owned(),
            cc,
            subject: "Erasure request".to_owned(),
            html: "<p>Please erase</p>".to_owned(),
            text: "Please erase".to_owned(),
            headers: vec![
                ("Message-ID".to_owned(), "<initial.trk_1@erasure.example>".to_owned()),
                ("X-Track-ID".to_owned(), "trk_1".to_owned()),
            ],
        }
    }

    #[rstest]
    fn request_body_carries_headers_and_omits_empty_cc() {
        let message = email(Vec::new());
        let body = serde_json::to_value(SendRequestDto::from(&message)).expect("serialise");

        assert_eq!(
            body,
            json!({
                "from": "privacy@erasure.example",
                "to": ["dpo@acme.example"],
                "subject": "Erasure request",
                "html": "<p>Please erase</p>",
                "text": "Please erase",
                "headers": {
                    "Message-ID": "<initial.trk_1@erasure.example>",
                    "X-Track-ID": "trk_1",
                },
            })
        );
    }

    #[rstest]
    fn escalation_body_lists_cc() {
        let message = email(vec!["complaints@regulator.example".to_owned()]);
        let body = serde_json::to_value(SendRequestDto::from(&message)).expect("serialise");
        assert_eq!(body["cc"], json!(["complaints@regulator.example"]));
    }

    #[rstest]
    #[case::ok(br#"{"id": "msg_123"}"#.as_slice(), Some("msg_123"))]
    #[case::padded(br#"{"id": "  msg_9 ", "extra": true}"#.as_slice(), Some("msg_9"))]
    #[case::blank(br#"{"id": "  "}"#.as_slice(), None)]
    #[case::missing(br#"{"messageId": "x"}"#.as_slice(), None)]
    #[case::not_json(b"accepted".as_slice(), None)]
    fn provider_id_parsing(#[case] body: &[u8], #[case] expected: Option<&str>) {
        match (parse_provider_id(body), expected) {
            (Ok(id), Some(want)) => assert_eq!(id, want),
            (Err(error), None) => {
                assert!(matches!(error, EmailTransportError::InvalidResponse { .. }));
            }
            (other, want) => panic!("unexpected {other:?} for {want:?}"),
        }
    }

    #[rstest]
    #[case::rate_limited(StatusCode::TOO_MANY_REQUESTS, true)]
    #[case::gateway_timeout(StatusCode::GATEWAY_TIMEOUT, true)]
    #[case::server_error(StatusCode::INTERNAL_SERVER_ERROR, true)]
    #[case::bad_request(StatusCode::UNPROCESSABLE_ENTITY, false)]
    #[case::unauthorised(StatusCode::UNAUTHORIZED, false)]
    fn statuses_map_to_retryability(#[case] status: StatusCode, #[case] retryable: bool) {
        let error = map_status_error(status, br#"{"error": "nope"}"#);
        assert_eq!(error.is_retryable(), retryable);
        assert!(error.to_string().contains(&status.as_u16().to_string()));
    }

    #[rstest]
    fn long_bodies_are_truncated_in_errors() {
        let body = "x".repeat(500);
        let preview = body_preview(body.as_bytes());
        assert_eq!(preview.chars().count(), 163);
        assert!(preview.ends_with("..."));
    }

    #[rstest]
    fn credentials_debug_hides_the_key() {
        let credentials = ProviderCredentials {
            endpoint: Url::parse("https://mail.example/send").expect("url"),
            api_key: Zeroizing::new("sk_live_secret".to_owned()),
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("sk_live_secret"));
    }
}
