//! Inbound operator replies received through the delivery-provider webhook.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::deletion_request::DeletionRequestId;

pub const IN_REPLY_TO: &str = "in-reply-to";
pub const REFERENCES: &str = "references";
pub const X_TRACK_ID: &str = "x-track-id";

/// Identifier of a persisted inbound email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InboundEmailId(Uuid);

impl InboundEmailId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for InboundEmailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Intent of an operator reply as decided by the reply classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReplyIntent {
    Deleted,
    Rejected,
    NeedInfo,
    Unknown,
}

impl ReplyIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deleted => "deleted",
            Self::Rejected => "rejected",
            Self::NeedInfo => "need_info",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "deleted" => Some(Self::Deleted),
            "rejected" => Some(Self::Rejected),
            "need_info" => Some(Self::NeedInfo),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for ReplyIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Correlation-relevant headers with case-insensitive lookup.
///
/// Names are stored lowercased; values are kept verbatim.
///
/// # Examples
/// ```
/// use erasure_engine::domain::CorrelationHeaders;
///
/// let headers = CorrelationHeaders::from_pairs([
///     ("In-Reply-To", "<initial.trk_1@mail.example>"),
///     ("references", "<a@x> <b@y>"),
/// ]);
/// assert_eq!(headers.get("IN-REPLY-TO"), Some("<initial.trk_1@mail.example>"));
/// assert_eq!(headers.referenced_message_ids(), vec![
///     "<initial.trk_1@mail.example>",
///     "<a@x>",
///     "<b@y>",
/// ]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationHeaders(BTreeMap<String, String>);

impl CorrelationHeaders {
    /// Build from name/value pairs; later duplicates win.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(name, value)| (name.as_ref().trim().to_ascii_lowercase(), value.into()))
                .filter(|(name, _)| !name.is_empty())
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `<id>` tokens from `In-Reply-To` then `References`, deduplicated in
    /// order of appearance.
    pub fn referenced_message_ids(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for name in [IN_REPLY_TO, REFERENCES] {
            let Some(value) = self.get(name) else {
                continue;
            };
            for token in message_id_tokens(value) {
                if !seen.contains(&token) {
                    seen.push(token);
                }
            }
        }
        seen
    }

    /// Trimmed `X-Track-ID` value, when present and non-empty.
    pub fn track_id(&self) -> Option<&str> {
        self.get(X_TRACK_ID)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Extract every `<...>` token from a header value.
fn message_id_tokens(value: &str) -> impl Iterator<Item = &str> {
    value.match_indices('<').filter_map(move |(start, _)| {
        let rest = value.get(start..)?;
        let end = rest.find('>')?;
        let token = rest.get(..=end)?;
        (token.len() > 2 && !token.get(1..)?.contains('<')).then_some(token)
    })
}

/// Raw reply as received, plus its classification and correlation.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEmail {
    pub id: InboundEmailId,
    /// Sender address as reported by the provider.
    pub operator_email: String,
    pub subject: String,
    pub raw_text: String,
    pub raw_html: String,
    pub correlation_headers: CorrelationHeaders,
    pub parsed_status: ReplyIntent,
    pub rejection_reason: Option<String>,
    pub deletion_request_id: Option<DeletionRequestId>,
    pub received_at: DateTime<Utc>,
}

impl InboundEmail {
    /// A freshly received, not yet classified or correlated reply.
    pub fn received(
        operator_email: String,
        subject: String,
        raw_text: String,
        raw_html: String,
        correlation_headers: CorrelationHeaders,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: InboundEmailId::random(),
            operator_email,
            subject,
            raw_text,
            raw_html,
            correlation_headers,
            parsed_status: ReplyIntent::Unknown,
            rejection_reason: None,
            deletion_request_id: None,
            received_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("<a@x>", vec!["<a@x>"])]
    #[case("  <a@x>\r\n\t<b@y> ", vec!["<a@x>", "<b@y>"])]
    #[case("<>", vec![])]
    #[case("no brackets", vec![])]
    #[case("<broken <c@z>", vec!["<c@z>"])]
    #[case("<unterminated", vec![])]
    fn extracts_message_id_tokens(#[case] raw: &str, #[case] expected: Vec<&str>) {
        assert_eq!(message_id_tokens(raw).collect::<Vec<_>>(), expected);
    }

    #[rstest]
    fn referenced_ids_prefer_in_reply_to_and_deduplicate() {
        let headers = CorrelationHeaders::from_pairs([
            ("References", "<first@x> <second@x>"),
            ("In-Reply-To", "<second@x>"),
        ]);
        assert_eq!(
            headers.referenced_message_ids(),
            vec!["<second@x>", "<first@x>"]
        );
    }

    #[rstest]
    fn track_id_is_case_insensitive_and_trimmed() {
        let headers = CorrelationHeaders::from_pairs([("x-TRACK-id", "  trk_abc  ")]);
        assert_eq!(headers.track_id(), Some("trk_abc"));
        assert_eq!(CorrelationHeaders::default().track_id(), None);
    }

    #[rstest]
    fn intents_parse_from_storage_strings() {
        for intent in [
            ReplyIntent::Deleted,
            ReplyIntent::Rejected,
            ReplyIntent::NeedInfo,
            ReplyIntent::Unknown,
        ] {
            assert_eq!(ReplyIntent::parse(intent.as_str()), Some(intent));
        }
    }
}
