//! Confirmation token records.
//!
//! The signed string itself is produced by the token codec; this record is
//! what the store keeps so a token can be consumed exactly once.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::deletion_request::DeletionRequestId;

/// What a confirmation link authorises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    /// Operator confirms the personal data was deleted.
    ConfirmDeletion,
}

impl TokenPurpose {
    /// Wire code embedded in the signed payload.
    pub fn code(self) -> u8 {
        match self {
            Self::ConfirmDeletion => 1,
        }
    }

    /// Inverse of [`TokenPurpose::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::ConfirmDeletion),
            _ => None,
        }
    }

    /// Stable storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfirmDeletion => "confirm_deletion",
        }
    }

    /// Parse the storage representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "confirm_deletion" => Some(Self::ConfirmDeletion),
            _ => None,
        }
    }
}

impl fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consumption state of the confirmation link issued for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationToken {
    pub deletion_request_id: DeletionRequestId,
    pub purpose: TokenPurpose,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub used_from_ip: Option<String>,
}

impl ConfirmationToken {
    /// Record a newly issued, unused token.
    pub fn issued(
        deletion_request_id: DeletionRequestId,
        purpose: TokenPurpose,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            deletion_request_id,
            purpose,
            issued_at,
            expires_at,
            used: false,
            used_at: None,
            used_from_ip: None,
        }
    }

    /// Record a later issuance for the same request and purpose.
    ///
    /// The validity window moves forward; a consumed token stays consumed.
    pub fn reissue(&mut self, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) {
        self.issued_at = issued_at;
        self.expires_at = self.expires_at.max(expires_at);
    }

    /// Whether the record still accepts a confirmation at `now`.
    pub fn is_consumable(&self, now: DateTime<Utc>) -> bool {
        !self.used && now < self.expires_at
    }

    /// Mark the token consumed. Returns `false` when it already was.
    pub fn consume(&mut self, now: DateTime<Utc>, ip: Option<String>) -> bool {
        if self.used {
            return false;
        }
        self.used = true;
        self.used_at = Some(now);
        self.used_from_ip = ip;
        true
    }
}
