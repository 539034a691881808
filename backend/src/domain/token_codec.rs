//! Signed, expiring confirmation tokens.
//!
//! A token is `base64url(payload || tag)` where the payload is
//!
//! ```text
//! version (1) | deletion request id (16) | purpose (1) | expires_at unix secs, big endian (8)
//! ```
//!
//! and `tag` is HMAC-SHA256 over the payload. The codec is stateless: it never
//! touches storage, so "already used" is decided by the store. Every
//! verification computes and compares a MAC, whatever the input looked like,
//! so malformed, tampered and expired tokens take the same path.

use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use mockable::Clock;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::confirmation_token::TokenPurpose;
use super::deletion_request::DeletionRequestId;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: u8 = 1;
const PAYLOAD_LEN: usize = 1 + 16 + 1 + 8;
const TAG_LEN: usize = 32;
const TOKEN_LEN: usize = PAYLOAD_LEN + TAG_LEN;
/// Longest encoded string worth decoding; anything longer is malformed.
const MAX_ENCODED_LEN: usize = 128;
const FINGERPRINT_BYTES: usize = 8;

/// Minimum secret length accepted outside development.
pub const MIN_SECRET_LEN: usize = 32;

/// Why a token was refused.
///
/// Callers must log the precise kind but only expose a generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token has expired")]
    Expired,
    #[error("token signature does not match")]
    SignatureMismatch,
    #[error("token was already used")]
    AlreadyUsed,
}

impl TokenError {
    /// Stable label for structured logs.
    pub fn kind(self) -> &'static str {
        match self {
            Self::Malformed => "token_malformed",
            Self::Expired => "token_expired",
            Self::SignatureMismatch => "token_signature_mismatch",
            Self::AlreadyUsed => "token_already_used",
        }
    }
}

/// Server-held HMAC key. Zeroed on drop and never printed.
#[derive(Clone)]
pub struct SigningSecret(Zeroizing<Vec<u8>>);

impl SigningSecret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Random secret for development runs; tokens die with the process.
    pub fn ephemeral() -> Self {
        let mut bytes = vec![0_u8; 64];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First eight bytes of SHA-256 over the secret, hex encoded.
    ///
    /// Safe to log; lets operators tell deployments' secrets apart.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_slice());
        hex::encode(digest.get(..FINGERPRINT_BYTES).unwrap_or_default())
    }

    fn expose(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningSecret")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Errors building a [`TokenCodec`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenCodecError {
    #[error("signing secret must not be empty")]
    EmptySecret,
    #[error("signing secret rejected by HMAC: {0}")]
    InvalidKey(String),
}

/// A freshly issued token string and its validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Claims carried by a verified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedToken {
    pub deletion_request_id: DeletionRequestId,
    pub purpose: TokenPurpose,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies confirmation tokens.
///
/// # Examples
/// ```
/// use std::sync::Arc;
///
/// use chrono::Duration;
/// use erasure_engine::domain::{DeletionRequestId, SigningSecret, TokenCodec, TokenPurpose};
/// use mockable::DefaultClock;
///
/// let codec = TokenCodec::new(&SigningSecret::new(vec![7; 32]), Arc::new(DefaultClock))
///     .expect("valid secret");
/// let id = DeletionRequestId::random();
/// let issued = codec.issue(id, TokenPurpose::ConfirmDeletion, Duration::days(45));
/// let claims = codec.verify(&issued.token).expect("fresh token verifies");
/// assert_eq!(claims.deletion_request_id, id);
/// ```
#[derive(Clone)]
pub struct TokenCodec {
    mac: HmacSha256,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(secret: &SigningSecret, clock: Arc<dyn Clock>) -> Result<Self, TokenCodecError> {
        if secret.is_empty() {
            return Err(TokenCodecError::EmptySecret);
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(secret.expose())
            .map_err(|err| TokenCodecError::InvalidKey(err.to_string()))?;
        Ok(Self { mac, clock })
    }

    /// Sign a token for `deletion_request_id` valid for `ttl` from now.
    ///
    /// Expiry is truncated to whole seconds.
    pub fn issue(
        &self,
        deletion_request_id: DeletionRequestId,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> IssuedToken {
        let issued_at = self.clock.utc();
        let expires_secs = issued_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .timestamp();
        let expires_at = from_unix(expires_secs).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut bytes = Vec::with_capacity(TOKEN_LEN);
        bytes.push(TOKEN_VERSION);
        bytes.extend_from_slice(deletion_request_id.as_uuid().as_bytes());
        bytes.push(purpose.code());
        bytes.extend_from_slice(&expires_secs.to_be_bytes());
        let tag = self.tag(&bytes);
        bytes.extend_from_slice(&tag);

        IssuedToken {
            token: URL_SAFE_NO_PAD.encode(&bytes),
            issued_at,
            expires_at,
        }
    }

    /// Check signature, structure and expiry.
    ///
    /// Does not know whether the token was consumed; callers consult the
    /// store and report [`TokenError::AlreadyUsed`] themselves.
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, TokenError> {
        let decoded = decode(token);
        let placeholder = [0_u8; TOKEN_LEN];
        let bytes: &[u8] = decoded.as_deref().unwrap_or(&placeholder);
        let (payload, tag) = bytes.split_at(PAYLOAD_LEN);

        let expected = self.tag(payload);
        let signature_ok: bool = expected.as_slice().ct_eq(tag).into();

        if decoded.is_none() {
            return Err(TokenError::Malformed);
        }
        if !signature_ok {
            return Err(TokenError::SignatureMismatch);
        }

        let claims = parse_payload(payload).ok_or(TokenError::Malformed)?;
        if self.clock.utc() >= claims.expires_at {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    fn tag(&self, payload: &[u8]) -> [u8; TAG_LEN] {
        let mut mac = self.mac.clone();
        mac.update(payload);
        let mut out = [0_u8; TAG_LEN];
        out.copy_from_slice(&mac.finalize().into_bytes());
        out
    }
}

fn decode(token: &str) -> Option<Vec<u8>> {
    let trimmed = token.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_ENCODED_LEN {
        return None;
    }
    URL_SAFE_NO_PAD
        .decode(trimmed.as_bytes())
        .ok()
        .filter(|bytes| bytes.len() == TOKEN_LEN)
}

fn parse_payload(payload: &[u8]) -> Option<VerifiedToken> {
    let (&version, rest) = payload.split_first()?;
    if version != TOKEN_VERSION {
        return None;
    }
    let (id_bytes, rest) = rest.split_at_checked(16)?;
    let (&purpose_code, expiry_bytes) = rest.split_first()?;
    let uuid = Uuid::from_slice(id_bytes).ok()?;
    let purpose = TokenPurpose::from_code(purpose_code)?;
    let expires_secs = i64::from_be_bytes(expiry_bytes.try_into().ok()?);
    Some(VerifiedToken {
        deletion_request_id: DeletionRequestId::from_uuid(uuid),
        purpose,
        expires_at: from_unix(expires_secs)?,
    })
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

#[cfg(test)]
#[path = "token_codec_tests.rs"]
mod tests;
