//! Service settings loaded via OrthoConfig.
//!
//! Values come from CLI flags, `ERASURE_*` environment variables and config
//! files. Every field is optional; accessors apply the documented defaults
//! and turn the raw strings into the types the services take.

pub mod signing_key;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use url::Url;
use zeroize::Zeroizing;

use crate::domain::{DispatcherConfig, SchedulerConfig};

pub use signing_key::{
    BuildMode, SigningKeyError, TokenSecret, TokenSecretOrigin, token_secret_from_env,
};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_FROM_ADDRESS: &str = "privacy@erasure.invalid";
const DEFAULT_REGULATOR_ADDRESS: &str = "complaints@regulator.invalid";
const DEFAULT_MESSAGE_ID_DOMAIN: &str = "erasure.invalid";
const DEFAULT_FOLLOW_UP_AFTER_DAYS: u32 = 30;
const DEFAULT_ESCALATE_AFTER_DAYS: u32 = 60;
const DEFAULT_TOKEN_TTL_DAYS: u32 = 45;
const DEFAULT_SCHEDULER_INTERVAL_SECS: u64 = 3600;
const DEFAULT_SCHEDULER_BATCH_LIMIT: usize = 500;
const DEFAULT_CONFIRM_RATE_LIMIT: u32 = 10;
const DEFAULT_EMAIL_TIMEOUT_SECS: u64 = 20;

/// A setting is present but unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid value for {name}='{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("{present} is set but {missing} is not")]
    Incomplete {
        present: &'static str,
        missing: &'static str,
    },
}

impl SettingsError {
    fn invalid(name: &'static str, value: &str, reason: impl fmt::Display) -> Self {
        Self::Invalid {
            name,
            value: value.to_owned(),
            reason: reason.to_string(),
        }
    }
}

/// Email delivery provider endpoint and key.
pub struct EmailProviderSettings {
    pub endpoint: Url,
    pub api_key: Zeroizing<String>,
    pub timeout: Duration,
}

/// Top-level service configuration.
#[derive(Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "ERASURE")]
pub struct AppSettings {
    /// Socket address for the HTTP listener.
    pub bind_addr: Option<String>,
    /// PostgreSQL URL. Unset runs on the in-memory store.
    pub database_url: Option<String>,
    /// Base for confirmation links in outbound emails.
    pub public_base_url: Option<String>,
    pub from_address: Option<String>,
    pub regulator_address: Option<String>,
    pub message_id_domain: Option<String>,
    /// Delivery provider endpoint. Unset logs emails instead of sending.
    pub email_provider_url: Option<String>,
    pub email_provider_api_key: Option<String>,
    pub email_timeout_secs: Option<u64>,
    /// Bearer token for the admin API. Unset disables it.
    pub admin_token: Option<String>,
    /// Shared secret expected on webhook deliveries.
    pub webhook_secret: Option<String>,
    pub follow_up_after_days: Option<u32>,
    pub escalate_after_days: Option<u32>,
    pub token_ttl_days: Option<u32>,
    pub scheduler_interval_secs: Option<u64>,
    pub scheduler_batch_limit: Option<usize>,
    pub confirm_rate_limit_per_minute: Option<u32>,
    /// Take the client address from `X-Forwarded-For`.
    #[ortho_config(default = false)]
    pub trust_forwarded_for: bool,
}

impl fmt::Debug for AppSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redacted(value: Option<&String>) -> &'static str {
            if value.is_some() { "<redacted>" } else { "<unset>" }
        }

        f.debug_struct("AppSettings")
            .field("bind_addr", &self.bind_addr)
            .field("database_url", &redacted(self.database_url.as_ref()))
            .field("public_base_url", &self.public_base_url)
            .field("from_address", &self.from_address)
            .field("regulator_address", &self.regulator_address)
            .field("message_id_domain", &self.message_id_domain)
            .field("email_provider_url", &self.email_provider_url)
            .field(
                "email_provider_api_key",
                &redacted(self.email_provider_api_key.as_ref()),
            )
            .field("admin_token", &redacted(self.admin_token.as_ref()))
            .field("webhook_secret", &redacted(self.webhook_secret.as_ref()))
            .field("follow_up_after_days", &self.follow_up_after_days())
            .field("escalate_after_days", &self.escalate_after_days())
            .field("token_ttl_days", &self.token_ttl_days())
            .field("scheduler_interval", &self.scheduler_interval())
            .field("scheduler_batch_limit", &self.scheduler_batch_limit())
            .field(
                "confirm_rate_limit_per_minute",
                &self.confirm_rate_limit_per_minute(),
            )
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .finish()
    }
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl AppSettings {
    /// Listener address, `0.0.0.0:8080` by default.
    ///
    /// # Errors
    /// [`SettingsError::Invalid`] when the value is not `host:port`.
    pub fn bind_addr(&self) -> Result<SocketAddr, SettingsError> {
        let raw = non_blank(self.bind_addr.as_ref()).unwrap_or(DEFAULT_BIND_ADDR);
        raw.parse()
            .map_err(|err| SettingsError::invalid("ERASURE_BIND_ADDR", raw, err))
    }

    pub fn database_url(&self) -> Option<&str> {
        non_blank(self.database_url.as_ref())
    }

    /// Base URL confirmation links are built on.
    ///
    /// # Errors
    /// [`SettingsError::Invalid`] for unparsable or non-HTTP URLs.
    pub fn public_base_url(&self) -> Result<Url, SettingsError> {
        let raw = non_blank(self.public_base_url.as_ref()).unwrap_or(DEFAULT_PUBLIC_BASE_URL);
        let url = Url::parse(raw)
            .map_err(|err| SettingsError::invalid("ERASURE_PUBLIC_BASE_URL", raw, err))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SettingsError::invalid(
                "ERASURE_PUBLIC_BASE_URL",
                raw,
                "expected an http or https URL",
            ));
        }
        Ok(url)
    }

    pub fn from_address(&self) -> &str {
        non_blank(self.from_address.as_ref()).unwrap_or(DEFAULT_FROM_ADDRESS)
    }

    pub fn regulator_address(&self) -> &str {
        non_blank(self.regulator_address.as_ref()).unwrap_or(DEFAULT_REGULATOR_ADDRESS)
    }

    pub fn message_id_domain(&self) -> &str {
        non_blank(self.message_id_domain.as_ref()).unwrap_or(DEFAULT_MESSAGE_ID_DOMAIN)
    }

    /// Delivery provider settings, or `None` to log emails instead.
    ///
    /// # Errors
    /// [`SettingsError::Incomplete`] when only one of URL and key is set, or
    /// [`SettingsError::Invalid`] when the URL does not parse.
    pub fn email_provider(&self) -> Result<Option<EmailProviderSettings>, SettingsError> {
        let url = non_blank(self.email_provider_url.as_ref());
        let key = non_blank(self.email_provider_api_key.as_ref());
        match (url, key) {
            (None, None) => Ok(None),
            (Some(_), None) => Err(SettingsError::Incomplete {
                present: "ERASURE_EMAIL_PROVIDER_URL",
                missing: "ERASURE_EMAIL_PROVIDER_API_KEY",
            }),
            (None, Some(_)) => Err(SettingsError::Incomplete {
                present: "ERASURE_EMAIL_PROVIDER_API_KEY",
                missing: "ERASURE_EMAIL_PROVIDER_URL",
            }),
            (Some(url), Some(key)) => {
                let endpoint = Url::parse(url).map_err(|err| {
                    SettingsError::invalid("ERASURE_EMAIL_PROVIDER_URL", url, err)
                })?;
                Ok(Some(EmailProviderSettings {
                    endpoint,
                    api_key: Zeroizing::new(key.to_owned()),
                    timeout: Duration::from_secs(
                        self.email_timeout_secs
                            .unwrap_or(DEFAULT_EMAIL_TIMEOUT_SECS)
                            .max(1),
                    ),
                }))
            }
        }
    }

    pub fn admin_token(&self) -> Option<&str> {
        non_blank(self.admin_token.as_ref())
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        non_blank(self.webhook_secret.as_ref())
    }

    pub fn follow_up_after_days(&self) -> u32 {
        self.follow_up_after_days
            .unwrap_or(DEFAULT_FOLLOW_UP_AFTER_DAYS)
            .max(1)
    }

    pub fn escalate_after_days(&self) -> u32 {
        self.escalate_after_days
            .unwrap_or(DEFAULT_ESCALATE_AFTER_DAYS)
            .max(1)
    }

    pub fn token_ttl_days(&self) -> u32 {
        self.token_ttl_days.unwrap_or(DEFAULT_TOKEN_TTL_DAYS).max(1)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(
            self.scheduler_interval_secs
                .unwrap_or(DEFAULT_SCHEDULER_INTERVAL_SECS)
                .max(1),
        )
    }

    pub fn scheduler_batch_limit(&self) -> usize {
        self.scheduler_batch_limit
            .unwrap_or(DEFAULT_SCHEDULER_BATCH_LIMIT)
            .max(1)
    }

    pub fn confirm_rate_limit_per_minute(&self) -> u32 {
        self.confirm_rate_limit_per_minute
            .unwrap_or(DEFAULT_CONFIRM_RATE_LIMIT)
            .max(1)
    }

    /// Dispatcher configuration with the addresses and link TTL applied.
    ///
    /// # Errors
    /// Propagates [`Self::public_base_url`] failures.
    pub fn dispatcher_config(&self) -> Result<DispatcherConfig, SettingsError> {
        let mut config = DispatcherConfig::new(self.public_base_url()?);
        config.from_address = self.from_address().to_owned();
        config.regulator_address = self.regulator_address().to_owned();
        config.message_id_domain = self.message_id_domain().to_owned();
        config.token_ttl = chrono::Duration::days(i64::from(self.token_ttl_days()));
        Ok(config)
    }

    /// Scheduler thresholds.
    ///
    /// # Errors
    /// [`SettingsError::Invalid`] when escalation is not later than the
    /// follow-up.
    pub fn scheduler_config(&self) -> Result<SchedulerConfig, SettingsError> {
        let follow_up = self.follow_up_after_days();
        let escalate = self.escalate_after_days();
        if escalate <= follow_up {
            return Err(SettingsError::invalid(
                "ERASURE_ESCALATE_AFTER_DAYS",
                &escalate.to_string(),
                format!("must be greater than the follow-up threshold ({follow_up})"),
            ));
        }
        Ok(SchedulerConfig {
            follow_up_after: chrono::Duration::days(i64::from(follow_up)),
            escalate_after: chrono::Duration::days(i64::from(escalate)),
            batch_limit: self.scheduler_batch_limit(),
            ..SchedulerConfig::default()
        })
    }
}
