//! Loading the HMAC secret that signs confirmation tokens.
//!
//! The secret lives in a file named by `ERASURE_TOKEN_SECRET_FILE`. Release
//! builds require the file and at least [`MIN_SECRET_LEN`] bytes. Debug
//! builds fall back to a random per-process secret unless
//! `ERASURE_TOKEN_ALLOW_EPHEMERAL=0`, which makes a missing file fatal there
//! too. Links signed with an ephemeral secret stop verifying on restart.

use std::io;
use std::path::{Path, PathBuf};

use cap_std::{ambient_authority, fs::Dir};
use mockable::Env;
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::domain::{MIN_SECRET_LEN, SigningSecret};

const SECRET_FILE_DEFAULT_PATH: &str = "/var/run/secrets/token_secret";
const SECRET_FILE_ENV: &str = "ERASURE_TOKEN_SECRET_FILE";
const ALLOW_EPHEMERAL_ENV: &str = "ERASURE_TOKEN_ALLOW_EPHEMERAL";
const BOOL_EXPECTED: &str = "1|0|true|false|yes|no|y|n";

/// Build mode for secret validation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildMode {
    /// Debug builds tolerate missing or short secrets with a warning.
    Debug,
    /// Release builds require a real secret file.
    Release,
}

impl BuildMode {
    /// Determine the build mode from `cfg!(debug_assertions)`.
    ///
    /// ```
    /// use erasure_engine::config::BuildMode;
    ///
    /// let mode = BuildMode::from_debug_assertions();
    /// assert_eq!(mode == BuildMode::Debug, cfg!(debug_assertions));
    /// ```
    #[must_use]
    pub fn from_debug_assertions() -> Self {
        if cfg!(debug_assertions) {
            Self::Debug
        } else {
            Self::Release
        }
    }

    fn is_debug(self) -> bool {
        matches!(self, Self::Debug)
    }
}

/// Where the loaded secret came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TokenSecretOrigin {
    File(PathBuf),
    Ephemeral,
}

/// The signing secret and its origin.
#[derive(Debug)]
pub struct TokenSecret {
    pub secret: SigningSecret,
    pub origin: TokenSecretOrigin,
}

/// Errors raised while loading the signing secret.
#[derive(thiserror::Error, Debug)]
pub enum SigningKeyError {
    #[error("invalid value for {name}='{value}'; expected {expected}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("failed to read token secret at {path}: {source}")]
    SecretRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("token secret at {path} too short: need >= {min_len} bytes, got {length}")]
    SecretTooShort {
        path: PathBuf,
        length: usize,
        min_len: usize,
    },
    #[error("ERASURE_TOKEN_ALLOW_EPHEMERAL must be 0 in release builds")]
    EphemeralNotAllowed,
}

/// Load the token signing secret according to the environment and build
/// mode, logging its fingerprint.
///
/// # Errors
/// See [`SigningKeyError`].
pub fn token_secret_from_env<E: Env>(
    env: &E,
    mode: BuildMode,
) -> Result<TokenSecret, SigningKeyError> {
    let allow_ephemeral = allow_ephemeral_from_env(env, mode)?;
    let path = PathBuf::from(
        env.string(SECRET_FILE_ENV)
            .unwrap_or_else(|| SECRET_FILE_DEFAULT_PATH.to_owned()),
    );

    let loaded = match read_secret(&path) {
        Ok(bytes) => TokenSecret {
            secret: validated(bytes, &path, mode)?,
            origin: TokenSecretOrigin::File(path),
        },
        Err(error) if allow_ephemeral => {
            warn!(
                path = %path.display(),
                error = %error,
                "using ephemeral token secret (dev only); links die with the process"
            );
            TokenSecret {
                secret: SigningSecret::ephemeral(),
                origin: TokenSecretOrigin::Ephemeral,
            }
        }
        Err(error) => {
            return Err(SigningKeyError::SecretRead {
                path,
                source: error,
            });
        }
    };

    info!(
        fingerprint = %loaded.secret.fingerprint(),
        ephemeral = loaded.origin == TokenSecretOrigin::Ephemeral,
        "token signing secret loaded"
    );
    Ok(loaded)
}

fn read_secret(path: &Path) -> io::Result<Vec<u8>> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    dir.read(name)
}

fn validated(
    mut bytes: Vec<u8>,
    path: &Path,
    mode: BuildMode,
) -> Result<SigningSecret, SigningKeyError> {
    let length = bytes.len();
    if length >= MIN_SECRET_LEN {
        return Ok(SigningSecret::new(bytes));
    }
    if mode.is_debug() && length > 0 {
        warn!(
            path = %path.display(),
            length,
            min_len = MIN_SECRET_LEN,
            "token secret shorter than recommended (dev only)"
        );
        return Ok(SigningSecret::new(bytes));
    }
    bytes.zeroize();
    Err(SigningKeyError::SecretTooShort {
        path: path.to_path_buf(),
        length,
        min_len: MIN_SECRET_LEN,
    })
}

fn allow_ephemeral_from_env<E: Env>(env: &E, mode: BuildMode) -> Result<bool, SigningKeyError> {
    let Some(value) = env.string(ALLOW_EPHEMERAL_ENV) else {
        return Ok(mode.is_debug());
    };
    match (parse_bool(&value), mode) {
        (Some(true), BuildMode::Release) => Err(SigningKeyError::EphemeralNotAllowed),
        (Some(flag), _) => Ok(flag),
        (None, BuildMode::Debug) => {
            warn!(
                value = %value,
                "invalid ERASURE_TOKEN_ALLOW_EPHEMERAL; defaulting to enabled in debug builds"
            );
            Ok(true)
        }
        (None, BuildMode::Release) => Err(SigningKeyError::InvalidEnv {
            name: ALLOW_EPHEMERAL_ENV,
            value,
            expected: BOOL_EXPECTED,
        }),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Some(true),
        "0" | "false" | "no" | "n" => Some(false),
        _ => None,
    }
}
