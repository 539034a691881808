//! Bearer authentication for the admin routes.
//!
//! Handlers take an [`AdminCaller`] argument; the extractor rejects the
//! request before the handler body runs. Tokens are compared in constant
//! time and never logged.

use std::fmt;

use actix_web::dev::Payload;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{FromRequest, HttpRequest, web};
use futures_util::future::{Ready, ready};
use subtle::ConstantTimeEq;
use tracing::warn;
use zeroize::Zeroizing;

use crate::domain::Error;

use super::state::HttpState;

/// Configured admin bearer token.
#[derive(Clone)]
pub struct AdminToken(Zeroizing<String>);

impl AdminToken {
    /// `None` for an empty or blank token, which would otherwise match a
    /// bare `Bearer ` header.
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = Zeroizing::new(token.into());
        if token.trim().is_empty() {
            return None;
        }
        Some(Self(token))
    }

    fn matches(&self, presented: &str) -> bool {
        self.0.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

impl fmt::Debug for AdminToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AdminToken(<redacted>)")
    }
}

/// Proof that the request carried the admin bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AdminCaller;

impl FromRequest for AdminCaller {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authorize(req))
    }
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|token| !token.is_empty())
}

fn authorize(req: &HttpRequest) -> Result<AdminCaller, Error> {
    let state = req
        .app_data::<web::Data<HttpState>>()
        .ok_or_else(|| Error::internal("http state is not configured"))?;
    let Some(expected) = state.admin_token.as_ref() else {
        return Err(Error::forbidden("admin API is disabled"));
    };
    let Some(presented) = bearer_token(req) else {
        return Err(Error::unauthorized("missing bearer token"));
    };
    if expected.matches(presented) {
        Ok(AdminCaller)
    } else {
        warn!(path = req.path(), "rejected admin call with a wrong bearer token");
        Err(Error::unauthorized("invalid bearer token"))
    }
}
