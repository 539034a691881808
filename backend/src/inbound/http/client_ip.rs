//! Client identity for rate limiting and audit entries.
//!
//! The socket peer is authoritative unless the deployment sits behind a
//! proxy that sets `X-Forwarded-For`, in which case the left-most valid
//! address is used. Trusting the header without such a proxy lets callers
//! pick their own rate-limit bucket.

use std::net::IpAddr;

use actix_web::HttpRequest;
use actix_web::http::header::USER_AGENT;

use crate::domain::ClientContext;

const FORWARDED_FOR: &str = "x-forwarded-for";
const MAX_USER_AGENT_CHARS: usize = 512;

/// Build the [`ClientContext`] for `req`.
pub fn client_context(req: &HttpRequest, trust_forwarded_for: bool) -> ClientContext {
    let forwarded = trust_forwarded_for
        .then(|| forwarded_ip(req))
        .flatten();
    let ip = forwarded.or_else(|| req.peer_addr().map(|addr| addr.ip()));
    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.chars().take(MAX_USER_AGENT_CHARS).collect::<String>())
        .filter(|value| !value.trim().is_empty());

    ClientContext {
        ip: ip.map(|ip| ip.to_string()),
        user_agent,
    }
}

fn forwarded_ip(req: &HttpRequest) -> Option<IpAddr> {
    let value = req.headers().get(FORWARDED_FOR)?.to_str().ok()?;
    value
        .split(',')
        .map(str::trim)
        .find_map(|candidate| candidate.parse::<IpAddr>().ok())
}
