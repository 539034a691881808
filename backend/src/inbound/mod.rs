//! Inbound adapters that translate external requests into domain service
//! calls while keeping framework details at the edge.
//!
//! Only HTTP exists today: the operator confirmation link, the provider
//! webhook, the admin API and health probes all live under [`http`].

pub mod http;
