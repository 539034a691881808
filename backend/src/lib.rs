//! Erasure engine library.
//!
//! Drives personal-data erasure demands to data brokers: signed
//! confirmation links, provider webhooks, the automatic follow-up and
//! escalation schedule, and an append-only audit trail. The binary in
//! `main.rs` wires these modules to real adapters.

pub mod config;
pub mod doc;
pub mod domain;
pub mod inbound;
pub mod middleware;
pub mod outbound;
#[cfg(test)]
mod test_support;

/// Public OpenAPI surface used by Swagger UI and tooling.
pub use doc::ApiDoc;
pub use domain::TraceId;
pub use middleware::Trace;
