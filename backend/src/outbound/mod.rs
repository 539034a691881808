//! Outbound adapters implementing the domain ports.
//!
//! - **persistence**: in-memory and PostgreSQL (Diesel) repositories
//! - **email**: delivery provider over HTTPS, or a logging stand-in
//!
//! Adapters translate between domain types and infrastructure
//! representations and hold no business rules.

pub mod email;
pub mod persistence;
