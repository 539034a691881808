//! Domain ports for the hexagonal boundary.
//!
//! Services depend on these traits only; adapters live under `outbound`.

mod macros;
pub(crate) use macros::define_port_error;

mod audit_log_repository;
mod deletion_request_repository;
mod email_transport;
mod inbound_email_repository;

#[cfg(test)]
pub use audit_log_repository::MockAuditLogRepository;
pub use audit_log_repository::{
    AuditLogRepository, AuditLogRepositoryError, AuditQuery, FixtureAuditLogRepository,
};
#[cfg(test)]
pub use deletion_request_repository::MockDeletionRequestRepository;
pub use deletion_request_repository::{
    DeletionRequestRepository, DeletionRequestRepositoryError, FixtureDeletionRequestRepository,
};
#[cfg(test)]
pub use email_transport::MockEmailTransport;
pub use email_transport::{
    EmailTransport, EmailTransportError, FixtureEmailTransport, OutboundEmail,
};
#[cfg(test)]
pub use inbound_email_repository::MockInboundEmailRepository;
pub use inbound_email_repository::{
    FixtureInboundEmailRepository, InboundAnalysis, InboundEmailQuery, InboundEmailRepository,
    InboundEmailRepositoryError,
};
