//! Persistence adapters for the repository ports.
//!
//! - [`InMemoryStore`] implements every port in one process-local store. It
//!   backs development runs without a database and most tests.
//! - The Diesel repositories persist to PostgreSQL through a shared
//!   [`DbPool`] (`diesel-async` over `bb8`). Row structs and table
//!   definitions stay private to this module.
//!
//! ```ignore
//! use erasure_engine::outbound::persistence::{
//!     DbPool, DieselDeletionRequestRepository, PoolConfig, run_pending_migrations,
//! };
//!
//! run_pending_migrations(url).await?;
//! let pool = DbPool::new(PoolConfig::new(url)).await?;
//! let requests = DieselDeletionRequestRepository::new(pool.clone());
//! ```

mod diesel_audit_log_repository;
mod diesel_deletion_request_repository;
mod diesel_helpers;
mod diesel_inbound_email_repository;
mod memory;
mod migrations;
mod models;
mod pool;
mod schema;

pub use diesel_audit_log_repository::DieselAuditLogRepository;
pub use diesel_deletion_request_repository::DieselDeletionRequestRepository;
pub use diesel_inbound_email_repository::DieselInboundEmailRepository;
pub use memory::InMemoryStore;
pub use migrations::{MIGRATIONS, MigrationError, run_pending_migrations};
pub use pool::{DbPool, PoolConfig, PoolError};
