//! Email delivery adapters implementing the `EmailTransport` port.
//!
//! - [`HttpEmailTransport`] posts each message to the delivery provider's
//!   JSON API.
//! - [`LoggingEmailTransport`] only logs; it is wired when no provider is
//!   configured so development runs never send real mail.

mod http_transport;
mod logging_transport;

pub use http_transport::{HttpEmailTransport, ProviderCredentials};
pub use logging_transport::LoggingEmailTransport;
