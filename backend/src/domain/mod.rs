//! Domain entities, the request state machine and the services that drive it.
//!
//! Purpose: hold everything that decides what happens to a deletion request,
//! independent of HTTP, SQL or the email provider. Services depend on the
//! traits in [`ports`]; adapters implement them under `outbound`.
//!
//! Public surface:
//! - [`DeletionRequest`] and its [`RequestStatus`] graph, with
//!   [`RequestLifecycle`] as the only way to change a stored request.
//! - [`TokenCodec`] for signed confirmation links.
//! - [`OutboundDispatcher`], [`WebhookIngestor`], [`ConfirmationService`] and
//!   [`AutomationScheduler`]: one service per actor.
//! - [`Error`] / [`ErrorCode`]: transport-agnostic failures.

pub mod audit;
pub mod automation_scheduler;
pub mod confirmation_service;
pub mod confirmation_token;
pub mod deletion_request;
pub mod error;
pub mod inbound_email;
pub mod lifecycle;
pub mod outbound_dispatcher;
pub mod ports;
pub mod rate_limit;
pub mod reply_classifier;
pub mod token_codec;
pub mod trace_id;
pub mod webhook_ingestor;

pub use self::audit::{Actor, AuditAction, AuditLogEntry};
pub use self::automation_scheduler::{
    AutomationScheduler, SchedulerConfig, SchedulerReport, due_stage,
};
pub use self::confirmation_service::{
    ClientContext, ConfirmationPreview, ConfirmationReceipt, ConfirmationService,
};
pub use self::confirmation_token::{ConfirmationToken, TokenPurpose};
pub use self::deletion_request::{
    DeletionRequest, DeletionRequestId, DispatchLease, DispatchStage, NewDeletionRequest,
    NewDeletionRequestError, RequestStatus, TrackingId, TrackingIdValidationError,
    TransitionError,
};
pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::inbound_email::{CorrelationHeaders, InboundEmail, InboundEmailId, ReplyIntent};
pub use self::lifecycle::{Decision, LifecycleError, RequestLifecycle, reply_target};
pub use self::outbound_dispatcher::{
    BackoffJitter, DispatchOutcome, DispatchSleeper, DispatcherConfig, DispatcherRuntime,
    OutboundDispatcher, RandomJitter, TokioSleeper,
};
pub use self::rate_limit::{RateDecision, RateLimiter};
pub use self::reply_classifier::{Classification, ReplyClassifier};
pub use self::token_codec::{
    IssuedToken, MIN_SECRET_LEN, SigningSecret, TokenCodec, TokenCodecError, TokenError,
    VerifiedToken,
};
pub use self::trace_id::{TRACE_ID_HEADER, TraceId};
pub use self::webhook_ingestor::{
    MAX_WEBHOOK_BODY_BYTES, WebhookEvent, WebhookIngestor, WebhookPayload,
};

/// Convenient API result alias.
///
/// # Examples
/// ```
/// use actix_web::HttpResponse;
/// use erasure_engine::domain::{ApiResult, Error};
///
/// fn handler() -> ApiResult<HttpResponse> {
///     Err(Error::forbidden("nope"))
/// }
/// ```
pub type ApiResult<T> = Result<T, Error>;
