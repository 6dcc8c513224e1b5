//! Crate-wide error taxonomy.
//!
//! Every component-internal failure bubbles up as a [`FabricError`] rather
//! than a panic. Actors log-and-continue on a per-request error; they never
//! exit the process because a single caller handed them something bad.

use thiserror::Error;

/// The full error taxonomy shared by every component in this crate.
///
/// Variants map 1:1 onto the control-plane error codes so a handler can
/// convert a `FabricError` straight into a protocol `res.error.code`
/// without a second translation table.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FabricError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("handshake required")]
    HandshakeRequired,

    #[error("already connected")]
    AlreadyConnected,

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("missing keys: {0:?}")]
    MissingKeys(Vec<String>),

    #[error("immutable fields: {0:?}")]
    ImmutableFields(Vec<String>),

    #[error("locked")]
    Locked,
}

impl FabricError {
    /// The wire error code, matching §4.15 / §7 of the design document.
    pub fn code(&self) -> &'static str {
        match self {
            FabricError::InvalidRequest(_) => "invalid_request",
            FabricError::InvalidParams(_) => "invalid_params",
            FabricError::MethodNotFound(_) => "method_not_found",
            FabricError::NotFound(_) => "not_found",
            FabricError::Conflict(_) => "conflict",
            FabricError::Forbidden(_) => "forbidden",
            FabricError::Unauthorized(_) => "unauthorized",
            FabricError::Unavailable(_) => "unavailable",
            FabricError::Timeout(_) => "timeout",
            FabricError::RateLimited(_) => "rate_limited",
            FabricError::InternalError(_) => "internal_error",
            FabricError::NotImplemented(_) => "not_implemented",
            FabricError::HandshakeRequired => "handshake_required",
            FabricError::AlreadyConnected => "already_connected",
            FabricError::InvalidSchedule(_) => "invalid_schedule",
            FabricError::MissingKeys(_) => "missing_keys",
            FabricError::ImmutableFields(_) => "immutable_fields",
            FabricError::Locked => "locked",
        }
    }
}

pub type Result<T> = std::result::Result<T, FabricError>;
