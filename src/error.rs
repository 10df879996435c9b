// Client-facing error types
use crate::backend::BackendError;
use crate::filter::FilterError;
use crate::types::Role;

pub const ADMIN_LOGIN_REQUIRED: &str = "This email is registered as an admin. Please use the admin login.";
pub const USER_LOGIN_REQUIRED: &str = "This email is not registered as an admin. Please use the user login.";
pub const ADMIN_REGISTRATION_REJECTED: &str =
    "Admin accounts cannot be created through registration. Please contact an administrator.";
pub const TRAINING_AT_CAPACITY: &str = "Training is at full capacity";
pub const NO_SESSION_FOUND: &str = "No session found";

/// Every failure the portal reports to its caller. Business-rule rejections
/// carry fixed messages; backend failures carry the backend's own message.
#[derive(Debug, Clone, PartialEq)]
pub enum PortalError {
    // Business rules
    RoleMismatch { actual: Role },
    AdminRegistration,
    CapacityExceeded,
    NoSession,

    // Backend
    Unauthorized(String),
    NotFound(String),
    Validation(String),
    Backend(String),
}

impl PortalError {
    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            PortalError::RoleMismatch { actual: Role::Admin } => ADMIN_LOGIN_REQUIRED,
            PortalError::RoleMismatch { actual: Role::User } => USER_LOGIN_REQUIRED,
            PortalError::AdminRegistration => ADMIN_REGISTRATION_REJECTED,
            PortalError::CapacityExceeded => TRAINING_AT_CAPACITY,
            PortalError::NoSession => NO_SESSION_FOUND,
            PortalError::Unauthorized(msg) => msg,
            PortalError::NotFound(msg) => msg,
            PortalError::Validation(msg) => msg,
            PortalError::Backend(msg) => msg,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            PortalError::RoleMismatch { .. } => "ROLE_MISMATCH",
            PortalError::AdminRegistration => "ADMIN_REGISTRATION",
            PortalError::CapacityExceeded => "CAPACITY_EXCEEDED",
            PortalError::NoSession => "NO_SESSION",
            PortalError::Unauthorized(_) => "UNAUTHORIZED",
            PortalError::NotFound(_) => "NOT_FOUND",
            PortalError::Validation(_) => "VALIDATION_ERROR",
            PortalError::Backend(_) => "BACKEND_ERROR",
        }
    }

    /// Whether the failure came from a local rule rather than the backend
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            PortalError::RoleMismatch { .. }
                | PortalError::AdminRegistration
                | PortalError::CapacityExceeded
                | PortalError::NoSession
        )
    }
}

impl PortalError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        PortalError::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        PortalError::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PortalError::Validation(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        PortalError::Backend(message.into())
    }
}

impl From<BackendError> for PortalError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Auth(msg) => PortalError::unauthorized(msg),
            BackendError::NotFound(msg) => PortalError::not_found(msg),
            BackendError::Status { status, message } if status == 400 || status == 422 => {
                PortalError::validation(message)
            }
            BackendError::Status { message, .. } => PortalError::backend(message),
            BackendError::Filter(e) => PortalError::validation(e.to_string()),
            other => PortalError::backend(other.to_string()),
        }
    }
}

impl From<FilterError> for PortalError {
    fn from(err: FilterError) -> Self {
        PortalError::validation(err.to_string())
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("Row decoding error: {}", err);
        PortalError::backend(format!("Unexpected response shape: {}", err))
    }
}

// Standard error trait implementations
impl std::fmt::Display for PortalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for PortalError {}
