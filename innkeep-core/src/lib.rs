/// Generates `as_str`, `Display` and `FromStr` for the snake_case string enums
/// that are persisted in text columns and carried in JSON.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::CoreError::ValidationError(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

pub mod events;
pub mod notify;
pub mod payment;
pub mod platform;
pub mod rate_limit;
pub mod repository;
pub mod reservation;
pub mod sync_failure;
pub mod unit;

pub use events::{ReservationEventPublisher, ReservationWritten};
pub use reservation::{Reservation, ReservationStatus, StayDates};

/// Error taxonomy shared by every service boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),
}

impl CoreError {
    /// Stable wire code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ValidationError(_) => "invalid-argument",
            CoreError::PermissionDenied(_) => "permission-denied",
            CoreError::NotFound(_) => "not-found",
            CoreError::Conflict(_) => "already-exists",
            CoreError::PreconditionFailed(_) => "failed-precondition",
            CoreError::InternalError(_) => "internal",
            CoreError::RateLimited(_) => "resource-exhausted",
        }
    }

    /// Internal errors leave no partial state behind, so the same request can be resent as is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::InternalError(_) | CoreError::RateLimited(_))
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        CoreError::InternalError(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_internal_and_rate_limited_are_retryable() {
        assert!(CoreError::InternalError("db down".into()).is_retryable());
        assert!(CoreError::RateLimited("slow down".into()).is_retryable());
        assert!(!CoreError::Conflict("dates no longer available".into()).is_retryable());
        assert!(!CoreError::PreconditionFailed("deadline".into()).is_retryable());
        assert_eq!(CoreError::Conflict(String::new()).code(), "already-exists");
    }
}
