//! Error taxonomy of the core
//!
//! Every failure aborts the operation with no partial mutation. Callers
//! (and tests) match on [`ErrorKind`], never on message text.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagerError {
    /// Caller lacks the required role or identity
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Operation not valid for the current lifecycle state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Time-gated operation invoked before its window
    #[error("too early: {0}")]
    TooEarly(String),

    /// Price adjustment inside the cooldown window
    #[error("price cooldown active until {until}")]
    Cooldown { until: u64 },

    /// Operation would be a no-op
    #[error("no change: {0}")]
    NoChange(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Arithmetic would overflow or underflow before clamping
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
}

/// Stable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthorized,
    InvalidState,
    TooEarly,
    Cooldown,
    NoChange,
    NotFound,
    Overflow,
}

impl ManagerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ManagerError::Unauthorized(_) => ErrorKind::Unauthorized,
            ManagerError::InvalidState(_) => ErrorKind::InvalidState,
            ManagerError::TooEarly(_) => ErrorKind::TooEarly,
            ManagerError::Cooldown { .. } => ErrorKind::Cooldown,
            ManagerError::NoChange(_) => ErrorKind::NoChange,
            ManagerError::NotFound(_) => ErrorKind::NotFound,
            ManagerError::Overflow(_) => ErrorKind::Overflow,
        }
    }

    pub(crate) fn unauthorized(msg: impl Into<String>) -> Self {
        ManagerError::Unauthorized(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ManagerError::InvalidState(msg.into())
    }

    pub(crate) fn too_early(msg: impl Into<String>) -> Self {
        ManagerError::TooEarly(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        ManagerError::NotFound(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ManagerError::unauthorized("x").kind(), ErrorKind::Unauthorized);
        assert_eq!(ManagerError::invalid("x").kind(), ErrorKind::InvalidState);
        assert_eq!(ManagerError::too_early("x").kind(), ErrorKind::TooEarly);
        assert_eq!(ManagerError::Cooldown { until: 5 }.kind(), ErrorKind::Cooldown);
        assert_eq!(ManagerError::NoChange("x".into()).kind(), ErrorKind::NoChange);
        assert_eq!(ManagerError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(ManagerError::Overflow("price").kind(), ErrorKind::Overflow);
    }

    #[test]
    fn test_display() {
        let err = ManagerError::Cooldown { until: 120 };
        assert_eq!(err.to_string(), "price cooldown active until 120");
    }
}
