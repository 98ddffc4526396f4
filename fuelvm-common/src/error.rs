//! Application error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine readable error kind. Collaborators and the runtime report every
/// failure with one of these codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Conflict,
    Internal,
    Invalid,
    NotFound,
    NotImplemented,
    Unauthorized,
    Unknown,
    Forbidden,
    Exists,
    Vm,
    LowFuel,
    CorePoolNotFound,
    CorePoolTimeout,
    Sandbox,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::Internal => "internal",
            Self::Invalid => "invalid",
            Self::NotFound => "not_found",
            Self::NotImplemented => "not_implemented",
            Self::Unauthorized => "unauthorized",
            Self::Unknown => "unknown",
            Self::Forbidden => "forbidden",
            Self::Exists => "exists",
            Self::Vm => "vm",
            Self::LowFuel => "low_fuel",
            Self::CorePoolNotFound => "core_pool_not_found",
            Self::CorePoolTimeout => "core_pool_timeout",
            Self::Sandbox => "sandbox",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by collaborators (persistence, auth, ...).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Invalid, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

/// Builds an [`AppError`] with a formatted message.
#[macro_export]
macro_rules! app_err {
    ($code:expr, $($arg:tt)*) => {
        $crate::error::AppError::new($code, format!($($arg)*))
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_carries_code() {
        let err = app_err!(ErrorCode::NotFound, "contract {} not found", 7);
        assert_eq!(err.to_string(), "not_found: contract 7 not found");
        assert_eq!(err.code, ErrorCode::NotFound);
    }
}
