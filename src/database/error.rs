use std::fmt::{Display, Formatter};

use futures::future::LocalBoxFuture;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatabaseErrorCode {
    InvalidArgument,
    Internal,
    PermissionDenied,
    Unavailable,
    /// Failure reported by the native module itself.
    NativeModule,
}

impl DatabaseErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseErrorCode::InvalidArgument => "database/invalid-argument",
            DatabaseErrorCode::Internal => "database/internal",
            DatabaseErrorCode::PermissionDenied => "database/permission-denied",
            DatabaseErrorCode::Unavailable => "database/unavailable",
            DatabaseErrorCode::NativeModule => "database/native-module",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseError {
    pub code: DatabaseErrorCode,
    message: String,
}

impl DatabaseError {
    pub fn new(code: DatabaseErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for DatabaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for DatabaseError {}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Pending native operation. Namespaced methods log their deprecation warning
/// before this future is created, so dropping it unpolled still counts as a
/// call.
pub type DatabaseFuture<T> = LocalBoxFuture<'static, DatabaseResult<T>>;

pub(crate) fn ready<T: 'static>(result: DatabaseResult<T>) -> DatabaseFuture<T> {
    Box::pin(futures::future::ready(result))
}

pub fn invalid_argument(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::InvalidArgument, message)
}

pub fn internal_error(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::Internal, message)
}

pub fn permission_denied(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::PermissionDenied, message)
}

pub fn unavailable(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::Unavailable, message)
}

pub fn native_error(message: impl Into<String>) -> DatabaseError {
    DatabaseError::new(DatabaseErrorCode::NativeModule, message)
}
