//! Stable error taxonomy.
//!
//! Raw gRPC status codes are inspected here and nowhere else. Everything a
//! caller sees is one of the [`ErrorKind`] values.

use std::fmt::{Display, Formatter, Result as FormatResult};

use tonic::Code;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotConnected,
    NotAuthenticated,
    ConnectionFailed,
    AuthenticationFailed,
    SessionExpired,
    NoSigningKeys,
    PermissionDenied,
    NotFound,
    AlreadyExists,
    InvalidArgument,
    Internal,
    Unavailable,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 12] = [
        ErrorKind::NotConnected,
        ErrorKind::NotAuthenticated,
        ErrorKind::ConnectionFailed,
        ErrorKind::AuthenticationFailed,
        ErrorKind::SessionExpired,
        ErrorKind::NoSigningKeys,
        ErrorKind::PermissionDenied,
        ErrorKind::NotFound,
        ErrorKind::AlreadyExists,
        ErrorKind::InvalidArgument,
        ErrorKind::Internal,
        ErrorKind::Unavailable,
    ];

    /// Only transient server conditions are worth retrying.
    pub fn is_retryable(self) -> bool {
        self == ErrorKind::Unavailable
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotConnected => "not-connected",
            ErrorKind::NotAuthenticated => "not-authenticated",
            ErrorKind::ConnectionFailed => "connection-failed",
            ErrorKind::AuthenticationFailed => "authentication-failed",
            ErrorKind::SessionExpired => "session-expired",
            ErrorKind::NoSigningKeys => "no-signing-keys",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::NotFound => "not-found",
            ErrorKind::AlreadyExists => "already-exists",
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::Internal => "internal",
            ErrorKind::Unavailable => "unavailable",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "{}", self.as_str())
    }
}

pub fn classify_code(code: Code) -> ErrorKind {
    match code {
        Code::Unauthenticated => ErrorKind::SessionExpired,
        Code::PermissionDenied => ErrorKind::PermissionDenied,
        Code::NotFound => ErrorKind::NotFound,
        Code::AlreadyExists => ErrorKind::AlreadyExists,
        Code::InvalidArgument | Code::OutOfRange | Code::FailedPrecondition => {
            ErrorKind::InvalidArgument
        }
        Code::Unavailable | Code::ResourceExhausted | Code::Aborted | Code::DeadlineExceeded => {
            ErrorKind::Unavailable
        }
        Code::Ok
        | Code::Cancelled
        | Code::Unknown
        | Code::Unimplemented
        | Code::Internal
        | Code::DataLoss => ErrorKind::Internal,
    }
}

/// True exactly for unavailable, resource-exhausted, aborted and deadline-exceeded.
pub fn is_retryable_code(code: Code) -> bool {
    matches!(
        code,
        Code::Unavailable | Code::ResourceExhausted | Code::Aborted | Code::DeadlineExceeded
    )
}
