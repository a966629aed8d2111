//! The error taxonomy spoken by every layer of the storage plane.
//!
//! Leaf backends translate native failures into one of these classes;
//! decorators add context with [`StorageError::with_context`] but never
//! reclassify, so the deepest classification survives to the caller.

use larch_digest::DigestError;
use snafu::Snafu;

/// Classification of a [`StorageError`], mirroring the gRPC status codes the
/// front-ends ultimately report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Cancelled,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    ResourceExhausted,
    Unimplemented,
    Internal,
    Unavailable,
}

impl ErrorCode {
    /// The numeric gRPC status code for this class.
    pub fn grpc_code(&self) -> i32 {
        match self {
            ErrorCode::Cancelled => 1,
            ErrorCode::InvalidArgument => 3,
            ErrorCode::DeadlineExceeded => 4,
            ErrorCode::NotFound => 5,
            ErrorCode::ResourceExhausted => 8,
            ErrorCode::Unimplemented => 12,
            ErrorCode::Internal => 13,
            ErrorCode::Unavailable => 14,
        }
    }
}

/// Errors from storage plane operations.
///
/// Every variant carries a human-readable message; variants are one-to-one
/// with [`ErrorCode`] classes.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// The requested blob does not exist on this backend.
    #[snafu(display("blob not found: {message}"))]
    NotFound {
        /// Description of what was not found.
        message: String,
    },

    /// The request was malformed before any I/O was attempted.
    #[snafu(display("invalid argument: {message}"))]
    InvalidArgument {
        /// Description of the rejected argument.
        message: String,
    },

    /// The operation ran past its deadline.
    #[snafu(display("deadline exceeded: {message}"))]
    DeadlineExceeded {
        /// Description of the expired operation.
        message: String,
    },

    /// The operation was cancelled by the caller.
    #[snafu(display("cancelled: {message}"))]
    Cancelled {
        /// Description of the cancelled operation.
        message: String,
    },

    /// A backend is temporarily unreachable; retrying may succeed.
    #[snafu(display("unavailable: {message}"))]
    Unavailable {
        /// Description of the unavailable backend.
        message: String,
    },

    /// A bounded resource (buffer window, digest-location map) is full.
    #[snafu(display("resource exhausted: {message}"))]
    ResourceExhausted {
        /// Description of the exhausted resource.
        message: String,
    },

    /// An invariant was violated, including data integrity failures.
    #[snafu(display("internal error: {message}"))]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },

    /// The backend does not implement this operation.
    #[snafu(display("unimplemented: {message}"))]
    Unimplemented {
        /// Description of the unsupported operation.
        message: String,
    },
}

impl StorageError {
    pub fn not_found(message: impl Into<String>) -> Self {
        StorageError::NotFound { message: message.into() }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        StorageError::InvalidArgument { message: message.into() }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        StorageError::Unavailable { message: message.into() }
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        StorageError::ResourceExhausted { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        StorageError::Internal { message: message.into() }
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        StorageError::Unimplemented { message: message.into() }
    }

    /// The taxonomy class of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            StorageError::NotFound { .. } => ErrorCode::NotFound,
            StorageError::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            StorageError::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            StorageError::Cancelled { .. } => ErrorCode::Cancelled,
            StorageError::Unavailable { .. } => ErrorCode::Unavailable,
            StorageError::ResourceExhausted { .. } => ErrorCode::ResourceExhausted,
            StorageError::Internal { .. } => ErrorCode::Internal,
            StorageError::Unimplemented { .. } => ErrorCode::Unimplemented,
        }
    }

    /// Prefix the message with decorator context, preserving the class.
    pub fn with_context(self, context: &str) -> Self {
        let rewrap = |message: String| format!("{context}: {message}");
        match self {
            StorageError::NotFound { message } => StorageError::NotFound { message: rewrap(message) },
            StorageError::InvalidArgument { message } => StorageError::InvalidArgument { message: rewrap(message) },
            StorageError::DeadlineExceeded { message } => StorageError::DeadlineExceeded { message: rewrap(message) },
            StorageError::Cancelled { message } => StorageError::Cancelled { message: rewrap(message) },
            StorageError::Unavailable { message } => StorageError::Unavailable { message: rewrap(message) },
            StorageError::ResourceExhausted { message } => StorageError::ResourceExhausted { message: rewrap(message) },
            StorageError::Internal { message } => StorageError::Internal { message: rewrap(message) },
            StorageError::Unimplemented { message } => StorageError::Unimplemented { message: rewrap(message) },
        }
    }
}

impl From<DigestError> for StorageError {
    fn from(e: DigestError) -> Self {
        StorageError::InvalidArgument { message: e.to_string() }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound { message: e.to_string() },
            std::io::ErrorKind::TimedOut => StorageError::DeadlineExceeded { message: e.to_string() },
            _ => StorageError::Internal { message: e.to_string() },
        }
    }
}

/// Result alias used throughout the storage plane.
pub type Result<T, E = StorageError> = std::result::Result<T, E>;
