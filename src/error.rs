//! Error types and status codes for polysock.
//!
//! Every failure maps to a stable positive integer code (zero means
//! success) so that handle-based callers and foreign bindings can check
//! statuses without pattern-matching Rust enums. The code assignments
//! follow the classic scalability-protocols table.

use thiserror::Error;

/// Main error type for all polysock operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Bad handle, null buffer, invalid flag, or other caller mistake.
    #[error("invalid argument")]
    InvalidArgument,

    /// Allocation could not be satisfied.
    #[error("out of memory")]
    OutOfMemory,

    /// Object is already busy with a conflicting operation
    /// (double endpoint start, second in-flight aio submit).
    #[error("resource busy")]
    Busy,

    /// A bounded operation ran out of time.
    #[error("timed out")]
    Timeout,

    /// No peer was listening at the dialed address.
    #[error("connection refused")]
    ConnectionRefused,

    /// Operation attempted on a closing or closed object.
    #[error("object closed")]
    Closed,

    /// Non-blocking call had no work to do.
    #[error("operation would block")]
    WouldBlock,

    /// Option or operation not supported by this protocol variant.
    #[error("not supported")]
    NotSupported,

    /// Address already bound by another listener.
    #[error("address in use")]
    AddressInUse,

    /// Operation does not fit the protocol's current state
    /// (reply without an outstanding request, etc.).
    #[error("incorrect state")]
    IncorrectState,

    /// Protocol violation on the wire or in a message header.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Address string failed syntax validation.
    #[error("invalid address")]
    InvalidAddress,

    /// Receive buffer was smaller than the message; nothing delivered.
    #[error("message too large for buffer")]
    TruncatedMessage,

    /// Asynchronous operation was aborted before completion.
    #[error("operation canceled")]
    Canceled,
}

impl Error {
    /// Stable positive status code for this failure kind.
    pub fn code(&self) -> i32 {
        match self {
            Error::OutOfMemory => 2,
            Error::InvalidArgument => 3,
            Error::Busy => 4,
            Error::Timeout => 5,
            Error::ConnectionRefused => 6,
            Error::Closed => 7,
            Error::WouldBlock => 8,
            Error::NotSupported => 9,
            Error::AddressInUse => 10,
            Error::IncorrectState => 11,
            Error::Protocol(_) => 13,
            Error::InvalidAddress => 15,
            Error::TruncatedMessage => 17,
            Error::Canceled => 20,
        }
    }

    /// Reconstruct an error from a status code, if the code is known.
    pub fn from_code(code: i32) -> Option<Error> {
        Some(match code {
            2 => Error::OutOfMemory,
            3 => Error::InvalidArgument,
            4 => Error::Busy,
            5 => Error::Timeout,
            6 => Error::ConnectionRefused,
            7 => Error::Closed,
            8 => Error::WouldBlock,
            9 => Error::NotSupported,
            10 => Error::AddressInUse,
            11 => Error::IncorrectState,
            13 => Error::Protocol(String::new()),
            15 => Error::InvalidAddress,
            17 => Error::TruncatedMessage,
            20 => Error::Canceled,
            _ => return None,
        })
    }
}

/// Human-readable description for a status code.
///
/// Returns `"success"` for zero and `"unknown error"` for codes outside
/// the table, never panics.
pub fn strerror(code: i32) -> &'static str {
    match code {
        0 => "success",
        2 => "out of memory",
        3 => "invalid argument",
        4 => "resource busy",
        5 => "timed out",
        6 => "connection refused",
        7 => "object closed",
        8 => "operation would block",
        9 => "not supported",
        10 => "address in use",
        11 => "incorrect state",
        13 => "protocol error",
        15 => "invalid address",
        17 => "message too large for buffer",
        20 => "operation canceled",
        _ => "unknown error",
    }
}

/// Result type alias using polysock's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
