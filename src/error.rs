//! Error handling for deezdl.
//!
//! Provides a unified error handling system based on gRPC status codes,
//! with mapping from various underlying errors to appropriate categories.
//!
//! Failures of the download pipeline carry a typed detail inside the
//! [`struct@Error`] so that callers can decide on retries:
//!
//! | Detail                      | Kind               |
//! |-----------------------------|--------------------|
//! | [`InvalidIdentifier`]       | `InvalidArgument`  |
//! | [`AuthenticationRejected`]  | `Unauthenticated`  |
//! | [`TransportFailure`]        | `DataLoss`         |
//! | [`OrderingViolation`]       | `Internal`         |
//! | [`MalformedCipherInput`]    | `OutOfRange`       |
//! | [`Incomplete`]              | `Cancelled`        |
//!
//! # Error Categories
//!
//! Errors are categorized into standard types that map to HTTP status codes:
//! * Authentication/authorization failures (401, 403)
//! * Resource state (404, 409)
//! * Client errors (400, 429)
//! * Server errors (500, 501, 503)
//! * Timeouts and cancellation (499, 504)
//!
//! # Example
//!
//! ```rust
//! use deezdl::error::{Error, ErrorKind, Result};
//!
//! fn do_something() -> Result<()> {
//!     // Create typed errors
//!     if track_id == 0 {
//!         return Err(Error::invalid_identifier("track id must not be zero"));
//!     }
//!
//!     // Convert from standard errors
//!     let file = std::fs::File::open("file.txt")?;
//!
//!     Ok(())
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
///
/// Provides:
/// * Categorized error types ([`ErrorKind`])
/// * Underlying error details
/// * Conversion from common error types
/// * HTTP status code mapping
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    ///
    /// Allows accessing the original error when its concrete type is known.
    ///
    /// # Arguments
    /// * `E` - The target error type to downcast to
    ///
    /// # Returns
    /// * `Some(&E)` - If the underlying error is of type `E`
    /// * `None` - If the underlying error is not of type `E`
    ///
    /// # Example
    /// ```
    /// use std::io;
    ///
    /// let io_error = io::Error::new(io::ErrorKind::Other, "oh no!");
    /// let error = Error::from(io_error);
    ///
    /// if let Some(io_err) = error.downcast::<io::Error>() {
    ///     println!("IO error kind: {:?}", io_err.kind());
    /// }
    /// ```
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

/// Standard result type for deezdl operations.
///
/// Wraps the standard `Result` type with our custom [`struct@Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories based on gRPC status codes.
///
/// Each variant:
/// * Maps to a specific HTTP status code
/// * Represents a distinct failure category
/// * Carries a standard error message
///
/// See [gRPC status codes](https://github.com/googleapis/googleapis/blob/master/google/rpc/code.proto)
/// for the original definitions.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum ErrorKind {
    /// HTTP Mapping: 499 Client Closed Request
    #[error("operation was cancelled")]
    Cancelled = 1,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unknown error")]
    Unknown = 2,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid argument specified")]
    InvalidArgument = 3,

    /// HTTP Mapping: 504 Gateway Timeout
    #[error("operation timed out")]
    DeadlineExceeded = 4,

    /// HTTP Mapping: 404 Not Found
    #[error("not found")]
    NotFound = 5,

    /// HTTP Mapping: 409 Conflict
    #[error("attempt to create what already exists")]
    AlreadyExists = 6,

    /// HTTP Mapping: 403 Forbidden
    #[error("permission denied")]
    PermissionDenied = 7,

    /// HTTP Mapping: 401 Unauthorized
    #[error("no valid authentication credentials")]
    Unauthenticated = 16,

    /// HTTP Mapping: 429 Too Many Requests
    #[error("resource has been exhausted")]
    ResourceExhausted = 8,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid state")]
    FailedPrecondition = 9,

    /// HTTP Mapping: 409 Conflict
    #[error("operation aborted")]
    Aborted = 10,

    /// HTTP Mapping: 400 Bad Request
    #[error("out of range")]
    OutOfRange = 11,

    /// HTTP Mapping: 501 Not Implemented
    #[error("not implemented")]
    Unimplemented = 12,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("internal error")]
    Internal = 13,

    /// HTTP Mapping: 503 Service Unavailable
    #[error("service unavailable")]
    Unavailable = 14,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unrecoverable data loss or corruption")]
    DataLoss = 15,
}

impl Error {
    /// Creates a new error with specified kind and details.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::new(ErrorKind::NotFound, "user profile not found");
    /// assert_eq!(err.kind, ErrorKind::NotFound);
    /// ```
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// Creates an error for operations that were interrupted mid-execution.
    ///
    /// Maps to HTTP 409 Conflict. Use when an operation couldn't complete
    /// due to conflicting changes or state.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::aborted("download interrupted");
    /// assert_eq!(err.kind, ErrorKind::Aborted);
    /// ```
    pub fn aborted<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::Aborted,
            error: error.into(),
        }
    }

    /// Creates an error for duplicate resource creation attempts.
    ///
    /// Maps to HTTP 409 Conflict. Use when attempting to create
    /// a resource that already exists.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::already_exists("user account already registered");
    /// assert_eq!(err.kind, ErrorKind::AlreadyExists);
    /// ```
    pub fn already_exists<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::AlreadyExists,
            error: error.into(),
        }
    }

    /// Creates an error for cancelled operations.
    ///
    /// Maps to HTTP 499 Client Closed Request. Use when an operation
    /// was cancelled before completion.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::cancelled("user cancelled download");
    /// assert_eq!(err.kind, ErrorKind::Cancelled);
    /// ```
    pub fn cancelled<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::Cancelled,
            error: error.into(),
        }
    }

    /// Creates an error for data corruption or loss.
    ///
    /// Maps to HTTP 500 Internal Server Error. Use when data has been
    /// corrupted or lost in an unrecoverable way.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::data_loss("track data corrupted");
    /// assert_eq!(err.kind, ErrorKind::DataLoss);
    /// ```
    pub fn data_loss<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::DataLoss,
            error: error.into(),
        }
    }

    /// Creates an error for operations that exceeded their deadline.
    ///
    /// Maps to HTTP 504 Gateway Timeout. Use when:
    /// * Network operation times out
    /// * Token refresh times out
    /// * Cookie expires
    /// * Any time-bound operation exceeds its limit
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::deadline_exceeded("token refresh timed out");
    /// assert_eq!(err.kind, ErrorKind::DeadlineExceeded);
    /// ```
    pub fn deadline_exceeded<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::DeadlineExceeded,
            error: error.into(),
        }
    }

    /// Creates an error for operations that failed due to current state.
    ///
    /// Maps to HTTP 400 Bad Request. Use when an operation cannot proceed
    /// due to the current system state.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::failed_precondition("must be logged in first");
    /// assert_eq!(err.kind, ErrorKind::FailedPrecondition);
    /// ```
    pub fn failed_precondition<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::FailedPrecondition,
            error: error.into(),
        }
    }

    /// Creates an error for internal errors.
    ///
    /// Maps to HTTP 500 Internal Server Error. Use for unexpected internal
    /// errors that shouldn't occur during normal operation.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::internal("unexpected null pointer");
    /// assert_eq!(err.kind, ErrorKind::Internal);
    /// ```
    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::Internal,
            error: error.into(),
        }
    }

    /// Creates an error for invalid arguments.
    ///
    /// Maps to HTTP 400 Bad Request. Use when provided arguments
    /// don't meet validation requirements.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::invalid_argument("email address malformed");
    /// assert_eq!(err.kind, ErrorKind::InvalidArgument);
    /// ```
    pub fn invalid_argument<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::InvalidArgument,
            error: error.into(),
        }
    }

    /// Creates an error for missing resources.
    ///
    /// Maps to HTTP 404 Not Found. Use when a requested resource
    /// doesn't exist.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::not_found("track does not exist");
    /// assert_eq!(err.kind, ErrorKind::NotFound);
    /// ```
    pub fn not_found<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::NotFound,
            error: error.into(),
        }
    }

    /// Creates an error for values outside valid range.
    ///
    /// Maps to HTTP 400 Bad Request. Use when a value exceeds
    /// its allowed bounds.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::out_of_range("volume must be between 0 and 100");
    /// assert_eq!(err.kind, ErrorKind::OutOfRange);
    /// ```
    pub fn out_of_range<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::OutOfRange,
            error: error.into(),
        }
    }

    /// Creates an error for permission denied conditions.
    ///
    /// Maps to HTTP 403 Forbidden. Use when the caller lacks
    /// necessary permissions.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::permission_denied("lossless requires a premium subscription");
    /// assert_eq!(err.kind, ErrorKind::PermissionDenied);
    /// ```
    pub fn permission_denied<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::PermissionDenied,
            error: error.into(),
        }
    }

    /// Creates an error for exhausted resources.
    ///
    /// Maps to HTTP 429 Too Many Requests. Use when a resource
    /// limit has been reached.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::resource_exhausted("too many concurrent downloads");
    /// assert_eq!(err.kind, ErrorKind::ResourceExhausted);
    /// ```
    pub fn resource_exhausted<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::ResourceExhausted,
            error: error.into(),
        }
    }

    /// Creates an error for authentication failures.
    ///
    /// Maps to HTTP 401 Unauthorized. Use when:
    /// * Credentials are invalid
    /// * Token has expired
    /// * Refresh token is invalid
    /// * Authentication is required but missing
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::unauthenticated("login token expired");
    /// assert_eq!(err.kind, ErrorKind::Unauthenticated);
    /// ```
    pub fn unauthenticated<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::Unauthenticated,
            error: error.into(),
        }
    }

    /// Creates an error for unavailable services.
    ///
    /// Maps to HTTP 503 Service Unavailable. Use when the service
    /// is temporarily unavailable.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::unavailable("service is down for maintenance");
    /// assert_eq!(err.kind, ErrorKind::Unavailable);
    /// ```
    pub fn unavailable<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::Unavailable,
            error: error.into(),
        }
    }

    /// Creates an error for unimplemented features.
    ///
    /// Maps to HTTP 501 Not Implemented. Use when the requested
    /// operation isn't implemented.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::unimplemented("feature not yet available");
    /// assert_eq!(err.kind, ErrorKind::Unimplemented);
    /// ```
    pub fn unimplemented<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::Unimplemented,
            error: error.into(),
        }
    }

    /// Creates an error for unknown errors.
    ///
    /// Maps to HTTP 500 Internal Server Error. Use when the error
    /// doesn't fit any other category.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::unknown("unexpected error occurred");
    /// assert_eq!(err.kind, ErrorKind::Unknown);
    /// ```
    pub fn unknown<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind: ErrorKind::Unknown,
            error: error.into(),
        }
    }
}

/// Returns the underlying error source.
///
/// This allows error chains to be examined for root causes.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error for display, showing both kind and details.
///
/// Format: "{kind}: {details}"
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Identifier outside the valid domain of positive integers.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("invalid identifier: {0}")]
pub struct InvalidIdentifier(pub String);

/// The remote service did not accept the session credential.
///
/// Not retried: the credential has to be refreshed by the user.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("credential rejected: {0}")]
pub struct AuthenticationRejected(pub String);

/// Network interruption while streaming a track.
///
/// `last_good_index` is the index of the last chunk that was delivered
/// downstream, or `None` when the failure happened before chunk 0.
#[derive(Debug)]
pub struct TransportFailure {
    pub last_good_index: Option<u64>,
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl TransportFailure {
    /// Chunk index to restart fetching from.
    #[must_use]
    pub fn resume_index(&self) -> u64 {
        self.last_good_index.map_or(0, |index| index + 1)
    }
}

impl std::error::Error for TransportFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last_good_index {
            Some(index) => write!(f, "transport failed after chunk {index}: {}", self.source),
            None => write!(f, "transport failed before the first chunk: {}", self.source),
        }
    }
}

/// A chunk reached the assembler out of its strict sequence.
///
/// Always indicates a bug upstream, never an environment fault.
#[derive(Copy, Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum OrderingViolation {
    #[error("expected chunk {expected} but received chunk {received}")]
    OutOfSequence { expected: u64, received: u64 },

    #[error("received chunk {received} after final chunk {last}")]
    AfterFinal { last: u64, received: u64 },
}

/// Cipher input that decryption cannot proceed on, such as a key of the
/// wrong length.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("malformed cipher input: {0}")]
pub struct MalformedCipherInput(pub String);

/// A download that stopped before the end of the stream.
#[derive(Copy, Clone, Debug, Eq, Error, Hash, PartialEq)]
#[error("download incomplete after {chunks} chunks ({bytes} bytes)")]
pub struct Incomplete {
    pub chunks: u64,
    pub bytes: u64,
}

impl Error {
    /// Creates an `InvalidArgument` error for a rejected identifier.
    pub fn invalid_identifier(reason: impl Into<String>) -> Self {
        Self::invalid_argument(InvalidIdentifier(reason.into()))
    }

    /// Creates an `Unauthenticated` error for a rejected credential.
    pub fn authentication_rejected(reason: impl Into<String>) -> Self {
        Self::unauthenticated(AuthenticationRejected(reason.into()))
    }

    /// Creates a `DataLoss` error for a mid-stream network failure.
    pub fn transport_failure<E>(last_good_index: Option<u64>, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::data_loss(TransportFailure {
            last_good_index,
            source: error.into(),
        })
    }

    /// Creates an `Internal` error for a chunk sequence breach.
    #[must_use]
    pub fn ordering_violation(violation: OrderingViolation) -> Self {
        Self::internal(violation)
    }

    /// Creates an `OutOfRange` error for input the cipher cannot process.
    pub fn malformed_cipher_input(reason: impl Into<String>) -> Self {
        Self::out_of_range(MalformedCipherInput(reason.into()))
    }

    /// Creates a `Cancelled` error recording how far a download got.
    #[must_use]
    pub fn incomplete(chunks: u64, bytes: u64) -> Self {
        Self::cancelled(Incomplete { chunks, bytes })
    }

    /// The resume point of a transport failure, if this is one.
    #[must_use]
    pub fn transport(&self) -> Option<&TransportFailure> {
        self.downcast::<TransportFailure>()
    }

    /// The last chunk index delivered before a transport failure.
    #[must_use]
    pub fn last_good_index(&self) -> Option<u64> {
        self.transport().and_then(|failure| failure.last_good_index)
    }

    /// Converts the error of a request that carried the session credential.
    ///
    /// 401 and 403 then mean the credential was refused and map onto
    /// `AuthenticationRejected`. Anything else converts as usual.
    #[must_use]
    pub fn credentialed(err: reqwest::Error) -> Self {
        match err.status() {
            Some(reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN) => {
                Self::authentication_rejected(err.to_string())
            }
            _ => err.into(),
        }
    }

    /// Whether this error is a credential rejection.
    #[must_use]
    pub fn is_authentication_rejected(&self) -> bool {
        self.downcast::<AuthenticationRejected>().is_some()
    }
}

/// Converts IO errors into appropriate error kinds.
///
/// Maps standard IO errors to their logical equivalents:
/// * `NotFound` -> `NotFound`
/// * `PermissionDenied` -> `PermissionDenied`
/// * `ConnectionReset` -> `Aborted`
/// * etc.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_found(err),
            PermissionDenied => Self::permission_denied(err),
            AddrInUse | AlreadyExists => Self::already_exists(err),
            AddrNotAvailable | ConnectionRefused | NotConnected => Self::unavailable(err),
            BrokenPipe | ConnectionReset | ConnectionAborted => Self::aborted(err),
            Interrupted | WouldBlock => Self::cancelled(err),
            UnexpectedEof => Self::data_loss(err),
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            WriteZero => Self::resource_exhausted(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts HTTP client errors into appropriate error kinds.
///
/// Maps HTTP errors based on their nature:
/// * Body errors -> `DataLoss`
/// * Decode errors -> `InvalidArgument`
/// * Connect errors -> `Unavailable`
/// * Timeout errors -> `DeadlineExceeded`
/// * 401 -> `Unauthenticated`, 403 -> `PermissionDenied`, 404 -> `NotFound`
///
/// A refused CDN URL is not a rejected credential, so no status maps onto
/// `AuthenticationRejected` here. See [`Error::credentialed`].
/// * etc.
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_body() {
            return Self::data_loss(err);
        }

        if err.is_decode() {
            return Self::invalid_argument(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        if err.is_connect() {
            return Self::unavailable(err);
        }

        if err.is_redirect() {
            return Self::resource_exhausted(err);
        }

        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        if let Some(status) = err.status() {
            return match status {
                reqwest::StatusCode::UNAUTHORIZED => Self::unauthenticated(err),
                reqwest::StatusCode::FORBIDDEN => Self::permission_denied(err),
                reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::GONE => {
                    Self::not_found(err)
                }
                reqwest::StatusCode::TOO_MANY_REQUESTS => Self::resource_exhausted(err),
                _ => Self::failed_precondition(err),
            };
        }

        Self::unknown(err)
    }
}

/// Converts JSON errors through IO error mapping.
///
/// JSON errors are first converted to IO errors, then mapped
/// using the IO error conversion rules.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        std::io::Error::from(err).into()
    }
}

/// Converts secrets file parsing errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts header size errors to `OutOfRange`.
impl From<http::header::MaxSizeReached> for Error {
    fn from(e: http::header::MaxSizeReached) -> Self {
        Self::out_of_range(e.to_string())
    }
}

/// Converts invalid header errors to `Internal`.
impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts URL parsing errors to `Internal`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts integer parsing errors to `InvalidArgument`.
impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts task join errors: panics are `Internal`, aborts are `Cancelled`.
impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            Self::cancelled(e.to_string())
        } else {
            Self::internal(e.to_string())
        }
    }
}
