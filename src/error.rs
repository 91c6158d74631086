use std::{collections::BTreeMap, error, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A type-erased error as it travels through handlers and interceptors.
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// The closed set of error codes a client can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    Unauthenticated,
    PermissionDenied,
    Unavailable,
    NotImplemented,
    Internal,
}

impl ErrorCode {
    /// The HTTP status code a unary failure with this code is sent with.
    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::InvalidArgument => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::Unauthenticated => 401,
            ErrorCode::PermissionDenied => 403,
            ErrorCode::Unavailable => 503,
            ErrorCode::NotImplemented => 501,
            ErrorCode::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::NotImplemented => "not_implemented",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error shape every failure is converted into before it leaves the process.
///
/// Handlers can return this directly to pick the code a client sees. Anything else they return
/// is mapped by the error transformer, see [`Config::error_transformer`](crate::Config::error_transformer).
#[derive(Clone, Serialize, Deserialize)]
pub struct Error {
    code: ErrorCode,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<BTreeMap<String, Value>>,
    // `Arc` instead of `Box` so the error stays `Clone`.
    #[serde(skip)]
    cause: Option<Arc<dyn error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            cause: None,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthenticated, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotImplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn with_details(mut self, details: BTreeMap<String, Value>) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(Default::default)
            .insert(key.into(), value.into());
        self
    }

    /// Attach the underlying failure. It is never serialized but is available to logging.
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub(crate) fn with_boxed_cause(mut self, cause: BoxError) -> Self {
        self.cause = Some(Arc::from(cause));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&BTreeMap<String, Value>> {
        self.details.as_ref()
    }

    pub fn cause(&self) -> Option<&(dyn error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// The status code a unary response carrying this error is sent with.
    pub fn status(&self) -> u16 {
        self.code.status()
    }

    /// Hide the message of an `internal` error. Other codes are returned unchanged.
    pub(crate) fn masked(self) -> Self {
        match self.code {
            ErrorCode::Internal => Self {
                code: ErrorCode::Internal,
                message: MASKED_MESSAGE.into(),
                details: None,
                cause: self.cause,
            },
            _ => self,
        }
    }
}

/// The message an `internal` error carries once masked.
pub const MASKED_MESSAGE: &str = "internal error";

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.message == other.message && self.details == other.details
    }
}

impl Eq for Error {}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("details", &self.details)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn error::Error + 'static))
    }
}

/// The body of every unary response and every push event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Envelope<T> {
    Result(T),
    Error(Error),
}

/// Conditions that end a push stream.
///
/// [`StreamError::Closed`] is expected termination and is never reported as a failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    /// The client went away, the call was cancelled or the stream already ended.
    #[error("stream closed")]
    Closed,
    /// The client stopped draining the connection and a write missed its deadline.
    #[error("stream write timed out")]
    WriteTimeout,
    #[error("error serializing stream event: {0}")]
    Encode(#[source] Arc<serde_json::Error>),
}

impl StreamError {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn is_write_timeout(&self) -> bool {
        matches!(self, Self::WriteTimeout)
    }

    /// Whether `err` only signals the end of the stream, either directly or as the cause of an
    /// [`Error`] it was converted into.
    pub(crate) fn is_termination(err: &(dyn error::Error + 'static)) -> bool {
        let err = match err.downcast_ref::<Error>() {
            Some(err) => match err.cause() {
                Some(cause) => cause as &(dyn error::Error + 'static),
                None => return false,
            },
            None => err,
        };

        err.downcast_ref::<StreamError>()
            .is_some_and(|err| matches!(err, Self::Closed | Self::WriteTimeout))
    }
}

/// Lets handlers that return [`Error`] use `?` on [`Emitter::send`](crate::Emitter::send).
impl From<StreamError> for Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Encode(_) => Error::internal(err.to_string()).with_cause(err),
            StreamError::Closed | StreamError::WriteTimeout => {
                Error::unavailable(err.to_string()).with_cause(err)
            }
        }
    }
}

/// Failures reading or decoding the request before a handler runs.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("request body exceeds the limit of {limit} bytes")]
    BodyTooLarge { limit: usize },
    #[error("error reading request body: {0}")]
    Body(#[source] BoxError),
    #[error("error deserializing procedure input: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("unsupported method {method} for {kind} procedure")]
    Method {
        method: http::Method,
        kind: crate::ProcedureKind,
    },
}
