use std::fmt;

/// The error type returned by message handlers.
#[derive(Debug)]
pub struct HandlerError {
    /// The underlying error returned by the message handler.
    pub inner_error: anyhow::Error,
    /// `error_type` distinguishes two classes of errors:
    /// - transient errors; message processing might succeed if retried after a short delay
    /// - fatal errors; no matter how many times you retry, processing will never succeed
    ///
    /// Check out [`ErrorType`]'s documentation for more details.
    pub error_type: ErrorType,
}

impl HandlerError {
    pub fn transient(inner_error: impl Into<anyhow::Error>) -> Self {
        Self {
            inner_error: inner_error.into(),
            error_type: ErrorType::Transient,
        }
    }

    pub fn fatal(inner_error: impl Into<anyhow::Error>) -> Self {
        Self {
            inner_error: inner_error.into(),
            error_type: ErrorType::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.error_type == ErrorType::Transient
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner_error.as_ref())
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Handling of a message failed due to a {} issue: {}",
            self.error_type, self.inner_error
        )
    }
}

/// Types of failure when handling a message.
/// Used by [`QueueConsumer`](super::QueueConsumer) to decide whether a nacked message is
/// requeued.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ErrorType {
    /// Message processing might succeed if retried after a short delay.
    ///
    /// E.g. the message handler encountered a time out when trying to call an API to fulfill
    /// the message processing requirements.
    Transient,
    /// Message processing will never succeed, no matter how many times you retry or how long
    /// you wait.
    ///
    /// E.g. the message payload is malformed and cannot be deserialized.
    Fatal,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}
