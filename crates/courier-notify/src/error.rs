/// A channel delivery failure with its retry classification.
///
/// `retryable` drives the dispatcher's state machine: transient failures
/// count against `max_retries` and are rescheduled with backoff, terminal
/// failures move the row straight to FAILED.
///
/// # Examples
///
/// ```rust
/// use courier_notify::error::ChannelError;
///
/// let err = ChannelError::terminal("INVALID_RECIPIENT", "mailbox does not exist");
/// assert!(!err.retryable);
/// assert!(err.to_string().contains("INVALID_RECIPIENT"));
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ChannelError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl ChannelError {
    pub fn transient(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn terminal(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<reqwest::Error> for ChannelError {
    /// Transport-level failures (connect errors, timeouts) are transient.
    fn from(e: reqwest::Error) -> Self {
        let code = if e.is_timeout() { "TIMEOUT" } else { "API_ERROR" };
        ChannelError::transient(code, e.to_string())
    }
}
