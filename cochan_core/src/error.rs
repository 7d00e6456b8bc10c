use std::time::Duration;

/// Every failure a resume, yield or creation call can report.
#[derive(Debug, thiserror::Error)]
pub enum CoroutineError {
    #[error("coroutine is closed")]
    Closed,

    #[error("invalid function: {0}")]
    InvalidFunction(String),

    #[error("coroutine handoff exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("coroutine handoff cancelled")]
    Cancelled,

    #[error("coroutine body returned an error: {0}")]
    Application(anyhow::Error),

    #[error("coroutine body panicked: {0}")]
    Panicked(String),

    #[error("coroutines must be created inside a tokio runtime")]
    NoRuntime,

    #[error("default timeout already set")]
    DefaultTimeoutAlreadySet,
}

impl CoroutineError {
    /// True when the handle that produced this error is now closed for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CoroutineError::Closed
                | CoroutineError::DeadlineExceeded(_)
                | CoroutineError::Cancelled
                | CoroutineError::Application(_)
                | CoroutineError::Panicked(_)
        )
    }

    pub fn is_deadline(&self) -> bool {
        matches!(self, CoroutineError::DeadlineExceeded(_) | CoroutineError::Cancelled)
    }
}

impl From<anyhow::Error> for CoroutineError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<CoroutineError>() {
            Ok(inner) => inner,
            Err(err) => CoroutineError::Application(err),
        }
    }
}

pub type Result<T, E = CoroutineError> = std::result::Result<T, E>;
