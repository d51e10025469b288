// deferred error types.

use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    sync::Arc,
};


/// Error type tag of a rejection caused by a failing callback
pub const CALLBACK_ERROR: &str = "deferred_callback_error";

/// Error type tag of a rejection caused by the timeout elapsing
pub const TIMED_OUT: &str = "deferred_timed_out";


/// Final value of a settled deferred
pub type Outcome<T, E> = Result<T, Rejection<E>>;


/// Error for a reaction callback failing while being dispatched
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CallbackError {
    /// Textual form of the callback which failed
    pub callback: &'static str,
    /// Description naming the callback which failed
    pub message: String,
    /// The error the callback returned, or its panic converted into an error
    pub error: Arc<anyhow::Error>,
}

impl CallbackError {
    pub(crate) fn new(callback: &'static str, error: anyhow::Error) -> Self {
        CallbackError {
            callback,
            message: format!("an error occurred in callback {}: {:#}", callback, error),
            error: Arc::new(error),
        }
    }
}


/// Payload a deferred is rejected with
#[derive(Debug, Clone)]
pub enum Rejection<E> {
    /// The producer rejected the deferred with an error of its own
    Rejected(E),
    /// A reaction callback failed, which forced the deferred into the rejected state
    ///
    /// See [`CALLBACK_ERROR`].
    CallbackFailed(CallbackError),
    /// The deferred's timeout elapsed while it was still pending
    ///
    /// See [`TIMED_OUT`].
    TimedOut,
}

impl<E> Rejection<E> {
    /// Error type tag of synthetic rejections, or `None` for producer rejections
    pub fn error_type(&self) -> Option<&'static str> {
        match self {
            Rejection::Rejected(_) => None,
            Rejection::CallbackFailed(_) => Some(CALLBACK_ERROR),
            Rejection::TimedOut => Some(TIMED_OUT),
        }
    }

    /// The producer's error, if this is a producer rejection
    pub fn rejected(&self) -> Option<&E> {
        match self {
            Rejection::Rejected(e) => Some(e),
            _ => None,
        }
    }

    /// Ownership-taking version of [`rejected`](Self::rejected)
    pub fn into_rejected(self) -> Option<E> {
        match self {
            Rejection::Rejected(e) => Some(e),
            _ => None,
        }
    }

    /// The callback error, if a failing callback caused this rejection
    pub fn callback_error(&self) -> Option<&CallbackError> {
        match self {
            Rejection::CallbackFailed(e) => Some(e),
            _ => None,
        }
    }

    /// Whether this rejection was caused by the timeout elapsing
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Rejection::TimedOut)
    }
}

impl<E: Display> Display for Rejection<E> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Rejection::Rejected(e) => write!(f, "rejected: {}", e),
            Rejection::CallbackFailed(e) => write!(f, "{}: {}", CALLBACK_ERROR, e),
            Rejection::TimedOut => f.write_str(TIMED_OUT),
        }
    }
}

impl<E: Debug + Display> Error for Rejection<E> {}
