//! Error types shared by the executor, the event bus and cancellable tasks.
//!
//! Errors fall in two groups. Synchronous errors ([`Error`]) are returned to the
//! immediate caller of a public method. Failures raised inside asynchronous work
//! never reach the submitter: a cancellable task keeps them in its state and
//! reports them through [`TaskError`], while work items and event handlers are
//! isolated and turned into a [`CallbackFailure`] for an
//! [`ErrorSink`](crate::ErrorSink).

use std::{any::Any, fmt, io, sync::Arc, time::Duration};

use thiserror::Error;

/// Errors returned synchronously by constructors, builders and submission methods.
#[derive(Debug, Error)]
pub enum Error {
    /// A public method received an argument it cannot work with.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Work was submitted to an executor or bus that has been shut down.
    #[error("`{0}` has been shut down")]
    Shutdown(String),

    /// A dispatch token that was never issued or was already unregistered.
    #[error("`{0}` does not map to a registered callback")]
    UnknownToken(String),

    /// A payload was dispatched from inside a running dispatch.
    #[error("cannot dispatch in the middle of a dispatch")]
    DispatchInProgress,

    /// The dedicated background thread could not be started.
    #[error("failed to spawn thread `{name}`")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome errors of [`CancellableTask::get`](crate::CancellableTask::get)
/// and its variants.
#[derive(Debug, Error)]
pub enum TaskError<E> {
    /// The operation returned an error. The original cause is attached.
    #[error("task failed: {0}")]
    Failed(Arc<E>),

    /// The operation panicked while running.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was cancelled before it produced an outcome.
    #[error("task was cancelled")]
    Cancelled,

    /// No outcome was recorded within the given time. The task keeps running.
    #[error("task did not finish within {0:?}")]
    Timeout(Duration),
}

impl<E> TaskError<E> {
    /// Returns `true` for the cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    /// Returns `true` if the wait ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout(_))
    }
}

impl<E> Clone for TaskError<E> {
    fn clone(&self) -> Self {
        match self {
            TaskError::Failed(cause) => TaskError::Failed(Arc::clone(cause)),
            TaskError::Panicked(message) => TaskError::Panicked(message.clone()),
            TaskError::Cancelled => TaskError::Cancelled,
            TaskError::Timeout(timeout) => TaskError::Timeout(*timeout),
        }
    }
}

/// The component a [`CallbackFailure`] escaped from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    /// A work item of the named [`SequentialExecutor`](crate::SequentialExecutor).
    Executor(String),

    /// A handler invoked by the delivery thread of the named [`EventBus`](crate::EventBus).
    EventBus(String),

    /// A handler of a [`Signal`](crate::Signal) or [`Action`](crate::Action).
    Signal,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Executor(name) => write!(f, "executor `{name}`"),
            Origin::EventBus(name) => write!(f, "event bus `{name}`"),
            Origin::Signal => write!(f, "signal handler"),
        }
    }
}

/// A failure that escaped a work item or an event handler.
///
/// These are never returned to whoever submitted the work. They are handed to
/// the component's error sink instead.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unhandled failure in {origin}: {message}")]
pub struct CallbackFailure {
    origin: Origin,
    message: String,
}

impl CallbackFailure {
    pub fn new(origin: Origin, message: impl Into<String>) -> Self {
        Self {
            origin,
            message: message.into(),
        }
    }

    pub(crate) fn from_panic(origin: Origin, payload: &(dyn Any + Send)) -> Self {
        Self::new(origin, panic_message(payload))
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// The panic message or error text of the failure.
    pub fn message(&self) -> &str {
        &self.message
    }
}

// Panics raised with `panic!("literal")` carry a `&str`, formatted ones a `String`.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
