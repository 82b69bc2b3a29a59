//! The work wrapped by a [`CancellableTask`](crate::CancellableTask).
//!
//! Interrupting a thread does not reliably stop a long blocking call such as a
//! network request or a database query. An [`Operation`] therefore brings its
//! own abort hook, which the task fires from whichever thread cancels it.
use std::sync::{Mutex, PoisonError};

use futures::{
    executor::block_on,
    future::{AbortHandle, Abortable, Aborted},
};
use thiserror::Error;

/// A unit of work with a cooperative abort mechanism.
///
/// `execute` runs on the thread calling [`CancellableTask::run`](crate::CancellableTask::run).
/// `abort` may be called concurrently from any other thread while `execute` is
/// in progress and should make it return as soon as possible. It returns
/// whether the abort signal could be delivered, not whether `execute` has
/// stopped.
///
/// `abort` may also fire when `execute` is not in progress: a cancellation
/// racing with the start of `run` can reach the hook after `run` observed the
/// cancellation and returned without executing. Implementations must tolerate
/// an abort with nothing to abort.
pub trait Operation: Send + Sync {
    type Output: Send;
    type Error: Send + Sync;

    fn execute(&self) -> Result<Self::Output, Self::Error>;

    fn abort(&self) -> bool;
}

/// An [`Operation`] made of two closures.
///
/// # Example
/// ```
/// # use courier::{CancellableTask, FnOperation};
/// # use std::sync::atomic::{AtomicBool, Ordering};
/// # use std::sync::Arc;
/// let stop = Arc::new(AtomicBool::new(false));
/// let stop_cl = Arc::clone(&stop);
///
/// let task = CancellableTask::new(FnOperation::new(
///     move || {
///         let mut n = 0u64;
///         while !stop_cl.load(Ordering::Relaxed) && n < 1_000 {
///             n += 1;
///         }
///         Ok::<_, std::io::Error>(n)
///     },
///     move || {
///         stop.store(true, Ordering::Relaxed);
///         true
///     },
/// ));
///
/// task.run();
/// assert_eq!(task.get().unwrap(), 1_000);
/// ```
pub struct FnOperation<F, A> {
    execute: F,
    abort: A,
}

impl<F, A> FnOperation<F, A> {
    pub fn new(execute: F, abort: A) -> Self {
        Self { execute, abort }
    }
}

impl<F, A, T, E> Operation for FnOperation<F, A>
where
    F: Fn() -> Result<T, E> + Send + Sync,
    A: Fn() -> bool + Send + Sync,
    T: Send,
    E: Send + Sync,
{
    type Output = T;
    type Error = E;

    fn execute(&self) -> Result<T, E> {
        (self.execute)()
    }

    fn abort(&self) -> bool {
        (self.abort)()
    }
}

/// Errors of a [`FutureOperation`].
#[derive(Debug, Error)]
pub enum OperationError<E> {
    /// The future was aborted before it finished.
    #[error("operation was aborted")]
    Aborted,

    /// The future already ran to completion once.
    #[error("operation was already executed")]
    Consumed,

    /// The future resolved to an error.
    #[error("{0}")]
    Failed(E),
}

/// An [`Operation`] that drives a future to completion on the calling thread.
///
/// The future is polled with [`futures::executor::block_on`], so it must not
/// depend on a particular async runtime (no `tokio::time::sleep` and the like),
/// and `run` must not be called from inside another executor. Aborting drops
/// the future at its next suspension point.
pub struct FutureOperation<F> {
    future: Mutex<Option<Abortable<F>>>,
    handle: AbortHandle,
}

impl<F> FutureOperation<F> {
    pub fn new(future: F) -> Self {
        let (handle, registration) = AbortHandle::new_pair();
        Self {
            future: Mutex::new(Some(Abortable::new(future, registration))),
            handle,
        }
    }
}

impl<F, T, E> Operation for FutureOperation<F>
where
    F: Future<Output = Result<T, E>> + Send,
    T: Send,
    E: Send + Sync,
{
    type Output = T;
    type Error = OperationError<E>;

    fn execute(&self) -> Result<T, OperationError<E>> {
        let future = self
            .future
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(OperationError::Consumed)?;

        match block_on(future) {
            Ok(result) => result.map_err(OperationError::Failed),
            Err(Aborted) => Err(OperationError::Aborted),
        }
    }

    fn abort(&self) -> bool {
        self.handle.abort();
        true
    }
}
