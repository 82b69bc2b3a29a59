//! Defines the `CancellableTask`, a run-once computation whose outcome can be
//! awaited from other threads.
//!
//! A task wraps an [`Operation`] and moves through an explicit state machine:
//!
//! ```text
//! New ──► Completed
//!   ├───► Failed
//!   └───► Cancelled
//! ```
//!
//! Every transition out of `New` is a compare-and-swap, so exactly one of them
//! wins. In particular, once a cancellation is recorded, an outcome produced
//! afterwards by the still running operation is discarded.
//!
//! The task has no thread of its own. [`run`](CancellableTask::run) executes
//! the operation on the calling thread, while any number of other threads wait
//! for the outcome with [`get`](CancellableTask::get),
//! [`get_timeout`](CancellableTask::get_timeout) or the
//! [`completion`](CancellableTask::completion) future.
use std::{
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU8, Ordering},
    },
    task::{Context, Poll, Waker},
    time::Duration,
};

use crate::{
    error::{TaskError, panic_message},
    operation::Operation,
};

/// Lifecycle state of a [`CancellableTask`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    New = 0,
    Completed = 1,
    Failed = 2,
    Cancelled = 3,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::New,
            1 => TaskState::Completed,
            2 => TaskState::Failed,
            _ => TaskState::Cancelled,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != TaskState::New
    }
}

// Whether `run` has been entered, independent of the outcome state.
const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;

enum Outcome<T, E> {
    Value(T),
    Error(Arc<E>),
    Panic(String),
}

struct Slot<T, E> {
    outcome: Option<Outcome<T, E>>,
    wakers: Vec<Waker>,
}

/// A cancellable computation producing a value or a failure exactly once.
///
/// Share the task between threads with an [`Arc`]: one thread calls
/// [`run`](Self::run), others wait for the outcome or cancel it.
///
/// # Example
/// ```
/// # use courier::{CancellableTask, FnOperation, TaskError};
/// # use std::{sync::Arc, thread, time::Duration};
/// let task = Arc::new(CancellableTask::new(FnOperation::new(
///     || {
///         thread::sleep(Duration::from_millis(50));
///         Ok::<_, std::io::Error>("rows")
///     },
///     || false,
/// )));
///
/// let runner = Arc::clone(&task);
/// thread::spawn(move || runner.run());
///
/// assert!(matches!(
///     task.get_timeout(Duration::from_millis(1)),
///     Err(TaskError::Timeout(_))
/// ));
/// assert_eq!(task.get().unwrap(), "rows");
/// ```
pub struct CancellableTask<O: Operation> {
    operation: O,
    state: AtomicU8,
    phase: AtomicU8,
    slot: Mutex<Slot<O::Output, O::Error>>,
    done: Condvar,
}

impl<O: Operation> CancellableTask<O> {
    pub fn new(operation: O) -> Self {
        Self {
            operation,
            state: AtomicU8::new(TaskState::New as u8),
            phase: AtomicU8::new(IDLE),
            slot: Mutex::new(Slot {
                outcome: None,
                wakers: Vec::new(),
            }),
            done: Condvar::new(),
        }
    }

    /// Executes the operation on the calling thread and records its outcome.
    ///
    /// Only the first call does anything, and only while the task is still
    /// `New`. A task cancelled before it ran never executes its operation. If
    /// the task is cancelled while the operation runs, whatever the operation
    /// returns afterwards is discarded.
    pub fn run(&self) {
        if self.state().is_terminal() {
            return;
        }
        if self
            .phase
            .compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        // A cancel may have landed between the two checks above.
        if self.state().is_terminal() {
            self.phase.store(FINISHED, Ordering::SeqCst);
            return;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.operation.execute()));
        let (state, outcome) = match result {
            Ok(Ok(value)) => (TaskState::Completed, Outcome::Value(value)),
            Ok(Err(error)) => (TaskState::Failed, Outcome::Error(Arc::new(error))),
            Err(payload) => (TaskState::Failed, Outcome::Panic(panic_message(&*payload))),
        };
        if !self.settle(state, Some(outcome)) {
            tracing::debug!("task was cancelled while running, outcome discarded");
        }
    }

    /// Cancels the task.
    ///
    /// Records `Cancelled` unless the task already reached a terminal state,
    /// then fires the operation's abort hook if the operation is running.
    /// Returns whether the cancellation was recorded and, for a running
    /// operation, whether the abort signal was issued. It does not wait for
    /// the operation to stop.
    pub fn cancel(&self) -> bool {
        if !self.settle(TaskState::Cancelled, None) {
            return false;
        }
        tracing::debug!("task cancelled");
        if self.phase.load(Ordering::SeqCst) != RUNNING {
            return true;
        }
        panic::catch_unwind(AssertUnwindSafe(|| self.operation.abort())).unwrap_or_else(|payload| {
            tracing::warn!(message = %panic_message(&*payload), "abort hook panicked");
            false
        })
    }

    /// Returns the current state without blocking.
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Returns `true` once the task reached a terminal state and `run` is no
    /// longer executing the operation.
    ///
    /// A task cancelled while its operation runs stays not done until the
    /// operation observes the abort and returns.
    pub fn is_done(&self) -> bool {
        self.state().is_terminal() && self.phase.load(Ordering::SeqCst) != RUNNING
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    /// Blocks until the task reaches a terminal state and returns its outcome.
    ///
    /// # Errors
    ///
    /// - [`TaskError::Failed`] or [`TaskError::Panicked`] if the operation failed.
    /// - [`TaskError::Cancelled`] if the task was cancelled.
    pub fn get(&self) -> Result<O::Output, TaskError<O::Error>>
    where
        O::Output: Clone,
    {
        let slot = self
            .done
            .wait_while(self.lock(), |_| !self.state().is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        self.report(&slot)
    }

    /// Like [`get`](Self::get), but gives up after `timeout`.
    ///
    /// Timing out does not affect the task; the operation keeps running. Use
    /// [`cancel`](Self::cancel) to stop it.
    ///
    /// # Errors
    ///
    /// [`TaskError::Timeout`] if no terminal state was reached in time,
    /// otherwise as [`get`](Self::get).
    pub fn get_timeout(&self, timeout: Duration) -> Result<O::Output, TaskError<O::Error>>
    where
        O::Output: Clone,
    {
        let (slot, _) = self
            .done
            .wait_timeout_while(self.lock(), timeout, |_| !self.state().is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        if !self.state().is_terminal() {
            return Err(TaskError::Timeout(timeout));
        }
        self.report(&slot)
    }

    /// Returns a future resolving to the same outcome as [`get`](Self::get).
    ///
    /// Works with any async executor; waiting does not block a thread.
    pub fn completion(&self) -> Completion<'_, O> {
        Completion { task: self }
    }

    pub fn operation(&self) -> &O {
        &self.operation
    }

    fn lock(&self) -> MutexGuard<'_, Slot<O::Output, O::Error>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // The state only leaves `New` while the slot lock is held, so waiters
    // checking the state under the same lock never miss the wake-up.
    fn settle(&self, to: TaskState, outcome: Option<Outcome<O::Output, O::Error>>) -> bool {
        let mut slot = self.lock();
        if to != TaskState::Cancelled {
            self.phase.store(FINISHED, Ordering::SeqCst);
        }
        if self
            .state
            .compare_exchange(
                TaskState::New as u8,
                to as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return false;
        }
        slot.outcome = outcome;
        let wakers = mem::take(&mut slot.wakers);
        drop(slot);

        self.done.notify_all();
        for waker in wakers {
            waker.wake();
        }
        true
    }

    fn report(&self, slot: &Slot<O::Output, O::Error>) -> Result<O::Output, TaskError<O::Error>>
    where
        O::Output: Clone,
    {
        match (self.state(), &slot.outcome) {
            (TaskState::Completed, Some(Outcome::Value(value))) => Ok(value.clone()),
            (TaskState::Failed, Some(Outcome::Error(error))) => {
                Err(TaskError::Failed(Arc::clone(error)))
            }
            (TaskState::Failed, Some(Outcome::Panic(message))) => {
                Err(TaskError::Panicked(message.clone()))
            }
            _ => Err(TaskError::Cancelled),
        }
    }
}

impl<O: Operation> fmt::Debug for CancellableTask<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellableTask")
            .field("state", &self.state())
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

/// Future returned by [`CancellableTask::completion`].
#[must_use = "futures do nothing unless polled or .awaited"]
pub struct Completion<'a, O: Operation> {
    task: &'a CancellableTask<O>,
}

impl<O: Operation> Future for Completion<'_, O>
where
    O::Output: Clone,
{
    type Output = Result<O::Output, TaskError<O::Error>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let task = self.task;
        let mut slot = task.lock();
        if task.state().is_terminal() {
            return Poll::Ready(task.report(&slot));
        }
        if !slot.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            slot.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}
