//! Defines the `SequentialExecutor`, a single background thread that runs
//! submitted closures one at a time.
//!
//! Work items are queued in an unbounded FIFO channel and executed strictly in
//! the order they were accepted, no matter which thread submitted them. A work
//! item that panics is isolated: the panic is reported to the executor's
//! [`ErrorSink`] and the worker moves on to the next item.
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    executor::block_on_stream,
};

use crate::{
    error::{CallbackFailure, Error, Origin, Result},
    sink::{ErrorSink, default_sink},
    worker,
};

type WorkItem = Box<dyn FnOnce() + Send + 'static>;

const DEFAULT_NAME: &str = "sequential-executor";

struct Shared {
    name: String,
    stopped: AtomicBool,
}

/// Configures and starts a [`SequentialExecutor`].
///
/// Obtained from [`SequentialExecutor::builder`].
pub struct ExecutorBuilder {
    name: String,
    sink: Arc<dyn ErrorSink>,
}

impl ExecutorBuilder {
    /// Sets the name of the worker thread. Defaults to `sequential-executor`.
    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    /// Sets the sink receiving panics of work items. Defaults to [`LogSink`](crate::LogSink).
    pub fn sink(&mut self, sink: Arc<dyn ErrorSink>) -> &mut Self {
        self.sink = sink;
        self
    }

    /// Starts the worker thread and returns a handle to it.
    ///
    /// Fails with [`Error::InvalidArgument`] if the configured name cannot be
    /// used as a thread name.
    pub fn spawn(&self) -> Result<SequentialExecutor> {
        let (sender, receiver) = mpsc::unbounded();
        let shared = Arc::new(Shared {
            name: self.name.clone(),
            stopped: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let sink = Arc::clone(&self.sink);
        worker::spawn_detached(&self.name, move || work(receiver, &worker_shared, &*sink))?;

        Ok(SequentialExecutor { sender, shared })
    }
}

/// Executes closures from a queue on one dedicated thread.
///
/// Cloning the executor yields another handle to the same queue and thread.
/// The thread stops when [`shutdown`](Self::shutdown) is called. It also stops
/// once every handle has been dropped and the already accepted work has run:
/// nothing can submit to it any more, so it does not linger until the process
/// exits. The thread is never joined and never keeps the process alive.
///
/// # Example
/// ```
/// # use courier::SequentialExecutor;
/// # use std::sync::mpsc;
/// let executor = SequentialExecutor::new()?;
/// let (tx, rx) = mpsc::channel();
///
/// for i in 0..3 {
///     let tx = tx.clone();
///     executor.submit(move || tx.send(i).unwrap())?;
/// }
///
/// let order: Vec<i32> = rx.iter().take(3).collect();
/// assert_eq!(order, vec![0, 1, 2]);
/// # Ok::<(), courier::Error>(())
/// ```
#[derive(Clone)]
pub struct SequentialExecutor {
    sender: UnboundedSender<WorkItem>,
    shared: Arc<Shared>,
}

impl SequentialExecutor {
    /// Starts an executor with the default thread name and a logging sink.
    pub fn new() -> Result<Self> {
        Self::builder().spawn()
    }

    #[must_use]
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder {
            name: DEFAULT_NAME.to_string(),
            sink: default_sink(),
        }
    }

    /// Queues `work` for execution on the worker thread and returns immediately.
    ///
    /// Work runs in the order of successful `submit` calls. Whatever happens
    /// inside `work` is never reported back here; panics go to the error sink.
    ///
    /// # Errors
    ///
    /// [`Error::Shutdown`] if the executor has been shut down.
    pub fn submit(&self, work: impl FnOnce() + Send + 'static) -> Result<()> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(self.refuse());
        }
        self.sender
            .unbounded_send(Box::new(work))
            .map_err(|_| self.refuse())
    }

    /// Stops the worker thread.
    ///
    /// The item currently running finishes; items still waiting in the queue
    /// are dropped without running. Later submissions fail.
    pub fn shutdown(&self) {
        if !self.shared.stopped.swap(true, Ordering::AcqRel) {
            tracing::debug!(name = %self.shared.name, "shutting down executor");
        }
        self.sender.close_channel();
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Name of the worker thread.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    fn refuse(&self) -> Error {
        tracing::warn!(name = %self.shared.name, "work submitted after shutdown");
        Error::Shutdown(self.shared.name.clone())
    }
}

fn work(receiver: UnboundedReceiver<WorkItem>, shared: &Shared, sink: &dyn ErrorSink) {
    let span = tracing::debug_span!("sequential_executor", name = %shared.name);
    let _entered = span.enter();
    tracing::debug!("worker started");

    for item in block_on_stream(receiver) {
        // Queued items are dropped once a shutdown was requested.
        if shared.stopped.load(Ordering::Acquire) {
            break;
        }
        tracing::trace!("running work item");
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(item)) {
            let origin = Origin::Executor(shared.name.clone());
            sink.report(CallbackFailure::from_panic(origin, &*payload));
        }
    }

    tracing::debug!("worker stopped");
}
