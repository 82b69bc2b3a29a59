//! Thread-backed primitives for ordered, isolated and cancellable execution.
//!
//! `courier` provides three building blocks that coordinate work across plain
//! OS threads. They do not require an async runtime, but the results of a
//! cancellable task can also be awaited from any executor.
//!
//! Features include:
//! - A [`SequentialExecutor`] running submitted closures one at a time, in
//!   submission order, on a dedicated thread
//! - An [`EventBus`] delivering published values to typed subscribers on its own
//!   thread, routed along an explicit type [`Hierarchy`]
//! - A [`CancellableTask`] wrapping an [`Operation`] with a compare-and-swap
//!   state machine, blocking waits with optional timeout and a completion future
//! - [`Signal`] and [`Action`] for synchronous multicast on the caller's thread
//! - A flux style [`Dispatcher`] with self-registering [`Store`]s
//!
//! Panics escaping work items and handlers never reach whoever submitted the
//! work. They are handed to an [`ErrorSink`], by default [`LogSink`], which
//! logs them through `tracing`.

mod bus;
mod dispatcher;
mod error;
mod executor;
mod hierarchy;
mod operation;
mod signal;
mod sink;
mod subscriber;
mod task;
mod worker;

pub use bus::{EventBus, EventBusBuilder};
pub use dispatcher::{DispatchToken, Dispatcher, Store};
pub use error::{CallbackFailure, Error, Origin, Result, TaskError};
pub use executor::{ExecutorBuilder, SequentialExecutor};
pub use hierarchy::{Hierarchy, HierarchyBuilder, TypeKey};
pub use operation::{FnOperation, FutureOperation, Operation, OperationError};
pub use signal::{Action, Signal};
pub use sink::{ErrorSink, LogSink};
pub use subscriber::Subscriber;
pub use task::{CancellableTask, Completion, TaskState};
