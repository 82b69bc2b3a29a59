//! Synchronous multicast on the sender's thread.
//!
//! Unlike the [`EventBus`](crate::EventBus), a [`Signal`] has no thread and no
//! queue: `send` calls every handler before it returns. Handler panics are
//! isolated the same way and go to the signal's [`ErrorSink`].
use std::{any::Any, fmt, sync::Arc};

use crate::{
    error::{CallbackFailure, Origin},
    sink::{ErrorSink, default_sink},
    subscriber::{CowList, Subscriber, notify_all},
};

/// A typed notification sent directly to its handlers.
///
/// # Example
/// ```
/// # use courier::{Signal, Subscriber};
/// # use std::sync::{Arc, Mutex};
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let seen_cl = Arc::clone(&seen);
///
/// let signal = Signal::new();
/// signal.add_handler(&Subscriber::new(move |m: &String| {
///     seen_cl.lock().unwrap().push(m.clone());
/// }));
///
/// signal.send(&"Foo".to_string());
/// assert_eq!(*seen.lock().unwrap(), ["Foo"]);
/// ```
pub struct Signal<T: ?Sized + 'static> {
    handlers: CowList<Subscriber<T>>,
    sink: Arc<dyn ErrorSink>,
}

impl<T: ?Sized + 'static> Signal<T> {
    pub fn new() -> Self {
        Self::with_sink(default_sink())
    }

    /// Creates a signal reporting handler failures to `sink`.
    pub fn with_sink(sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            handlers: CowList::new(),
            sink,
        }
    }

    pub fn add_handler(&self, handler: &Subscriber<T>) {
        self.handlers.push(handler.clone());
    }

    /// Removes `handler`. Returns `false` if it was not added.
    pub fn remove_handler(&self, handler: &Subscriber<T>) -> bool {
        self.handlers.remove(handler)
    }

    /// Calls every handler with `message`, in the order they were added.
    pub fn send(&self, message: &T) {
        let handlers = self.handlers.snapshot();
        tracing::trace!(handlers = handlers.len(), "sending signal");
        notify_all(&handlers, message, &mut |payload: Box<dyn Any + Send>| {
            self.sink
                .report(CallbackFailure::from_panic(Origin::Signal, &*payload));
        });
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl<T: ?Sized + 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("message", &std::any::type_name::<T>())
            .field("handlers", &self.handler_count())
            .finish()
    }
}

/// A [`Signal`] without a message.
///
/// Handlers are created with [`Subscriber::action`].
#[derive(Debug, Default)]
pub struct Action {
    signal: Signal<()>,
}

impl Action {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            signal: Signal::with_sink(sink),
        }
    }

    pub fn add_handler(&self, handler: &Subscriber<()>) {
        self.signal.add_handler(handler);
    }

    pub fn remove_handler(&self, handler: &Subscriber<()>) -> bool {
        self.signal.remove_handler(handler)
    }

    pub fn trigger(&self) {
        self.signal.send(&());
    }

    pub fn handler_count(&self) -> usize {
        self.signal.handler_count()
    }
}
