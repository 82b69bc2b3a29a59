//! A flux style dispatcher and the stores registered with it.
//!
//! A [`Dispatcher`] hands every payload to all registered callbacks, on the
//! caller's thread and in registration order. It refuses to dispatch while a
//! dispatch is running, so a callback cannot trigger a cascade of updates.
//! Callback panics are not isolated: they unwind out of
//! [`dispatch`](Dispatcher::dispatch), which then is ready for the next payload.
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use crate::{
    error::{Error, Result},
    subscriber::{CowList, Subscriber},
};

const TOKEN_PREFIX: &str = "ID_";

/// Identifies a callback registered with a [`Dispatcher`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DispatchToken(String);

impl DispatchToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DispatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Callback<T: ?Sized + 'static> {
    token: DispatchToken,
    subscriber: Subscriber<T>,
}

impl<T: ?Sized + 'static> Clone for Callback<T> {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            subscriber: self.subscriber.clone(),
        }
    }
}

// Clears the dispatching flag even when a callback unwinds.
struct Dispatching<'a>(&'a AtomicBool);

impl Drop for Dispatching<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sends payloads to registered callbacks.
///
/// # Example
/// ```
/// # use courier::{Dispatcher, Subscriber};
/// # use std::sync::{Arc, Mutex};
/// let total = Arc::new(Mutex::new(0));
/// let total_cl = Arc::clone(&total);
///
/// let dispatcher = Dispatcher::new();
/// let token = dispatcher.register(&Subscriber::new(move |n: &i32| {
///     *total_cl.lock().unwrap() += n;
/// }));
/// assert_eq!(token.as_str(), "ID_1");
///
/// dispatcher.dispatch(&2)?;
/// dispatcher.dispatch(&3)?;
/// assert_eq!(*total.lock().unwrap(), 5);
///
/// dispatcher.unregister(&token)?;
/// assert!(dispatcher.unregister(&token).is_err());
/// # Ok::<(), courier::Error>(())
/// ```
pub struct Dispatcher<T: ?Sized + 'static> {
    callbacks: CowList<Callback<T>>,
    last_id: AtomicUsize,
    dispatching: AtomicBool,
}

impl<T: ?Sized + 'static> Dispatcher<T> {
    pub fn new() -> Self {
        Self {
            callbacks: CowList::new(),
            last_id: AtomicUsize::new(0),
            dispatching: AtomicBool::new(false),
        }
    }

    /// Registers `callback` and returns the token to unregister it with.
    ///
    /// Tokens are `ID_1`, `ID_2` and so on, never reused.
    pub fn register(&self, callback: &Subscriber<T>) -> DispatchToken {
        let id = self.last_id.fetch_add(1, Ordering::Relaxed) + 1;
        let token = DispatchToken(format!("{TOKEN_PREFIX}{id}"));
        self.callbacks.push(Callback {
            token: token.clone(),
            subscriber: callback.clone(),
        });
        token
    }

    /// Removes the callback registered under `token`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownToken`] if no callback is registered under `token`.
    pub fn unregister(&self, token: &DispatchToken) -> Result<()> {
        if self.callbacks.remove_if(|c| c.token == *token) {
            Ok(())
        } else {
            Err(Error::UnknownToken(token.to_string()))
        }
    }

    /// Calls every registered callback with `payload`.
    ///
    /// # Errors
    ///
    /// [`Error::DispatchInProgress`] if called while another dispatch runs,
    /// from a callback or from another thread.
    pub fn dispatch(&self, payload: &T) -> Result<()> {
        if self
            .dispatching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("dispatch refused, another dispatch is running");
            return Err(Error::DispatchInProgress);
        }
        let _dispatching = Dispatching(&self.dispatching);

        let callbacks = self.callbacks.snapshot();
        tracing::trace!(callbacks = callbacks.len(), "dispatching payload");
        for callback in callbacks.iter() {
            callback.subscriber.call(payload);
        }
        Ok(())
    }

    #[must_use]
    pub fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::Acquire)
    }
}

impl<T: ?Sized + 'static> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("payload", &std::any::type_name::<T>())
            .field("callbacks", &self.callbacks.len())
            .field("dispatching", &self.is_dispatching())
            .finish()
    }
}

/// A callback registered with a [`Dispatcher`] for its whole life.
///
/// The store registers itself when it is created and keeps the token, so
/// other callbacks can refer to it.
pub struct Store<T: ?Sized + 'static> {
    dispatcher: Arc<Dispatcher<T>>,
    token: DispatchToken,
}

impl<T: ?Sized + 'static> Store<T> {
    pub fn new(
        dispatcher: &Arc<Dispatcher<T>>,
        on_dispatch: impl Fn(&T) + Send + Sync + 'static,
    ) -> Self {
        let token = dispatcher.register(&Subscriber::new(on_dispatch));
        Self {
            dispatcher: Arc::clone(dispatcher),
            token,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<T>> {
        &self.dispatcher
    }

    pub fn dispatch_token(&self) -> &DispatchToken {
        &self.token
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("token", &self.token).finish()
    }
}
