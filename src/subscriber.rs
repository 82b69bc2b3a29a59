//! Shared handler handles and the copy-on-write lists that hold them.
use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, PoisonError, RwLock},
};

/// A handler for values of type `S`.
///
/// The handle is cheap to clone. Its identity is the shared allocation: clones
/// of one `Subscriber` are the same subscriber, two subscribers created from
/// identical closures are not. Keep a clone around to unsubscribe later.
///
/// `S` may be unsized, for instance `dyn Any` or a trait object naming a
/// category of events.
pub struct Subscriber<S: ?Sized + 'static> {
    handler: Arc<dyn Fn(&S) + Send + Sync>,
}

impl<S: ?Sized + 'static> Subscriber<S> {
    pub fn new(handler: impl Fn(&S) + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Returns `true` if both handles refer to the same subscriber.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        // Compare data pointers only; vtable pointers are not unique per type.
        Arc::as_ptr(&self.handler).cast::<()>() == Arc::as_ptr(&other.handler).cast::<()>()
    }

    pub(crate) fn call(&self, value: &S) {
        (self.handler)(value);
    }
}

impl Subscriber<()> {
    /// Creates a subscriber for an [`Action`](crate::Action), which carries no message.
    pub fn action(handler: impl Fn() + Send + Sync + 'static) -> Self {
        Self::new(move |_: &()| handler())
    }
}

impl<S: ?Sized + 'static> Clone for Subscriber<S> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<S: ?Sized + 'static> fmt::Debug for Subscriber<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("value", &std::any::type_name::<S>())
            .field("handler", &Arc::as_ptr(&self.handler).cast::<()>())
            .finish()
    }
}

/// Calls `subscriber` with `value`, passing a panic payload to `on_panic`.
pub(crate) fn notify_one<S: ?Sized + 'static>(
    subscriber: &Subscriber<S>,
    value: &S,
    on_panic: &mut dyn FnMut(Box<dyn Any + Send>),
) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| subscriber.call(value))) {
        on_panic(payload);
    }
}

/// Calls every subscriber in `list` with `value`, isolating panics.
///
/// Each panic payload is passed to `on_panic`; the remaining subscribers still run.
pub(crate) fn notify_all<S: ?Sized + 'static>(
    list: &[Subscriber<S>],
    value: &S,
    on_panic: &mut dyn FnMut(Box<dyn Any + Send>),
) {
    for subscriber in list {
        notify_one(subscriber, value, on_panic);
    }
}

/// A copy-on-write list.
///
/// Readers take a snapshot and iterate it without holding the lock, so
/// handlers may add or remove entries while a notification is running.
pub(crate) struct CowList<T> {
    list: RwLock<Arc<Vec<T>>>,
}

impl<T: Clone> CowList<T> {
    pub(crate) fn new() -> Self {
        Self {
            list: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<T>> {
        Arc::clone(&self.list.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn push(&self, entry: T) {
        let mut list = self.list.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::with_capacity(list.len() + 1);
        next.extend(list.iter().cloned());
        next.push(entry);
        *list = Arc::new(next);
    }

    /// Removes every entry matching `pred`. Returns `true` if any was found.
    pub(crate) fn remove_if(&self, pred: impl Fn(&T) -> bool) -> bool {
        let mut list = self.list.write().unwrap_or_else(PoisonError::into_inner);
        if !list.iter().any(&pred) {
            return false;
        }
        let next = list.iter().filter(|e| !pred(*e)).cloned().collect();
        *list = Arc::new(next);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.list.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<S: ?Sized + 'static> CowList<Subscriber<S>> {
    /// Removes every registration of `subscriber`. Returns `true` if any was found.
    pub(crate) fn remove(&self, subscriber: &Subscriber<S>) -> bool {
        self.remove_if(|s| s.same_as(subscriber))
    }
}
