//! Provides the `EventBus`, which delivers published values to typed subscribers
//! on a dedicated thread.
//!
//! Values are routed by their concrete type. A subscription pairs a type with a
//! subscriber: it receives every value of that type and, through the bus's
//! [`Hierarchy`], every value of a declared subtype. The subscriber's own
//! parameter type may be wider than the subscribed type, so a handler of
//! `dyn Number` can listen to `f64` values only. Subscriptions for `dyn Any`
//! receive everything.
//!
//! Publishing only enqueues the value. One delivery thread per bus takes values
//! from the queue in publish order and invokes the matching subscribers, so two
//! values published one after the other from the same thread always reach a
//! subscriber in that order. A panicking subscriber is isolated: the panic goes
//! to the bus's [`ErrorSink`] and delivery continues with the next subscriber.
//!
//! A process-wide bus is available through [`EventBus::global`]. Any number of
//! independent buses can be created next to it.
use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    sync::{
        Arc, OnceLock, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    executor::block_on_stream,
};

use crate::{
    error::{CallbackFailure, Error, Origin, Result},
    hierarchy::Hierarchy,
    sink::{ErrorSink, default_sink},
    subscriber::{CowList, Subscriber, notify_one},
    worker,
};

static GLOBAL: OnceLock<EventBus> = OnceLock::new();

const DEFAULT_NAME: &str = "event-bus";
const GLOBAL_NAME: &str = "global-event-bus";

type Delivery = Box<dyn FnOnce(&BusShared, &dyn ErrorSink) + Send>;

// A subscriber with its parameter type erased.
#[derive(Clone)]
struct Registration {
    param: TypeId,
    subscriber: Arc<dyn Any + Send + Sync>,
}

impl Registration {
    fn new<S: ?Sized + 'static>(subscriber: &Subscriber<S>) -> Self {
        Self {
            param: TypeId::of::<S>(),
            subscriber: Arc::new(subscriber.clone()),
        }
    }

    fn typed<S: ?Sized + 'static>(&self) -> Option<&Subscriber<S>> {
        self.subscriber.downcast_ref()
    }

    fn is<S: ?Sized + 'static>(&self, subscriber: &Subscriber<S>) -> bool {
        self.typed::<S>().is_some_and(|s| s.same_as(subscriber))
    }
}

type Registrations = CowList<Registration>;

// Registrations keyed by the subscribed type, in registration order per key.
#[derive(Default)]
struct Registry {
    lists: RwLock<HashMap<TypeId, Arc<Registrations>>>,
}

impl Registry {
    fn list(&self, key: TypeId) -> Option<Arc<Registrations>> {
        let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
        lists.get(&key).cloned()
    }

    fn list_or_insert(&self, key: TypeId) -> Arc<Registrations> {
        if let Some(list) = self.list(key) {
            return list;
        }
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(lists.entry(key).or_insert_with(|| Arc::new(CowList::new())))
    }

    fn all(&self) -> Vec<(TypeId, Arc<Registrations>)> {
        let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
        lists
            .iter()
            .map(|(key, list)| (*key, Arc::clone(list)))
            .collect()
    }
}

struct BusShared {
    name: String,
    registry: Registry,
    hierarchy: Arc<Hierarchy>,
    stopped: AtomicBool,
}

impl BusShared {
    // Own type first, declared supertypes in declaration order, `dyn Any` last.
    fn deliver<T: Any>(&self, value: &T, sink: &dyn ErrorSink) {
        let mut on_panic = |payload: Box<dyn Any + Send>| {
            let origin = Origin::EventBus(self.name.clone());
            sink.report(CallbackFailure::from_panic(origin, &*payload));
        };

        let keys = std::iter::once(TypeId::of::<T>())
            .chain(self.hierarchy.routes::<T>().iter().map(|r| r.key().id()))
            .chain(std::iter::once(TypeId::of::<dyn Any>()));
        for key in keys {
            if let Some(list) = self.registry.list(key) {
                for registration in list.snapshot().iter() {
                    self.notify(value, registration, &mut on_panic);
                }
            }
        }
    }

    // The subscriber's parameter is `T` itself, `dyn Any`, or a declared
    // supertype of `T` reached through its upcast.
    fn notify<T: Any>(
        &self,
        value: &T,
        registration: &Registration,
        on_panic: &mut dyn FnMut(Box<dyn Any + Send>),
    ) {
        if let Some(subscriber) = registration.typed::<T>() {
            notify_one(subscriber, value, on_panic);
        } else if let Some(subscriber) = registration.typed::<dyn Any>() {
            notify_one(subscriber, value as &dyn Any, on_panic);
        } else if let Some(route) = self.hierarchy.route::<T>(registration.param) {
            route.notify(value, &*registration.subscriber, on_panic);
        }
    }
}

/// Configures and starts an [`EventBus`]. Obtained from [`EventBus::builder`].
pub struct EventBusBuilder {
    name: String,
    sink: Arc<dyn ErrorSink>,
    hierarchy: Arc<Hierarchy>,
}

impl EventBusBuilder {
    /// Sets the name of the delivery thread. Defaults to `event-bus`.
    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    /// Sets the sink receiving panics of subscribers. Defaults to [`LogSink`](crate::LogSink).
    pub fn sink(&mut self, sink: Arc<dyn ErrorSink>) -> &mut Self {
        self.sink = sink;
        self
    }

    /// Sets the type hierarchy used for routing. Defaults to an empty one, in
    /// which every type only has the `dyn Any` root as supertype.
    pub fn hierarchy(&mut self, hierarchy: Hierarchy) -> &mut Self {
        self.hierarchy = Arc::new(hierarchy);
        self
    }

    /// Starts the delivery thread and returns the bus.
    ///
    /// Fails with [`Error::InvalidArgument`] if the configured name cannot be
    /// used as a thread name.
    pub fn spawn(&self) -> Result<EventBus> {
        let (sender, receiver) = mpsc::unbounded();
        let shared = Arc::new(BusShared {
            name: self.name.clone(),
            registry: Registry::default(),
            hierarchy: Arc::clone(&self.hierarchy),
            stopped: AtomicBool::new(false),
        });

        let delivery_shared = Arc::clone(&shared);
        let sink = Arc::clone(&self.sink);
        worker::spawn_detached(&self.name, move || {
            deliver_all(receiver, &delivery_shared, &*sink);
        })?;

        Ok(EventBus { sender, shared })
    }
}

/// Publishes values to subscribers registered by type.
///
/// Cloning the bus yields another handle to the same subscribers and delivery
/// thread. The thread stops on [`shutdown`](Self::shutdown), or after the
/// queued values were delivered once every handle has been dropped.
///
/// # Example
/// ```
/// # use courier::{EventBus, Subscriber};
/// # use std::sync::mpsc;
/// let bus = EventBus::new()?;
/// let (tx, rx) = mpsc::channel();
///
/// let subscriber = Subscriber::new(move |name: &String| tx.send(name.clone()).unwrap());
/// bus.subscribe(&subscriber);
///
/// bus.publish("Foo".to_string())?;
/// bus.publish(42)?; // No subscriber for `i32`.
/// bus.publish("Bar".to_string())?;
///
/// let received: Vec<String> = rx.iter().take(2).collect();
/// assert_eq!(received, ["Foo", "Bar"]);
/// # Ok::<(), courier::Error>(())
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: UnboundedSender<Delivery>,
    shared: Arc<BusShared>,
}

impl EventBus {
    /// Starts a bus with the default name, an empty hierarchy and a logging sink.
    pub fn new() -> Result<Self> {
        Self::builder().spawn()
    }

    #[must_use]
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder {
            name: DEFAULT_NAME.to_string(),
            sink: default_sink(),
            hierarchy: Arc::new(Hierarchy::default()),
        }
    }

    /// Returns the process-wide bus.
    ///
    /// The bus is created on first use with an empty hierarchy, unless one was
    /// set up front with [`install_global`](Self::install_global). It lives as
    /// long as the process and cannot be shut down.
    pub fn global() -> &'static EventBus {
        GLOBAL.get_or_init(|| {
            EventBus::builder()
                .name(GLOBAL_NAME)
                .spawn()
                .expect("Global event bus creation failed")
        })
    }

    /// Makes `bus` the process-wide bus.
    ///
    /// Must be called before the first call to [`global`](Self::global).
    /// Returns the bus back if a global bus already exists.
    pub fn install_global(bus: EventBus) -> std::result::Result<(), EventBus> {
        GLOBAL.set(bus)
    }

    /// Registers `subscriber` for values of type `S` and of its declared subtypes.
    ///
    /// Shorthand for [`subscribe_to::<S, S>`](Self::subscribe_to), which cannot fail.
    /// Subscribing the same subscriber twice makes it receive each value twice.
    pub fn subscribe<S: ?Sized + 'static>(&self, subscriber: &Subscriber<S>) {
        self.register::<S, S>(subscriber);
    }

    /// Registers `subscriber` for values of type `T` and of its declared subtypes.
    ///
    /// The subscriber's parameter type `S` must be `T` or a supertype of `T`,
    /// each value is viewed as `S` through the declared upcast.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `T` is not `S` or declared below `S`.
    pub fn subscribe_to<T: ?Sized + 'static, S: ?Sized + 'static>(
        &self,
        subscriber: &Subscriber<S>,
    ) -> Result<()> {
        if !self.shared.hierarchy.is_subtype::<T, S>() {
            return Err(Error::InvalidArgument(format!(
                "cannot subscribe a `{}` handler to `{}`: not a subtype",
                type_name::<S>(),
                type_name::<T>()
            )));
        }
        self.register::<T, S>(subscriber);
        Ok(())
    }

    /// Removes every registration of `subscriber`, whatever type it was
    /// subscribed to.
    ///
    /// Returns `true` if the subscriber was registered. Values published after
    /// this call returns are not delivered to it; the value being delivered at
    /// this moment may still be.
    pub fn unsubscribe<S: ?Sized + 'static>(&self, subscriber: &Subscriber<S>) -> bool {
        self.remove_where(subscriber, |_| true)
    }

    /// Removes the registrations of `subscriber` made for `A` or for a type
    /// declared below `A`. Registrations for other types stay.
    ///
    /// Returns `true` if a registration was removed.
    pub fn unsubscribe_from<A: ?Sized + 'static, S: ?Sized + 'static>(
        &self,
        subscriber: &Subscriber<S>,
    ) -> bool {
        let hierarchy = &self.shared.hierarchy;
        self.remove_where(subscriber, |key| {
            hierarchy.is_subtype_of(key, TypeId::of::<A>())
        })
    }

    /// Queues `value` for delivery and returns immediately.
    ///
    /// # Errors
    ///
    /// [`Error::Shutdown`] if the bus has been shut down.
    pub fn publish<T: Send + 'static>(&self, value: T) -> Result<()> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(self.refuse());
        }
        let delivery: Delivery =
            Box::new(move |bus: &BusShared, sink: &dyn ErrorSink| bus.deliver(&value, sink));
        self.sender
            .unbounded_send(delivery)
            .map_err(|_| self.refuse())
    }

    /// Number of registrations currently made for exactly the type `T`.
    #[must_use]
    pub fn subscriber_count<T: ?Sized + 'static>(&self) -> usize {
        self.shared
            .registry
            .list(TypeId::of::<T>())
            .map_or(0, |list| list.len())
    }

    /// Stops the delivery thread. Values not yet delivered are dropped.
    ///
    /// The global bus is never torn down; calling this on it only logs a warning.
    pub fn shutdown(&self) {
        if self.is_global() {
            tracing::warn!(name = %self.shared.name, "refusing to shut down the global event bus");
            return;
        }
        if !self.shared.stopped.swap(true, Ordering::AcqRel) {
            tracing::debug!(name = %self.shared.name, "shutting down event bus");
        }
        self.sender.close_channel();
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[must_use]
    pub fn hierarchy(&self) -> &Hierarchy {
        &self.shared.hierarchy
    }

    fn register<T: ?Sized + 'static, S: ?Sized + 'static>(&self, subscriber: &Subscriber<S>) {
        self.shared
            .registry
            .list_or_insert(TypeId::of::<T>())
            .push(Registration::new(subscriber));
    }

    fn remove_where<S: ?Sized + 'static>(
        &self,
        subscriber: &Subscriber<S>,
        key_matches: impl Fn(TypeId) -> bool,
    ) -> bool {
        let mut removed = false;
        for (key, list) in self.shared.registry.all() {
            if key_matches(key) {
                removed |= list.remove_if(|r| r.is(subscriber));
            }
        }
        removed
    }

    fn is_global(&self) -> bool {
        GLOBAL
            .get()
            .is_some_and(|global| Arc::ptr_eq(&global.shared, &self.shared))
    }

    fn refuse(&self) -> Error {
        tracing::warn!(name = %self.shared.name, "value published after shutdown");
        Error::Shutdown(self.shared.name.clone())
    }
}

fn deliver_all(receiver: UnboundedReceiver<Delivery>, bus: &BusShared, sink: &dyn ErrorSink) {
    let span = tracing::debug_span!("event_bus", name = %bus.name);
    let _entered = span.enter();
    tracing::debug!("delivery thread started");

    for delivery in block_on_stream(receiver) {
        if bus.stopped.load(Ordering::Acquire) {
            break;
        }
        tracing::trace!("delivering value");
        delivery(bus, sink);
    }

    tracing::debug!("delivery thread stopped");
}
