//! The closed supertype relation used by an [`EventBus`](crate::EventBus) to route values.
//!
//! Routing does not inspect types at run time. Instead a [`Hierarchy`] is
//! declared once, up front: each concrete event type lists every supertype it
//! can be delivered as, together with an upcast from the event to that
//! supertype. Supertypes are usually trait objects naming a category of events
//! (`dyn Number`), but concrete types work as well. Categories may declare
//! their own parents; [`HierarchyBuilder::build`] checks that every event lists
//! the complete set of ancestors of the categories it joins.
//!
//! Every value is implicitly below the root `dyn Any`.
use std::{
    any::{Any, TypeId, type_name},
    collections::{HashMap, HashSet},
    fmt,
};

use crate::{
    error::{Error, Result},
    subscriber::{Subscriber, notify_one},
};

type Deliver = dyn Fn(&dyn Any, &(dyn Any + Send + Sync), &mut dyn FnMut(Box<dyn Any + Send>))
    + Send
    + Sync;

/// Identifies a type used as a subscription key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Delivery of one concrete event type to the subscribers of one of its supertypes.
pub(crate) struct Route {
    key: TypeKey,
    deliver: Box<Deliver>,
}

impl Route {
    pub(crate) fn new<T: Any, S: ?Sized + 'static>(upcast: fn(&T) -> &S) -> Self {
        Self {
            key: TypeKey::of::<S>(),
            deliver: Box::new(
                move |value: &dyn Any,
                      subscriber: &(dyn Any + Send + Sync),
                      on_panic: &mut dyn FnMut(Box<dyn Any + Send>)| {
                    deliver::<T, S>(value, subscriber, upcast, on_panic);
                },
            ),
        }
    }

    pub(crate) fn key(&self) -> TypeKey {
        self.key
    }

    /// Calls `subscriber`, an erased [`Subscriber`] of this route's key, with
    /// `value` viewed as that key.
    pub(crate) fn notify(
        &self,
        value: &dyn Any,
        subscriber: &(dyn Any + Send + Sync),
        on_panic: &mut dyn FnMut(Box<dyn Any + Send>),
    ) {
        (self.deliver)(value, subscriber, on_panic);
    }
}

fn deliver<T: Any, S: ?Sized + 'static>(
    value: &dyn Any,
    subscriber: &(dyn Any + Send + Sync),
    upcast: fn(&T) -> &S,
    on_panic: &mut dyn FnMut(Box<dyn Any + Send>),
) {
    let (Some(value), Some(subscriber)) = (
        value.downcast_ref::<T>(),
        subscriber.downcast_ref::<Subscriber<S>>(),
    ) else {
        return;
    };
    notify_one(subscriber, upcast(value), on_panic);
}

/// An immutable registry of event types and their supertypes.
///
/// # Example
/// ```
/// # use courier::Hierarchy;
/// trait Number: Send + Sync {
///     fn as_f64(&self) -> f64;
/// }
///
/// impl Number for i32 {
///     fn as_f64(&self) -> f64 {
///         f64::from(*self)
///     }
/// }
///
/// let hierarchy = Hierarchy::builder()
///     .extends::<i32, dyn Number>(|v| v)
///     .build()?;
///
/// assert!(hierarchy.is_subtype::<i32, dyn Number>());
/// assert!(!hierarchy.is_subtype::<dyn Number, i32>());
/// # Ok::<(), courier::Error>(())
/// ```
#[derive(Default)]
pub struct Hierarchy {
    routes: HashMap<TypeId, Vec<Route>>,
    ancestors: HashMap<TypeId, HashSet<TypeId>>,
}

impl Hierarchy {
    #[must_use]
    pub fn builder() -> HierarchyBuilder {
        HierarchyBuilder::default()
    }

    /// Returns `true` if `S` is `A`, or `A` is a declared supertype of `S`.
    #[must_use]
    pub fn is_subtype<S: ?Sized + 'static, A: ?Sized + 'static>(&self) -> bool {
        self.is_subtype_of(TypeId::of::<S>(), TypeId::of::<A>())
    }

    pub(crate) fn is_subtype_of(&self, sub: TypeId, sup: TypeId) -> bool {
        sub == sup
            || sup == TypeId::of::<dyn Any>()
            || self
                .ancestors
                .get(&sub)
                .is_some_and(|ancestors| ancestors.contains(&sup))
    }

    /// Declared supertypes of event type `T`, in declaration order.
    pub(crate) fn routes<T: Any>(&self) -> &[Route] {
        self.routes
            .get(&TypeId::of::<T>())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The route of event type `T` to its declared supertype `to`, if any.
    pub(crate) fn route<T: Any>(&self, to: TypeId) -> Option<&Route> {
        self.routes::<T>().iter().find(|route| route.key.id == to)
    }
}

impl fmt::Debug for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hierarchy")
            .field("events", &self.routes.len())
            .field("types", &self.ancestors.len())
            .finish()
    }
}

struct EventEntry {
    key: TypeKey,
    routes: Vec<Route>,
}

/// Collects links for a [`Hierarchy`]. Obtained from [`Hierarchy::builder`].
#[derive(Default)]
pub struct HierarchyBuilder {
    // Declaration order is kept for deterministic delivery.
    events: Vec<EventEntry>,
    categories: Vec<(TypeKey, TypeKey)>,
}

impl HierarchyBuilder {
    /// Declares that values of the concrete type `T` are also delivered to
    /// subscribers of `S`, viewed through `upcast`.
    pub fn extends<T: Any, S: ?Sized + 'static>(&mut self, upcast: fn(&T) -> &S) -> &mut Self {
        let key = TypeKey::of::<T>();
        let route = Route::new(upcast);
        match self.events.iter_mut().find(|e| e.key == key) {
            Some(entry) => entry.routes.push(route),
            None => self.events.push(EventEntry {
                key,
                routes: vec![route],
            }),
        }
        self
    }

    /// Declares `P` as a parent of the category `C`.
    ///
    /// Categories never receive values directly; the link is used to check
    /// that event declarations are complete and to answer
    /// [`Hierarchy::is_subtype`].
    pub fn category<C: ?Sized + 'static, P: ?Sized + 'static>(&mut self) -> &mut Self {
        self.categories.push((TypeKey::of::<C>(), TypeKey::of::<P>()));
        self
    }

    /// Validates the declared relation and freezes it.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if a type extends itself or lists a supertype
    /// twice, if category links form a cycle, or if an event joins a category
    /// without also listing every ancestor of that category.
    pub fn build(&mut self) -> Result<Hierarchy> {
        let parents = self.category_parents()?;
        let mut ancestors: HashMap<TypeId, HashSet<TypeId>> = HashMap::new();

        for (category, _) in &self.categories {
            let closure = closure_of(category.id, &parents, &mut Vec::new()).map_err(|_| {
                Error::InvalidArgument(format!("category links of `{category}` form a cycle"))
            })?;
            ancestors.insert(category.id, closure);
        }

        for entry in &self.events {
            let mut declared = HashSet::new();
            for route in &entry.routes {
                if route.key == entry.key {
                    return Err(Error::InvalidArgument(format!(
                        "`{}` cannot extend itself",
                        entry.key
                    )));
                }
                if route.key.id == TypeId::of::<dyn Any>() {
                    return Err(Error::InvalidArgument(format!(
                        "`{}` extends `dyn Any`, which every type extends implicitly",
                        entry.key
                    )));
                }
                if !declared.insert(route.key.id) {
                    return Err(Error::InvalidArgument(format!(
                        "`{}` extends `{}` more than once",
                        entry.key, route.key
                    )));
                }
            }
            ancestors.insert(entry.key.id, declared);
        }

        // Every ancestor of a declared supertype must be declared as well.
        for entry in &self.events {
            let declared = &ancestors[&entry.key.id];
            for route in &entry.routes {
                let Some(inherited) = ancestors.get(&route.key.id) else {
                    continue;
                };
                if let Some(missing) = inherited.iter().find(|id| !declared.contains(id)) {
                    return Err(Error::InvalidArgument(format!(
                        "`{}` extends `{}` but not its supertype `{}`",
                        entry.key,
                        route.key,
                        self.name_of(*missing)
                    )));
                }
            }
        }

        let routes = std::mem::take(&mut self.events)
            .into_iter()
            .map(|entry| (entry.key.id, entry.routes))
            .collect();
        self.categories.clear();

        Ok(Hierarchy { routes, ancestors })
    }

    fn category_parents(&self) -> Result<HashMap<TypeId, Vec<TypeId>>> {
        let mut parents: HashMap<TypeId, Vec<TypeId>> = HashMap::new();
        for (category, parent) in &self.categories {
            if category == parent {
                return Err(Error::InvalidArgument(format!(
                    "`{category}` cannot extend itself"
                )));
            }
            if self.events.iter().any(|e| e.key == *category) {
                return Err(Error::InvalidArgument(format!(
                    "`{category}` is declared both as an event and as a category"
                )));
            }
            parents.entry(category.id).or_default().push(parent.id);
        }
        Ok(parents)
    }

    fn name_of(&self, id: TypeId) -> &'static str {
        self.categories
            .iter()
            .flat_map(|(c, p)| [c, p])
            .chain(self.events.iter().flat_map(|e| e.routes.iter().map(|r| &r.key)))
            .find(|key| key.id == id)
            .map_or("<unknown>", |key| key.name)
    }
}

// Depth-first walk over parent links. `path` holds the categories being
// expanded; meeting one of them again is a cycle.
fn closure_of(
    category: TypeId,
    parents: &HashMap<TypeId, Vec<TypeId>>,
    path: &mut Vec<TypeId>,
) -> std::result::Result<HashSet<TypeId>, TypeId> {
    if path.contains(&category) {
        return Err(category);
    }
    path.push(category);
    let mut closure = HashSet::new();
    for parent in parents.get(&category).into_iter().flatten() {
        closure.insert(*parent);
        closure.extend(closure_of(*parent, parents, path)?);
    }
    path.pop();
    Ok(closure)
}
