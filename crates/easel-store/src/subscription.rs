#![forbid(unsafe_code)]

//! Selector-based change subscriptions.
//!
//! A listener is a `(selector, equality, callback)` triple. After every
//! publish the store runs the selector against the new tree and calls the
//! callback only when the selection differs from the last value delivered
//! to *that* listener.
//!
//! # Failure Modes
//!
//! - **Expensive selectors**: selectors run once per publish per listener.
//!   Keep them to lookups; do the work in the callback.
//! - **Subscriber leak**: a [`Subscription`] that is `detach`ed lives as long
//!   as the store.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::state::{FrozenState, Slice};
use crate::store::StoreInner;

type Selector<T> = Box<dyn Fn(&FrozenState) -> T + Send + Sync>;
type Equality<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;
type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Options for [`Store::subscribe`](crate::Store::subscribe).
pub struct SubscribeOptions<T> {
    pub(crate) selector: Selector<T>,
    pub(crate) equality: Equality<T>,
    pub(crate) fire_immediately: bool,
}

impl<T: PartialEq + 'static> SubscribeOptions<T> {
    /// Select a value from the tree; changes are detected with `PartialEq`.
    #[must_use]
    pub fn new(selector: impl Fn(&FrozenState) -> T + Send + Sync + 'static) -> Self {
        Self {
            selector: Box::new(selector),
            equality: Box::new(|a: &T, b: &T| a == b),
            fire_immediately: false,
        }
    }
}

impl<T> SubscribeOptions<T> {
    /// Replace the change detector.
    #[must_use]
    pub fn with_equality(mut self, equality: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        self.equality = Box::new(equality);
        self
    }

    /// Also invoke the callback once, synchronously, at registration.
    #[must_use]
    pub fn fire_immediately(mut self, fire: bool) -> Self {
        self.fire_immediately = fire;
        self
    }
}

impl SubscribeOptions<Option<Slice>> {
    /// Watch one slice by identity.
    #[must_use]
    pub fn slice(name: &str) -> Self {
        let name = name.to_string();
        Self {
            selector: Box::new(move |state: &FrozenState| state.slice(&name).cloned()),
            equality: Box::new(|a: &Option<Slice>, b: &Option<Slice>| match (a, b) {
                (Some(a), Some(b)) => Slice::same(a, b),
                (None, None) => true,
                _ => false,
            }),
            fire_immediately: false,
        }
    }
}

impl SubscribeOptions<FrozenState> {
    /// Watch the whole tree; fires whenever any slice changes identity.
    #[must_use]
    pub fn whole_state() -> Self {
        Self::new(FrozenState::clone)
    }
}

/// Type-erased listener entry held by the store.
pub(crate) trait ListenerSlot: Send + Sync {
    fn id(&self) -> u64;
    fn deliver(&self, state: &FrozenState);
    fn deactivate(&self);
}

pub(crate) struct SelectorListener<T> {
    id: u64,
    active: AtomicBool,
    selector: Selector<T>,
    equality: Equality<T>,
    callback: Callback<T>,
    last: Mutex<T>,
}

impl<T: Clone + Send + 'static> SelectorListener<T> {
    /// Build a listener primed with the selection of `state`.
    ///
    /// Returns the listener and that initial selection.
    pub(crate) fn new(
        id: u64,
        options: SubscribeOptions<T>,
        callback: Callback<T>,
        state: &FrozenState,
    ) -> (Self, T) {
        let initial = (options.selector)(state);
        let listener = Self {
            id,
            active: AtomicBool::new(true),
            selector: options.selector,
            equality: options.equality,
            callback,
            last: Mutex::new(initial.clone()),
        };
        (listener, initial)
    }

    pub(crate) fn fire(&self, value: &T) {
        if self.active.load(Ordering::Acquire) {
            (self.callback)(value);
        }
    }
}

impl<T: Clone + Send + 'static> ListenerSlot for SelectorListener<T> {
    fn id(&self) -> u64 {
        self.id
    }

    fn deliver(&self, state: &FrozenState) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let next = (self.selector)(state);
        {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            if (self.equality)(&last, &next) {
                return;
            }
            *last = next.clone();
        }
        self.fire(&next);
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Handle for a registered listener.
///
/// Dropping the handle unsubscribes. Call [`detach`](Self::detach) to keep
/// the listener for the lifetime of the store instead.
pub struct Subscription {
    store: Weak<StoreInner>,
    slot: Arc<dyn ListenerSlot>,
    detached: bool,
}

impl Subscription {
    pub(crate) fn new(store: Weak<StoreInner>, slot: Arc<dyn ListenerSlot>) -> Self {
        Self {
            store,
            slot,
            detached: false,
        }
    }

    /// Stop delivering to this listener. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        self.slot.deactivate();
        if let Some(store) = self.store.upgrade() {
            store.remove_listener(self.slot.id());
        }
    }

    /// Keep the listener registered after this handle is dropped.
    pub fn detach(mut self) {
        self.detached = true;
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.slot.id()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.detached {
            self.unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.slot.id())
            .field("detached", &self.detached)
            .finish_non_exhaustive()
    }
}
