//! Store models, live store handles, and binding onto the dispatch bus.
//!
//! A [`StoreModel`] is resolved once at registration time. Its `Class` arm
//! constructs a typed [`Store`]; its `Object` arm wraps an [`ObjectStore`].
//! Both converge on a [`StoreHandle`] whose dispatch callback is registered
//! with the coordinator's bus.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, ReentrantMutex};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::action::Payload;
use crate::dispatcher::{DispatchToken, Dispatcher};
use crate::error::{AltError, Result};
use crate::store::{Lifecycle, ObjectStore, Store, StoreState, Typed};
use crate::uid::{short_type_name, uid};

type Constructor = Box<dyn FnOnce() -> Box<dyn StoreState> + Send>;
type Decorator = Box<dyn FnOnce(Box<dyn StoreState>) -> Box<dyn StoreState> + Send>;

/// Function applied to every store model before it is bound.
///
/// Transforms run in configuration order and may rename the model or
/// [`decorate`](StoreModel::decorate) the instance it will produce.
pub type StoreTransform = Arc<dyn Fn(StoreModel) -> StoreModel + Send + Sync>;

enum ModelKind {
    Class(Constructor),
    Object(Box<dyn StoreState>),
}

/// Definition of a store, before it is bound to a coordinator.
pub struct StoreModel {
    display_name: Option<String>,
    type_name: Option<String>,
    kind: ModelKind,
    decorators: Vec<Decorator>,
}

impl StoreModel {
    /// A store defined by a type. `construct` runs once, at registration.
    ///
    /// Constructor arguments are whatever `construct` captures.
    pub fn class<S, F>(construct: F) -> Self
    where
        S: Store,
        F: FnOnce() -> S + Send + 'static,
    {
        Self {
            display_name: S::DISPLAY_NAME.map(str::to_owned),
            type_name: Some(short_type_name::<S>().to_owned()),
            kind: ModelKind::Class(Box::new(move || {
                Box::new(Typed(construct())) as Box<dyn StoreState>
            })),
            decorators: Vec::new(),
        }
    }

    /// A store defined by data and closures.
    pub fn object(store: ObjectStore) -> Self {
        Self {
            display_name: store.display_name.clone(),
            type_name: None,
            kind: ModelKind::Object(Box::new(store)),
            decorators: Vec::new(),
        }
    }

    /// Declared display name, if any.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Short type name for the `Class` arm.
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// Whether the model was built from a type.
    pub fn is_class(&self) -> bool {
        matches!(self.kind, ModelKind::Class(_))
    }

    /// Replace the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Wrap the instance this model produces.
    ///
    /// Decorators run in the order they were added, after construction.
    pub fn decorate<F>(mut self, decorator: F) -> Self
    where
        F: FnOnce(Box<dyn StoreState>) -> Box<dyn StoreState> + Send + 'static,
    {
        self.decorators.push(Box::new(decorator));
        self
    }

    /// Name the store asks for: display name, then type name, then empty.
    pub(crate) fn desired_name(&self) -> String {
        self.display_name
            .as_deref()
            .or(self.type_name.as_deref())
            .unwrap_or_default()
            .to_owned()
    }

    pub(crate) fn instantiate(self) -> Box<dyn StoreState> {
        let base = match self.kind {
            ModelKind::Class(construct) => construct(),
            ModelKind::Object(instance) => instance,
        };
        self.decorators
            .into_iter()
            .fold(base, |instance, decorate| decorate(instance))
    }
}

impl fmt::Debug for StoreModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreModel")
            .field("display_name", &self.display_name)
            .field("type_name", &self.type_name)
            .field("class", &self.is_class())
            .field("decorators", &self.decorators.len())
            .finish()
    }
}

/// Apply `transforms` to `model` in order.
pub(crate) fn transform(transforms: &[StoreTransform], model: StoreModel) -> StoreModel {
    transforms.iter().fold(model, |model, t| t(model))
}

/// Identifier of a change listener, for [`StoreHandle::unlisten`].
pub type ListenerId = u64;

type ChangeListener = Arc<dyn Fn(&StoreHandle) + Send + Sync>;

/// The instance is locked re-entrantly so that code running inside one of
/// its own handlers can reach it again on the same thread; the `RefCell`
/// then reports the conflict instead of deadlocking.
struct BoundStore {
    name: String,
    instance: ReentrantMutex<RefCell<Box<dyn StoreState>>>,
    listeners: Mutex<Vec<(ListenerId, ChangeListener)>>,
    next_listener: AtomicU64,
    token: Mutex<Option<DispatchToken>>,
}

/// A live, bound store.
///
/// `Clone` is cheap; clones refer to the same instance.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<BoundStore>,
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("name", &self.inner.name)
            .finish()
    }
}

impl StoreHandle {
    /// Name the store was bound under. Empty for unnamed unsaved stores.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current state as a value.
    ///
    /// # Errors
    ///
    /// * [`AltError::StoreBusy`] -- called from inside this store's own
    ///   reducer or lifecycle hook.
    /// * [`AltError::Codec`] -- the state cannot be converted.
    pub fn state_value(&self) -> Result<Value> {
        let guard = self.inner.instance.lock();
        let instance = guard.try_borrow().map_err(|_| self.busy())?;
        instance.get_state()
    }

    /// Current state converted into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`AltError::Codec`](crate::AltError::Codec) if the state does
    /// not deserialize into `T`.
    pub fn state<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.state_value()?)?)
    }

    /// Call `listener` every time the store emits a change.
    pub fn listen<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StoreHandle) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Notify every listener that the store changed.
    ///
    /// Listeners run outside of any lock and may read the store or defer
    /// further actions.
    pub fn emit_change(&self) {
        let listeners: Vec<ChangeListener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(self);
        }
    }

    /// Whether two handles refer to the same bound instance.
    pub fn ptr_eq(&self, other: &StoreHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stop receiving dispatches from `dispatcher`.
    ///
    /// Meant for unsaved stores whose owner is done with them; registered
    /// stores stay bound for the coordinator's lifetime. Returns whether the
    /// store was bound.
    pub fn unbind(&self, dispatcher: &dyn Dispatcher) -> bool {
        match self.inner.token.lock().take() {
            Some(token) => {
                dispatcher.unregister(token);
                true
            }
            None => false,
        }
    }

    pub(crate) fn new(instance: Box<dyn StoreState>, name: String) -> Self {
        Self {
            inner: Arc::new(BoundStore {
                name,
                instance: ReentrantMutex::new(RefCell::new(instance)),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                token: Mutex::new(None),
            }),
        }
    }

    /// Register this store's dispatch callback with `dispatcher`.
    ///
    /// The bus holds only a weak reference, so an unsaved store that its
    /// owner drops stops receiving payloads.
    pub(crate) fn attach(&self, dispatcher: &dyn Dispatcher) {
        let weak = Arc::downgrade(&self.inner);
        let token = dispatcher.register(Arc::new(move |payload: &Payload| {
            if let Some(inner) = weak.upgrade() {
                StoreHandle { inner }.handle_dispatch(payload);
            }
        }));
        *self.inner.token.lock() = Some(token);
    }

    pub(crate) fn replace_state(&self, state: Value) -> Result<()> {
        let guard = self.inner.instance.lock();
        let mut instance = guard.try_borrow_mut().map_err(|_| self.busy())?;
        instance.set_state(state)
    }

    /// Run the hook for `event`.
    ///
    /// # Errors
    ///
    /// Returns [`AltError::StoreBusy`] when called from inside this store's
    /// own reducer or hook.
    pub(crate) fn run_lifecycle(&self, event: Lifecycle) -> Result<()> {
        let guard = self.inner.instance.lock();
        let mut instance = guard.try_borrow_mut().map_err(|_| self.busy())?;
        instance.lifecycle(event);
        Ok(())
    }

    fn handle_dispatch(&self, payload: &Payload) {
        let changed = {
            let guard = self.inner.instance.lock();
            let Ok(mut instance) = guard.try_borrow_mut() else {
                tracing::warn!(
                    store = %self.inner.name,
                    action = %payload.action,
                    "payload reached a store from inside its own hook, skipped"
                );
                return;
            };
            instance.reduce(payload)
        };
        if changed {
            self.emit_change();
        }
    }

    fn busy(&self) -> AltError {
        AltError::StoreBusy(self.inner.name.clone())
    }
}

/// Bind a constructed instance under `name` and wire it into `dispatcher`.
pub(crate) fn bind(
    instance: Box<dyn StoreState>,
    name: String,
    dispatcher: &dyn Dispatcher,
) -> StoreHandle {
    let handle = StoreHandle::new(instance, name);
    handle.attach(dispatcher);
    handle
}

/// Resolve the final registration name for a store.
///
/// A taken or empty name is reallocated with [`uid`] and reported as a
/// warning; registration itself never fails on naming.
pub(crate) fn resolve_store_name(stores: &BTreeMap<String, StoreHandle>, desired: &str) -> String {
    if stores.contains_key(desired) {
        let name = uid(stores, desired);
        tracing::warn!(
            requested = %desired,
            assigned = %name,
            "a store named {desired} already exists, double check your store names \
             or pass in your own custom identifier for each store"
        );
        name
    } else if desired.is_empty() {
        let name = uid(stores, desired);
        tracing::warn!(assigned = %name, "store name was not specified");
        name
    } else {
        desired.to_owned()
    }
}
