//! Store trait, its object-safe counterpart, and the map-backed object store.

use std::collections::HashMap;
use std::fmt;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::action::{ActionKey, Payload};
use crate::error::Result;

/// A store whose behaviour is defined by a Rust type.
///
/// The instance may carry fields that are not part of its state (for
/// example the [`ActionKey`]s it reacts to); only [`State`](Store::State)
/// is captured by snapshots and replaced on restore.
///
/// # Contract
///
/// - [`reduce`](Store::reduce) runs synchronously inside a dispatch and
///   returns whether the state changed. Returning `true` fires the store's
///   change listeners.
/// - Lifecycle hooks run after the coordinator has replaced the state, once
///   per operation. The defaults do nothing.
pub trait Store: Send + 'static {
    /// Serializable state held by the store.
    type State: Serialize + DeserializeOwned;

    /// Preferred registration name. Falls back to the type name when `None`.
    const DISPLAY_NAME: Option<&'static str> = None;

    /// Current state.
    fn state(&self) -> &Self::State;

    /// Replace the current state wholesale.
    fn set_state(&mut self, state: Self::State);

    /// React to a dispatched payload. Unrelated payloads return `false`.
    fn reduce(&mut self, payload: &Payload) -> bool;

    /// Called after `recycle` reset the store to its initial state.
    fn init(&mut self) {}

    /// Called after `bootstrap` loaded external state into the store.
    fn bootstrap(&mut self) {}

    /// Called after `rollback` restored the last snapshot.
    fn rollback(&mut self) {}
}

/// Lifecycle hook fired by the coordinator after restoring state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Fired by `recycle` (and therefore `flush`).
    Init,
    /// Fired by `bootstrap`.
    Bootstrap,
    /// Fired by `rollback`.
    Rollback,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Init => "init",
            Lifecycle::Bootstrap => "bootstrap",
            Lifecycle::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// Object-safe view of a live store instance.
///
/// Every bound store is held as a `Box<dyn StoreState>`. Implement it
/// directly to decorate another instance from a store transform.
pub trait StoreState: Send {
    /// Current state as a JSON-compatible value.
    fn get_state(&self) -> Result<Value>;

    /// Replace the state with `state`.
    fn set_state(&mut self, state: Value) -> Result<()>;

    /// React to a dispatched payload, returning whether the state changed.
    fn reduce(&mut self, payload: &Payload) -> bool;

    /// Run the hook for `event`, if the store has one.
    fn lifecycle(&mut self, event: Lifecycle);
}

/// Adapter from a typed [`Store`] to [`StoreState`].
pub(crate) struct Typed<S>(pub(crate) S);

impl<S: Store> StoreState for Typed<S> {
    fn get_state(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.0.state())?)
    }

    fn set_state(&mut self, state: Value) -> Result<()> {
        let state: S::State = serde_json::from_value(state)?;
        self.0.set_state(state);
        Ok(())
    }

    fn reduce(&mut self, payload: &Payload) -> bool {
        self.0.reduce(payload)
    }

    fn lifecycle(&mut self, event: Lifecycle) {
        match event {
            Lifecycle::Init => self.0.init(),
            Lifecycle::Bootstrap => self.0.bootstrap(),
            Lifecycle::Rollback => self.0.rollback(),
        }
    }
}

type Handler = Box<dyn FnMut(&mut Value, &Value) -> bool + Send>;
type Hook = Box<dyn FnMut(&mut Value) + Send>;

/// A store described by plain data and closures instead of a type.
///
/// # Examples
///
/// ```
/// use alt_flux::{Alt, ObjectStore, StoreModel};
/// use serde_json::json;
///
/// let alt = Alt::new();
/// let actions = alt.generate_actions(&["bump"]);
/// let store = alt
///     .create_store(
///         StoreModel::object(
///             ObjectStore::new(json!({"count": 0}))
///                 .display_name("Bumps")
///                 .on(actions["bump"].key(), |state, _data| {
///                     state["count"] = json!(state["count"].as_i64().unwrap_or(0) + 1);
///                     true
///                 }),
///         ),
///         None,
///     )
///     .unwrap();
///
/// actions["bump"].invoke(vec![]).unwrap();
/// assert_eq!(store.state_value().unwrap(), json!({"count": 1}));
/// ```
pub struct ObjectStore {
    pub(crate) display_name: Option<String>,
    state: Value,
    handlers: HashMap<ActionKey, Handler>,
    hooks: HashMap<Lifecycle, Hook>,
}

impl ObjectStore {
    /// Create an object store holding `state`.
    pub fn new(state: Value) -> Self {
        Self {
            display_name: None,
            state,
            handlers: HashMap::new(),
            hooks: HashMap::new(),
        }
    }

    /// Set the name the store registers under.
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Bind `handler` to the action with `key`.
    ///
    /// The handler receives the mutable state and the dispatched data and
    /// returns whether it changed the state. Binding the same key twice
    /// replaces the earlier handler.
    pub fn on<F>(mut self, key: &ActionKey, handler: F) -> Self
    where
        F: FnMut(&mut Value, &Value) -> bool + Send + 'static,
    {
        self.handlers.insert(key.clone(), Box::new(handler));
        self
    }

    /// Install a lifecycle hook.
    pub fn on_lifecycle<F>(mut self, event: Lifecycle, hook: F) -> Self
    where
        F: FnMut(&mut Value) + Send + 'static,
    {
        self.hooks.insert(event, Box::new(hook));
        self
    }
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("display_name", &self.display_name)
            .field("state", &self.state)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl StoreState for ObjectStore {
    fn get_state(&self) -> Result<Value> {
        Ok(self.state.clone())
    }

    fn set_state(&mut self, state: Value) -> Result<()> {
        self.state = state;
        Ok(())
    }

    fn reduce(&mut self, payload: &Payload) -> bool {
        match self.handlers.get_mut(&payload.action) {
            Some(handler) => handler(&mut self.state, &payload.data),
            None => false,
        }
    }

    fn lifecycle(&mut self, event: Lifecycle) {
        if let Some(hook) = self.hooks.get_mut(&event) {
            hook(&mut self.state);
        }
    }
}
