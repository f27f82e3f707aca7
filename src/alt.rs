//! The coordinator: one value owning the action registry, the store
//! registry, both snapshots, and the dispatch bus.
//!
//! Built with [`AltBuilder`], which picks the serializer, the dispatcher and
//! the store transforms. [`Alt::new`] uses the defaults.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::action::{Action, ActionContext, ActionKey, Payload, pass_through};
use crate::actions::{ActionNamespace, ActionRegistry, ActionSet, ActionsModel, Member, SINGLE};
use crate::binder::{self, StoreHandle, StoreModel, StoreTransform};
use crate::codec::{JsonSerializer, Serializer};
use crate::dispatcher::{Dispatcher, FluxDispatcher};
use crate::error::{AltError, Result};
use crate::snapshot::{self, Snapshot, Snapshots, filter_snapshot};
use crate::store::Lifecycle;

/// Shared state behind every [`Alt`] clone.
///
/// Actions hold a [`Weak`] reference to this, never a strong one.
pub(crate) struct AltInner {
    pub(crate) serializer: Arc<dyn Serializer>,
    pub(crate) dispatcher: Arc<dyn Dispatcher>,
    store_transforms: Vec<StoreTransform>,
    actions: RwLock<ActionRegistry>,
    stores: RwLock<BTreeMap<String, StoreHandle>>,
    snapshots: Mutex<Snapshots>,
}

/// Registry and lifecycle coordinator for actions and stores.
///
/// `Clone` is cheap -- all internal state is `Arc`-wrapped.
///
/// # Locking
///
/// Registry locks are released before any user code runs (action
/// implementations, store handlers, lifecycle hooks, change listeners), so
/// that code may call back into the coordinator. Two things are refused
/// rather than blocked:
///
/// - dispatching while a dispatch is already running
///   ([`AltError::DispatchInProgress`]; use [`Action::defer`] instead);
/// - reading or restoring a store from inside that same store's reducer or
///   hook ([`AltError::StoreBusy`]).
#[derive(Clone)]
pub struct Alt {
    inner: Arc<AltInner>,
}

impl fmt::Debug for Alt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alt")
            .field("stores", &self.store_names())
            .field("store_transforms", &self.inner.store_transforms.len())
            .finish_non_exhaustive()
    }
}

impl Default for Alt {
    fn default() -> Self {
        Self::new()
    }
}

impl Alt {
    /// A coordinator with the JSON serializer, a [`FluxDispatcher`], and no
    /// store transforms.
    pub fn new() -> Self {
        AltBuilder::new().build()
    }

    /// Start configuring a coordinator.
    pub fn builder() -> AltBuilder {
        AltBuilder::new()
    }

    pub(crate) fn from_inner(inner: Arc<AltInner>) -> Self {
        Self { inner }
    }

    fn weak(&self) -> Weak<AltInner> {
        Arc::downgrade(&self.inner)
    }

    /// The bus stores are bound to.
    pub fn dispatcher(&self) -> &dyn Dispatcher {
        self.inner.dispatcher.as_ref()
    }

    /// Send `data` to every bound store under `action`.
    ///
    /// # Errors
    ///
    /// Returns [`AltError::DispatchInProgress`] if another dispatch is
    /// still running.
    pub fn dispatch(&self, action: &ActionKey, data: Value) -> Result<()> {
        tracing::trace!(action = %action, "dispatching");
        self.inner.dispatcher.dispatch(Payload {
            action: action.clone(),
            data,
        })
    }

    // --- actions -------------------------------------------------------

    /// Create one ungrouped action.
    ///
    /// The id is `name`, suffixed with a number if `name` is already taken.
    /// The action is registered under the `single` namespace.
    ///
    /// # Examples
    ///
    /// ```
    /// use alt_flux::Alt;
    ///
    /// let alt = Alt::new();
    /// let first = alt.create_action("save", |ctx, args| ctx.dispatch(args.into()));
    /// let second = alt.create_action("save", |_ctx, _args| Ok(()));
    /// assert_eq!(first.id(), "save");
    /// assert_eq!(second.id(), "save1");
    /// assert_eq!(second.key().as_str(), "alt/save1");
    /// ```
    pub fn create_action<F>(&self, name: &str, implementation: F) -> Action
    where
        F: Fn(&ActionContext, Vec<Value>) -> Result<()> + Send + Sync + 'static,
    {
        self.inner
            .actions
            .write()
            .create_action(name, Arc::new(implementation), &self.weak())
    }

    /// Register every action member of `model` in a namespace of its own.
    pub fn create_actions(&self, model: impl Into<ActionsModel>) -> ActionSet {
        let mut export = ActionSet::new();
        self.create_actions_into(model, &mut export);
        export
    }

    /// Like [`create_actions`](Alt::create_actions), writing into an
    /// existing set. Returns the namespace the actions were registered in.
    ///
    /// If the model's name is already a namespace, a numbered namespace is
    /// allocated and a warning is logged.
    pub fn create_actions_into(
        &self,
        model: impl Into<ActionsModel>,
        export: &mut ActionSet,
    ) -> String {
        let model = model.into();
        let seed = model.namespace_seed().to_owned();
        // Runs the user constructor; no lock may be held.
        let members = model.into_members();

        let mut registry = self.inner.actions.write();
        let namespace = registry.allocate_namespace(&seed);
        registry.register_members(&namespace, members, export, &self.weak());
        tracing::debug!(namespace = %namespace, actions = export.len(), "created actions");
        namespace
    }

    /// Create pass-through actions, one per name, in the `single`
    /// namespace.
    ///
    /// Each dispatches its arguments unchanged: no argument as `null`, one
    /// as itself, several as an array.
    pub fn generate_actions(&self, names: &[&str]) -> ActionSet {
        let members = names
            .iter()
            .map(|name| ((*name).to_owned(), Member::Action(pass_through())))
            .collect();
        let mut export = ActionSet::new();
        self.inner
            .actions
            .write()
            .register_members(SINGLE, members, &mut export, &self.weak());
        export
    }

    /// Create actions from `model` and expose them under `name` for
    /// [`get_actions`](Alt::get_actions).
    pub fn add_actions(&self, name: &str, model: impl Into<ActionsModel>) -> ActionSet {
        let export = self.create_actions(model);
        self.expose(name, &export);
        export
    }

    /// Generate pass-through actions and expose them under `name`.
    pub fn add_generated_actions(&self, name: &str, names: &[&str]) -> ActionSet {
        let export = self.generate_actions(names);
        self.expose(name, &export);
        export
    }

    fn expose(&self, name: &str, export: &ActionSet) {
        self.inner.actions.write().expose(name, export);
    }

    /// Actions registered under namespace `name`.
    pub fn get_actions(&self, name: &str) -> Option<ActionNamespace> {
        self.inner.actions.read().namespace(name).cloned()
    }

    /// The full set exposed under `name` by [`add_actions`](Alt::add_actions)
    /// or [`add_generated_actions`](Alt::add_generated_actions), constants
    /// included.
    pub fn get_action_set(&self, name: &str) -> Option<ActionSet> {
        self.inner.actions.read().exposed(name).cloned()
    }

    // --- stores --------------------------------------------------------

    /// Bind and register a store.
    ///
    /// # Arguments
    ///
    /// * `model` - Store definition. Every configured store transform is
    ///   applied to it first.
    /// * `identifier` - Registration name. Defaults to the model's display
    ///   name, then its type name.
    ///
    /// # Returns
    ///
    /// The bound store. A name that is taken or empty is replaced with a
    /// numbered one and a warning is logged; naming never fails.
    ///
    /// # Errors
    ///
    /// Returns [`AltError::Codec`] if the store's initial state cannot be
    /// serialized. Nothing is registered in that case.
    pub fn create_store(&self, model: StoreModel, identifier: Option<&str>) -> Result<StoreHandle> {
        let model = binder::transform(&self.inner.store_transforms, model);
        let desired = match identifier {
            Some(name) => name.to_owned(),
            None => model.desired_name(),
        };
        let instance = model.instantiate();
        let initial = self.round_trip(instance.get_state()?)?;

        let handle = {
            let mut stores = self.inner.stores.write();
            let name = binder::resolve_store_name(&stores, &desired);
            let handle = StoreHandle::new(instance, name.clone());
            stores.insert(name, handle.clone());
            self.inner
                .snapshots
                .lock()
                .record_initial(handle.name(), initial);
            handle
        };
        // The dispatcher may be user code; register outside the lock.
        handle.attach(self.inner.dispatcher.as_ref());
        tracing::debug!(store = %handle.name(), "registered store");
        Ok(handle)
    }

    /// Bind a store without registering it.
    ///
    /// The store receives dispatches but takes no part in snapshots,
    /// rollback or recycling, and [`get_store`](Alt::get_store) does not
    /// find it. Its name is the model's display name, or empty.
    pub fn create_unsaved_store(&self, model: StoreModel) -> StoreHandle {
        let model = binder::transform(&self.inner.store_transforms, model);
        let name = model.display_name().unwrap_or_default().to_owned();
        binder::bind(model.instantiate(), name, self.inner.dispatcher.as_ref())
    }

    /// Register a store under an explicit name.
    pub fn add_store(&self, name: &str, model: StoreModel) -> Result<StoreHandle> {
        self.create_store(model, Some(name))
    }

    /// The store registered under `name`.
    pub fn get_store(&self, name: &str) -> Option<StoreHandle> {
        self.inner.stores.read().get(name).cloned()
    }

    /// Names of every registered store, sorted.
    pub fn store_names(&self) -> Vec<String> {
        self.inner.stores.read().keys().cloned().collect()
    }

    // --- snapshots -----------------------------------------------------

    /// State of every store at registration time.
    pub fn initial_snapshot(&self) -> Snapshot {
        self.inner.snapshots.lock().initial.clone()
    }

    /// The snapshot `rollback` restores.
    pub fn last_snapshot(&self) -> Snapshot {
        self.inner.snapshots.lock().last.clone()
    }

    /// Read the current state of the stores named in `names`, or of every
    /// registered store when `names` is empty.
    ///
    /// # Errors
    ///
    /// * [`AltError::UnknownStore`] -- a name is not registered.
    /// * [`AltError::Codec`] -- a store's state cannot be converted.
    pub fn capture_state(&self, names: &[&str]) -> Result<Snapshot> {
        let stores: Vec<StoreHandle> = {
            let stores = self.inner.stores.read();
            if names.is_empty() {
                stores.values().cloned().collect()
            } else {
                names
                    .iter()
                    .map(|name| {
                        stores
                            .get(*name)
                            .cloned()
                            .ok_or_else(|| AltError::UnknownStore((*name).to_owned()))
                    })
                    .collect::<Result<_>>()?
            }
        };
        snapshot::capture(&stores)
    }

    /// Capture `names` (all stores when empty), merge the capture into the
    /// last snapshot, and return the serialized merged snapshot.
    ///
    /// # Errors
    ///
    /// See [`capture_state`](Alt::capture_state); also fails if the
    /// serializer does.
    pub fn take_snapshot(&self, names: &[&str]) -> Result<String> {
        let captured = self.capture_state(names)?;
        let merged = self.inner.snapshots.lock().merge_last(captured);
        tracing::debug!(stores = names.len(), "took snapshot");
        snapshot::encode(self.inner.serializer.as_ref(), &merged)
    }

    /// Replace the state of every registered store named in `data`, calling
    /// `hook` on each after its state is replaced.
    ///
    /// Names with no registered store are skipped.
    ///
    /// # Errors
    ///
    /// * [`AltError::MalformedSnapshot`] -- `data` is not a map.
    /// * [`AltError::Codec`] -- `data` cannot be decoded, or an entry does
    ///   not fit its store.
    /// * [`AltError::StoreBusy`] -- called from inside the reducer or hook
    ///   of a store named in `data`.
    /// * Whatever `hook` returns.
    ///
    /// Stores restored before the failing entry keep their new state.
    pub fn apply_snapshot<F>(&self, data: &str, mut hook: F) -> Result<()>
    where
        F: FnMut(&StoreHandle) -> Result<()>,
    {
        let snapshot = snapshot::decode(self.inner.serializer.as_ref(), data)?;
        for (name, state) in snapshot {
            let Some(store) = self.get_store(&name) else {
                tracing::trace!(store = %name, "skipping unregistered store");
                continue;
            };
            store.replace_state(state)?;
            hook(&store)?;
        }
        Ok(())
    }

    // --- lifecycle -----------------------------------------------------

    /// Restore the last snapshot and fire each store's `rollback` hook.
    pub fn rollback(&self) -> Result<()> {
        let last = self.last_snapshot();
        tracing::debug!(stores = last.len(), "rolling back");
        self.restore(&last, Lifecycle::Rollback)
    }

    /// Reset the stores named in `names` (all stores when empty) to their
    /// initial state and fire their `init` hook.
    ///
    /// # Errors
    ///
    /// Returns [`AltError::UnknownStore`] if a name has no initial state.
    pub fn recycle(&self, names: &[&str]) -> Result<()> {
        let initial = self.initial_snapshot();
        let target = if names.is_empty() {
            initial
        } else {
            filter_snapshot(&initial, names)?
        };
        tracing::debug!(stores = target.len(), "recycling");
        self.restore(&target, Lifecycle::Init)
    }

    /// Capture and serialize every store, then recycle all of them.
    ///
    /// Returns the capture taken before recycling.
    pub fn flush(&self) -> Result<String> {
        let state = snapshot::encode(self.inner.serializer.as_ref(), &self.capture_state(&[])?)?;
        self.recycle(&[])?;
        Ok(state)
    }

    /// Load serialized state into the registered stores and fire their
    /// `bootstrap` hook.
    ///
    /// # Examples
    ///
    /// ```
    /// use alt_flux::{Alt, ObjectStore, StoreModel};
    /// use serde_json::json;
    ///
    /// let alt = Alt::new();
    /// let store = alt
    ///     .create_store(StoreModel::object(ObjectStore::new(json!(0)).display_name("Count")), None)
    ///     .unwrap();
    /// alt.bootstrap(r#"{"Count": 42, "Missing": 1}"#).unwrap();
    /// assert_eq!(store.state_value().unwrap(), json!(42));
    /// ```
    pub fn bootstrap(&self, data: &str) -> Result<()> {
        tracing::debug!("bootstrapping");
        self.apply_snapshot(data, |store| {
            store.run_lifecycle(Lifecycle::Bootstrap)?;
            store.emit_change();
            Ok(())
        })
    }

    /// Serialize `{store name: payload}`, ready for [`bootstrap`](Alt::bootstrap).
    ///
    /// # Errors
    ///
    /// Returns [`AltError::UnnamedStore`] if `store` has an empty name.
    pub fn prepare(&self, store: &StoreHandle, payload: Value) -> Result<String> {
        if store.name().is_empty() {
            return Err(AltError::UnnamedStore);
        }
        let prepared: Snapshot = [(store.name().to_owned(), payload)].into();
        snapshot::encode(self.inner.serializer.as_ref(), &prepared)
    }

    fn restore(&self, target: &Snapshot, event: Lifecycle) -> Result<()> {
        let data = snapshot::encode(self.inner.serializer.as_ref(), target)?;
        self.apply_snapshot(&data, |store| {
            store.run_lifecycle(event)?;
            store.emit_change();
            Ok(())
        })
    }

    fn round_trip(&self, value: Value) -> Result<Value> {
        let serializer = self.inner.serializer.as_ref();
        serializer.deserialize(&serializer.serialize(&value)?)
    }
}

/// Builder for an [`Alt`] coordinator.
///
/// # Examples
///
/// ```
/// use alt_flux::{AltBuilder, JsonSerializer};
///
/// let alt = AltBuilder::new()
///     .serializer(JsonSerializer)
///     .store_transform(|model| model)
///     .build();
/// assert!(alt.store_names().is_empty());
/// ```
pub struct AltBuilder {
    serializer: Arc<dyn Serializer>,
    dispatcher: Arc<dyn Dispatcher>,
    store_transforms: Vec<StoreTransform>,
}

impl AltBuilder {
    /// Defaults: [`JsonSerializer`], a fresh [`FluxDispatcher`], no
    /// transforms.
    pub fn new() -> Self {
        Self {
            serializer: Arc::new(JsonSerializer),
            dispatcher: Arc::new(FluxDispatcher::new()),
            store_transforms: Vec::new(),
        }
    }

    /// Use `serializer` for snapshots and `prepare`.
    pub fn serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    /// Bind stores to `dispatcher` instead of a fresh [`FluxDispatcher`].
    ///
    /// Passing an `Arc` lets several coordinators share one bus.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Append a transform applied to every store model before binding.
    pub fn store_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(StoreModel) -> StoreModel + Send + Sync + 'static,
    {
        self.store_transforms.push(Arc::new(transform));
        self
    }

    /// Finish configuration.
    pub fn build(self) -> Alt {
        Alt {
            inner: Arc::new(AltInner {
                serializer: self.serializer,
                dispatcher: self.dispatcher,
                store_transforms: self.store_transforms,
                actions: RwLock::new(ActionRegistry::default()),
                stores: RwLock::new(BTreeMap::new()),
                snapshots: Mutex::new(Snapshots::default()),
            }),
        }
    }
}

impl Default for AltBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AltBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AltBuilder")
            .field("store_transforms", &self.store_transforms.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionsObject;
    use crate::dispatcher::{DispatchCallback, DispatchToken};
    use crate::store::ObjectStore;
    use crate::store::test_fixtures::{Counter, CounterStore, capture_warnings, plain};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<Alt>();
        }
    };

    /// A coordinator with one `set` action and a registered counter store.
    fn counter_alt() -> (Alt, Action, StoreHandle, Arc<parking_lot::Mutex<Vec<Lifecycle>>>) {
        let alt = Alt::new();
        let set = alt.generate_actions(&["set"])["set"].clone();
        let store = CounterStore::new(set.key().clone());
        let hooks = Arc::clone(&store.hooks);
        let handle = alt
            .create_store(StoreModel::class(move || store), None)
            .unwrap();
        (alt, set, handle, hooks)
    }

    fn count(store: &StoreHandle) -> i64 {
        store.state::<Counter>().unwrap().count
    }

    #[test]
    fn counter_snapshot_rollback_recycle() {
        let (alt, set, store, hooks) = counter_alt();
        assert_eq!(store.name(), "Counter");

        set.call(json!(5)).unwrap();
        assert_eq!(count(&store), 5);

        let snap = alt.take_snapshot(&[]).unwrap();
        assert_eq!(snap, r#"{"Counter":{"count":5}}"#);

        set.call(json!(9)).unwrap();
        assert_eq!(count(&store), 9);

        alt.rollback().unwrap();
        assert_eq!(count(&store), 5);

        alt.recycle(&[]).unwrap();
        assert_eq!(count(&store), 0);

        assert_eq!(*hooks.lock(), vec![Lifecycle::Rollback, Lifecycle::Init]);
    }

    #[test]
    fn rollback_before_any_snapshot_restores_initial_state() {
        let (alt, set, store, _) = counter_alt();
        set.call(json!(3)).unwrap();
        alt.rollback().unwrap();
        assert_eq!(count(&store), 0);
    }

    #[test]
    fn rollback_is_idempotent() {
        let (alt, set, store, _) = counter_alt();
        set.call(json!(4)).unwrap();
        alt.take_snapshot(&[]).unwrap();
        set.call(json!(8)).unwrap();

        alt.rollback().unwrap();
        let once = alt.capture_state(&[]).unwrap();
        alt.rollback().unwrap();
        assert_eq!(alt.capture_state(&[]).unwrap(), once);
        assert_eq!(count(&store), 4);
    }

    #[test]
    fn duplicate_store_name_is_renamed() {
        let alt = Alt::new();
        let first = alt
            .create_store(StoreModel::object(ObjectStore::new(json!(1)).display_name("Foo")), None)
            .unwrap();
        let (second, logs) = capture_warnings(|| {
            alt.create_store(StoreModel::object(ObjectStore::new(json!(2)).display_name("Foo")), None)
                .unwrap()
        });

        assert_eq!(first.name(), "Foo");
        assert_eq!(second.name(), "Foo1");
        assert!(logs.contains("a store named Foo already exists"), "{logs}");
        let found = alt.get_store("Foo1").unwrap();
        assert!(found.ptr_eq(&second));
        assert_eq!(alt.store_names(), vec!["Foo", "Foo1"]);
    }

    #[test]
    fn explicit_identifier_wins_over_display_name() {
        let alt = Alt::new();
        let store = alt.add_store("Custom", StoreModel::class(plain)).unwrap();
        assert_eq!(store.name(), "Custom");
        assert!(alt.get_store("Plain").is_none());
    }

    #[test]
    fn unnamed_store_registers_under_empty_name_with_warning() {
        let alt = Alt::new();
        let (store, logs) = capture_warnings(|| {
            alt.create_store(StoreModel::object(ObjectStore::new(json!({}))), None)
                .unwrap()
        });
        assert_eq!(store.name(), "");
        assert!(logs.contains("store name was not specified"), "{logs}");
        assert!(matches!(
            alt.prepare(&store, json!(1)),
            Err(AltError::UnnamedStore)
        ));
    }

    #[test]
    fn initial_snapshot_is_frozen_at_registration() {
        let (alt, set, _store, _) = counter_alt();
        set.call(json!(6)).unwrap();
        alt.take_snapshot(&[]).unwrap();
        assert_eq!(alt.initial_snapshot()["Counter"], json!({"count": 0}));
        assert_eq!(alt.last_snapshot()["Counter"], json!({"count": 6}));
    }

    #[test]
    fn recycle_only_touches_named_stores() {
        let alt = Alt::new();
        let bump = alt.generate_actions(&["bump"])["bump"].clone();
        let make = |name: &str, inits: Arc<AtomicUsize>| {
            StoreModel::object(
                ObjectStore::new(json!(0))
                    .display_name(name)
                    .on(bump.key(), |state, _| {
                        *state = json!(state.as_i64().unwrap_or(0) + 1);
                        true
                    })
                    .on_lifecycle(Lifecycle::Init, move |_| {
                        inits.fetch_add(1, Ordering::SeqCst);
                    }),
            )
        };
        let watch = |store: &StoreHandle| {
            let changes = Arc::new(AtomicUsize::new(0));
            let sink = Arc::clone(&changes);
            store.listen(move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            });
            changes
        };
        let (a_inits, b_inits) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
        let a = alt.create_store(make("A", Arc::clone(&a_inits)), None).unwrap();
        let b = alt.create_store(make("B", Arc::clone(&b_inits)), None).unwrap();
        bump.invoke(vec![]).unwrap();
        let (a_changes, b_changes) = (watch(&a), watch(&b));

        alt.recycle(&["A"]).unwrap();
        assert_eq!(a.state_value().unwrap(), json!(0));
        assert_eq!(b.state_value().unwrap(), json!(1));
        assert_eq!(a_inits.load(Ordering::SeqCst), 1);
        assert_eq!(a_changes.load(Ordering::SeqCst), 1);
        assert_eq!(b_inits.load(Ordering::SeqCst), 0);
        assert_eq!(b_changes.load(Ordering::SeqCst), 0);

        assert!(matches!(
            alt.recycle(&["Nope"]),
            Err(AltError::UnknownStore(ref name)) if name == "Nope"
        ));
    }

    #[test]
    fn take_snapshot_of_subset_merges_into_last() {
        let alt = Alt::new();
        let a = alt
            .create_store(StoreModel::object(ObjectStore::new(json!("a0")).display_name("A")), None)
            .unwrap();
        alt.create_store(StoreModel::object(ObjectStore::new(json!("b0")).display_name("B")), None)
            .unwrap();

        a.replace_state(json!("a1")).unwrap();
        let merged = alt.take_snapshot(&["A"]).unwrap();
        assert_eq!(merged, r#"{"A":"a1","B":"b0"}"#);
        assert!(matches!(
            alt.take_snapshot(&["C"]),
            Err(AltError::UnknownStore(_))
        ));
    }

    #[test]
    fn flush_then_bootstrap_round_trips() {
        let (alt, set, store, hooks) = counter_alt();
        set.call(json!(12)).unwrap();

        let flushed = alt.flush().unwrap();
        assert_eq!(count(&store), 0);

        alt.bootstrap(&flushed).unwrap();
        assert_eq!(count(&store), 12);
        assert_eq!(*hooks.lock(), vec![Lifecycle::Init, Lifecycle::Bootstrap]);
    }

    #[test]
    fn bootstrap_rejects_non_map_data() {
        let (alt, ..) = counter_alt();
        assert!(matches!(
            alt.bootstrap("[1]"),
            Err(AltError::MalformedSnapshot(_))
        ));
        assert!(matches!(alt.bootstrap("{nope"), Err(AltError::Codec(_))));
    }

    #[test]
    fn prepare_output_feeds_bootstrap() {
        let (alt, _set, store, _) = counter_alt();
        let data = alt.prepare(&store, json!({"count": 31})).unwrap();
        assert_eq!(data, r#"{"Counter":{"count":31}}"#);
        alt.bootstrap(&data).unwrap();
        assert_eq!(count(&store), 31);
    }

    #[test]
    fn restores_notify_listeners() {
        let (alt, _set, store, _) = counter_alt();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        store.listen(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        alt.rollback().unwrap();
        alt.recycle(&[]).unwrap();
        alt.bootstrap(r#"{"Counter":{"count":1}}"#).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unsaved_store_receives_dispatches_but_is_not_registered() {
        let alt = Alt::new();
        let set = alt.generate_actions(&["set"])["set"].clone();
        let store = alt.create_unsaved_store(StoreModel::class({
            let key = set.key().clone();
            move || CounterStore::new(key)
        }));
        assert_eq!(store.name(), "Counter");
        set.call(json!(2)).unwrap();
        assert_eq!(count(&store), 2);

        assert!(alt.get_store("Counter").is_none());
        assert!(alt.initial_snapshot().is_empty());
        alt.recycle(&[]).unwrap();
        assert_eq!(count(&store), 2);

        assert!(store.unbind(alt.dispatcher()));
        set.call(json!(5)).unwrap();
        assert_eq!(count(&store), 2);
    }

    #[test]
    fn hook_reaching_its_own_store_is_refused_not_deadlocked() {
        let alt = Alt::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let inner_alt = alt.clone();
        alt.create_store(StoreModel::object(ObjectStore::new(json!("o")).display_name("Other")), None)
            .unwrap();
        alt.create_store(
            StoreModel::object(
                ObjectStore::new(json!("w"))
                    .display_name("Watcher")
                    .on_lifecycle(Lifecycle::Rollback, move |_| {
                        sink.lock().push(inner_alt.capture_state(&[]));
                        sink.lock().push(inner_alt.capture_state(&["Other"]));
                    }),
            ),
            None,
        )
        .unwrap();

        alt.rollback().unwrap();

        let seen = std::mem::take(&mut *seen.lock());
        assert_eq!(seen.len(), 2);
        assert!(matches!(
            &seen[0],
            Err(AltError::StoreBusy(name)) if name == "Watcher"
        ));
        assert_eq!(seen[1].as_ref().unwrap()["Other"], json!("o"));
        // Outside the hook the store is reachable again.
        assert_eq!(alt.capture_state(&["Watcher"]).unwrap()["Watcher"], json!("w"));
    }

    #[test]
    fn reducer_reaching_its_own_store_is_refused() {
        let alt = Alt::new();
        let poke = alt.generate_actions(&["poke"])["poke"].clone();
        let outcome = Arc::new(parking_lot::Mutex::new(None));
        let sink = Arc::clone(&outcome);
        let inner_alt = alt.clone();
        alt.create_store(
            StoreModel::object(ObjectStore::new(json!(0)).display_name("Self").on(
                poke.key(),
                move |_, _| {
                    *sink.lock() = Some(inner_alt.take_snapshot(&["Self"]));
                    false
                },
            )),
            None,
        )
        .unwrap();

        poke.invoke(vec![]).unwrap();
        assert!(matches!(
            outcome.lock().take(),
            Some(Err(AltError::StoreBusy(_)))
        ));
    }

    #[test]
    fn store_transforms_run_before_naming() {
        let alt = Alt::builder()
            .store_transform(|model| {
                let name = format!("{}Store", model.desired_name());
                model.with_display_name(name)
            })
            .build();
        let store = alt.create_store(StoreModel::class(plain), None).unwrap();
        assert_eq!(store.name(), "PlainStore");
    }

    #[test]
    fn custom_serializer_shapes_the_wire_format() {
        struct Pretty;
        impl Serializer for Pretty {
            fn serialize(&self, value: &Value) -> Result<String> {
                Ok(serde_json::to_string_pretty(value)?)
            }
            fn deserialize(&self, data: &str) -> Result<Value> {
                Ok(serde_json::from_str(data)?)
            }
        }

        let alt = Alt::builder().serializer(Pretty).build();
        alt.create_store(StoreModel::object(ObjectStore::new(json!(1)).display_name("A")), None)
            .unwrap();
        assert_eq!(alt.take_snapshot(&[]).unwrap(), "{\n  \"A\": 1\n}");
    }

    #[test]
    fn shared_dispatcher_reaches_both_coordinators() {
        let bus: Arc<dyn Dispatcher> = Arc::new(FluxDispatcher::new());
        let left = Alt::builder().dispatcher(Arc::clone(&bus)).build();
        let right = Alt::builder().dispatcher(Arc::clone(&bus)).build();

        let set = left.generate_actions(&["set"])["set"].clone();
        let store = right
            .create_store(
                StoreModel::class({
                    let key = set.key().clone();
                    move || CounterStore::new(key)
                }),
                None,
            )
            .unwrap();
        set.call(json!(7)).unwrap();
        assert_eq!(count(&store), 7);
    }

    /// Lists the registered stores every time a callback is registered.
    #[derive(Default)]
    struct Inspecting {
        bus: FluxDispatcher,
        alt: std::sync::OnceLock<Weak<AltInner>>,
        seen: parking_lot::Mutex<Vec<Vec<String>>>,
    }

    impl Dispatcher for Inspecting {
        fn register(&self, callback: DispatchCallback) -> DispatchToken {
            if let Some(inner) = self.alt.get().and_then(Weak::upgrade) {
                self.seen.lock().push(Alt::from_inner(inner).store_names());
            }
            self.bus.register(callback)
        }

        fn unregister(&self, token: DispatchToken) {
            self.bus.unregister(token);
        }

        fn dispatch(&self, payload: Payload) -> Result<()> {
            self.bus.dispatch(payload)
        }

        fn is_dispatching(&self) -> bool {
            self.bus.is_dispatching()
        }
    }

    #[test]
    fn dispatcher_can_read_stores_while_one_is_bound() {
        let bus = Arc::new(Inspecting::default());
        let alt = Alt::builder().dispatcher(bus.clone()).build();
        assert!(bus.alt.set(alt.weak()).is_ok());

        for name in ["First", "Second"] {
            alt.create_store(
                StoreModel::object(ObjectStore::new(json!(0)).display_name(name)),
                None,
            )
            .unwrap();
        }

        assert_eq!(
            *bus.seen.lock(),
            vec![vec!["First".to_owned()], vec!["First".to_owned(), "Second".to_owned()]]
        );
    }

    #[test]
    fn dispatch_from_a_listener_is_rejected() {
        let (alt, set, store, _) = counter_alt();
        let nested = alt.create_action("nested", |ctx, _| ctx.dispatch(json!(null)));
        let outcome = Arc::new(parking_lot::Mutex::new(None));
        let sink = Arc::clone(&outcome);
        store.listen(move |_| {
            *sink.lock() = Some(nested.invoke(vec![]));
        });

        set.call(json!(1)).unwrap();
        let result = outcome.lock().take().unwrap();
        assert!(matches!(
            result,
            Err(AltError::DispatchInProgress { ref attempted }) if attempted == "alt/nested"
        ));
    }

    #[test]
    fn add_actions_exposes_under_given_name() {
        let alt = Alt::new();
        let set = alt.add_actions(
            "ui",
            ActionsObject::new().display_name("Ui").action("open", |_, _| Ok(())),
        );
        assert_eq!(set["open"].id(), "Ui#open");
        let ui = alt.get_actions("ui").unwrap();
        assert_eq!(ui["open"].key(), set["open"].key());
        assert!(alt.get_actions("Ui").is_some());

        let exposed = alt.get_action_set("ui").unwrap();
        assert_eq!(exposed.constant("OPEN"), Some(set["open"].key()));
        assert!(alt.get_action_set("Ui").is_none());

        alt.add_generated_actions("gen", &["ping"]);
        assert!(alt.get_actions("gen").unwrap().contains_key("ping"));
        assert!(alt.get_action_set("gen").unwrap().constant("PING").is_some());
        assert!(alt.get_actions(SINGLE).unwrap().contains_key("ping"));
    }

    #[tokio::test]
    async fn deferred_action_runs_after_the_dispatch_unwinds() {
        let (alt, set, store, _) = counter_alt();
        let follow_up = set.clone();
        let deferred = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&deferred);
        store.listen(move |s| {
            if s.state::<Counter>().map(|c| c.count == 1).unwrap_or(false) {
                sink.fetch_add(1, Ordering::SeqCst);
                follow_up.defer(vec![json!(2)]).unwrap();
            }
        });

        set.call(json!(1)).unwrap();
        for _ in 0..100 {
            if count(&store) == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(count(&store), 2);
        assert_eq!(deferred.load(Ordering::SeqCst), 1);
        drop(alt);
    }
}
