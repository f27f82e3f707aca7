//! Action models, the exported action set, and the action registry.
//!
//! Every action lives in exactly one namespace. Ungrouped actions live in
//! [`SINGLE`] under their global id; actions created from a model live in
//! the model's namespace under a locally unique member name.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::ops::Index;
use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::action::{Action, ActionContext, ActionFn, ActionKey, pass_through};
use crate::alt::AltInner;
use crate::error::Result;
use crate::uid::{format_as_constant, short_type_name, uid};

/// Namespace holding ungrouped actions.
pub const SINGLE: &str = "single";

/// Namespace seed for models with neither a display name nor a type name.
const UNKNOWN: &str = "Unknown";

/// Local id to action, for one namespace.
pub type ActionNamespace = BTreeMap<String, Action>;

/// A member exposed by an actions model.
#[derive(Clone)]
pub enum Member {
    /// A callable member; becomes an action.
    Action(ActionFn),
    /// A plain data member; ignored at registration.
    Value(Value),
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Action(_) => f.write_str("Action(..)"),
            Member::Value(v) => f.debug_tuple("Value").field(v).finish(),
        }
    }
}

/// Ordered member list. Re-adding a name replaces the earlier member in place.
#[derive(Debug, Clone, Default)]
struct MemberList(Vec<(String, Member)>);

impl MemberList {
    fn insert(&mut self, name: String, member: Member) {
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = member,
            None => self.0.push((name, member)),
        }
    }
}

/// A type whose instance exposes action methods.
///
/// Member discovery is explicit: [`describe`](ActionsClass::describe) runs
/// once against the constructed instance and lists the methods that become
/// actions.
///
/// # Examples
///
/// ```
/// use alt_flux::{ActionContext, ActionsClass, ActionsModel, Alt, Members, Result};
/// use serde_json::{Value, json};
///
/// struct TodoActions {
///     prefix: String,
/// }
///
/// impl TodoActions {
///     fn add_todo(&self, ctx: &ActionContext, args: Vec<Value>) -> Result<()> {
///         let text = args.first().and_then(Value::as_str).unwrap_or_default();
///         ctx.dispatch(json!(format!("{}{text}", self.prefix)))
///     }
/// }
///
/// impl ActionsClass for TodoActions {
///     const DISPLAY_NAME: Option<&'static str> = Some("TodoActions");
///
///     fn describe(members: &mut Members<Self>) {
///         members.action("addTodo", Self::add_todo).generate(&["clearAll"]);
///     }
/// }
///
/// let alt = Alt::new();
/// let actions = alt.create_actions(ActionsModel::class(|| TodoActions { prefix: "- ".into() }));
/// assert_eq!(actions["addTodo"].id(), "TodoActions#addTodo");
/// assert!(actions.constant("CLEAR_ALL").is_some());
/// ```
pub trait ActionsClass: Send + Sync + Sized + 'static {
    /// Preferred namespace name. Falls back to the type name when `None`.
    const DISPLAY_NAME: Option<&'static str> = None;

    /// List the members of the constructed instance.
    fn describe(members: &mut Members<Self>);
}

/// Collects the members of an [`ActionsClass`] instance.
pub struct Members<T> {
    instance: Arc<T>,
    list: MemberList,
}

impl<T: Send + Sync + 'static> Members<T> {
    /// The constructed instance, for member lists that depend on
    /// constructor arguments.
    pub fn instance(&self) -> &T {
        &self.instance
    }

    /// Expose `method` as the action `name`.
    pub fn action<F>(&mut self, name: &str, method: F) -> &mut Self
    where
        F: Fn(&T, &ActionContext, Vec<Value>) -> Result<()> + Send + Sync + 'static,
    {
        let instance = Arc::clone(&self.instance);
        let implementation: ActionFn =
            Arc::new(move |ctx: &ActionContext, args: Vec<Value>| method(&instance, ctx, args));
        self.list.insert(name.to_owned(), Member::Action(implementation));
        self
    }

    /// Expose pass-through actions that dispatch their arguments unchanged.
    pub fn generate(&mut self, names: &[&str]) -> &mut Self {
        for name in names {
            self.list
                .insert((*name).to_owned(), Member::Action(pass_through()));
        }
        self
    }

    /// Expose a data member. Data members are not actions.
    pub fn value(&mut self, name: &str, value: Value) -> &mut Self {
        self.list.insert(name.to_owned(), Member::Value(value));
        self
    }
}

/// An actions model built from names and closures.
#[derive(Debug, Clone, Default)]
pub struct ActionsObject {
    display_name: Option<String>,
    list: MemberList,
}

impl ActionsObject {
    /// An empty, unnamed object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the namespace name.
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Add an action member.
    pub fn action<F>(mut self, name: &str, implementation: F) -> Self
    where
        F: Fn(&ActionContext, Vec<Value>) -> Result<()> + Send + Sync + 'static,
    {
        self.list
            .insert(name.to_owned(), Member::Action(Arc::new(implementation)));
        self
    }

    /// Add pass-through action members.
    pub fn generate(mut self, names: &[&str]) -> Self {
        for name in names {
            self.list
                .insert((*name).to_owned(), Member::Action(pass_through()));
        }
        self
    }

    /// Add a data member, which registration ignores.
    pub fn value(mut self, name: &str, value: Value) -> Self {
        self.list.insert(name.to_owned(), Member::Value(value));
        self
    }
}

type Describe = Box<dyn FnOnce() -> MemberList + Send>;

enum Source {
    Class(Describe),
    Object(MemberList),
}

/// Source of a group of actions, resolved once at registration.
pub struct ActionsModel {
    display_name: Option<String>,
    type_name: Option<String>,
    source: Source,
}

impl ActionsModel {
    /// Actions defined by a type. `construct` runs once, at registration.
    pub fn class<T, F>(construct: F) -> Self
    where
        T: ActionsClass,
        F: FnOnce() -> T + Send + 'static,
    {
        Self {
            display_name: T::DISPLAY_NAME.map(str::to_owned),
            type_name: Some(short_type_name::<T>().to_owned()),
            source: Source::Class(Box::new(move || {
                let mut members = Members {
                    instance: Arc::new(construct()),
                    list: MemberList::default(),
                };
                T::describe(&mut members);
                members.list
            })),
        }
    }

    /// Actions defined by an [`ActionsObject`].
    pub fn object(object: ActionsObject) -> Self {
        Self {
            display_name: object.display_name,
            type_name: None,
            source: Source::Object(object.list),
        }
    }

    /// Declared display name, if any.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Name the namespace is allocated from.
    pub(crate) fn namespace_seed(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.type_name.as_deref())
            .unwrap_or(UNKNOWN)
    }

    pub(crate) fn into_members(self) -> Vec<(String, Member)> {
        match self.source {
            Source::Class(describe) => describe().0,
            Source::Object(list) => list.0,
        }
    }
}

impl From<ActionsObject> for ActionsModel {
    fn from(object: ActionsObject) -> Self {
        ActionsModel::object(object)
    }
}

impl fmt::Debug for ActionsModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionsModel")
            .field("display_name", &self.display_name)
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Actions produced by one or more model registrations.
///
/// Holds each action under its member name and each action key under the
/// member's constant name (`addTodo` -> `ADD_TODO`).
#[derive(Debug, Clone, Default)]
pub struct ActionSet {
    actions: BTreeMap<String, Action>,
    constants: BTreeMap<String, ActionKey>,
}

impl ActionSet {
    /// An empty set, to be filled by `create_actions_into`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Action exported under member `name`.
    pub fn get(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    /// Key exported under constant `name`.
    pub fn constant(&self, name: &str) -> Option<&ActionKey> {
        self.constants.get(name)
    }

    /// Member names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// Iterate `(member name, action)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Action)> {
        self.actions.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of exported actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether no action has been exported.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Index<&str> for ActionSet {
    type Output = Action;

    fn index(&self, name: &str) -> &Action {
        self.actions
            .get(name)
            .unwrap_or_else(|| panic!("no action named {name} in this set"))
    }
}

/// Every action created by one coordinator.
///
/// Append-only: no entry is ever overwritten. Every action is inserted
/// under a key allocated against the namespace it lands in, which is how
/// global ids and member names share [`SINGLE`].
#[derive(Debug)]
pub(crate) struct ActionRegistry {
    ids: HashSet<String>,
    namespaces: BTreeMap<String, ActionNamespace>,
    exposed: BTreeMap<String, ActionSet>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        let mut namespaces = BTreeMap::new();
        namespaces.insert(SINGLE.to_owned(), ActionNamespace::new());
        Self {
            ids: HashSet::new(),
            namespaces,
            exposed: BTreeMap::new(),
        }
    }
}

impl ActionRegistry {
    /// Allocate an id from `name` and register the action under [`SINGLE`].
    ///
    /// The entry key is the id unless a member name already holds it, in
    /// which case it is suffixed like any other collision.
    pub(crate) fn create_action(
        &mut self,
        name: &str,
        implementation: ActionFn,
        alt: &Weak<AltInner>,
    ) -> Action {
        let action = self.allocate(name, implementation, alt);
        let single = self.namespaces.entry(SINGLE.to_owned()).or_default();
        let local_id = uid(&*single, &action.id);
        single.insert(local_id, action.clone());
        action
    }

    /// Allocate a globally unique id and build the action, without placing
    /// it in any namespace.
    fn allocate(&mut self, name: &str, implementation: ActionFn, alt: &Weak<AltInner>) -> Action {
        let id = uid(&self.ids, name);
        self.ids.insert(id.clone());
        let action = Action {
            key: ActionKey::for_id(&id),
            id,
            namespace: SINGLE.to_owned(),
            constant: None,
            implementation,
            alt: alt.clone(),
        };
        tracing::debug!(action = %action.key, "created action");
        action
    }

    /// Pick an unused namespace name derived from `seed`, warning on rename.
    pub(crate) fn allocate_namespace(&self, seed: &str) -> String {
        let key = uid(&self.namespaces, seed);
        if key != seed {
            tracing::warn!(
                requested = %seed,
                assigned = %key,
                "actions namespace {seed} already exists, registering as {key}"
            );
        }
        key
    }

    /// Register the callable `members` under `namespace`, exporting each into
    /// `export`.
    pub(crate) fn register_members(
        &mut self,
        namespace: &str,
        members: Vec<(String, Member)>,
        export: &mut ActionSet,
        alt: &Weak<AltInner>,
    ) {
        self.namespaces.entry(namespace.to_owned()).or_default();
        for (member, kind) in members {
            let Member::Action(implementation) = kind else {
                continue;
            };
            let mut action = self.allocate(&format!("{namespace}#{member}"), implementation, alt);

            let constant = format_as_constant(&member);
            action.namespace = namespace.to_owned();
            action.constant = Some(constant.clone());

            let scope = self.namespaces.entry(namespace.to_owned()).or_default();
            let local_id = uid(&*scope, &member);
            scope.insert(local_id, action.clone());

            export.constants.insert(constant, action.key.clone());
            export.actions.insert(member, action);
        }
    }

    /// Expose `export` under `name`, replacing whatever was there.
    ///
    /// The namespace table gets the member-to-action entries; the whole
    /// set, constants included, is kept alongside.
    pub(crate) fn expose(&mut self, name: &str, export: &ActionSet) {
        self.namespaces
            .insert(name.to_owned(), export.actions.clone());
        self.exposed.insert(name.to_owned(), export.clone());
    }

    pub(crate) fn namespace(&self, name: &str) -> Option<&ActionNamespace> {
        self.namespaces.get(name)
    }

    pub(crate) fn exposed(&self, name: &str) -> Option<&ActionSet> {
        self.exposed.get(name)
    }
}
