//! Flux-style actions and stores with whole-application snapshots.
//!
//! An [`Alt`] coordinator owns every action and store it creates. Actions
//! dispatch payloads over a synchronous bus; stores reduce them into
//! serializable state. The coordinator can capture that state, roll it
//! back, reset it, and load it from serialized data.
//!
//! ```
//! use alt_flux::{Alt, ObjectStore, StoreModel};
//! use serde_json::json;
//!
//! let alt = Alt::new();
//! let actions = alt.generate_actions(&["rename"]);
//! let user = alt
//!     .create_store(
//!         StoreModel::object(
//!             ObjectStore::new(json!({"name": "anon"}))
//!                 .display_name("User")
//!                 .on(actions["rename"].key(), |state, name| {
//!                     state["name"] = name.clone();
//!                     true
//!                 }),
//!         ),
//!         None,
//!     )
//!     .unwrap();
//!
//! alt.take_snapshot(&[]).unwrap();
//! actions["rename"].call(json!("ada")).unwrap();
//! assert_eq!(user.state_value().unwrap()["name"], "ada");
//!
//! alt.rollback().unwrap();
//! assert_eq!(user.state_value().unwrap()["name"], "anon");
//! ```

mod action;
pub use action::{Action, ActionContext, ActionFn, ActionKey, Payload};
mod actions;
pub use actions::{
    ActionNamespace, ActionSet, ActionsClass, ActionsModel, ActionsObject, Member, Members,
};
mod alt;
mod binder;
mod codec;
mod dispatcher;
mod error;
mod snapshot;
mod store;
mod uid;

pub use alt::{Alt, AltBuilder};
pub use binder::{ListenerId, StoreHandle, StoreModel, StoreTransform};
pub use codec::{JsonSerializer, Serializer};
pub use dispatcher::{DispatchCallback, DispatchToken, Dispatcher, FluxDispatcher};
pub use error::{AltError, Result};
pub use snapshot::{Snapshot, filter_snapshot};
pub use store::{Lifecycle, ObjectStore, Store, StoreState};
pub use uid::{Scope, format_as_constant, uid};
