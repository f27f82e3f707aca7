//! Actions, their opaque keys, and the payload delivered to stores.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::alt::{Alt, AltInner};
use crate::error::{AltError, Result};

/// Opaque, process-wide identity of an action.
///
/// Rendered as `alt/<id>` where `<id>` is the action's allocated id. Stores
/// match dispatched payloads against keys, never against member names,
/// because ids are renamed on collision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionKey(String);

impl ActionKey {
    pub(crate) fn for_id(id: &str) -> Self {
        Self(format!("alt/{id}"))
    }

    /// The full key string (`alt/<id>`).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The allocated action id this key was derived from.
    pub fn id(&self) -> &str {
        self.0.strip_prefix("alt/").unwrap_or(&self.0)
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the bus hands to every registered store handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Key of the dispatched action.
    pub action: ActionKey,
    /// Arbitrary data supplied by the action implementation.
    pub data: Value,
}

impl Payload {
    /// Whether this payload was dispatched by the action with `key`.
    pub fn is(&self, key: &ActionKey) -> bool {
        &self.action == key
    }
}

/// Implementation closure wrapped by an [`Action`].
///
/// Receives the invocation context and the call arguments. Calling
/// [`ActionContext::dispatch`] is how the implementation reaches the stores;
/// an implementation that never dispatches is a valid no-op action.
pub type ActionFn = Arc<dyn Fn(&ActionContext, Vec<Value>) -> Result<()> + Send + Sync>;

/// Context passed to an action implementation on every invocation.
pub struct ActionContext {
    alt: Alt,
    key: ActionKey,
}

impl ActionContext {
    /// Dispatch `data` through the owning coordinator under this action's key.
    ///
    /// # Errors
    ///
    /// Returns [`AltError::DispatchInProgress`] when called while another
    /// dispatch is still running.
    pub fn dispatch(&self, data: Value) -> Result<()> {
        self.alt.dispatch(&self.key, data)
    }

    /// Key of the action being invoked.
    pub fn key(&self) -> &ActionKey {
        &self.key
    }

    /// The coordinator that owns the action, for reaching sibling actions or
    /// stores.
    pub fn alt(&self) -> &Alt {
        &self.alt
    }
}

/// A registered, invocable action.
///
/// `Clone` is cheap. An action holds only a weak reference to the coordinator
/// that created it, so keeping actions around does not keep the coordinator
/// alive.
#[derive(Clone)]
pub struct Action {
    pub(crate) key: ActionKey,
    pub(crate) id: String,
    pub(crate) namespace: String,
    pub(crate) constant: Option<String>,
    pub(crate) implementation: ActionFn,
    pub(crate) alt: Weak<AltInner>,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("key", &self.key)
            .field("namespace", &self.namespace)
            .field("constant", &self.constant)
            .finish()
    }
}

impl Action {
    /// The opaque key stores match against.
    pub fn key(&self) -> &ActionKey {
        &self.key
    }

    /// The allocated, globally unique id (e.g. `TodoActions#addTodo`).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the namespace the action is registered under.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Upper-snake-case constant generated for grouped actions.
    pub fn constant(&self) -> Option<&str> {
        self.constant.as_deref()
    }

    /// Run the implementation synchronously with `args`.
    ///
    /// # Errors
    ///
    /// * [`AltError::CoordinatorGone`] -- the owning coordinator was dropped.
    /// * Whatever the implementation returns, typically
    ///   [`AltError::DispatchInProgress`] when invoked from inside a dispatch.
    pub fn invoke(&self, args: Vec<Value>) -> Result<()> {
        let inner = self.alt.upgrade().ok_or(AltError::CoordinatorGone)?;
        let ctx = ActionContext {
            alt: Alt::from_inner(inner),
            key: self.key.clone(),
        };
        tracing::trace!(action = %self.key, args = args.len(), "invoking action");
        (self.implementation)(&ctx, args)
    }

    /// Invoke with a single argument.
    pub fn call(&self, value: Value) -> Result<()> {
        self.invoke(vec![value])
    }

    /// Schedule an invocation for after the current dispatch has unwound.
    ///
    /// The invocation is spawned onto the ambient tokio runtime and waits
    /// until the bus is idle before running. If another dispatch starts
    /// between that check and the invocation, the invocation is retried.
    /// Deferred invocations are not ordered relative to each other and
    /// cannot be cancelled. Other failures are logged, since there is no
    /// caller left to return them to.
    ///
    /// # Errors
    ///
    /// Returns [`AltError::NoRuntime`] if called outside a tokio runtime.
    pub fn defer(&self, args: Vec<Value>) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| AltError::NoRuntime)?;
        let action = self.clone();
        runtime.spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                let Some(inner) = action.alt.upgrade() else {
                    tracing::debug!(action = %action.key, "coordinator dropped before deferred dispatch");
                    return;
                };
                let busy = inner.dispatcher.is_dispatching();
                drop(inner);

                if !busy {
                    match action.invoke(args.clone()) {
                        Ok(()) => return,
                        Err(AltError::DispatchInProgress { .. }) => {
                            tracing::trace!(action = %action.key, attempt, "deferred dispatch raced another dispatch");
                        }
                        Err(e) => {
                            tracing::warn!(action = %action.key, error = %e, "deferred dispatch failed");
                            return;
                        }
                    }
                }
                attempt = attempt.saturating_add(1);
                backoff(attempt).await;
            }
        });
        Ok(())
    }
}

const SPIN_ATTEMPTS: u32 = 16;
const RETRY_DELAY: Duration = Duration::from_millis(1);

/// Yields for the first few attempts, then sleeps between polls.
async fn backoff(attempt: u32) {
    if attempt < SPIN_ATTEMPTS {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(RETRY_DELAY).await;
    }
}

/// Collapse call arguments into one dispatched value.
///
/// No arguments dispatch `null`, one argument is dispatched as-is, more are
/// dispatched as an array.
pub(crate) fn collapse_args(mut args: Vec<Value>) -> Value {
    match args.len() {
        0 => Value::Null,
        1 => args.pop().unwrap_or(Value::Null),
        _ => Value::Array(args),
    }
}

/// Implementation for generated actions: dispatch the arguments unchanged.
pub(crate) fn pass_through() -> ActionFn {
    Arc::new(|ctx: &ActionContext, args: Vec<Value>| ctx.dispatch(collapse_args(args)))
}
