//! The message bus that delivers payloads to bound stores.
//!
//! The coordinator depends only on the [`Dispatcher`] trait. The default
//! [`FluxDispatcher`] runs callbacks synchronously in registration order and
//! refuses to start a dispatch while another one is still running.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::action::Payload;
use crate::error::{AltError, Result};

/// Callback registered by a bound store.
pub type DispatchCallback = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Handle returned by [`Dispatcher::register`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DispatchToken(u64);

/// A synchronous message bus.
///
/// # Contract
///
/// - [`dispatch`](Dispatcher::dispatch) returns once every callback
///   registered at the start of the dispatch has run.
/// - A dispatch started while another is in progress on the same bus must
///   fail with [`AltError::DispatchInProgress`] without running any
///   callback.
pub trait Dispatcher: Send + Sync {
    /// Register a callback to receive every subsequent payload.
    fn register(&self, callback: DispatchCallback) -> DispatchToken;

    /// Stop delivering payloads to the callback behind `token`.
    fn unregister(&self, token: DispatchToken);

    /// Deliver `payload` to every registered callback.
    ///
    /// # Errors
    ///
    /// Returns [`AltError::DispatchInProgress`] when called re-entrantly.
    fn dispatch(&self, payload: Payload) -> Result<()>;

    /// Whether a dispatch is currently running.
    fn is_dispatching(&self) -> bool;
}

/// Default in-process [`Dispatcher`].
#[derive(Default)]
pub struct FluxDispatcher {
    callbacks: RwLock<BTreeMap<DispatchToken, DispatchCallback>>,
    next_token: AtomicU64,
    dispatching: AtomicBool,
}

impl FluxDispatcher {
    /// Create a bus with no callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Whether no callback is registered.
    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }
}

impl fmt::Debug for FluxDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FluxDispatcher")
            .field("callbacks", &self.len())
            .field("dispatching", &self.is_dispatching())
            .finish()
    }
}

/// Clears the in-progress flag even if a callback panics.
struct DispatchGuard<'a>(&'a AtomicBool);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Dispatcher for FluxDispatcher {
    fn register(&self, callback: DispatchCallback) -> DispatchToken {
        let token = DispatchToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().insert(token, callback);
        token
    }

    fn unregister(&self, token: DispatchToken) {
        self.callbacks.write().remove(&token);
    }

    fn dispatch(&self, payload: Payload) -> Result<()> {
        if self
            .dispatching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AltError::DispatchInProgress {
                attempted: payload.action.to_string(),
            });
        }
        let _guard = DispatchGuard(&self.dispatching);

        // Callbacks may register new stores; never hold the lock while
        // running them.
        let callbacks: Vec<DispatchCallback> = self.callbacks.read().values().cloned().collect();
        let _span = tracing::debug_span!("dispatch", action = %payload.action).entered();
        for callback in &callbacks {
            callback(&payload);
        }
        tracing::trace!(callbacks = callbacks.len(), "dispatch complete");
        Ok(())
    }

    fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::Acquire)
    }
}
