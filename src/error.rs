//! Crate-level error type for registration, dispatch and snapshot lifecycle.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AltError>;

/// Error returned by coordinator operations.
///
/// Naming collisions are not errors: they are resolved by renaming and
/// surfaced as `tracing` warnings.
#[derive(Debug, thiserror::Error)]
pub enum AltError {
    /// A dispatch was attempted while another one was still running.
    ///
    /// The bus never nests dispatches. Use
    /// [`Action::defer`](crate::Action::defer) to schedule a dispatch for
    /// after the current one has unwound.
    #[error("cannot dispatch {attempted} in the middle of a dispatch")]
    DispatchInProgress {
        /// Key of the action whose dispatch was rejected.
        attempted: String,
    },

    /// The store handed to `prepare` has no resolvable name.
    #[error("store provided does not have a name")]
    UnnamedStore,

    /// A store name was requested that is not registered (or not present in
    /// the snapshot being filtered).
    #[error("{0} is not a valid store")]
    UnknownStore(String),

    /// A store was read or written from inside its own reducer or lifecycle
    /// hook.
    ///
    /// The instance is exclusively borrowed while that code runs; other
    /// stores remain reachable.
    #[error("store {0} is busy running its own handler or hook")]
    StoreBusy(String),

    /// Serialized data did not decode to a map of store name to state.
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),

    /// The configured serializer failed to encode or decode a value.
    #[error("snapshot codec error: {0}")]
    Codec(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The coordinator that created an action has been dropped.
    #[error("the coordinator owning this action is no longer alive")]
    CoordinatorGone,

    /// `defer` was called outside of a tokio runtime.
    #[error("deferred dispatch requires a running tokio runtime")]
    NoRuntime,
}

impl From<serde_json::Error> for AltError {
    fn from(err: serde_json::Error) -> Self {
        AltError::Codec(Box::new(err))
    }
}
