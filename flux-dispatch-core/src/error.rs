//! Error type shared by the dispatcher, store graph and stores
//!
//! Every variant describes a broken action/store contract: they are returned at
//! the point of detection, propagated with `?` up to the original
//! `dispatch`/`register`/`build` call, and never retried.

use thiserror::Error;

use crate::dispatcher::Token;

/// Result alias used throughout flux-dispatch.
pub type Result<T, E = FluxError> = std::result::Result<T, E>;

/// Errors raised by flux-dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FluxError {
    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------
    /// A store or action creator was built without a display name
    #[error("a non-empty display name is required")]
    MissingDisplayName,

    /// The display name is already registered
    #[error("the display name `{0}` is not unique")]
    DuplicateDisplayName(String),

    /// The same action identifier was bound twice in one store
    #[error("{store}: the action `{action}` has already been bound in this store")]
    DuplicateBinding { store: String, action: String },

    /// An empty action identifier was passed to `bind`
    #[error("{store}: an unrecognizable action type or source `{action}` was bound")]
    InvalidBinding { store: String, action: String },

    /// A constant collection was created with a repeated name
    #[error("the constant `{0}` already exists in this collection")]
    DuplicateConstant(String),

    /// An action type is already owned by another action creator
    #[error("the action type `{action}` already belongs to the action creator `{creator}`")]
    DuplicateActionType { action: String, creator: String },

    /// `ContextStack::allow` was called with no valid contexts
    #[error("an empty set of contexts was passed to allow() for {0}")]
    EmptyAllowSet(String),

    // ------------------------------------------------------------------
    // Protocol violations
    // ------------------------------------------------------------------
    /// An operation was entered from a context that does not permit it
    #[error(
        "illegal state detected: {operation} can only be entered from the following \
         contexts: [{allowed}] (current: {current})"
    )]
    IllegalState {
        operation: String,
        current: String,
        allowed: String,
    },

    /// `dispatch` was called while another dispatch was running
    #[error("cannot dispatch in the middle of a dispatch")]
    AlreadyDispatching,

    /// `wait_for` was called outside of a dispatch
    #[error("wait_for(...) must be invoked while dispatching")]
    NotDispatching,

    /// The token does not map to a registered callback
    #[error("`{0}` does not map to a registered callback")]
    UnknownToken(Token),

    /// The action's type is empty
    #[error("attempted to dispatch an action with unrecognizable type `{0}`")]
    InvalidActionType(String),

    /// A store's state was read while one of its handlers was running
    #[error("{store}: state is being updated by a handler and cannot be read")]
    StoreBusy { store: String },

    // ------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------
    /// A `wait_for` chain came back to a callback that is still running
    #[error("circular dependency detected while waiting for `{0}`")]
    CircularDependency(Token),

    /// The store graph could not be fully ordered
    #[error("cycle detected in store graph ({remaining_edges} edges could not be ordered)")]
    CycleDetected { remaining_edges: usize },

    // ------------------------------------------------------------------
    // Mutation checks
    // ------------------------------------------------------------------
    /// The dispatched action changed while it was being dispatched
    #[error(
        "an action was mutated while it was being dispatched; check the handlers \
         for source `{action_source}` and type `{action_type}`"
    )]
    ActionMutated {
        action_source: String,
        action_type: String,
    },

    /// An accessor changed the state it was only allowed to read
    #[error("the accessor {store}.{accessor} mutated private state; use a bound handler instead")]
    AccessorMutation { store: String, accessor: String },

    /// A mocked accessor returns a different type than the caller expects
    #[error("the mock for {store}.{accessor} returns a different type than the accessor")]
    MockTypeMismatch { store: String, accessor: String },

    // ------------------------------------------------------------------
    // User code
    // ------------------------------------------------------------------
    /// A store handler reported a failure
    #[error("{store}: handler failed: {message}")]
    Handler { store: String, message: String },
}

impl FluxError {
    /// Build a handler failure for the given store.
    pub fn handler(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a construction-time configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingDisplayName
                | Self::DuplicateDisplayName(_)
                | Self::DuplicateBinding { .. }
                | Self::InvalidBinding { .. }
                | Self::DuplicateConstant(_)
                | Self::DuplicateActionType { .. }
                | Self::EmptyAllowSet(_)
        )
    }
}
