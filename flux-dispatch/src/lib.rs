//! flux-dispatch: Flux-style dispatcher with a dependency-aware store graph
//!
//! Actions flow one way: action creators dispatch, the dispatcher delivers to
//! interested stores (honoring `wait_for` dependencies), and stores notify their
//! listeners once per tick, children before parents.
//!
//! # Example
//! ```ignore
//! use flux_dispatch::prelude::*;
//! use serde_json::Value;
//!
//! #[derive(ActionType, Clone, Copy, Debug, PartialEq)]
//! enum CounterAction {
//!     Increment,
//!     Reset,
//! }
//!
//! let dispatcher: Dispatcher = Dispatcher::new();
//! let counter = Store::builder("Counter", || 0i64)
//!     .bind(CounterAction::Increment, |n, _: &Value, _| {
//!         *n += 1;
//!         Ok(true)
//!     })
//!     .bind(CounterAction::Reset, |n, _, _| {
//!         *n = 0;
//!         Ok(true)
//!     })
//!     .build(&dispatcher)?;
//!
//! let actions = ActionCreator::new(&dispatcher, "CounterActions")?;
//! actions.dispatch(CounterAction::Increment, Value::Null)?;
//! assert_eq!(counter.read("count", |n| *n)?, 1);
//! ```

// Re-export everything from core
pub use flux_dispatch_core::*;

// Re-export derive macros
pub use flux_dispatch_macros::ActionType;

/// Prelude for convenient imports
pub mod prelude {
    // Actions
    pub use flux_dispatch_core::{
        Action, ActionCreator, ActionId, ActionType, Constant, ConstantCollection,
    };

    // Dispatcher
    pub use flux_dispatch_core::{Context, Dispatcher, DispatcherConfig, FluxError, Token};

    // Stores and notification
    pub use flux_dispatch_core::{HandlerContext, Listener, Scheduler, Store, TickQueue};
    #[cfg(feature = "local-tasks")]
    pub use flux_dispatch_core::LocalTaskScheduler;

    // Observers
    pub use flux_dispatch_core::{DispatchObserver, LoggingObserver};

    // Derive macros
    pub use flux_dispatch_macros::ActionType;
}
