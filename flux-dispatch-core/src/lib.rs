//! Core types for flux-dispatch
//!
//! This crate provides a Flux-style dispatcher: actions flow from action creators
//! through a single [`Dispatcher`] to the [`Store`]s interested in them, and
//! changed stores notify their listeners in one batch per tick.
//!
//! # Core Concepts
//!
//! - **Action**: a type, an optional source and a serializable payload
//! - **Dispatcher**: single-flight delivery to registered callbacks, with
//!   `wait_for` ordering and mutation detection
//! - **Store**: private state changed only by bound handlers
//! - **StoreGraph**: child/parent dependencies between stores, sorted with
//!   Kahn's algorithm so children always notify before parents
//! - **ContextStack**: rejects illegal nesting (dispatching from a handler,
//!   reading state while rendering)
//!
//! # Basic Example
//!
//! ```ignore
//! use flux_dispatch_core::prelude::*;
//! use serde_json::{json, Value};
//!
//! let dispatcher: Dispatcher = Dispatcher::new();
//!
//! let todos = Store::builder("Todos", Vec::<String>::new)
//!     .bind("ADD", |todos, payload: &Value, _| {
//!         todos.push(payload.as_str().unwrap_or_default().to_string());
//!         Ok(true)
//!     })
//!     .build(&dispatcher)?;
//!
//! todos.add_change_listener(|| println!("todos changed"));
//!
//! let actions = ActionCreator::new(&dispatcher, "TodoActions")?;
//! actions.dispatch("ADD", json!("milk"))?;
//!
//! // listeners run on the next tick
//! dispatcher.run_pending();
//! ```
//!
//! # Waiting for other stores
//!
//! A handler that depends on another store's update calls `wait_for` with that
//! store's token before reading it:
//!
//! ```ignore
//! let totals = Store::builder("Totals", || 0usize)
//!     .bind("ADD", {
//!         let todos = todos.clone();
//!         move |total, _, cx| {
//!             cx.wait_for([todos.token()])?;
//!             *total = todos.read("len", Vec::len)?;
//!             Ok(true)
//!         }
//!     })
//!     .build(&dispatcher)?;
//! ```

pub mod action;
pub mod config;
pub mod constants;
pub mod context;
pub mod creator;
pub mod dispatcher;
pub mod error;
pub mod graph;
pub mod notify;
pub mod observer;
pub mod registry;
pub mod store;
pub mod testing;

// Action exports
pub use action::{Action, ActionId, ActionType};
pub use constants::{Constant, ConstantCollection};
pub use creator::ActionCreator;

// Dispatcher exports
pub use config::{DispatcherConfig, SnapshotScope};
pub use context::{Context, ContextStack};
pub use dispatcher::{Callback, Dispatcher, Token};
pub use error::{FluxError, Result};
pub use registry::NameRegistry;

// Store exports
pub use graph::{GraphNode, StoreGraph};
pub use store::{Handler, HandlerContext, Store, StoreBuilder, StoreId, StoreNode, StoreRef};

// Notification exports
#[cfg(feature = "local-tasks")]
pub use notify::LocalTaskScheduler;
pub use notify::{ChangeBatch, Listener, Scheduler, Task, TickQueue};

// Observer exports
pub use observer::{
    glob_match, ComposedObserver, DispatchObserver, LoggingObserver, NoopObserver,
    ObserverFilter,
};

// Testing exports
pub use testing::{DispatchRecord, RecordingObserver, StoreTestUtils};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::action::{Action, ActionId, ActionType};
    pub use crate::config::DispatcherConfig;
    pub use crate::constants::{Constant, ConstantCollection};
    pub use crate::context::Context;
    pub use crate::creator::ActionCreator;
    pub use crate::dispatcher::{Dispatcher, Token};
    pub use crate::error::{FluxError, Result};
    #[cfg(feature = "local-tasks")]
    pub use crate::notify::LocalTaskScheduler;
    pub use crate::notify::{Listener, Scheduler, TickQueue};
    pub use crate::observer::{DispatchObserver, LoggingObserver};
    pub use crate::store::{HandlerContext, Store};
}
