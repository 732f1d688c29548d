//! Test utilities for flux-dispatch applications
//!
//! - [`RecordingObserver`]: records every dispatch for later assertions
//! - [`StoreTestUtils`]: drive a single store without a real dispatch
//! - Assertion macros over recorded action types
//!
//! # Example
//!
//! ```ignore
//! use flux_dispatch::testing::RecordingObserver;
//! use flux_dispatch::assert_dispatched;
//!
//! let recorder = RecordingObserver::new();
//! dispatcher.add_observer(recorder.clone());
//!
//! creator.dispatch("ADD", json!("milk"))?;
//! assert_dispatched!(recorder, "ADD");
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use crate::action::{Action, ActionId};
use crate::error::{FluxError, Result};
use crate::observer::DispatchObserver;
use crate::store::{Store, StoreRef};

/// One finished dispatch.
#[derive(Debug, Clone)]
pub struct DispatchRecord<P> {
    pub action: Action<P>,
    /// The error the dispatch returned, if any
    pub error: Option<FluxError>,
}

/// Observer that keeps every finished dispatch.
///
/// Clones share the same log, so keep one clone and hand the other to
/// [`Dispatcher::add_observer`](crate::Dispatcher::add_observer).
#[derive(Debug)]
pub struct RecordingObserver<P> {
    records: Rc<RefCell<Vec<DispatchRecord<P>>>>,
}

impl<P> Clone for RecordingObserver<P> {
    fn clone(&self) -> Self {
        Self {
            records: Rc::clone(&self.records),
        }
    }
}

impl<P> Default for RecordingObserver<P> {
    fn default() -> Self {
        Self {
            records: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl<P: Clone> RecordingObserver<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DispatchRecord<P>> {
        self.records.borrow().clone()
    }

    /// Dispatched actions, oldest first
    pub fn actions(&self) -> Vec<Action<P>> {
        self.records
            .borrow()
            .iter()
            .map(|record| record.action.clone())
            .collect()
    }

    /// Types of the dispatched actions, oldest first
    pub fn action_types(&self) -> Vec<ActionId> {
        self.records
            .borrow()
            .iter()
            .map(|record| record.action.action_type().clone())
            .collect()
    }

    /// Errors returned by failed dispatches
    pub fn errors(&self) -> Vec<FluxError> {
        self.records
            .borrow()
            .iter()
            .filter_map(|record| record.error.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.records.borrow_mut().clear();
    }
}

impl<P: Clone> DispatchObserver<P> for RecordingObserver<P> {
    fn before(&mut self, _action: &Action<P>) {}

    fn after(&mut self, action: &Action<P>, outcome: &Result<(), FluxError>) {
        self.records.borrow_mut().push(DispatchRecord {
            action: action.clone(),
            error: outcome.as_ref().err().cloned(),
        });
    }
}

/// Drives one store's handlers directly.
///
/// Obtained from [`Store::test_utils`].
pub struct StoreTestUtils<'a, S, P> {
    store: &'a Store<S, P>,
}

impl<S: Serialize + 'static, P: Serialize + 'static> Store<S, P> {
    pub fn test_utils(&self) -> StoreTestUtils<'_, S, P> {
        StoreTestUtils { store: self }
    }
}

impl<S: Serialize + 'static, P: Serialize + 'static> StoreTestUtils<'_, S, P> {
    /// Run the store's handlers for `action` without the dispatcher.
    ///
    /// `wait_for` is a no-op and parents are not notified; a change still
    /// queues this store's listeners. Returns whether the state changed.
    pub fn mock_dispatch(&self, action: &Action<P>) -> Result<bool> {
        let changed = self.store.handle_detached(action)?;
        if changed {
            self.store
                .dispatcher()
                .change_batch()
                .mark(StoreRef::new(&self.store.node()));
        }
        Ok(changed)
    }

    /// Replace the accessor named `accessor` in every [`Store::read`] call.
    ///
    /// The mock sees the real state. Reads expecting another return type fail
    /// with [`FluxError::MockTypeMismatch`].
    pub fn mock_accessor<R: 'static>(&self, accessor: &str, mock: impl Fn(&S) -> R + 'static) {
        self.store.set_mock(
            accessor,
            Rc::new(move |state: &S| Box::new(mock(state)) as Box<dyn Any>),
        );
    }

    /// Put every mocked accessor back.
    pub fn reset_mocked_accessors(&self) {
        self.store.clear_mocks();
    }

    /// Restore the state produced by the store's initializer and drop mocks.
    pub fn reset(&self) -> Result<()> {
        self.store.reset_state()?;
        self.reset_mocked_accessors();
        Ok(())
    }
}

/// Assert that an action of the given type was dispatched.
///
/// # Example
///
/// ```ignore
/// use flux_dispatch::assert_dispatched;
///
/// assert_dispatched!(recorder, "ADD");
/// assert_dispatched!(recorder, TodoAction::Add);
/// ```
#[macro_export]
macro_rules! assert_dispatched {
    ($recorder:expr, $action_type:expr) => {{
        let expected: $crate::ActionId = ::core::convert::Into::into($action_type);
        let dispatched = $recorder.action_types();
        assert!(
            dispatched.contains(&expected),
            "Expected action `{}` to be dispatched, but got: {:?}",
            expected,
            dispatched
        );
    }};
}

/// Assert that no action of the given type was dispatched.
#[macro_export]
macro_rules! assert_not_dispatched {
    ($recorder:expr, $action_type:expr) => {{
        let unexpected: $crate::ActionId = ::core::convert::Into::into($action_type);
        let dispatched = $recorder.action_types();
        assert!(
            !dispatched.contains(&unexpected),
            "Expected action `{}` NOT to be dispatched, but it was: {:?}",
            unexpected,
            dispatched
        );
    }};
}

/// Count dispatched actions of the given type.
///
/// # Example
///
/// ```ignore
/// use flux_dispatch::count_dispatched;
///
/// assert_eq!(count_dispatched!(recorder, "TICK"), 3);
/// ```
#[macro_export]
macro_rules! count_dispatched {
    ($recorder:expr, $action_type:expr) => {{
        let wanted: $crate::ActionId = ::core::convert::Into::into($action_type);
        $recorder
            .action_types()
            .iter()
            .filter(|id| **id == wanted)
            .count()
    }};
}
