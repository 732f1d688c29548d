//! Call-stack guard for legal operation nesting
//!
//! Store handlers can indirectly trigger further dispatcher operations. The
//! [`ContextStack`] records which kind of operation is currently running so that
//! illegal nestings (dispatching from inside a handler, reading a store from a
//! render) are rejected immediately instead of by convention.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;

use crate::error::{FluxError, Result};

bitflags! {
    /// Operation labels tracked by the [`ContextStack`].
    ///
    /// Each entry pushed on the stack is a single label. Allow-sets passed to
    /// [`ContextStack::allow`] are unions of labels.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Context: u8 {
        /// Nothing is running
        const EMPTY = 1 << 0;
        /// An action creator is dispatching
        const ACTION_DISPATCH = 1 << 1;
        /// The dispatcher is delivering an action
        const DISPATCHER_DISPATCH = 1 << 2;
        /// A store handler is running
        const STORE_HANDLER = 1 << 3;
        /// A store accessor is running
        const STORE_ACCESSOR = 1 << 4;
        /// A view is pulling state from stores
        const VIEW_GET_STATE = 1 << 5;
        /// A view is rendering
        const VIEW_RENDER = 1 << 6;
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        f.write_str(&names.join(", "))
    }
}

/// Single-threaded stack of [`Context`] labels.
///
/// Cloning yields another handle onto the same stack.
#[derive(Debug, Clone, Default)]
pub struct ContextStack {
    stack: Rc<RefCell<Vec<Context>>>,
}

impl ContextStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// The label on top of the stack, or [`Context::EMPTY`].
    pub fn current(&self) -> Context {
        self.stack
            .borrow()
            .last()
            .copied()
            .unwrap_or(Context::EMPTY)
    }

    /// Number of labels currently pushed
    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Push `ctx`, run `f`, and pop again.
    ///
    /// The label is popped on every exit path, including unwinding.
    pub fn push<R>(&self, ctx: Context, f: impl FnOnce() -> R) -> R {
        debug_assert_eq!(ctx.bits().count_ones(), 1, "push a single context label");
        self.stack.borrow_mut().push(ctx);
        let _guard = PopGuard { stack: &self.stack };
        f()
    }

    /// Fail with [`FluxError::IllegalState`] unless the current label is in `valid`.
    pub fn allow(&self, operation: &str, valid: Context) -> Result<()> {
        if valid.is_empty() {
            return Err(FluxError::EmptyAllowSet(operation.to_string()));
        }

        let current = self.current();
        if valid.contains(current) {
            Ok(())
        } else {
            Err(FluxError::IllegalState {
                operation: operation.to_string(),
                current: current.to_string(),
                allowed: valid.to_string(),
            })
        }
    }
}

struct PopGuard<'a> {
    stack: &'a RefCell<Vec<Context>>,
}

impl Drop for PopGuard<'_> {
    fn drop(&mut self) {
        self.stack.borrow_mut().pop();
    }
}
