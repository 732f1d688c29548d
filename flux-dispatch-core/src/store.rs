//! Stores: private state, bound handlers and change listeners
//!
//! A [`Store`] owns a piece of state that can only be changed by the handlers
//! bound to it at build time. Handlers run when the dispatcher delivers an action
//! whose source or type they were bound to, and report whether they changed the
//! state. Reading goes through [`Store::read`], which in development mode also
//! verifies that the accessor left the state untouched.
//!
//! ```ignore
//! let todos = Store::builder("Todos", Vec::<String>::new)
//!     .bind("ADD", |todos, payload: &Value, _| {
//!         todos.push(payload.to_string());
//!         Ok(true)
//!     })
//!     .build(&dispatcher)?;
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::action::{Action, ActionId};
use crate::context::{Context, ContextStack};
use crate::dispatcher::{Dispatcher, Token};
use crate::error::{FluxError, Result};
use crate::graph::GraphNode;
use crate::notify::Listener;

static NEXT_STORE: AtomicU64 = AtomicU64::new(1);

/// Process-unique store identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u64);

impl StoreId {
    fn next() -> Self {
        Self(NEXT_STORE.fetch_add(1, Ordering::Relaxed))
    }
}

/// A bound handler: mutate the state for this payload, return whether it changed.
pub type Handler<S, P> = dyn FnMut(&mut S, &P, &HandlerContext<'_, P>) -> Result<bool>;

/// Replacement for a named accessor, installed by
/// [`StoreTestUtils::mock_accessor`](crate::testing::StoreTestUtils::mock_accessor).
pub(crate) type AccessorMock<S> = Rc<dyn Fn(&S) -> Box<dyn Any>>;

/// Type-erased view of a store, as seen by the store graph and change batch.
pub trait StoreNode {
    fn store_id(&self) -> StoreId;
    fn display_name(&self) -> &str;
    fn token(&self) -> Token;
    fn children(&self) -> Vec<Rc<dyn StoreNode>>;
    fn listeners(&self) -> Vec<Listener>;

    /// Stop listing the store `id` as a child.
    fn release_child(&self, id: StoreId);
}

/// Weak graph handle to a store.
#[derive(Clone)]
pub struct StoreRef {
    id: StoreId,
    node: Weak<dyn StoreNode>,
}

impl StoreRef {
    pub fn new(node: &Rc<dyn StoreNode>) -> Self {
        Self {
            id: node.store_id(),
            node: Rc::downgrade(node),
        }
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn upgrade(&self) -> Option<Rc<dyn StoreNode>> {
        self.node.upgrade()
    }
}

impl fmt::Debug for StoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(node) => write!(f, "StoreRef({:?}, {:?})", self.id, node.display_name()),
            None => write!(f, "StoreRef({:?}, dropped)", self.id),
        }
    }
}

impl GraphNode for StoreRef {
    type Id = StoreId;

    fn node_id(&self) -> StoreId {
        self.id
    }

    fn child_nodes(&self) -> Vec<Self> {
        self.upgrade()
            .map(|node| node.children().iter().map(StoreRef::new).collect())
            .unwrap_or_default()
    }
}

/// What a handler can see besides the state and payload.
pub struct HandlerContext<'a, P> {
    dispatcher: Option<&'a Dispatcher<P>>,
    store: &'a str,
    action: &'a Action<P>,
}

impl<P: Serialize + 'static> HandlerContext<'_, P> {
    /// Run other callbacks (usually other stores' tokens) first.
    ///
    /// A no-op under [`StoreTestUtils::mock_dispatch`](crate::testing::StoreTestUtils::mock_dispatch).
    pub fn wait_for(&self, tokens: impl IntoIterator<Item = Token>) -> Result<()> {
        match self.dispatcher {
            Some(dispatcher) => dispatcher.wait_for(tokens),
            None => Ok(()),
        }
    }

    /// The full action being handled
    pub fn action(&self) -> &Action<P> {
        self.action
    }

    pub fn store_name(&self) -> &str {
        self.store
    }

    /// Build a [`FluxError::Handler`] naming this store.
    pub fn fail(&self, message: impl Into<String>) -> FluxError {
        FluxError::handler(self.store, message)
    }
}

struct StoreInner<S, P> {
    id: StoreId,
    name: String,
    token: Token,
    init: Box<dyn Fn() -> S>,
    state: RefCell<S>,
    handlers: RefCell<IndexMap<ActionId, Box<Handler<S, P>>>>,
    listeners: RefCell<IndexSet<Listener>>,
    children: RefCell<Vec<Rc<dyn StoreNode>>>,
    mocks: RefCell<IndexMap<String, AccessorMock<S>>>,
    dispatcher: Dispatcher<P>,
}

impl<S, P> Drop for StoreInner<S, P> {
    fn drop(&mut self) {
        trace!(store = %self.name, "Dropping store");
        self.dispatcher.forget_store(self.id, self.token, &self.name);
    }
}

impl<S: Serialize + 'static, P: Serialize + 'static> StoreInner<S, P> {
    fn context(&self) -> &ContextStack {
        self.dispatcher.context()
    }

    fn busy(&self) -> FluxError {
        FluxError::StoreBusy {
            store: self.name.clone(),
        }
    }

    /// Run the handlers bound to the action's source and type.
    fn handle(&self, dispatcher: Option<&Dispatcher<P>>, action: &Action<P>) -> Result<bool> {
        let mut changed = false;
        if let Some(source) = action.source() {
            if source != action.action_type() {
                changed |= self.run(source, dispatcher, action)?;
            }
        }
        changed |= self.run(action.action_type(), dispatcher, action)?;
        Ok(changed)
    }

    fn run(
        &self,
        id: &ActionId,
        dispatcher: Option<&Dispatcher<P>>,
        action: &Action<P>,
    ) -> Result<bool> {
        let mut handlers = self.handlers.try_borrow_mut().map_err(|_| self.busy())?;
        let Some(handler) = handlers.get_mut(id) else {
            return Ok(false);
        };

        self.context().allow(
            "store:handler",
            Context::DISPATCHER_DISPATCH | Context::STORE_HANDLER,
        )?;
        self.context().push(Context::STORE_HANDLER, || {
            let mut state = self.state.try_borrow_mut().map_err(|_| self.busy())?;
            let cx = HandlerContext {
                dispatcher,
                store: &self.name,
                action,
            };
            let changed = handler(&mut *state, action.payload(), &cx)?;
            trace!(store = %self.name, action = %id, changed, "Handled action");
            Ok(changed)
        })
    }
}

impl<S: 'static, P: 'static> StoreNode for StoreInner<S, P> {
    fn store_id(&self) -> StoreId {
        self.id
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn token(&self) -> Token {
        self.token
    }

    fn children(&self) -> Vec<Rc<dyn StoreNode>> {
        self.children.borrow().clone()
    }

    fn listeners(&self) -> Vec<Listener> {
        self.listeners.borrow().iter().cloned().collect()
    }

    fn release_child(&self, id: StoreId) {
        self.children.borrow_mut().retain(|child| child.store_id() != id);
    }
}

/// Builder returned by [`Store::builder`].
pub struct StoreBuilder<S, P> {
    name: String,
    init: Box<dyn Fn() -> S>,
    bindings: Vec<(ActionId, Box<Handler<S, P>>)>,
    children: Vec<Rc<dyn StoreNode>>,
}

impl<S: Serialize + 'static, P: Serialize + 'static> StoreBuilder<S, P> {
    /// Bind `handler` to an action type or source.
    pub fn bind<F>(mut self, action: impl Into<ActionId>, handler: F) -> Self
    where
        F: FnMut(&mut S, &P, &HandlerContext<'_, P>) -> Result<bool> + 'static,
    {
        self.bindings.push((action.into(), Box::new(handler)));
        self
    }

    /// Bind a reducer: it returns the next state instead of editing in place.
    ///
    /// The store counts as changed when the next state differs from the
    /// current one.
    pub fn bind_reducer<F>(self, action: impl Into<ActionId>, mut reducer: F) -> Self
    where
        S: PartialEq,
        F: FnMut(&S, &P, &HandlerContext<'_, P>) -> Result<S> + 'static,
    {
        self.bind(action, move |state, payload, cx| {
            let next = reducer(&*state, payload, cx)?;
            let changed = next != *state;
            *state = next;
            Ok(changed)
        })
    }

    /// Bind several pre-boxed handlers at once.
    pub fn bind_actions<I>(mut self, bindings: I) -> Self
    where
        I: IntoIterator<Item = (ActionId, Box<Handler<S, P>>)>,
    {
        self.bindings.extend(bindings);
        self
    }

    /// Make `child` a dependency of this store: child changes notify this
    /// store's listeners too.
    pub fn child<C: Serialize + 'static>(mut self, child: &Store<C, P>) -> Self {
        self.children.push(child.node());
        self
    }

    /// Validate the bindings, register with `dispatcher`, and add the store to
    /// its graph.
    pub fn build(self, dispatcher: &Dispatcher<P>) -> Result<Store<S, P>> {
        let StoreBuilder {
            name,
            init,
            bindings,
            children,
        } = self;

        if name.trim().is_empty() {
            return Err(FluxError::MissingDisplayName);
        }

        let mut handlers: IndexMap<ActionId, Box<Handler<S, P>>> = IndexMap::new();
        for (action, handler) in bindings {
            if !action.is_recognizable() {
                return Err(FluxError::InvalidBinding {
                    store: name,
                    action: action.to_string(),
                });
            }
            if handlers.contains_key(&action) {
                return Err(FluxError::DuplicateBinding {
                    store: name,
                    action: action.to_string(),
                });
            }
            handlers.insert(action, handler);
        }

        dispatcher.registry().claim_store(&name)?;

        if handlers.is_empty() {
            warn!(store = %name, "Store built without any bound actions");
        }
        let interests: Vec<ActionId> = handlers.keys().cloned().collect();
        for action in &interests {
            dispatcher.notify_bound(&name, action);
        }

        let state = RefCell::new(init());
        let inner = Rc::new_cyclic(|this: &Weak<StoreInner<S, P>>| {
            let this = this.clone();
            let token = dispatcher.register(
                move |dispatcher: &Dispatcher<P>, action: &Action<P>| {
                    let Some(store) = this.upgrade() else {
                        return Ok(());
                    };
                    if store.handle(Some(dispatcher), action)? {
                        dispatcher.mark_changed(store.id);
                    }
                    Ok(())
                },
                interests,
            );

            StoreInner {
                id: StoreId::next(),
                name,
                token,
                init,
                state,
                handlers: RefCell::new(handlers),
                listeners: RefCell::new(IndexSet::new()),
                children: RefCell::new(children),
                mocks: RefCell::new(IndexMap::new()),
                dispatcher: dispatcher.clone(),
            }
        });

        let store = Store { inner };
        dispatcher.add_store(&store.node());
        debug!(store = %store, token = %store.token(), "Built store");
        Ok(store)
    }
}

/// Handle to a registered store. Clones share the same state.
///
/// Dropping the last handle unregisters the store, frees its display name and
/// removes it from the store graph. A parent keeps its children alive.
pub struct Store<S, P = serde_json::Value> {
    inner: Rc<StoreInner<S, P>>,
}

impl<S, P> Clone for Store<S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S, P> fmt::Display for Store<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Store {}]", self.inner.name)
    }
}

impl<S, P> fmt::Debug for Store<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("token", &self.inner.token)
            .finish()
    }
}

impl<S: Serialize + 'static, P: Serialize + 'static> Store<S, P> {
    /// Start building a store whose initial state comes from `init`.
    pub fn builder(name: impl Into<String>, init: impl Fn() -> S + 'static) -> StoreBuilder<S, P> {
        StoreBuilder {
            name: name.into(),
            init: Box::new(init),
            bindings: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    pub fn display_name(&self) -> &str {
        &self.inner.name
    }

    /// Dispatcher token, for [`HandlerContext::wait_for`].
    pub fn token(&self) -> Token {
        self.inner.token
    }

    /// Forward to [`Dispatcher::wait_for`].
    pub fn wait_for(&self, tokens: impl IntoIterator<Item = Token>) -> Result<()> {
        self.inner.dispatcher.wait_for(tokens)
    }

    /// Run the accessor `f` against the current state.
    ///
    /// Allowed from outside any operation, from views, from other accessors and
    /// from handlers. In development mode the state is serialized before and
    /// after `f`; any difference fails with [`FluxError::AccessorMutation`].
    pub fn read<R: 'static>(&self, accessor: &str, f: impl FnOnce(&S) -> R) -> Result<R> {
        let inner = &self.inner;
        inner.context().allow(
            "store:accessor",
            Context::EMPTY
                | Context::VIEW_GET_STATE
                | Context::STORE_ACCESSOR
                | Context::STORE_HANDLER,
        )?;

        inner.context().push(Context::STORE_ACCESSOR, || {
            let state = inner.state.try_borrow().map_err(|_| inner.busy())?;
            let mock = inner.mocks.borrow().get(accessor).cloned();
            let run = |state: &S| match mock {
                Some(mock) => mock(state).downcast::<R>().map(|result| *result).map_err(|_| {
                    FluxError::MockTypeMismatch {
                        store: inner.name.clone(),
                        accessor: accessor.to_string(),
                    }
                }),
                None => Ok(f(state)),
            };
            if !inner.dispatcher.config().check_mutations {
                return run(&*state);
            }

            let before = snapshot(&*state);
            let result = run(&*state)?;
            if snapshot(&*state) != before {
                return Err(FluxError::AccessorMutation {
                    store: inner.name.clone(),
                    accessor: accessor.to_string(),
                });
            }
            Ok(result)
        })
    }

    /// Add a listener built from `f`; keep the returned handle to remove it.
    pub fn add_change_listener(&self, f: impl Fn() + 'static) -> Listener {
        let listener = Listener::new(f);
        self.add_listener(listener.clone());
        listener
    }

    /// Add an existing listener. Returns `false` if it was already present.
    pub fn add_listener(&self, listener: Listener) -> bool {
        self.inner.listeners.borrow_mut().insert(listener)
    }

    pub fn remove_change_listener(&self, listener: &Listener) -> bool {
        self.inner.listeners.borrow_mut().shift_remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Add `child` as a dependency after the store was built.
    pub fn adopt<C: Serialize + 'static>(&self, child: &Store<C, P>) {
        {
            let mut children = self.inner.children.borrow_mut();
            if children.iter().any(|c| c.store_id() == child.id()) {
                return;
            }
            children.push(child.node());
        }
        self.inner.dispatcher.add_store(&self.node());
        debug!(store = %self, child = %child, "Adopted child store");
    }

    /// Unregister from the dispatcher and leave the store graph.
    ///
    /// The display name becomes available again and parents stop listing this
    /// store as a child. Children stay registered and keep their other parents.
    pub fn detach(&self) -> Result<()> {
        let dispatcher = &self.inner.dispatcher;
        dispatcher.unregister(self.inner.token)?;
        dispatcher.remove_store(&self.node());
        dispatcher.registry().release_store(&self.inner.name);
        debug!(store = %self, "Detached store");
        Ok(())
    }

    /// Type-erased handle for graph operations
    pub fn node(&self) -> Rc<dyn StoreNode> {
        Rc::clone(&self.inner) as Rc<dyn StoreNode>
    }

    pub fn dispatcher(&self) -> &Dispatcher<P> {
        &self.inner.dispatcher
    }

    /// Run the bound handlers outside a real dispatch (no `wait_for`, no graph
    /// propagation).
    pub(crate) fn handle_detached(&self, action: &Action<P>) -> Result<bool> {
        self.inner
            .context()
            .push(Context::DISPATCHER_DISPATCH, || self.inner.handle(None, action))
    }

    pub(crate) fn reset_state(&self) -> Result<()> {
        let mut state = self
            .inner
            .state
            .try_borrow_mut()
            .map_err(|_| self.inner.busy())?;
        *state = (self.inner.init)();
        Ok(())
    }

    pub(crate) fn set_mock(&self, accessor: &str, mock: AccessorMock<S>) {
        self.inner
            .mocks
            .borrow_mut()
            .insert(accessor.to_string(), mock);
    }

    pub(crate) fn clear_mocks(&self) {
        self.inner.mocks.borrow_mut().clear();
    }
}

fn snapshot<S: Serialize + ?Sized>(state: &S) -> String {
    serde_json::to_string(state).unwrap_or_else(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatcherConfig;
    use serde_json::{json, Value};
    use std::cell::Cell;

    fn counter(dispatcher: &Dispatcher, name: &str) -> Store<i64> {
        Store::builder(name.to_string(), || 0)
            .bind("INC", |count: &mut i64, _, _| {
                *count += 1;
                Ok(true)
            })
            .bind("NOOP", |_, _, _| Ok(false))
            .build(dispatcher)
            .unwrap()
    }

    fn count(store: &Store<i64>) -> i64 {
        store.read("count", |c| *c).unwrap()
    }

    #[test]
    fn test_build_validation() {
        let dispatcher: Dispatcher = Dispatcher::new();

        let err = Store::<i64>::builder("  ", || 0).build(&dispatcher).unwrap_err();
        assert_eq!(err, FluxError::MissingDisplayName);

        let err = Store::<i64>::builder("Dup", || 0)
            .bind("A", |_, _, _| Ok(false))
            .bind("A", |_, _, _| Ok(false))
            .build(&dispatcher)
            .unwrap_err();
        assert!(matches!(err, FluxError::DuplicateBinding { .. }));

        let err = Store::<i64>::builder("Blank", || 0)
            .bind("", |_, _, _| Ok(false))
            .build(&dispatcher)
            .unwrap_err();
        assert!(matches!(err, FluxError::InvalidBinding { .. }));

        // failed builds do not reserve the name
        let _dup = counter(&dispatcher, "Dup");
        let err = Store::<i64>::builder("Dup", || 0).build(&dispatcher).unwrap_err();
        assert_eq!(err, FluxError::DuplicateDisplayName("Dup".into()));
    }

    #[test]
    fn test_handlers_update_state() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let store = counter(&dispatcher, "Counter");

        dispatcher.dispatch(Action::new("INC", Value::Null)).unwrap();
        dispatcher.dispatch(Action::new("INC", Value::Null)).unwrap();
        dispatcher.dispatch(Action::new("OTHER", Value::Null)).unwrap();

        assert_eq!(count(&store), 2);
        assert_eq!(store.to_string(), "[Store Counter]");
    }

    #[test]
    fn test_handler_bound_to_source() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let store = Store::builder("Sourced", Vec::new)
            .bind("TodoActions", |seen: &mut Vec<String>, _, cx| {
                seen.push(cx.action().action_type().to_string());
                Ok(true)
            })
            .build(&dispatcher)
            .unwrap();

        dispatcher
            .dispatch(Action::new("ADD", Value::Null).with_source("TodoActions"))
            .unwrap();
        dispatcher
            .dispatch(Action::new("ADD", Value::Null).with_source("UserActions"))
            .unwrap();

        assert_eq!(store.read("seen", Clone::clone).unwrap(), ["ADD"]);
    }

    #[test]
    fn test_listeners_batched_per_tick() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let store = counter(&dispatcher, "Counter");
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        store.add_change_listener(move || seen.set(seen.get() + 1));

        dispatcher.dispatch(Action::new("INC", Value::Null)).unwrap();
        dispatcher.dispatch(Action::new("INC", Value::Null)).unwrap();
        assert_eq!(calls.get(), 0);
        assert!(dispatcher.change_batch().is_pending());

        dispatcher.run_pending();
        assert_eq!(calls.get(), 1);

        dispatcher.dispatch(Action::new("NOOP", Value::Null)).unwrap();
        dispatcher.run_pending();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_listener_removed_before_flush_is_skipped() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let store = counter(&dispatcher, "Counter");
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        let listener = store.add_change_listener(move || seen.set(seen.get() + 1));

        dispatcher.dispatch(Action::new("INC", Value::Null)).unwrap();
        assert!(store.remove_change_listener(&listener));
        dispatcher.run_pending();

        assert_eq!(calls.get(), 0);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_listeners_can_read_state() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let store = counter(&dispatcher, "Counter");
        let last = Rc::new(Cell::new(0));

        let view = store.clone();
        let sink = Rc::clone(&last);
        store.add_change_listener(move || sink.set(view.read("count", |c| *c).unwrap()));

        dispatcher.dispatch(Action::new("INC", Value::Null)).unwrap();
        dispatcher.run_pending();
        assert_eq!(last.get(), 1);
    }

    #[test]
    fn test_read_from_render_is_illegal() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let store = counter(&dispatcher, "Counter");

        let err = dispatcher
            .context()
            .push(Context::VIEW_RENDER, || store.read("count", |c| *c))
            .unwrap_err();
        assert!(matches!(err, FluxError::IllegalState { .. }));
    }

    #[derive(Serialize)]
    struct Hits {
        hits: Cell<u32>,
    }

    #[test]
    fn test_accessor_mutation_detected() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let store = Store::builder("Hits", || Hits { hits: Cell::new(0) })
            .bind("NOOP", |_, _, _| Ok(false))
            .build(&dispatcher)
            .unwrap();

        let err = store
            .read("touch", |s| s.hits.set(s.hits.get() + 1))
            .unwrap_err();
        assert_eq!(
            err,
            FluxError::AccessorMutation {
                store: "Hits".into(),
                accessor: "touch".into(),
            }
        );
    }

    #[test]
    fn test_accessor_mutation_ignored_in_production() {
        let dispatcher: Dispatcher = Dispatcher::with_config(DispatcherConfig::production());
        let store = Store::builder("Hits", || Hits { hits: Cell::new(0) })
            .bind("NOOP", |_, _, _| Ok(false))
            .build(&dispatcher)
            .unwrap();

        store.read("touch", |s| s.hits.set(1)).unwrap();
        assert_eq!(store.read("hits", |s| s.hits.get()).unwrap(), 1);
    }

    #[test]
    fn test_own_state_unreadable_from_handler() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let slot: Rc<RefCell<Option<Store<i64>>>> = Rc::default();
        let me = Rc::clone(&slot);

        let store = Store::builder("SelfReader", || 0)
            .bind("PEEK", move |_: &mut i64, _, _| {
                let store = me.borrow().clone();
                match store {
                    Some(store) => store.read("self", |c| *c).map(|_| false),
                    None => Ok(false),
                }
            })
            .build(&dispatcher)
            .unwrap();
        *slot.borrow_mut() = Some(store);

        let err = dispatcher.dispatch(Action::new("PEEK", Value::Null)).unwrap_err();
        assert_eq!(
            err,
            FluxError::StoreBusy {
                store: "SelfReader".into()
            }
        );
    }

    #[test]
    fn test_wait_for_other_store() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let seen = Rc::new(Cell::new(-1));
        let sink = Rc::clone(&seen);

        // registered first, so it would run first without wait_for
        let slot: Rc<RefCell<Option<Store<i64>>>> = Rc::default();
        let dependency = Rc::clone(&slot);
        let _reader = Store::builder("Reader", || 0)
            .bind("INC", move |_: &mut i64, _, cx| {
                let Some(counter) = dependency.borrow().clone() else {
                    return Ok(false);
                };
                cx.wait_for([counter.token()])?;
                sink.set(counter.read("count", |c| *c)?);
                Ok(false)
            })
            .build(&dispatcher)
            .unwrap();
        *slot.borrow_mut() = Some(counter(&dispatcher, "Counter"));

        dispatcher.dispatch(Action::new("INC", json!(null))).unwrap();
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn test_child_changes_notify_parent_after_child() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let child = counter(&dispatcher, "Child");
        let parent = Store::<i64>::builder("Parent", || 0)
            .bind("OTHER", |_, _, _| Ok(false))
            .child(&child)
            .build(&dispatcher)
            .unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
        let child_log = Rc::clone(&log);
        parent.add_change_listener({
            let log = Rc::clone(&log);
            move || log.borrow_mut().push("parent")
        });
        child.add_change_listener(move || child_log.borrow_mut().push("child"));

        dispatcher.dispatch(Action::new("INC", Value::Null)).unwrap();
        dispatcher.run_pending();
        assert_eq!(*log.borrow(), ["child", "parent"]);

        // parent changes alone do not reach the child
        log.borrow_mut().clear();
        dispatcher.dispatch(Action::new("NOOP", Value::Null)).unwrap();
        dispatcher.run_pending();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_detach() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let child = counter(&dispatcher, "Child");
        let parent = Store::<i64>::builder("Parent", || 0)
            .bind("OTHER", |_, _, _| Ok(false))
            .child(&child)
            .build(&dispatcher)
            .unwrap();
        assert_eq!(dispatcher.graph().len(), 2);

        parent.detach().unwrap();
        assert!(!dispatcher.is_registered(parent.token()));
        assert_eq!(dispatcher.graph().len(), 1);
        assert!(dispatcher.graph().contains(child.id()));
        assert!(parent.detach().is_err());

        // name is free again
        let _parent = counter(&dispatcher, "Parent");
    }

    #[test]
    fn test_adopt_links_existing_stores() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let parent = counter(&dispatcher, "Parent");
        let child = counter(&dispatcher, "Child");

        parent.adopt(&child);
        parent.adopt(&child);

        let graph = dispatcher.graph();
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.parents_of(child.id()).collect::<Vec<_>>(), [parent.id()]);
    }

    #[test]
    fn test_handler_failure_names_store() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let _strict = Store::<i64>::builder("Strict", || 0)
            .bind("BAD", |_, _, cx| Err(cx.fail("rejected")))
            .build(&dispatcher)
            .unwrap();

        let err = dispatcher.dispatch(Action::new("BAD", Value::Null)).unwrap_err();
        assert_eq!(err, FluxError::handler("Strict", "rejected"));
    }

    fn parent_of(dispatcher: &Dispatcher, name: &str, child: &Store<i64>) -> Store<i64> {
        Store::builder(name.to_string(), || 0)
            .bind("OTHER", |_: &mut i64, _, _| Ok(false))
            .child(child)
            .build(dispatcher)
            .unwrap()
    }

    fn log_listener(store: &Store<i64>, log: &Rc<RefCell<Vec<String>>>) {
        let log = Rc::clone(log);
        let name = store.display_name().to_string();
        store.add_change_listener(move || log.borrow_mut().push(name.clone()));
    }

    #[test]
    fn test_detach_keeps_shared_child_wired_to_other_parent() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let child = counter(&dispatcher, "Child");
        let first = parent_of(&dispatcher, "P1", &child);
        let second = parent_of(&dispatcher, "P2", &child);
        assert_eq!(
            dispatcher.graph().parents_of(child.id()).collect::<Vec<_>>(),
            [first.id(), second.id()]
        );

        first.detach().unwrap();
        assert_eq!(
            dispatcher.graph().parents_of(child.id()).collect::<Vec<_>>(),
            [second.id()]
        );

        let log = Rc::new(RefCell::new(Vec::new()));
        log_listener(&first, &log);
        log_listener(&second, &log);
        dispatcher.dispatch(Action::new("INC", Value::Null)).unwrap();
        dispatcher.run_pending();
        assert_eq!(*log.borrow(), ["P2"]);
    }

    #[test]
    fn test_detached_child_leaves_its_parent() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let child = counter(&dispatcher, "Child");
        let parent = parent_of(&dispatcher, "Parent", &child);

        child.detach().unwrap();
        assert!(parent.node().children().is_empty());
        assert_eq!(dispatcher.graph().len(), 1);

        // re-adding the parent does not pull the detached child back in
        let other = counter(&dispatcher, "Other");
        parent.adopt(&other);
        assert!(!dispatcher.graph().contains(child.id()));
    }

    #[test]
    fn test_failed_dispatch_notifies_nobody() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let store = counter(&dispatcher, "Counter");
        dispatcher.register(|_, _| Err(FluxError::handler("Later", "boom")), ["INC"]);

        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        store.add_change_listener(move || seen.set(seen.get() + 1));

        assert!(dispatcher.dispatch(Action::new("INC", Value::Null)).is_err());
        assert!(!dispatcher.change_batch().is_pending());
        dispatcher.run_pending();

        // the handler did run; only the notification is withheld
        assert_eq!(count(&store), 1);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_dropping_last_handle_unregisters() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let store = counter(&dispatcher, "Counter");
        let (id, token) = (store.id(), store.token());
        let copy = store.clone();

        drop(store);
        assert!(dispatcher.is_registered(token));

        drop(copy);
        assert!(!dispatcher.is_registered(token));
        assert!(!dispatcher.graph().contains(id));
        // name is free again
        let _again = counter(&dispatcher, "Counter");
    }

    #[test]
    fn test_parent_keeps_child_alive() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let child = counter(&dispatcher, "Child");
        let token = child.token();
        let parent = parent_of(&dispatcher, "Parent", &child);

        drop(child);
        assert!(dispatcher.is_registered(token));

        drop(parent);
        assert!(!dispatcher.is_registered(token));
        assert!(dispatcher.graph().is_empty());
    }

    #[test]
    fn test_drop_after_detach_keeps_reused_name() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let old = counter(&dispatcher, "Counter");
        old.detach().unwrap();
        let new = counter(&dispatcher, "Counter");

        drop(old);
        assert_eq!(
            Store::<i64>::builder("Counter", || 0).build(&dispatcher).unwrap_err(),
            FluxError::DuplicateDisplayName("Counter".into())
        );
        assert!(dispatcher.is_registered(new.token()));
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Todos {
        items: Vec<String>,
    }

    #[test]
    fn test_reducer_replaces_state() {
        let dispatcher: Dispatcher = Dispatcher::new();
        let store = Store::builder("Todos", || Todos { items: Vec::new() })
            .bind_reducer("ADD", |todos: &Todos, payload: &Value, _| {
                let mut items = todos.items.clone();
                items.push(payload.as_str().unwrap_or_default().to_string());
                Ok(Todos { items })
            })
            .bind_reducer("SAME", |todos: &Todos, _, _| Ok(todos.clone()))
            .build(&dispatcher)
            .unwrap();

        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        store.add_change_listener(move || seen.set(seen.get() + 1));

        dispatcher.dispatch(Action::new("ADD", json!("milk"))).unwrap();
        dispatcher.run_pending();
        assert_eq!(store.read("items", |t| t.items.clone()).unwrap(), ["milk"]);
        assert_eq!(calls.get(), 1);

        // an equal state is not a change
        dispatcher.dispatch(Action::new("SAME", Value::Null)).unwrap();
        dispatcher.run_pending();
        assert_eq!(calls.get(), 1);
    }
}
