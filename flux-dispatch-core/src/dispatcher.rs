//! Token-based dispatcher
//!
//! Callbacks register with a set of action identifiers they are interested in and
//! get back a [`Token`]. A dispatch delivers the action to every callback
//! interested in its source or its type (plus legacy callbacks, which receive
//! everything), in registration order. A callback may call
//! [`Dispatcher::wait_for`] to run other callbacks first.
//!
//! After delivery the dispatcher walks the [`StoreGraph`] to propagate changes
//! from child stores to their parents, and hands every dirty store to the
//! [`ChangeBatch`] for deferred notification.

use std::cell::{Cell, Ref, RefCell};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::action::{Action, ActionId};
use crate::config::{DispatcherConfig, SnapshotScope};
use crate::context::{Context, ContextStack};
use crate::error::{FluxError, Result};
use crate::graph::{GraphNode, StoreGraph};
use crate::notify::{ChangeBatch, Scheduler, TickQueue};
use crate::observer::DispatchObserver;
use crate::registry::NameRegistry;
use crate::store::{StoreId, StoreNode, StoreRef};

/// Opaque handle to a registered callback.
///
/// Tokens are unique per dispatcher and increase with registration order.
/// Displays as `ID_<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

impl Token {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID_{}", self.0)
    }
}

/// Signature of a registered callback.
pub type Callback<P> = dyn FnMut(&Dispatcher<P>, &Action<P>) -> Result<()>;

struct Registration<P> {
    callback: Rc<RefCell<Callback<P>>>,
    /// `None` for legacy callbacks
    interests: Option<Vec<ActionId>>,
}

struct DispatchState<P> {
    dispatching: bool,
    pending: HashSet<Token>,
    handled: HashSet<Token>,
    in_flight: Option<Rc<Action<P>>>,
    last: Option<Rc<Action<P>>>,
    changed: IndexSet<StoreId>,
}

impl<P> Default for DispatchState<P> {
    fn default() -> Self {
        Self {
            dispatching: false,
            pending: HashSet::new(),
            handled: HashSet::new(),
            in_flight: None,
            last: None,
            changed: IndexSet::new(),
        }
    }
}

struct Inner<P> {
    config: DispatcherConfig,
    context: ContextStack,
    registry: NameRegistry,
    next_token: Cell<u64>,
    callbacks: RefCell<IndexMap<Token, Registration<P>>>,
    interests: RefCell<HashMap<ActionId, BTreeSet<Token>>>,
    legacy: RefCell<BTreeSet<Token>>,
    state: RefCell<DispatchState<P>>,
    graph: RefCell<StoreGraph<StoreRef>>,
    scheduler: Rc<dyn Scheduler>,
    batch: Rc<ChangeBatch>,
    observers: RefCell<Vec<Box<dyn DispatchObserver<P>>>>,
}

/// Routes actions to registered callbacks.
///
/// `Dispatcher` is a cheap handle: clones share the same registry, context stack
/// and store graph. It is single-threaded; every re-entrant call happens on the
/// same call stack.
pub struct Dispatcher<P = serde_json::Value> {
    inner: Rc<Inner<P>>,
}

impl<P> Clone for Dispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: Serialize + 'static> Default for Dispatcher<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for Dispatcher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.inner.config)
            .field("callbacks", &self.inner.callbacks.borrow().len())
            .field("dispatching", &self.inner.state.borrow().dispatching)
            .field("stores", &self.inner.graph.borrow().len())
            .finish()
    }
}

/// Resets the per-dispatch state on every exit path.
struct Dispatching<'a, P> {
    state: &'a RefCell<DispatchState<P>>,
}

impl<P> Drop for Dispatching<'_, P> {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        state.last = state.in_flight.take();
        state.dispatching = false;
    }
}

impl<P> Dispatcher<P> {
    /// Remove a callback. Fails with [`FluxError::UnknownToken`] if absent.
    pub fn unregister(&self, token: Token) -> Result<()> {
        let removed = self
            .inner
            .callbacks
            .borrow_mut()
            .shift_remove(&token)
            .ok_or(FluxError::UnknownToken(token))?;

        match removed.interests {
            Some(ids) => {
                let mut index = self.inner.interests.borrow_mut();
                for id in ids {
                    if let Some(tokens) = index.get_mut(&id) {
                        tokens.remove(&token);
                        if tokens.is_empty() {
                            index.remove(&id);
                        }
                    }
                }
            }
            None => {
                self.inner.legacy.borrow_mut().remove(&token);
            }
        }

        debug!(token = %token, "Unregistered callback");
        Ok(())
    }

    pub fn is_registered(&self, token: Token) -> bool {
        self.inner.callbacks.borrow().contains_key(&token)
    }

    pub fn registry(&self) -> &NameRegistry {
        &self.inner.registry
    }

    /// Drop what is left of a store whose last handle went away.
    ///
    /// The display name is only released if the store was still registered;
    /// a detached store already gave it back.
    pub(crate) fn forget_store(&self, id: StoreId, token: Token, name: &str) {
        if self.unregister(token).is_ok() {
            self.inner.registry.release_store(name);
        }
        if let Ok(mut graph) = self.inner.graph.try_borrow_mut() {
            graph.remove_node(id);
        }
    }
}

impl<P: Serialize + 'static> Dispatcher<P> {
    /// Development-mode dispatcher with a manually drained [`TickQueue`].
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        Self::with_scheduler(config, Rc::new(TickQueue::new()))
    }

    /// Dispatcher whose change notifications are deferred through `scheduler`.
    pub fn with_scheduler(config: DispatcherConfig, scheduler: Rc<dyn Scheduler>) -> Self {
        let context = ContextStack::new();
        let batch = ChangeBatch::new(Rc::clone(&scheduler), context.clone());

        Self {
            inner: Rc::new(Inner {
                config,
                context,
                registry: NameRegistry::new(),
                next_token: Cell::new(1),
                callbacks: RefCell::new(IndexMap::new()),
                interests: RefCell::new(HashMap::new()),
                legacy: RefCell::new(BTreeSet::new()),
                state: RefCell::new(DispatchState::default()),
                graph: RefCell::new(StoreGraph::new()),
                scheduler,
                batch,
                observers: RefCell::new(Vec::new()),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register `callback` for actions whose source or type is in `interests`.
    pub fn register<F, I>(&self, callback: F, interests: I) -> Token
    where
        F: FnMut(&Dispatcher<P>, &Action<P>) -> Result<()> + 'static,
        I: IntoIterator,
        I::Item: Into<ActionId>,
    {
        let interests = interests.into_iter().map(Into::into).collect();
        self.insert(Rc::new(RefCell::new(callback)), Some(interests))
    }

    /// Register `callback` for every action.
    pub fn register_legacy<F>(&self, callback: F) -> Token
    where
        F: FnMut(&Dispatcher<P>, &Action<P>) -> Result<()> + 'static,
    {
        self.insert(Rc::new(RefCell::new(callback)), None)
    }

    fn insert(&self, callback: Rc<RefCell<Callback<P>>>, interests: Option<Vec<ActionId>>) -> Token {
        let token = Token(self.inner.next_token.get());
        self.inner.next_token.set(token.0 + 1);

        match &interests {
            Some(ids) => {
                let mut index = self.inner.interests.borrow_mut();
                for id in ids {
                    index.entry(id.clone()).or_default().insert(token);
                }
            }
            None => {
                self.inner.legacy.borrow_mut().insert(token);
            }
        }

        debug!(token = %token, interests = ?interests, "Registered callback");
        for observer in self.inner.observers.borrow_mut().iter_mut() {
            observer.registered(token, interests.as_deref());
        }

        self.inner
            .callbacks
            .borrow_mut()
            .insert(token, Registration { callback, interests });
        token
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Deliver `action` to every interested callback.
    ///
    /// Errors from callbacks abort delivery and are returned as-is. In
    /// development mode a change to the action's serialized form during delivery
    /// fails with [`FluxError::ActionMutated`].
    ///
    /// A failed dispatch schedules no change notifications, even for stores
    /// whose handlers already ran.
    pub fn dispatch(&self, action: Action<P>) -> Result<()> {
        if self.is_dispatching() {
            return Err(FluxError::AlreadyDispatching);
        }
        self.inner.context.allow(
            "dispatcher:dispatch",
            Context::EMPTY | Context::ACTION_DISPATCH,
        )?;
        if !action.action_type().is_recognizable() {
            return Err(FluxError::InvalidActionType(action.action_type().to_string()));
        }

        let config = self.inner.config;
        let before = if config.check_mutations {
            match snapshot(&action, config.snapshot) {
                Ok(serialized) => Some(serialized),
                Err(message) => {
                    warn!(
                        action_type = %action.action_type(),
                        error = %message,
                        "Action is not serializable; mutation check compares the error instead"
                    );
                    Some(message)
                }
            }
        } else {
            None
        };

        let action = Rc::new(action);
        debug!(
            action_type = %action.action_type(),
            source = ?action.source().map(ToString::to_string),
            "Dispatching action"
        );
        for observer in self.inner.observers.borrow_mut().iter_mut() {
            observer.before(&action);
        }

        let outcome = {
            let _dispatching = self.start(Rc::clone(&action));
            let delivered = self
                .inner
                .context
                .push(Context::DISPATCHER_DISPATCH, || self.deliver(&action));
            delivered.and_then(|()| verify(before, &*action, config.snapshot))
        };

        let changed = std::mem::take(&mut self.inner.state.borrow_mut().changed);
        let outcome = outcome.and_then(|()| self.propagate(changed));

        if let Err(err) = &outcome {
            debug!(action_type = %action.action_type(), error = %err, "Dispatch failed");
        }
        for observer in self.inner.observers.borrow_mut().iter_mut() {
            observer.after(&action, &outcome);
        }
        outcome
    }

    /// Run the callbacks behind `tokens` before continuing the current one.
    ///
    /// Callbacks that already ran during this dispatch are skipped. Waiting on a
    /// callback that is still running fails with
    /// [`FluxError::CircularDependency`].
    pub fn wait_for<I>(&self, tokens: I) -> Result<()>
    where
        I: IntoIterator<Item = Token>,
    {
        if !self.is_dispatching() {
            return Err(FluxError::NotDispatching);
        }

        for token in tokens {
            {
                let state = self.inner.state.borrow();
                if state.pending.contains(&token) {
                    if state.handled.contains(&token) {
                        continue;
                    }
                    warn!(token = %token, "Circular dependency in wait_for");
                    return Err(FluxError::CircularDependency(token));
                }
            }
            if !self.is_registered(token) {
                return Err(FluxError::UnknownToken(token));
            }
            self.invoke(token)?;
        }
        Ok(())
    }

    pub fn is_dispatching(&self) -> bool {
        self.inner.state.borrow().dispatching
    }

    /// The action currently being delivered
    pub fn in_flight(&self) -> Option<Rc<Action<P>>> {
        self.inner.state.borrow().in_flight.clone()
    }

    /// The action in flight, else the last one whose dispatch finished
    pub fn recent_dispatch(&self) -> Option<Rc<Action<P>>> {
        let state = self.inner.state.borrow();
        state.in_flight.clone().or_else(|| state.last.clone())
    }

    fn start(&self, action: Rc<Action<P>>) -> Dispatching<'_, P> {
        let mut state = self.inner.state.borrow_mut();
        state.pending.clear();
        state.handled.clear();
        state.changed.clear();
        state.in_flight = Some(action);
        state.dispatching = true;
        Dispatching {
            state: &self.inner.state,
        }
    }

    fn deliver(&self, action: &Action<P>) -> Result<()> {
        for token in self.targets(action) {
            if self.inner.state.borrow().pending.contains(&token) {
                continue;
            }
            self.invoke(token)?;
        }
        Ok(())
    }

    /// Tokens interested in the action's source or type, plus legacy tokens.
    fn targets(&self, action: &Action<P>) -> BTreeSet<Token> {
        let interests = self.inner.interests.borrow();
        let mut targets = BTreeSet::new();

        if let Some(tokens) = action.source().and_then(|source| interests.get(source)) {
            targets.extend(tokens.iter().copied());
        }
        if let Some(tokens) = interests.get(action.action_type()) {
            targets.extend(tokens.iter().copied());
        }
        targets.extend(self.inner.legacy.borrow().iter().copied());
        targets
    }

    fn invoke(&self, token: Token) -> Result<()> {
        // Unregistered mid-dispatch: nothing to run.
        let Some(callback) = self
            .inner
            .callbacks
            .borrow()
            .get(&token)
            .map(|registration| Rc::clone(&registration.callback))
        else {
            return Ok(());
        };

        let action = {
            let mut state = self.inner.state.borrow_mut();
            state.pending.insert(token);
            state.in_flight.clone()
        };
        let Some(action) = action else {
            return Ok(());
        };

        trace!(token = %token, "Invoking callback");
        {
            let mut callback = callback
                .try_borrow_mut()
                .map_err(|_| FluxError::CircularDependency(token))?;
            (&mut *callback)(self, &*action)?;
        }

        self.inner.state.borrow_mut().handled.insert(token);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Store graph
    // ------------------------------------------------------------------

    /// Record that a store's handler changed its state during this dispatch.
    pub(crate) fn mark_changed(&self, store: StoreId) {
        self.inner.state.borrow_mut().changed.insert(store);
    }

    pub(crate) fn add_store(&self, store: &Rc<dyn StoreNode>) {
        self.inner.graph.borrow_mut().add_store(&StoreRef::new(store));
    }

    /// Take `store` out of the graph and out of its parents' children.
    ///
    /// Removal drops the whole subtree, so every store still registered is
    /// added back afterwards; that restores children shared with other parents.
    pub(crate) fn remove_store(&self, store: &Rc<dyn StoreNode>) {
        let id = store.store_id();
        let mut graph = self.inner.graph.borrow_mut();

        let parents: Vec<StoreId> = graph.parents_of(id).collect();
        for parent in parents {
            if let Some(node) = graph.node(parent).and_then(StoreRef::upgrade) {
                node.release_child(id);
            }
        }

        let survivors: Vec<StoreRef> = graph
            .nodes()
            .filter(|node| node.id() != id)
            .cloned()
            .collect();
        graph.remove_store(&StoreRef::new(store));

        for node in &survivors {
            let registered = node
                .upgrade()
                .is_some_and(|live| self.is_registered(live.token()));
            if registered {
                graph.add_store(node);
            }
        }
    }

    /// Read access to the store graph
    pub fn graph(&self) -> Ref<'_, StoreGraph<StoreRef>> {
        self.inner.graph.borrow()
    }

    /// Live stores in dependency order, children first.
    pub fn sorted_stores(&self) -> Result<Vec<Rc<dyn StoreNode>>> {
        let sorted = self.inner.graph.borrow().sorted_nodes()?;
        Ok(sorted.iter().filter_map(StoreRef::upgrade).collect())
    }

    /// Mark every changed store and its ancestors in the change batch.
    fn propagate(&self, changed: IndexSet<StoreId>) -> Result<()> {
        if changed.is_empty() {
            return Ok(());
        }

        let dirty = {
            let graph = self.inner.graph.borrow();
            let sorted = graph.sorted_nodes()?;

            let mut dirty: HashSet<StoreId> = changed.into_iter().collect();
            let mut ordered = Vec::new();
            for node in sorted {
                let id = node.node_id();
                if !dirty.contains(&id) {
                    continue;
                }
                dirty.extend(graph.parents_of(id));
                ordered.push(node);
            }
            ordered
        };

        trace!(stores = dirty.len(), "Propagating store changes");
        for store in dirty {
            self.inner.batch.mark(store);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> DispatcherConfig {
        self.inner.config
    }

    pub fn context(&self) -> &ContextStack {
        &self.inner.context
    }

    pub fn change_batch(&self) -> &ChangeBatch {
        &self.inner.batch
    }

    /// Drain the scheduler, flushing pending change notifications.
    pub fn run_pending(&self) -> usize {
        self.inner.scheduler.run_pending()
    }

    pub fn add_observer(&self, observer: impl DispatchObserver<P> + 'static) {
        self.inner.observers.borrow_mut().push(Box::new(observer));
    }

    pub(crate) fn notify_bound(&self, store: &str, action: &ActionId) {
        for observer in self.inner.observers.borrow_mut().iter_mut() {
            observer.bound(store, action);
        }
    }
}

fn snapshot<P: Serialize>(action: &Action<P>, scope: SnapshotScope) -> Result<String, String> {
    let serialized = match scope {
        SnapshotScope::Action => serde_json::to_string(action),
        SnapshotScope::Payload => serde_json::to_string(action.payload()),
    };
    serialized.map_err(|err| err.to_string())
}

fn verify<P: Serialize>(
    before: Option<String>,
    action: &Action<P>,
    scope: SnapshotScope,
) -> Result<()> {
    let Some(before) = before else {
        return Ok(());
    };
    let after = snapshot(action, scope).unwrap_or_else(|message| message);
    if before == after {
        return Ok(());
    }

    Err(FluxError::ActionMutated {
        action_source: action
            .source()
            .map(ToString::to_string)
            .unwrap_or_default(),
        action_type: action.action_type().to_string(),
    })
}
