//! Change listeners and batched notification
//!
//! Stores do not call their listeners synchronously. A change marks the store in
//! the dispatcher's [`ChangeBatch`], which schedules a single deferred flush; when
//! the flush runs every marked store's listeners are called once, under the
//! [`Context::VIEW_GET_STATE`] label.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use indexmap::{IndexMap, IndexSet};

use crate::context::{Context, ContextStack};
use crate::store::{StoreId, StoreRef};

/// A change listener.
///
/// Listeners compare by identity: two clones of the same listener are equal, two
/// listeners built from identical closures are not.
#[derive(Clone)]
pub struct Listener(Rc<dyn Fn()>);

impl Listener {
    pub fn new(f: impl Fn() + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self) {
        (self.0)()
    }

    fn addr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Listener {}

impl Hash for Listener {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.addr()).finish()
    }
}

/// Task queued by a [`Scheduler`].
pub type Task = Box<dyn FnOnce()>;

/// Runs deferred work after the current call stack unwinds.
pub trait Scheduler {
    /// Queue `task` to run later.
    fn defer(&self, task: Task);

    /// Run queued tasks now, if this scheduler supports it.
    ///
    /// Returns the number of tasks run.
    fn run_pending(&self) -> usize {
        0
    }
}

/// Manually drained FIFO of deferred tasks.
///
/// This is the default scheduler: nothing runs until [`run_pending`] is called,
/// which makes notification timing explicit in tests and in synchronous hosts.
///
/// [`run_pending`]: Scheduler::run_pending
#[derive(Default)]
pub struct TickQueue {
    tasks: RefCell<VecDeque<Task>>,
}

impl TickQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }
}

impl Scheduler for TickQueue {
    fn defer(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }

    fn run_pending(&self) -> usize {
        let mut ran = 0;
        // Tasks may defer more tasks; keep draining until empty.
        loop {
            let task = self.tasks.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl fmt::Debug for TickQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickQueue")
            .field("pending", &self.len())
            .finish()
    }
}

/// Defers tasks onto the current tokio [`LocalSet`](tokio::task::LocalSet).
///
/// Must be used from inside a `LocalSet`; `spawn_local` panics otherwise.
#[cfg(feature = "local-tasks")]
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTaskScheduler;

#[cfg(feature = "local-tasks")]
impl Scheduler for LocalTaskScheduler {
    fn defer(&self, task: Task) {
        tokio::task::spawn_local(async move { task() });
    }
}

/// Collects changed stores and flushes their listeners once per tick.
pub struct ChangeBatch {
    pending: Cell<bool>,
    marked: RefCell<IndexMap<StoreId, StoreRef>>,
    scheduler: Rc<dyn Scheduler>,
    context: ContextStack,
    this: Weak<ChangeBatch>,
}

impl ChangeBatch {
    pub fn new(scheduler: Rc<dyn Scheduler>, context: ContextStack) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            pending: Cell::new(false),
            marked: RefCell::new(IndexMap::new()),
            scheduler,
            context,
            this: this.clone(),
        })
    }

    /// Mark `store` as changed, scheduling a flush if none is pending.
    pub fn mark(&self, store: StoreRef) {
        self.marked.borrow_mut().insert(store.id(), store);
        if self.pending.replace(true) {
            return;
        }

        let batch = self.this.clone();
        self.scheduler.defer(Box::new(move || {
            if let Some(batch) = batch.upgrade() {
                batch.flush();
            }
        }));
    }

    /// Whether a flush has been scheduled but not yet run
    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }

    /// Stores waiting for the next flush
    pub fn marked(&self) -> Vec<StoreId> {
        self.marked.borrow().keys().copied().collect()
    }

    /// Call the listeners of every marked store once.
    ///
    /// Listeners are resolved now, so one added after the change but before the
    /// flush is called and one removed in between is not. Returns the number of
    /// listeners called.
    pub fn flush(&self) -> usize {
        self.pending.set(false);
        let marked = std::mem::take(&mut *self.marked.borrow_mut());

        let mut listeners = IndexSet::new();
        for store in marked.values() {
            if let Some(node) = store.upgrade() {
                listeners.extend(node.listeners());
            }
        }

        tracing::trace!(
            stores = marked.len(),
            listeners = listeners.len(),
            "Flushing change notifications"
        );

        self.context.push(Context::VIEW_GET_STATE, || {
            for listener in &listeners {
                listener.call();
            }
        });
        listeners.len()
    }
}

impl fmt::Debug for ChangeBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeBatch")
            .field("pending", &self.pending.get())
            .field("marked", &self.marked())
            .finish()
    }
}
