//! Dispatch observers
//!
//! Observers see every dispatch before delivery and after it finishes, plus
//! callback registrations and store bindings. They cannot change what is
//! delivered; use them for logging, recording and diagnostics.

use tracing::{debug, info};

use crate::action::{Action, ActionId};
use crate::dispatcher::Token;
use crate::error::FluxError;

/// Hooks called by the [`Dispatcher`](crate::Dispatcher).
pub trait DispatchObserver<P> {
    /// Called before the action is delivered to any callback
    fn before(&mut self, action: &Action<P>);

    /// Called once delivery, mutation checks and change propagation finished
    fn after(&mut self, action: &Action<P>, outcome: &Result<(), FluxError>);

    /// Called when a callback is registered; `interests` is `None` for legacy callbacks
    fn registered(&mut self, _token: Token, _interests: Option<&[ActionId]>) {}

    /// Called for every action a store binds while it is built
    fn bound(&mut self, _store: &str, _action: &ActionId) {}
}

/// Observer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl<P> DispatchObserver<P> for NoopObserver {
    fn before(&mut self, _action: &Action<P>) {}
    fn after(&mut self, _action: &Action<P>, _outcome: &Result<(), FluxError>) {}
}

/// Include/exclude glob filter over action identifiers.
///
/// Patterns support `*` (any run of characters) and `?` (any single character).
/// `ADD_*` matches `ADD_TODO` and `ADD_USER`; `*_#3` matches every constant of
/// collection 3.
#[derive(Debug, Clone, Default)]
pub struct ObserverFilter {
    /// If non-empty, only matching actions pass
    pub include_patterns: Vec<String>,
    /// Matching actions never pass (applied after include)
    pub exclude_patterns: Vec<String>,
}

impl ObserverFilter {
    /// Build from comma-separated pattern lists.
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Self {
        Self {
            include_patterns: split_patterns(include),
            exclude_patterns: split_patterns(exclude),
        }
    }

    pub fn matches(&self, action_id: &str) -> bool {
        let included = self.include_patterns.is_empty()
            || self
                .include_patterns
                .iter()
                .any(|p| glob_match(p, action_id));
        included
            && !self
                .exclude_patterns
                .iter()
                .any(|p| glob_match(p, action_id))
    }

    /// Whether the action passes on either its type or its source.
    pub fn matches_action<P>(&self, action: &Action<P>) -> bool {
        self.matches(&action.action_type().to_string())
            || action
                .source()
                .is_some_and(|source| self.matches(&source.to_string()))
    }
}

fn split_patterns(patterns: Option<&str>) -> Vec<String> {
    patterns
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Observer that writes dispatches and registrations to `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingObserver {
    filter: ObserverFilter,
    log_before: bool,
    log_after: bool,
}

impl Default for LoggingObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingObserver {
    pub fn new() -> Self {
        Self {
            filter: ObserverFilter::default(),
            log_before: true,
            log_after: true,
        }
    }

    pub fn with_filter(mut self, filter: ObserverFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Only log after delivery
    pub fn after_only() -> Self {
        Self {
            log_before: false,
            ..Self::new()
        }
    }

    /// Only log before delivery
    pub fn before_only() -> Self {
        Self {
            log_after: false,
            ..Self::new()
        }
    }
}

impl<P> DispatchObserver<P> for LoggingObserver {
    fn before(&mut self, action: &Action<P>) {
        if self.log_before && self.filter.matches_action(action) {
            debug!(
                action_type = %action.action_type(),
                source = ?action.source().map(ToString::to_string),
                "Dispatching"
            );
        }
    }

    fn after(&mut self, action: &Action<P>, outcome: &Result<(), FluxError>) {
        if !self.log_after || !self.filter.matches_action(action) {
            return;
        }
        match outcome {
            Ok(()) => debug!(action_type = %action.action_type(), "Dispatched"),
            Err(err) => info!(action_type = %action.action_type(), error = %err, "Dispatch failed"),
        }
    }

    fn registered(&mut self, token: Token, interests: Option<&[ActionId]>) {
        match interests {
            Some(ids) => debug!(token = %token, interests = ids.len(), "Callback registered"),
            None => debug!(token = %token, "Legacy callback registered"),
        }
    }

    fn bound(&mut self, store: &str, action: &ActionId) {
        if self.filter.matches(&action.to_string()) {
            debug!(store, action = %action, "Store bound action");
        }
    }
}

/// Fans every hook out to several observers.
///
/// `before` runs in insertion order, `after` in reverse, so the first observer
/// wraps all the others.
pub struct ComposedObserver<P> {
    observers: Vec<Box<dyn DispatchObserver<P>>>,
}

impl<P> Default for ComposedObserver<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> ComposedObserver<P> {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    pub fn add(&mut self, observer: impl DispatchObserver<P> + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl<P> DispatchObserver<P> for ComposedObserver<P> {
    fn before(&mut self, action: &Action<P>) {
        for observer in &mut self.observers {
            observer.before(action);
        }
    }

    fn after(&mut self, action: &Action<P>, outcome: &Result<(), FluxError>) {
        for observer in self.observers.iter_mut().rev() {
            observer.after(action, outcome);
        }
    }

    fn registered(&mut self, token: Token, interests: Option<&[ActionId]>) {
        for observer in &mut self.observers {
            observer.registered(token, interests);
        }
    }

    fn bound(&mut self, store: &str, action: &ActionId) {
        for observer in &mut self.observers {
            observer.bound(store, action);
        }
    }
}

/// Glob match supporting `*` and `?`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position after the last `*` and the text index it was tried against.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p + 1, t));
                p += 1;
            }
            Some(c) if *c == '?' || *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star_p, star_t)) => {
                    backtrack = Some((star_p, star_t + 1));
                    p = star_p;
                    t = star_t + 1;
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}
