//! Display-name bookkeeping for stores and action creators
//!
//! Each [`Dispatcher`](crate::Dispatcher) owns one registry, so names only need to
//! be unique per dispatcher.

use std::cell::RefCell;

use indexmap::{IndexMap, IndexSet};

use crate::action::ActionId;
use crate::error::{FluxError, Result};

#[derive(Debug, Default)]
pub struct NameRegistry {
    stores: RefCell<IndexSet<String>>,
    creators: RefCell<IndexSet<String>>,
    action_types: RefCell<IndexMap<ActionId, String>>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a store display name.
    pub fn claim_store(&self, name: &str) -> Result<()> {
        Self::claim(&self.stores, name)
    }

    /// Give a store display name back (detached stores).
    pub fn release_store(&self, name: &str) -> bool {
        self.stores.borrow_mut().shift_remove(name)
    }

    /// Reserve an action creator display name.
    pub fn claim_creator(&self, name: &str) -> Result<()> {
        Self::claim(&self.creators, name)
    }

    /// Reserve `action_type` for `creator`.
    ///
    /// Claiming a type the same creator already owns is a no-op.
    pub fn claim_action_type(&self, action_type: &ActionId, creator: &str) -> Result<()> {
        let mut types = self.action_types.borrow_mut();
        match types.get(action_type) {
            Some(owner) if owner == creator => Ok(()),
            Some(owner) => Err(FluxError::DuplicateActionType {
                action: action_type.to_string(),
                creator: owner.clone(),
            }),
            None => {
                types.insert(action_type.clone(), creator.to_string());
                Ok(())
            }
        }
    }

    /// Owner of an action type, if any
    pub fn action_type_owner(&self, action_type: &ActionId) -> Option<String> {
        self.action_types.borrow().get(action_type).cloned()
    }

    pub fn store_names(&self) -> Vec<String> {
        self.stores.borrow().iter().cloned().collect()
    }

    /// Forget every name.
    pub fn reset(&self) {
        self.stores.borrow_mut().clear();
        self.creators.borrow_mut().clear();
        self.action_types.borrow_mut().clear();
    }

    fn claim(names: &RefCell<IndexSet<String>>, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(FluxError::MissingDisplayName);
        }
        if !names.borrow_mut().insert(name.to_string()) {
            return Err(FluxError::DuplicateDisplayName(name.to_string()));
        }
        Ok(())
    }
}
