//! Action creators
//!
//! An [`ActionCreator`] is the only sanctioned way for application code to
//! start a dispatch. It stamps every action with its own source identifier and
//! runs the dispatch under [`Context::ACTION_DISPATCH`].

use serde::Serialize;

use crate::action::{Action, ActionId};
use crate::context::Context;
use crate::dispatcher::Dispatcher;
use crate::error::{FluxError, Result};

/// Named producer of actions bound to one dispatcher.
#[derive(Debug, Clone)]
pub struct ActionCreator<P = serde_json::Value> {
    name: String,
    source: ActionId,
    dispatcher: Dispatcher<P>,
}

impl<P: Serialize + 'static> ActionCreator<P> {
    /// Create a creator whose source identifier is its display name.
    pub fn new(dispatcher: &Dispatcher<P>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let source = ActionId::from(name.clone());
        Self::with_source(dispatcher, name, source)
    }

    /// Create a creator with an explicit source identifier.
    pub fn with_source(
        dispatcher: &Dispatcher<P>,
        name: impl Into<String>,
        source: impl Into<ActionId>,
    ) -> Result<Self> {
        let name = name.into();
        let source = source.into();
        if !source.is_recognizable() {
            return Err(FluxError::MissingDisplayName);
        }
        dispatcher.registry().claim_creator(&name)?;

        Ok(Self {
            name,
            source,
            dispatcher: dispatcher.clone(),
        })
    }

    pub fn display_name(&self) -> &str {
        &self.name
    }

    /// Identifier stamped on every action as its source
    pub fn source(&self) -> &ActionId {
        &self.source
    }

    /// Reserve action types up front so conflicts surface at startup.
    pub fn declare<I>(&self, action_types: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<ActionId>,
    {
        for action_type in action_types {
            self.dispatcher
                .registry()
                .claim_action_type(&action_type.into(), &self.name)?;
        }
        Ok(())
    }

    /// Build an action stamped with this creator's source.
    ///
    /// Fails with [`FluxError::DuplicateActionType`] if another creator owns
    /// the type.
    pub fn action(&self, action_type: impl Into<ActionId>, payload: P) -> Result<Action<P>> {
        let action_type = action_type.into();
        self.dispatcher
            .registry()
            .claim_action_type(&action_type, &self.name)?;
        Ok(Action::new(action_type, payload).with_source(self.source.clone()))
    }

    /// Build and dispatch an action. Only allowed when nothing else is running.
    pub fn dispatch(&self, action_type: impl Into<ActionId>, payload: P) -> Result<()> {
        let context = self.dispatcher.context();
        context.allow("action:dispatch", Context::EMPTY)?;
        let action = self.action(action_type, payload)?;
        context.push(Context::ACTION_DISPATCH, || self.dispatcher.dispatch(action))
    }
}
