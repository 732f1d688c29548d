//! Dispatcher configuration

use serde::{Deserialize, Serialize};

/// Environment variable consulted by [`DispatcherConfig::from_env`].
pub const ENV_VAR: &str = "FLUX_ENV";

/// Which part of an action the mutation check snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotScope {
    /// Type, source and payload
    #[default]
    Action,
    /// Payload only
    Payload,
}

/// Development checks performed by the dispatcher and its stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Snapshot actions and store state to detect mutation
    pub check_mutations: bool,
    /// What an action snapshot covers
    pub snapshot: SnapshotScope,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            check_mutations: true,
            snapshot: SnapshotScope::Action,
        }
    }
}

impl DispatcherConfig {
    /// Development mode: all checks enabled
    pub fn development() -> Self {
        Self::default()
    }

    /// Production mode: snapshots disabled
    pub fn production() -> Self {
        Self {
            check_mutations: false,
            ..Self::default()
        }
    }

    /// Read the mode from `FLUX_ENV`; anything but `production` is development.
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(ENV_VAR).ok().as_deref())
    }

    /// Same as [`from_env`](Self::from_env) for an already-read value.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(mode) if mode.trim().eq_ignore_ascii_case("production") => Self::production(),
            _ => Self::development(),
        }
    }

    pub fn with_mutation_checks(mut self, enabled: bool) -> Self {
        self.check_mutations = enabled;
        self
    }

    pub fn with_snapshot(mut self, scope: SnapshotScope) -> Self {
        self.snapshot = scope;
        self
    }
}
