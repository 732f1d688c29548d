//! Collection-scoped constants for action types and sources
//!
//! Two collections may both define `ADD`; their constants never compare equal
//! because each collection gets its own id.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{FluxError, Result};

static NEXT_COLLECTION: AtomicU64 = AtomicU64::new(1);

/// A named constant belonging to one [`ConstantCollection`].
///
/// Displays as `NAME_#<collection id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constant {
    name: Arc<str>,
    collection: u64,
}

impl Constant {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection_id(&self) -> u64 {
        self.collection
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_#{}", self.name, self.collection)
    }
}

/// An ordered set of uniquely named [`Constant`]s.
#[derive(Debug, Clone)]
pub struct ConstantCollection {
    id: u64,
    constants: IndexMap<Arc<str>, Constant>,
}

impl ConstantCollection {
    /// Create a collection, rejecting repeated names.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let id = NEXT_COLLECTION.fetch_add(1, Ordering::Relaxed);
        let mut constants = IndexMap::new();

        for name in names {
            let name: Arc<str> = Arc::from(name.as_ref());
            if constants.contains_key(&name) {
                return Err(FluxError::DuplicateConstant(name.to_string()));
            }
            let constant = Constant {
                name: Arc::clone(&name),
                collection: id,
            };
            constants.insert(name, constant);
        }

        Ok(Self { id, constants })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Look up a constant by name
    pub fn get(&self, name: &str) -> Option<&Constant> {
        self.constants.get(name)
    }

    /// Whether `constant` was minted by this collection
    pub fn contains(&self, constant: &Constant) -> bool {
        constant.collection == self.id && self.constants.contains_key(constant.name())
    }

    /// Constants in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.constants.values()
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }
}
