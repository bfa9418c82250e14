//! Command specification table.
//!
//! The [`CommandTable`] maps symbolic action names onto [`CommandSpec`]
//! records. It is built once from a YAML source, validated in full, and
//! never mutated afterwards; reconfiguration loads a new table and installs
//! it through [`SharedTable`].

mod source;
mod spec;
mod template;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::debug;

pub use self::spec::{ActionClass, CommandSpec, Strategy};
pub use self::template::Template;
use crate::error::{DispatchError, LoadError};

const TABLE_TARGET: &str = "mount_dispatch::table";

/// Immutable registry of command specifications keyed by action name.
///
/// # Example
///
/// ```
/// use mount_dispatch::table::CommandTable;
///
/// let table = CommandTable::load(
///     "park:\n  file: park.py\n  response: 1\nunpark:\n  # file: unpark.py\n",
/// )
/// .unwrap();
/// assert_eq!(table.len(), 1);
/// assert!(table.lookup("park").is_ok());
/// assert!(table.lookup("unpark").is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandTable {
    specs: BTreeMap<String, CommandSpec>,
}

impl CommandTable {
    /// Parses a table from YAML text.
    ///
    /// Null entries and entries carrying `enabled: false` are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] for malformed YAML, duplicate action names or
    /// any invalid entry; no partial table is produced.
    pub fn load(source: &str) -> Result<Self, LoadError> {
        let raw = source::parse_document(source)?;
        let mut specs = Vec::with_capacity(raw.0.len());
        let mut skipped = 0_usize;
        for (name, entry) in raw.0 {
            match source::build_spec(name, entry)? {
                Some(spec) => specs.push(spec),
                None => skipped += 1,
            }
        }
        let table = Self::from_specs(specs)?;
        debug!(
            target: TABLE_TARGET,
            actions = table.len(),
            skipped,
            "command table loaded"
        );
        Ok(table)
    }

    /// Reads and parses a table file.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Read`] when the file cannot be read, otherwise
    /// as [`CommandTable::load`].
    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let text = fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source: Arc::new(source),
        })?;
        Self::load(&text)
    }

    /// Builds a table from already constructed specifications.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Duplicate`] when two specifications share a
    /// name.
    pub fn from_specs(specs: impl IntoIterator<Item = CommandSpec>) -> Result<Self, LoadError> {
        let mut table = BTreeMap::new();
        for spec in specs {
            let name = spec.name().to_owned();
            if table.contains_key(&name) {
                return Err(LoadError::Duplicate { name });
            }
            table.insert(name, spec);
        }
        Ok(Self { specs: table })
    }

    /// Looks up an action by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.specs.get(name)
    }

    /// Resolves an action, failing with [`DispatchError::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] when the action is absent.
    pub fn lookup(&self, name: &str) -> Result<&CommandSpec, DispatchError> {
        self.get(name).ok_or_else(|| DispatchError::not_found(name))
    }

    /// Returns the action names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    /// Iterates over the specifications in name order.
    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.specs.values()
    }

    /// Returns the number of active actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns `true` when no action is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Atomically swappable handle to the current table.
///
/// Readers take an `Arc` snapshot; a reload never disturbs holders of an
/// earlier snapshot.
#[derive(Debug, Default)]
pub struct SharedTable {
    current: RwLock<Arc<CommandTable>>,
}

impl SharedTable {
    /// Wraps an initial table.
    #[must_use]
    pub fn new(table: CommandTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    /// Returns the table currently installed.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Internal`] when the lock is poisoned.
    pub fn snapshot(&self) -> Result<Arc<CommandTable>, DispatchError> {
        self.current
            .read()
            .map(|guard| Arc::clone(&*guard))
            .map_err(|_| DispatchError::internal("command table lock poisoned"))
    }

    /// Installs `table` and returns the instance it replaced.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Internal`] when the lock is poisoned.
    pub fn replace(&self, table: CommandTable) -> Result<Arc<CommandTable>, DispatchError> {
        let mut guard = self
            .current
            .write()
            .map_err(|_| DispatchError::internal("command table lock poisoned"))?;
        let previous = std::mem::replace(&mut *guard, Arc::new(table));
        debug!(
            target: TABLE_TARGET,
            actions = guard.len(),
            "command table replaced"
        );
        Ok(previous)
    }
}
