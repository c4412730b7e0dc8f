//! Synchronization Store.
//!
//! Per-process map from variable name to a fixed-size value and a generation
//! counter. The render loop reads and writes every synchronized variable
//! through [`Store::set_or_get`], whatever the node's role:
//!
//! - [`StoreMode::Authoritative`] (master, standalone): the caller's bytes
//!   become the value.
//! - [`StoreMode::Mirror`] (slave): the caller's bytes are only a bootstrap
//!   default until a canonical value has arrived from the master; from then on
//!   the caller's buffer is overwritten with the canonical value.
//!
//! Sizes are fixed per name for the lifetime of the store. A size change is a
//! build or version mismatch between nodes and is reported as a fatal error.

use std::collections::BTreeMap;

use dgr_proto::{FrameHeader, SNAPSHOT_OVERHEAD, WireVariable};
use zerocopy::{FromBytes, IntoBytes};

/// Errors from store operations. Both are fatal for the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Value exceeds the per-variable size limit, or registering it would
    /// make the snapshot too large for one frame.
    #[error("variable {name:?} is {size} bytes, limit is {max}")]
    SizeExceeded {
        /// Variable name.
        name: String,
        /// Offered size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Value size differs from the size registered for the name.
    #[error("variable {name:?} registered with {expected} bytes, got {actual}")]
    SchemaMismatch {
        /// Variable name.
        name: String,
        /// Registered size.
        expected: usize,
        /// Offered size.
        actual: usize,
    },
}

/// How the store treats values supplied by the render loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Local writes are authoritative (master, standalone).
    Authoritative,
    /// Local writes are bootstrap defaults only (slave).
    Mirror,
}

/// A named value with its generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Process-wide unique name.
    pub name: String,
    /// Current value.
    pub bytes: Vec<u8>,
    /// Bumped on the master each time the value changes.
    pub generation: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    generation: u64,
    /// Set once the value came from the master.
    canonical: bool,
}

/// The per-process variable store.
#[derive(Debug, Clone)]
pub struct Store {
    mode: StoreMode,
    max_variable_size: usize,
    entries: BTreeMap<String, Entry>,
    /// Upper bound on the encoded snapshot size.
    encoded_len: usize,
}

impl Store {
    /// Create an empty store.
    pub fn new(mode: StoreMode, max_variable_size: usize) -> Self {
        Self { mode, max_variable_size, entries: BTreeMap::new(), encoded_len: SNAPSHOT_OVERHEAD }
    }

    /// Write mode of this store.
    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    /// Per-variable size limit.
    pub fn max_variable_size(&self) -> usize {
        self.max_variable_size
    }

    /// Number of registered variables.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no variable has been registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current value of `name`.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(|e| e.bytes.as_slice())
    }

    /// Current generation of `name`.
    pub fn generation(&self, name: &str) -> Option<u64> {
        self.entries.get(name).map(|e| e.generation)
    }

    /// True once `name` holds a value received from the master.
    pub fn is_canonical(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|e| e.canonical)
    }

    /// Read or write a variable.
    ///
    /// In authoritative mode `value` becomes the stored value. In mirror mode
    /// `value` is stored as a bootstrap default until a canonical value has
    /// been applied, after which `value` is overwritten with it. Either way
    /// `value` holds the current value on return.
    ///
    /// # Errors
    ///
    /// - `SizeExceeded` if `value` is larger than the per-variable limit, or
    ///   if a new `name` would no longer fit the snapshot into one frame.
    /// - `SchemaMismatch` if `name` was registered with a different size.
    pub fn set_or_get(&mut self, name: &str, value: &mut [u8]) -> Result<(), StoreError> {
        self.check_size(name, value.len())?;

        let Some(entry) = self.entries.get_mut(name) else {
            let encoded_len =
                self.encoded_len + WireVariable::max_encoded_len(name.len(), value.len());
            if encoded_len > FrameHeader::MAX_PAYLOAD_SIZE {
                return Err(StoreError::SizeExceeded {
                    name: name.to_owned(),
                    size: encoded_len,
                    max: FrameHeader::MAX_PAYLOAD_SIZE,
                });
            }

            let canonical = self.mode == StoreMode::Authoritative;
            let generation = u64::from(canonical);
            self.entries
                .insert(name.to_owned(), Entry { bytes: value.to_vec(), generation, canonical });
            self.encoded_len = encoded_len;
            return Ok(());
        };

        match self.mode {
            StoreMode::Authoritative => {
                if entry.bytes != value {
                    entry.bytes.copy_from_slice(value);
                    entry.generation += 1;
                }
            },
            StoreMode::Mirror if entry.canonical => value.copy_from_slice(&entry.bytes),
            StoreMode::Mirror => entry.bytes.copy_from_slice(value),
        }

        Ok(())
    }

    /// [`Store::set_or_get`] for plain-old-data values.
    ///
    /// The variable's size is `size_of::<T>()`. Every node must use the same
    /// `T` for a given name.
    pub fn set_or_get_value<T>(&mut self, name: &str, value: &mut T) -> Result<(), StoreError>
    where
        T: FromBytes + IntoBytes,
    {
        self.set_or_get(name, value.as_mut_bytes())
    }

    /// Ordered copy of every variable.
    ///
    /// Ordered by name so equal stores produce equal snapshots.
    pub fn snapshot(&self) -> Vec<Variable> {
        self.entries
            .iter()
            .map(|(name, e)| Variable {
                name: name.clone(),
                bytes: e.bytes.clone(),
                generation: e.generation,
            })
            .collect()
    }

    /// Overwrite entries with canonical values from the master.
    ///
    /// All variables are validated before any is written, so a rejected
    /// snapshot leaves the store untouched. Names not present in `variables`
    /// keep their current value. Returns the number of variables written.
    pub fn apply_canonical(&mut self, variables: &[Variable]) -> Result<usize, StoreError> {
        for var in variables {
            self.check_size(&var.name, var.bytes.len())?;
        }

        for var in variables {
            match self.entries.get_mut(&var.name) {
                Some(entry) => {
                    entry.bytes.copy_from_slice(&var.bytes);
                    entry.generation = var.generation;
                    entry.canonical = true;
                },
                None => {
                    self.encoded_len +=
                        WireVariable::max_encoded_len(var.name.len(), var.bytes.len());
                    self.entries.insert(
                        var.name.clone(),
                        Entry {
                            bytes: var.bytes.clone(),
                            generation: var.generation,
                            canonical: true,
                        },
                    );
                },
            }
        }

        Ok(variables.len())
    }

    fn check_size(&self, name: &str, size: usize) -> Result<(), StoreError> {
        if size > self.max_variable_size {
            return Err(StoreError::SizeExceeded {
                name: name.to_owned(),
                size,
                max: self.max_variable_size,
            });
        }
        if let Some(entry) = self.entries.get(name) {
            if entry.bytes.len() != size {
                return Err(StoreError::SchemaMismatch {
                    name: name.to_owned(),
                    expected: entry.bytes.len(),
                    actual: size,
                });
            }
        }
        Ok(())
    }
}
