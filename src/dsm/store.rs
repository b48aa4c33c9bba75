//! Per-process variable replicas.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Sentinel returned by [`VariableStore::get`] for a variable with no value yet.
pub const UNINITIALIZED: i32 = -1;

/// State of one local replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarState {
    /// Known locally but never written or received.
    Uninitialized,
    /// Last written or received value.
    Set(i32),
}

impl VarState {
    /// Flatten to the integer form drivers compare against.
    #[inline]
    pub fn as_raw(&self) -> i32 {
        match self {
            VarState::Uninitialized => UNINITIALIZED,
            VarState::Set(v) => *v,
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, VarState::Set(_))
    }
}

/// Mapping from variable name to its local replica.
#[derive(Debug, Default)]
pub struct VariableStore {
    vars: HashMap<String, VarState>,
}

impl VariableStore {
    pub fn new() -> Self {
        VariableStore {
            vars: HashMap::new(),
        }
    }

    /// Current value, or [`UNINITIALIZED`] if the variable has no value.
    pub fn get(&self, name: &str) -> i32 {
        self.state(name).as_raw()
    }

    /// Current state; absent names report `Uninitialized`.
    pub fn state(&self, name: &str) -> VarState {
        self.vars
            .get(name)
            .copied()
            .unwrap_or(VarState::Uninitialized)
    }

    /// Unconditional overwrite.
    pub fn set(&mut self, name: &str, value: i32) {
        match self.vars.get_mut(name) {
            Some(slot) => *slot = VarState::Set(value),
            None => {
                self.vars.insert(name.to_string(), VarState::Set(value));
            }
        }
    }

    /// Create the entry as `Uninitialized` unless it already exists.
    pub fn ensure(&mut self, name: &str) {
        if !self.vars.contains_key(name) {
            self.vars.insert(name.to_string(), VarState::Uninitialized);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Sorted snapshot of known names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vars.keys().cloned().collect();
        names.sort();
        names
    }
}
