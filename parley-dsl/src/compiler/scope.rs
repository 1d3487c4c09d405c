//! Lexical scope
//!
//! Values live in a flat stash of slots. Each frame maps identifiers to slot
//! indices; lookups walk frames from the innermost outwards. Popping a frame
//! truncates the stash back to where the frame started, so block-local
//! variables vanish while writes to outer slots survive.

use parley_core::{CompileError, CompileResult, Parameters, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct Frame {
    /// Stash length when the frame was pushed.
    base: usize,
    pointers: BTreeMap<String, usize>,
}

/// Serialized form of a [`Scope`], carried across chain steps.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScopeStash {
    stash: Vec<Value>,
    frames: Vec<Frame>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    stash: Vec<Value>,
    frames: Vec<Frame>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self {
            stash: Vec::new(),
            frames: vec![Frame::default()],
        }
    }

    /// Root scope seeded from caller parameters.
    pub fn with_parameters(parameters: &Parameters) -> Self {
        let mut scope = Self::new();
        for (name, value) in parameters {
            scope.set(name, value.clone());
        }
        scope
    }

    /// Rebuild a scope from a stash produced by [`Scope::stash`].
    pub fn with_stash(stash: ScopeStash) -> Self {
        if stash.frames.is_empty() {
            return Self {
                stash: stash.stash,
                frames: vec![Frame::default()],
            };
        }
        Self {
            stash: stash.stash,
            frames: stash.frames,
        }
    }

    /// Snapshot the whole environment, open frames included.
    pub fn stash(&self) -> ScopeStash {
        ScopeStash {
            stash: self.stash.clone(),
            frames: self.frames.clone(),
        }
    }

    /// An independent copy; mutations on either side are not shared.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    fn slot(&self, name: &str) -> Option<usize> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.pointers.get(name).copied())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.slot(name).is_some()
    }

    /// Read a variable. Undeclared names are an error, never `undefined`.
    pub fn get(&self, name: &str) -> CompileResult<&Value> {
        self.slot(name)
            .and_then(|slot| self.stash.get(slot))
            .ok_or_else(|| CompileError::variable_not_declared(name))
    }

    /// Write the slot that declared `name`, or declare it in the innermost frame.
    pub fn set(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.slot(name) {
            if let Some(existing) = self.stash.get_mut(slot) {
                *existing = value;
                return;
            }
        }
        self.declare(name, value);
    }

    /// Declare `name` in the innermost frame, shadowing outer bindings.
    pub fn declare(&mut self, name: &str, value: Value) {
        let slot = self.stash.len();
        self.stash.push(value);
        if let Some(frame) = self.frames.last_mut() {
            frame.pointers.insert(name.to_string(), slot);
        }
    }

    pub fn push(&mut self) {
        self.frames.push(Frame {
            base: self.stash.len(),
            pointers: BTreeMap::new(),
        });
    }

    /// Discard the innermost frame and its slots. The root frame is never popped.
    pub fn pop(&mut self) {
        if self.frames.len() <= 1 {
            tracing::warn!("Attempted to pop the root scope frame");
            return;
        }
        if let Some(frame) = self.frames.pop() {
            self.stash.truncate(frame.base);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
