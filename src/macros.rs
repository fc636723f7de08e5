//! Macro table: name → body mappings with global/local scoping.
//!
//! Two tables back the engine. The global table lives for the whole
//! input-feeding session; the local table is cleared before each new input
//! line unless the load is part of a still-in-progress continuation (see the
//! engine's clear-on-next-read gate). Lookup tries local first, so a local
//! definition shadows a global one for its line.

use std::collections::HashMap;

/// A macro definition. `first_line_len == 0` marks a single-line body;
/// otherwise it is the byte length of the body's first line including its
/// newline, the split point between the glued and queued portions on
/// expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    pub body: Vec<u8>,
    pub first_line_len: usize,
}

impl Macro {
    pub fn oneline(body: Vec<u8>) -> Self {
        Self {
            body,
            first_line_len: 0,
        }
    }

    pub fn is_oneline(&self) -> bool {
        self.first_line_len == 0
    }
}

/// Which table a directive targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Local,
}

/// One name → macro mapping.
///
/// Redefinition silently replaces the previous entry; definitions are never
/// removed individually, only wholesale via [`MacroTable::clear`].
#[derive(Debug, Default)]
pub struct MacroTable {
    macros: HashMap<Vec<u8>, Macro>,
}

impl MacroTable {
    pub fn define(&mut self, name: Vec<u8>, body: Macro) {
        self.macros.insert(name, body);
    }

    pub fn lookup(&self, name: &[u8]) -> Option<&Macro> {
        self.macros.get(name)
    }

    pub fn clear(&mut self) {
        self.macros.clear();
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &Macro)> {
        self.macros.iter().map(|(name, m)| (name.as_slice(), m))
    }
}
