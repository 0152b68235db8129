//! Symbolic variable names used inside generated statements.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::types::{CompileError, NodeId};

/// Query variable standing in for one entity within a compiled batch.
///
/// Ordering follows the numeric index so that `_2` sorts before `_10`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SymbolicId(u32);

impl SymbolicId {
    /// Returns the numeric index behind the token.
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SymbolicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_{}", self.0)
    }
}

impl FromStr for SymbolicId {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('_')
            .and_then(|digits| digits.parse::<u32>().ok())
            .map(SymbolicId)
            .ok_or_else(|| CompileError::UnknownReference(s.to_owned()))
    }
}

/// Allocates and recycles [`SymbolicId`] tokens.
///
/// Tokens bound to a persisted node id are shared by every builder that
/// refers to that node, so one query variable names one entity.
#[derive(Debug)]
pub struct IdentifierManager {
    next: u32,
    free: BTreeSet<SymbolicId>,
    dropped: BTreeSet<SymbolicId>,
    max_free: usize,
    by_node: FxHashMap<NodeId, SymbolicId>,
    node_of: FxHashMap<SymbolicId, NodeId>,
    live: usize,
}

impl Default for IdentifierManager {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl IdentifierManager {
    /// Creates a manager keeping at most `max_free` released tokens for reuse.
    pub fn new(max_free: usize) -> Self {
        Self {
            next: 0,
            free: BTreeSet::new(),
            dropped: BTreeSet::new(),
            max_free,
            by_node: FxHashMap::default(),
            node_of: FxHashMap::default(),
            live: 0,
        }
    }

    /// Returns a token not held by any live builder.
    ///
    /// Released tokens are reused smallest first, which keeps numbering
    /// identical between a fresh manager and one that has completed cycles.
    pub fn next(&mut self) -> SymbolicId {
        self.live += 1;
        if let Some(id) = self.free.pop_first() {
            return id;
        }
        let id = SymbolicId(self.next);
        self.next += 1;
        id
    }

    /// Returns the token bound to `node`, allocating one on first use.
    pub fn identifier_for(&mut self, node: NodeId) -> SymbolicId {
        if let Some(id) = self.by_node.get(&node) {
            return *id;
        }
        let id = self.next();
        self.by_node.insert(node, id);
        self.node_of.insert(id, node);
        id
    }

    /// Returns the persisted node a token was bound to by [`Self::identifier_for`].
    pub fn node_for(&self, id: SymbolicId) -> Option<NodeId> {
        self.node_of.get(&id).copied()
    }

    /// Hands `id` back once its owning builder is gone.
    ///
    /// Returns false when the token was not live. Tokens released while the
    /// pool is full are retired for good and never handed out again.
    pub fn release(&mut self, id: SymbolicId) -> bool {
        if id.0 >= self.next || self.free.contains(&id) || self.dropped.contains(&id) {
            return false;
        }
        if let Some(node) = self.node_of.remove(&id) {
            self.by_node.remove(&node);
        }
        self.live = self.live.saturating_sub(1);
        if self.free.len() < self.max_free {
            self.free.insert(id);
        } else {
            trace!(id = %id, "compile.identifiers.pool_full");
            self.dropped.insert(id);
        }
        true
    }

    /// Number of tokens currently held by builders.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Number of released tokens waiting for reuse.
    pub fn pooled(&self) -> usize {
        self.free.len()
    }

    /// Forgets every allocation.
    pub fn reset(&mut self) {
        self.next = 0;
        self.free.clear();
        self.dropped.clear();
        self.by_node.clear();
        self.node_of.clear();
        self.live = 0;
    }
}
