//! Per-compile bookkeeping: visit deduplication, relationship reconciliation
//! and the identity handshake that outlives rendering.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::identifiers::SymbolicId;
use super::mapped::{Direction, MappedRelationship};
use super::statement::Statement;
use crate::types::{CompileError, EntityKind, EntityRef, NodeId, RelId, Result};

/// Persisted id reported by the transport for one returned reference.
///
/// Generic statements return one column per variable (`_0`); optimized
/// statements return `ref`/`id` rows. Both reduce to this pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRow {
    /// Symbolic reference as rendered in the statement.
    pub reference: String,
    /// Id assigned by the database.
    pub id: u64,
}

impl IdentityRow {
    /// Creates a row.
    pub fn new(reference: impl Into<String>, id: u64) -> Self {
        Self {
            reference: reference.into(),
            id,
        }
    }
}

/// State of one compile cycle.
#[derive(Debug, Default)]
pub struct CompileContext {
    visited: FxHashMap<EntityRef, SymbolicId>,
    visited_relationship_entities: BTreeSet<RelId>,
    present: BTreeSet<MappedRelationship>,
    // direction of the deregistration that removed each entry
    removed: BTreeMap<MappedRelationship, Direction>,
    transient: BTreeMap<(SymbolicId, String, SymbolicId), SymbolicId>,
    created: BTreeMap<SymbolicId, EntityRef>,
    new_ids: BTreeMap<SymbolicId, u64>,
    returned: BTreeSet<SymbolicId>,
    conflicts: usize,
    statements: Vec<Statement>,
}

impl CompileContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `entity` is rendered through `id`.
    pub fn visit(&mut self, entity: EntityRef, id: SymbolicId) {
        self.visited.insert(entity, id);
    }

    /// Variable already assigned to `entity` in this compile.
    pub fn visited_node(&self, entity: EntityRef) -> Option<SymbolicId> {
        self.visited.get(&entity).copied()
    }

    pub(crate) fn forget_visit(&mut self, id: SymbolicId) {
        self.visited.retain(|_, visited| *visited != id);
    }

    /// Marks a persisted relationship entity as handled.
    pub fn visit_relationship_entity(&mut self, rel_id: RelId) {
        self.visited_relationship_entities.insert(rel_id);
    }

    /// True once [`Self::visit_relationship_entity`] was called for `rel_id`.
    pub fn visited_relationship_entity(&self, rel_id: RelId) -> bool {
        self.visited_relationship_entities.contains(&rel_id)
    }

    /// Records a relationship known to be persisted.
    ///
    /// Re-registering an edge that was deregistered earlier in this compile
    /// moves it back to the present set, so no deletion is rendered for it.
    pub fn register_relationship(&mut self, rel: MappedRelationship) {
        self.removed.retain(|removed, _| removed.triple() != rel.triple());
        self.present.insert(rel);
    }

    /// Moves every removed entry for `(start)-[:rel_type]->(end)` back to the
    /// present set. Returns how many were restored.
    pub(crate) fn restore_relationship(&mut self, start: NodeId, rel_type: &str, end: NodeId) -> usize {
        let restored: Vec<_> = self
            .removed
            .keys()
            .filter(|removed| removed.triple() == (start, rel_type, end))
            .cloned()
            .collect();
        for rel in &restored {
            self.removed.remove(rel);
            self.present.insert(rel.clone());
        }
        restored.len()
    }

    /// Forgets a registered relationship without scheduling its deletion.
    pub fn remove_registered_relationship(&mut self, rel: &MappedRelationship) -> bool {
        self.present.remove(rel)
    }

    /// True while `rel` is in the present set.
    pub fn is_registered(&self, rel: &MappedRelationship) -> bool {
        self.present.contains(rel)
    }

    /// True while `rel` is scheduled for removal.
    pub fn is_removed(&self, rel: &MappedRelationship) -> bool {
        self.removed.contains_key(rel)
    }

    /// Relationships currently believed to persist.
    pub fn registered_relationships(&self) -> impl Iterator<Item = &MappedRelationship> {
        self.present.iter()
    }

    /// Relationships scheduled for removal.
    pub fn removed_relationships(&self) -> impl Iterator<Item = &MappedRelationship> {
        self.removed.keys()
    }

    /// Clears the outgoing `rel_type` relationships of `node` whose end is of
    /// kind `end_kind`.
    ///
    /// Returns true when nothing was registered for the selector or when at
    /// least one relationship was newly scheduled for removal. Clearing the
    /// same relationships twice from this side is a conflict: they are
    /// restored and the call returns false. Relationships already cleared
    /// from their other end stay removed.
    pub fn deregister_outgoing(&mut self, node: NodeId, rel_type: &str, end_kind: &EntityKind) -> bool {
        self.deregister(Direction::Outgoing, node, rel_type, |rel| {
            rel.start == node && rel.rel_type == rel_type && &rel.end_kind == end_kind
        })
    }

    /// Clears the incoming `rel_type` relationships of `node`.
    ///
    /// Compares `kind` with the start kind, or with the end kind when the
    /// relationship is modelled as an entity. Returns as
    /// [`Self::deregister_outgoing`].
    pub fn deregister_incoming(
        &mut self,
        node: NodeId,
        rel_type: &str,
        kind: &EntityKind,
        relationship_entity: bool,
    ) -> bool {
        self.deregister(Direction::Incoming, node, rel_type, |rel| {
            let compared = if relationship_entity {
                &rel.end_kind
            } else {
                &rel.start_kind
            };
            rel.end == node && rel.rel_type == rel_type && compared == kind
        })
    }

    fn deregister<F>(&mut self, direction: Direction, node: NodeId, rel_type: &str, selects: F) -> bool
    where
        F: Fn(&MappedRelationship) -> bool,
    {
        let cleared: Vec<_> = self.present.iter().filter(|rel| selects(rel)).cloned().collect();
        for rel in &cleared {
            self.present.remove(rel);
        }
        let repeated: Vec<_> = self
            .removed
            .iter()
            .filter(|(rel, by)| **by == direction && selects(rel))
            .map(|(rel, _)| rel.clone())
            .collect();
        if cleared.is_empty() && repeated.is_empty() {
            return true;
        }

        let mut committed = 0usize;
        let mut conflicts = 0usize;
        for rel in cleared {
            let again = self
                .removed
                .iter()
                .any(|(removed, by)| *by == direction && removed.triple() == rel.triple());
            if again {
                conflicts += 1;
                self.present.insert(rel);
            } else {
                self.removed.insert(rel, direction);
                committed += 1;
            }
        }
        for rel in repeated {
            self.removed.remove(&rel);
            self.present.insert(rel);
            conflicts += 1;
        }
        if conflicts > 0 {
            self.conflicts += conflicts;
            debug!(
                node = %node,
                rel_type,
                direction = ?direction,
                conflicts,
                "compile.reconcile.conflict"
            );
        }
        committed > 0
    }

    /// Records `id` as the new relationship `(start)-[:rel_type]->(end)`, in
    /// stored orientation.
    pub fn register_transient_relationship(
        &mut self,
        start: SymbolicId,
        rel_type: &str,
        end: SymbolicId,
        id: SymbolicId,
    ) {
        self.transient.insert((start, rel_type.to_owned(), end), id);
    }

    /// New relationship already registered for `(start)-[:rel_type]->(end)`.
    pub fn transient_relationship(&self, start: SymbolicId, rel_type: &str, end: SymbolicId) -> Option<SymbolicId> {
        self.transient.get(&(start, rel_type.to_owned(), end)).copied()
    }

    /// Drops every transient entry pointing at `id`.
    pub fn forget_transient_relationship(&mut self, id: SymbolicId) {
        self.transient.retain(|_, transient| *transient != id);
    }

    /// Number of repeated deregistrations absorbed so far.
    pub fn conflicts(&self) -> usize {
        self.conflicts
    }

    /// Records that `id` creates `entity`.
    pub fn register_new_object(&mut self, id: SymbolicId, entity: EntityRef) {
        self.created.insert(id, entity);
    }

    pub(crate) fn forget_new_object(&mut self, id: SymbolicId) {
        self.created.remove(&id);
    }

    /// Entity created through `id`, if any.
    pub fn new_object(&self, id: SymbolicId) -> Option<EntityRef> {
        self.created.get(&id).copied()
    }

    /// Stores the database id assigned to `id`.
    pub fn register_new_id(&mut self, id: SymbolicId, persisted: u64) {
        self.new_ids.insert(id, persisted);
    }

    /// Database id assigned to `id` by a previous [`Self::register_new_id`].
    pub fn resolve_id(&self, id: SymbolicId) -> Option<u64> {
        self.new_ids.get(&id).copied()
    }

    /// Variables the compiled statements return identities for.
    pub fn returned_references(&self) -> impl Iterator<Item = SymbolicId> + '_ {
        self.returned.iter().copied()
    }

    pub(crate) fn set_returned(&mut self, returned: BTreeSet<SymbolicId>) {
        self.returned = returned;
    }

    /// Applies the identities reported after execution.
    ///
    /// Returns the `(entity, id)` pairs for references that created a domain
    /// object, in reference order. A reference that the compiled statements
    /// never returned fails with [`CompileError::UnknownReference`] and leaves
    /// the context untouched.
    pub fn apply_identities<I>(&mut self, rows: I) -> Result<Vec<(EntityRef, u64)>>
    where
        I: IntoIterator<Item = IdentityRow>,
    {
        let mut parsed = BTreeMap::new();
        for row in rows {
            let id = row
                .reference
                .parse::<SymbolicId>()
                .ok()
                .filter(|id| self.returned.contains(id))
                .ok_or_else(|| CompileError::UnknownReference(row.reference.clone()))?;
            parsed.insert(id, row.id);
        }
        let mut resolved = Vec::new();
        for (id, persisted) in parsed {
            self.register_new_id(id, persisted);
            if let Some(entity) = self.new_object(id) {
                resolved.push((entity, persisted));
            }
        }
        Ok(resolved)
    }

    /// Statements produced by the compile that finished this context.
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Takes ownership of the statements.
    pub fn into_statements(self) -> Vec<Statement> {
        self.statements
    }

    pub(crate) fn set_statements(&mut self, statements: Vec<Statement>) {
        self.statements = statements;
    }
}
