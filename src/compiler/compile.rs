//! Write-intent registry and statement rendering.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use super::config::{CompilerConfig, EndpointPolicy};
use super::context::CompileContext;
use super::identifiers::{IdentifierManager, SymbolicId};
use super::mapped::Direction;
use super::node::{ExistingNode, NewNode, NodeWriteIntent};
use super::optimizer::{self, BatchInput};
use super::profile::{profile_timer, record_compile, record_unresolved_skip};
use super::relationship::{
    BiDirectionalRelationship, DeletedRelationship, ExistingRelationship, NewRelationship,
    RelationshipBatches, RelationshipWriteIntent,
};
use super::statement::{join_ids, Statement, StatementBuilder};
use crate::types::{CompileError, EntityRef, NodeId, RelId, Result};

/// Collects write intents for one save and renders them into statements.
///
/// Builders are requested per entity, populated through the returned
/// `&mut` handles, and rendered by [`Compiler::compile`]. Repeated requests
/// for the same entity return the same builder.
#[derive(Debug)]
pub struct Compiler {
    config: CompilerConfig,
    ids: IdentifierManager,
    context: CompileContext,
    nodes: BTreeMap<SymbolicId, NodeWriteIntent>,
    relationships: BTreeMap<SymbolicId, RelationshipWriteIntent>,
    existing_relationships: FxHashMap<RelId, SymbolicId>,
}

struct Rendered {
    statements: Vec<Statement>,
    returned: BTreeSet<SymbolicId>,
    optimized: bool,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::with_valid_config(CompilerConfig::default())
    }
}

impl Compiler {
    /// Creates a compiler after validating `config`.
    pub fn new(config: CompilerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: CompilerConfig) -> Self {
        Self {
            ids: IdentifierManager::new(config.max_free_identifiers),
            config,
            context: CompileContext::new(),
            nodes: BTreeMap::new(),
            relationships: BTreeMap::new(),
            existing_relationships: FxHashMap::default(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Context of the cycle in progress.
    pub fn context(&self) -> &CompileContext {
        &self.context
    }

    /// Mutable context, for reconciliation facts.
    pub fn context_mut(&mut self) -> &mut CompileContext {
        &mut self.context
    }

    /// Builder creating a node for `entity`.
    pub fn new_node(&mut self, entity: EntityRef) -> &mut NodeWriteIntent {
        let id = match self.context.visited_node(entity) {
            Some(id) if self.nodes.contains_key(&id) => id,
            _ => {
                let id = self.ids.next();
                self.context.visit(entity, id);
                self.context.register_new_object(id, entity);
                id
            }
        };
        self.nodes
            .entry(id)
            .or_insert_with(|| NodeWriteIntent::New(NewNode::new(id, entity)))
    }

    /// Builder patching the persisted node `node_id` mapped from `entity`.
    pub fn existing_node(&mut self, entity: EntityRef, node_id: NodeId) -> &mut NodeWriteIntent {
        let id = match self.context.visited_node(entity) {
            Some(id) if self.nodes.contains_key(&id) => id,
            _ => {
                let id = self.ids.identifier_for(node_id);
                self.context.visit(entity, id);
                id
            }
        };
        self.nodes
            .entry(id)
            .or_insert_with(|| NodeWriteIntent::Existing(ExistingNode::new(id, node_id)))
    }

    /// Builder creating a relationship of `rel_type`.
    pub fn new_relationship(&mut self, rel_type: impl Into<String>) -> &mut RelationshipWriteIntent {
        let id = self.ids.next();
        let rel = NewRelationship::new(id, rel_type.into(), None);
        self.relationships
            .entry(id)
            .or_insert(RelationshipWriteIntent::New(rel))
    }

    /// Builder for the new relationship joining `start` and `end`.
    ///
    /// `direction` orients the stored relationship relative to `start`.
    /// Reaching the same relationship again from either end returns the
    /// builder registered the first time.
    pub fn connect(
        &mut self,
        start: SymbolicId,
        rel_type: impl Into<String>,
        end: SymbolicId,
        direction: Direction,
    ) -> &mut RelationshipWriteIntent {
        let rel_type = rel_type.into();
        let (from, to) = match direction {
            Direction::Outgoing => (start, end),
            Direction::Incoming => (end, start),
        };
        let id = match self.context.transient_relationship(from, &rel_type, to) {
            Some(id) if self.relationships.contains_key(&id) => {
                debug!(reference = %id, rel_type = %rel_type, "compile.relationship.revisited");
                id
            }
            _ => {
                let id = self.ids.next();
                self.context.register_transient_relationship(from, &rel_type, to, id);
                id
            }
        };
        self.relationships.entry(id).or_insert_with(|| {
            let mut rel = RelationshipWriteIntent::New(NewRelationship::new(id, rel_type, None));
            rel.relate(start, end).direction(direction);
            rel
        })
    }

    /// Builder creating a relationship modelled as the domain object `entity`.
    pub fn new_relationship_entity(
        &mut self,
        entity: EntityRef,
        rel_type: impl Into<String>,
    ) -> &mut RelationshipWriteIntent {
        let id = match self.context.visited_node(entity) {
            Some(id) if self.relationships.contains_key(&id) => id,
            _ => {
                let id = self.ids.next();
                self.context.visit(entity, id);
                self.context.register_new_object(id, entity);
                id
            }
        };
        let rel_type = rel_type.into();
        self.relationships.entry(id).or_insert_with(|| {
            RelationshipWriteIntent::New(NewRelationship::new(id, rel_type, Some(entity)))
        })
    }

    /// Builder creating a pair of reciprocal relationships.
    pub fn new_bidirectional_relationship(
        &mut self,
        rel_type: impl Into<String>,
    ) -> &mut RelationshipWriteIntent {
        let id = self.ids.next();
        let reverse = self.ids.next();
        let rel = BiDirectionalRelationship::new(id, reverse, rel_type.into());
        self.relationships
            .entry(id)
            .or_insert(RelationshipWriteIntent::BiDirectional(rel))
    }

    /// Builder patching the properties of persisted relationship `rel_id`.
    pub fn existing_relationship(
        &mut self,
        rel_id: RelId,
        rel_type: impl Into<String>,
    ) -> &mut RelationshipWriteIntent {
        let id = match self.existing_relationships.get(&rel_id) {
            Some(id) if self.relationships.contains_key(id) => *id,
            _ => {
                let id = self.ids.next();
                self.existing_relationships.insert(rel_id, id);
                self.context.visit_relationship_entity(rel_id);
                id
            }
        };
        let rel_type = rel_type.into();
        self.relationships.entry(id).or_insert_with(|| {
            RelationshipWriteIntent::Existing(ExistingRelationship::new(id, rel_type, rel_id))
        })
    }

    /// Removes the persisted relationship `(start)-[:rel_type]->(end)`.
    ///
    /// A pending new relationship of the same type between the same
    /// persisted nodes is cancelled instead, and `None` is returned.
    /// Otherwise the deletion intent's variable is returned.
    pub fn unrelate(
        &mut self,
        start: NodeId,
        rel_type: impl Into<String>,
        end: NodeId,
        rel_id: Option<RelId>,
    ) -> Option<SymbolicId> {
        let rel_type = rel_type.into();
        let pending = self.relationships.iter().find_map(|(id, rel)| match rel {
            RelationshipWriteIntent::New(new) if rel.rel_type() == rel_type => {
                let (a, b) = new.endpoints();
                let (a, b) = new.oriented(self.persisted(a), self.persisted(b));
                (a == Some(start) && b == Some(end)).then_some(*id)
            }
            _ => None,
        });
        if let Some(id) = pending {
            debug!(reference = %id, rel_type = %rel_type, "compile.unrelate.cancelled");
            self.release(id);
            return None;
        }
        let id = self.ids.next();
        let rel = DeletedRelationship::new(id, rel_type, start, end, rel_id);
        self.relationships
            .insert(id, RelationshipWriteIntent::Deleted(rel));
        Some(id)
    }

    fn persisted(&self, node: Option<SymbolicId>) -> Option<NodeId> {
        node.and_then(|id| self.nodes.get(&id))
            .and_then(NodeWriteIntent::node_id)
    }

    /// Node intent rendered through `id`.
    pub fn node(&self, id: SymbolicId) -> Option<&NodeWriteIntent> {
        self.nodes.get(&id)
    }

    /// Mutable node intent rendered through `id`.
    pub fn node_mut(&mut self, id: SymbolicId) -> Option<&mut NodeWriteIntent> {
        self.nodes.get_mut(&id)
    }

    /// Relationship intent whose primary variable is `id`.
    pub fn relationship(&self, id: SymbolicId) -> Option<&RelationshipWriteIntent> {
        self.relationships.get(&id)
    }

    /// Mutable relationship intent whose primary variable is `id`.
    pub fn relationship_mut(&mut self, id: SymbolicId) -> Option<&mut RelationshipWriteIntent> {
        self.relationships.get_mut(&id)
    }

    /// Number of node intents.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of relationship intents.
    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// Discards the relationship intent `id` and frees its variables.
    pub fn release(&mut self, id: SymbolicId) -> bool {
        let Some(rel) = self.relationships.remove(&id) else {
            return false;
        };
        if let RelationshipWriteIntent::Existing(existing) = &rel {
            self.existing_relationships.remove(&existing.rel_id());
        }
        for reference in rel.references() {
            self.context.forget_transient_relationship(reference);
            self.context.forget_new_object(reference);
            self.context.forget_visit(reference);
            self.ids.release(reference);
        }
        true
    }

    /// Drops the existing-node intent `id` when no relationship refers to it.
    pub fn unmap(&mut self, id: SymbolicId) -> bool {
        let removable = matches!(self.nodes.get(&id), Some(NodeWriteIntent::Existing(_)))
            && !self.relationships.values().any(|rel| rel.touches(id));
        if !removable {
            return false;
        }
        self.nodes.remove(&id);
        self.context.forget_visit(id);
        self.ids.release(id);
        true
    }

    /// True when a relationship connects to a node created in this compile.
    pub fn has_statements_dependent_on_new_nodes(&self) -> bool {
        self.relationships.values().any(|rel| match rel.endpoints() {
            Some((start, end)) => [start, end]
                .into_iter()
                .flatten()
                .any(|node| self.nodes.get(&node).is_some_and(NodeWriteIntent::is_new)),
            None => false,
        })
    }

    /// True when the pending intents qualify for batched rendering.
    pub fn is_batchable(&self) -> bool {
        if !self.config.batch_relationships {
            return false;
        }
        let recreated = self.recreated();
        let superseded = self.superseded(&recreated);
        optimizer::is_batchable(&BatchInput {
            nodes: &self.nodes,
            relationships: &self.relationships,
            superseded: &superseded,
            pending_removals: self
                .context
                .removed_relationships()
                .any(|rel| !is_recreated(&recreated, &rel.rel_type, rel.start, rel.end)),
        })
    }

    /// `(type, start, end)` of every relationship this compile creates
    /// between persisted nodes, in stored orientation.
    fn recreated(&self) -> BTreeSet<(String, NodeId, NodeId)> {
        let mut triples = BTreeSet::new();
        for rel in self.relationships.values() {
            match rel {
                RelationshipWriteIntent::New(new) => {
                    let (start, end) = new.endpoints();
                    if let (Some(start), Some(end)) = new.oriented(self.persisted(start), self.persisted(end)) {
                        triples.insert((rel.rel_type().to_owned(), start, end));
                    }
                }
                RelationshipWriteIntent::BiDirectional(_) => {
                    let Some((start, end)) = rel.endpoints() else {
                        continue;
                    };
                    if let (Some(start), Some(end)) = (self.persisted(start), self.persisted(end)) {
                        triples.insert((rel.rel_type().to_owned(), start, end));
                        triples.insert((rel.rel_type().to_owned(), end, start));
                    }
                }
                _ => {}
            }
        }
        triples
    }

    /// Deletion intents cancelled by a creation of the same relationship.
    fn superseded(&self, recreated: &BTreeSet<(String, NodeId, NodeId)>) -> BTreeSet<SymbolicId> {
        self.relationships
            .iter()
            .filter_map(|(id, rel)| match rel {
                RelationshipWriteIntent::Deleted(deleted) => {
                    let (start, end) = deleted.endpoints();
                    is_recreated(recreated, rel.rel_type(), start, end).then_some(*id)
                }
                _ => None,
            })
            .collect()
    }

    /// Renders the pending intents without consuming them.
    pub fn statements(&self) -> Result<Vec<Statement>> {
        Ok(self.render()?.statements)
    }

    /// Renders the pending intents and closes the cycle.
    ///
    /// Returns the finished context carrying the statements and the
    /// identity handshake state. All intents are drained, every variable is
    /// released and a fresh context is installed. On error nothing is
    /// drained.
    pub fn compile(&mut self) -> Result<CompileContext> {
        let rendered = self.render()?;
        let recreated = self.recreated();
        let mut finished = mem::take(&mut self.context);
        finished.set_statements(rendered.statements);
        finished.set_returned(rendered.returned);
        for (rel_type, start, end) in &recreated {
            if finished.restore_relationship(*start, rel_type, *end) > 0 {
                debug!(start = %start, rel_type = %rel_type, end = %end, "compile.delete.superseded");
            }
        }

        let nodes = mem::take(&mut self.nodes);
        let relationships = mem::take(&mut self.relationships);
        self.existing_relationships.clear();
        for rel in relationships.values() {
            for reference in rel.references() {
                self.ids.release(reference);
            }
        }
        for id in nodes.keys() {
            self.ids.release(*id);
        }
        Ok(finished)
    }

    fn render(&self) -> Result<Rendered> {
        let timer = profile_timer();
        debug!(
            nodes = self.nodes.len(),
            relationships = self.relationships.len(),
            "compile.start"
        );
        let skipped = self.unresolved()?;
        let rendered = if self.is_batchable() {
            let batched = optimizer::render(&self.nodes, &self.relationships, &skipped);
            debug!(relationships = batched.returned.len(), "compile.optimized");
            Rendered {
                statements: batched.statement.into_iter().collect(),
                returned: batched.returned,
                optimized: true,
            }
        } else {
            let rendered = self.render_generic(&skipped)?;
            debug!(statements = rendered.statements.len(), "compile.generic");
            rendered
        };
        record_compile(timer, rendered.statements.len(), rendered.optimized);
        Ok(rendered)
    }

    /// Relationship intents dropped for unresolved endpoints.
    fn unresolved(&self) -> Result<BTreeSet<SymbolicId>> {
        let mut skipped = BTreeSet::new();
        for (id, rel) in &self.relationships {
            let Some((start, end)) = rel.endpoints() else {
                continue;
            };
            let known = |node: Option<SymbolicId>| node.is_some_and(|node| self.nodes.contains_key(&node));
            let gap = if !known(start) {
                "start"
            } else if !known(end) {
                "end"
            } else {
                continue;
            };
            match self.config.endpoint_policy {
                EndpointPolicy::Fail => {
                    return Err(CompileError::UnresolvedEndpoint {
                        reference: id.to_string(),
                        rel_type: rel.rel_type().to_owned(),
                        end: gap,
                    })
                }
                EndpointPolicy::Skip => {
                    warn!(
                        reference = %id,
                        rel_type = rel.rel_type(),
                        end = gap,
                        "compile.endpoint.unresolved"
                    );
                    record_unresolved_skip();
                    skipped.insert(*id);
                }
            }
        }
        Ok(skipped)
    }

    // new nodes, existing nodes, creating relationships, RETURN; then the
    // per-type update and delete batches
    fn render_generic(&self, skipped: &BTreeSet<SymbolicId>) -> Result<Rendered> {
        let recreated = self.recreated();
        let superseded = self.superseded(&recreated);
        let rendered_rels: Vec<&RelationshipWriteIntent> = self
            .relationships
            .iter()
            .filter(|(id, _)| !skipped.contains(*id) && !superseded.contains(*id))
            .map(|(_, rel)| rel)
            .collect();
        let referenced: BTreeSet<SymbolicId> = rendered_rels
            .iter()
            .filter_map(|rel| rel.endpoints())
            .flat_map(|(start, end)| [start, end])
            .flatten()
            .collect();

        let mut main = StatementBuilder::new();
        let mut returned = BTreeSet::new();
        let new_nodes = self.nodes.values().filter(|node| node.is_new());
        let existing_nodes = self.nodes.values().filter(|node| {
            !node.is_new() && (node.has_changes() || referenced.contains(&node.reference()))
        });
        for node in new_nodes.chain(existing_nodes) {
            if node.emit(&mut main)? {
                returned.insert(node.reference());
            }
        }

        let mut batches = RelationshipBatches::new();
        for rel in rendered_rels {
            if rel.emit(&mut main, &mut batches)? {
                returned.extend(rel.references());
            }
        }
        for removed in self.context.removed_relationships() {
            if !is_recreated(&recreated, &removed.rel_type, removed.start, removed.end) {
                batches.delete(&removed.rel_type, removed.start, removed.end, removed.rel_id);
            }
        }

        if !returned.is_empty() {
            let columns: Vec<String> = returned.iter().map(|id| format!("id({id}) AS {id}")).collect();
            main.clause().push_str(&format!("RETURN {}", columns.join(", ")));
        }
        debug!(
            returned = %join_ids(returned.iter()),
            updates = batches.has_updates(),
            deletes = batches.has_deletes(),
            "compile.generic.render"
        );

        let mut statements: Vec<Statement> = main.finish().into_iter().collect();
        statements.extend(batches.into_statements());
        Ok(Rendered {
            statements,
            returned,
            optimized: false,
        })
    }
}

fn is_recreated(recreated: &BTreeSet<(String, NodeId, NodeId)>, rel_type: &str, start: NodeId, end: NodeId) -> bool {
    recreated.contains(&(rel_type.to_owned(), start, end))
}
