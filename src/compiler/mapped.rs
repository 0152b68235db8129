//! Relationships known to be persisted, as supplied by the mapping layer.

use crate::types::{EntityKind, NodeId, RelId};

/// Orientation of a relationship relative to the entity that declares it.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Direction {
    /// `(start)-[:T]->(end)`.
    #[default]
    Outgoing,
    /// `(start)<-[:T]-(end)`: the stored relationship points at `start`.
    Incoming,
}

/// Bookkeeping record of one persisted relationship.
///
/// Only used by reconciliation; the compiler never renders it directly.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MappedRelationship {
    /// Persisted start node.
    pub start: NodeId,
    /// Relationship type.
    pub rel_type: String,
    /// Persisted end node.
    pub end: NodeId,
    /// Kind of the start entity.
    pub start_kind: EntityKind,
    /// Kind of the end entity.
    pub end_kind: EntityKind,
    /// Persisted relationship id, known for relationship entities.
    pub rel_id: Option<RelId>,
}

impl MappedRelationship {
    /// Creates a record without a relationship id.
    pub fn new(
        start: NodeId,
        rel_type: impl Into<String>,
        end: NodeId,
        start_kind: impl Into<EntityKind>,
        end_kind: impl Into<EntityKind>,
    ) -> Self {
        Self {
            start,
            rel_type: rel_type.into(),
            end,
            start_kind: start_kind.into(),
            end_kind: end_kind.into(),
            rel_id: None,
        }
    }

    /// Attaches the persisted relationship id.
    pub fn with_rel_id(mut self, rel_id: RelId) -> Self {
        self.rel_id = Some(rel_id);
        self
    }

    /// The `(start, type, end)` identity used to detect repeated removal.
    pub fn triple(&self) -> (NodeId, &str, NodeId) {
        (self.start, self.rel_type.as_str(), self.end)
    }
}
