//! Batched rendering for compiles that only connect persisted nodes.
//!
//! Every new relationship becomes one row of an `UNWIND` block keyed by
//! `(type, singleton)`; blocks are joined with `UNION ALL` into a single
//! statement returning `ref`/`id`/`type` rows.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value as Json;

use super::escape::{type_param_name, write_identifier};
use super::identifiers::SymbolicId;
use super::node::NodeWriteIntent;
use super::relationship::{creation_row, RelationshipWriteIntent};
use super::statement::{Parameters, Statement};
use crate::types::NodeId;

/// Inputs the batching decision looks at.
pub(crate) struct BatchInput<'a> {
    pub(crate) nodes: &'a BTreeMap<SymbolicId, NodeWriteIntent>,
    pub(crate) relationships: &'a BTreeMap<SymbolicId, RelationshipWriteIntent>,
    /// Deletions cancelled by a creation of the same relationship.
    pub(crate) superseded: &'a BTreeSet<SymbolicId>,
    pub(crate) pending_removals: bool,
}

/// True when the whole compile is new relationships between unchanged
/// persisted nodes and none of them needs individual rendering.
pub(crate) fn is_batchable(input: &BatchInput<'_>) -> bool {
    if input.pending_removals {
        return false;
    }
    if input.nodes.values().any(NodeWriteIntent::has_changes) {
        return false;
    }
    let mut creates = 0usize;
    for (id, rel) in input.relationships {
        match rel {
            RelationshipWriteIntent::New(new) if !new.needs_individual_rendering() => creates += 1,
            RelationshipWriteIntent::Deleted(_) if input.superseded.contains(id) => {}
            _ => return false,
        }
    }
    creates > 0
}

/// Result of batched rendering.
pub(crate) struct Batched {
    pub(crate) statement: Option<Statement>,
    pub(crate) returned: BTreeSet<SymbolicId>,
}

#[derive(Default)]
struct Group {
    rows: Vec<Json>,
}

/// Renders the batched statement for `relationships`, leaving out the
/// intents listed in `skipped`.
///
/// Callers check [`is_batchable`] first; intents other than plain new
/// relationships are ignored here.
pub(crate) fn render(
    nodes: &BTreeMap<SymbolicId, NodeWriteIntent>,
    relationships: &BTreeMap<SymbolicId, RelationshipWriteIntent>,
    skipped: &BTreeSet<SymbolicId>,
) -> Batched {
    let persisted = |id: Option<SymbolicId>| -> Option<NodeId> {
        id.and_then(|id| nodes.get(&id)).and_then(NodeWriteIntent::node_id)
    };

    let mut groups: BTreeMap<(&str, bool), Group> = BTreeMap::new();
    let mut returned = BTreeSet::new();
    for (id, rel) in relationships {
        let RelationshipWriteIntent::New(new) = rel else {
            continue;
        };
        if skipped.contains(id) {
            continue;
        }
        let (start, end) = new.endpoints();
        let (Some(start), Some(end)) = (persisted(start), persisted(end)) else {
            continue;
        };
        let (start, end) = new.oriented(start, end);
        groups
            .entry((rel.rel_type(), new.is_singleton()))
            .or_default()
            .rows
            .push(creation_row(start, end, *id));
        returned.insert(*id);
    }

    let mut params = Parameters::new();
    let mut blocks = Vec::with_capacity(groups.len());
    for ((rel_type, singleton), group) in groups {
        let param = type_param_name("rows", rel_type, |name| params.contains_key(name));
        let mut block = format!(
            "UNWIND ${param} AS row \
             MATCH (start) WHERE id(start) = row.startNodeId \
             MATCH (end) WHERE id(end) = row.endNodeId "
        );
        block.push_str(if singleton { "MERGE" } else { "CREATE" });
        block.push_str(" (start)-[rel:");
        write_identifier(&mut block, rel_type);
        block.push_str("]->(end) RETURN row.relRef AS ref, id(rel) AS id, 'rel' AS type");
        blocks.push(block);
        params.insert(param, Json::Array(group.rows));
    }

    let statement = (!blocks.is_empty()).then(|| Statement::new(blocks.join(" UNION ALL "), params));
    Batched {
        statement,
        returned,
    }
}
