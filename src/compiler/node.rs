//! Node write intents.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value as Json};
use smallvec::SmallVec;

use super::escape::{write_identifier, write_labels};
use super::identifiers::SymbolicId;
use super::statement::StatementBuilder;
use super::value::{PropertyRow, Value};
use crate::types::{CompileError, EntityRef, NodeId, Result};

type LabelList = SmallVec<[String; 4]>;

/// A node that does not exist yet and is created (or merged) by this compile.
#[derive(Clone, Debug)]
pub struct NewNode {
    id: SymbolicId,
    entity: EntityRef,
    labels: BTreeSet<String>,
    props: PropertyRow,
    primary_index: Option<String>,
}

impl NewNode {
    pub(crate) fn new(id: SymbolicId, entity: EntityRef) -> Self {
        Self {
            id,
            entity,
            labels: BTreeSet::new(),
            props: PropertyRow::new(),
            primary_index: None,
        }
    }

    /// Domain object this node will be created for.
    pub fn entity(&self) -> EntityRef {
        self.entity
    }

    /// Property that makes reruns merge instead of create.
    pub fn primary_index(&self) -> Option<&str> {
        self.primary_index.as_deref()
    }

    // CREATE (_0:A:B) SET _0 = $_0.props
    // MERGE (_0:A:B {k: $_0.primaryKey}) SET _0 = $_0.props
    fn emit(&self, out: &mut StatementBuilder) -> Result<bool> {
        let mut row = Map::new();
        let key = match &self.primary_index {
            Some(key) => {
                let value = self
                    .props
                    .get(key)
                    .ok_or_else(|| CompileError::MissingPrimaryKey {
                        reference: self.id.to_string(),
                        key: key.clone(),
                    })?;
                row.insert("primaryKey".into(), value.to_json());
                Some(key)
            }
            None => None,
        };
        row.insert("props".into(), self.props.to_json());

        let id = self.id;
        let clause = out.clause();
        clause.push_str(if key.is_some() { "MERGE (" } else { "CREATE (" });
        clause.push_str(&id.to_string());
        write_labels(clause, self.labels.iter().map(String::as_str));
        if let Some(key) = key {
            clause.push_str(" {");
            write_identifier(clause, key);
            clause.push_str(&format!(": ${id}.primaryKey}}"));
        }
        clause.push_str(&format!(") SET {id} = ${id}.props"));

        out.param(id.to_string(), Json::Object(row));
        out.declare(id);
        Ok(true)
    }
}

/// A persisted node whose labels or properties may change.
#[derive(Clone, Debug)]
pub struct ExistingNode {
    id: SymbolicId,
    node_id: NodeId,
    labels: LabelList,
    removed_labels: LabelList,
    props: PropertyRow,
}

impl ExistingNode {
    pub(crate) fn new(id: SymbolicId, node_id: NodeId) -> Self {
        Self {
            id,
            node_id,
            labels: LabelList::new(),
            removed_labels: LabelList::new(),
            props: PropertyRow::new(),
        }
    }

    /// Persisted id the intent matches on.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Labels to add, in insertion order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    /// Labels to remove, in insertion order.
    pub fn removed_labels(&self) -> impl Iterator<Item = &str> {
        self.removed_labels.iter().map(String::as_str)
    }

    fn has_changes(&self) -> bool {
        !self.labels.is_empty() || !self.removed_labels.is_empty() || !self.props.is_empty()
    }

    // [WITH ..] MATCH (_3) WHERE id(_3) = $_3.nodeId [REMOVE _3:Old] [SET _3:New] [SET _3 += $_3.props]
    fn emit(&self, out: &mut StatementBuilder) -> Result<bool> {
        let id = self.id;
        out.carry_declared();
        out.clause()
            .push_str(&format!("MATCH ({id}) WHERE id({id}) = ${id}.nodeId"));
        if !self.removed_labels.is_empty() {
            let clause = out.clause();
            clause.push_str(&format!("REMOVE {id}"));
            write_labels(clause, self.removed_labels());
        }
        if !self.labels.is_empty() {
            let clause = out.clause();
            clause.push_str(&format!("SET {id}"));
            write_labels(clause, self.labels());
        }
        let mut row = json!({ "nodeId": self.node_id.0 });
        if !self.props.is_empty() {
            out.clause().push_str(&format!("SET {id} += ${id}.props"));
            row["props"] = self.props.to_json();
        }
        out.param(id.to_string(), row);
        out.declare(id);
        Ok(false)
    }
}

/// Write intent for one node.
#[derive(Clone, Debug)]
pub enum NodeWriteIntent {
    /// Created or merged by this compile.
    New(NewNode),
    /// Matched by persisted id and patched.
    Existing(ExistingNode),
}

impl NodeWriteIntent {
    /// Query variable of this node.
    pub fn reference(&self) -> SymbolicId {
        match self {
            NodeWriteIntent::New(node) => node.id,
            NodeWriteIntent::Existing(node) => node.id,
        }
    }

    /// Persisted id, for existing nodes.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            NodeWriteIntent::New(_) => None,
            NodeWriteIntent::Existing(node) => Some(node.node_id),
        }
    }

    /// True for nodes created by this compile.
    pub fn is_new(&self) -> bool {
        matches!(self, NodeWriteIntent::New(_))
    }

    /// True when rendering would change the stored node.
    pub fn has_changes(&self) -> bool {
        match self {
            NodeWriteIntent::New(_) => true,
            NodeWriteIntent::Existing(node) => node.has_changes(),
        }
    }

    /// Adds a label. Repeated labels are ignored.
    pub fn add_label(&mut self, label: impl Into<String>) -> &mut Self {
        let label = label.into();
        match self {
            NodeWriteIntent::New(node) => {
                node.labels.insert(label);
            }
            NodeWriteIntent::Existing(node) => push_unique(&mut node.labels, label),
        }
        self
    }

    /// Removes a label from an existing node. Ignored on new nodes.
    pub fn remove_label(&mut self, label: impl Into<String>) -> &mut Self {
        if let NodeWriteIntent::Existing(node) = self {
            push_unique(&mut node.removed_labels, label.into());
        }
        self
    }

    /// Sets a property.
    pub fn add_property(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.props_mut().insert(key, value);
        self
    }

    /// Merges new nodes on `key` instead of creating them. Ignored on existing
    /// nodes, which already match by id.
    pub fn primary_index(&mut self, key: impl Into<String>) -> &mut Self {
        if let NodeWriteIntent::New(node) = self {
            node.primary_index = Some(key.into());
        }
        self
    }

    /// Pending properties.
    pub fn properties(&self) -> &PropertyRow {
        match self {
            NodeWriteIntent::New(node) => &node.props,
            NodeWriteIntent::Existing(node) => &node.props,
        }
    }

    fn props_mut(&mut self) -> &mut PropertyRow {
        match self {
            NodeWriteIntent::New(node) => &mut node.props,
            NodeWriteIntent::Existing(node) => &mut node.props,
        }
    }

    /// Appends this node's clauses to `out`.
    ///
    /// Returns whether the node contributes a variable to the RETURN clause.
    pub(crate) fn emit(&self, out: &mut StatementBuilder) -> Result<bool> {
        match self {
            NodeWriteIntent::New(node) => node.emit(out),
            NodeWriteIntent::Existing(node) => node.emit(out),
        }
    }
}

fn push_unique(labels: &mut LabelList, label: String) {
    if !labels.contains(&label) {
        labels.push(label);
    }
}
