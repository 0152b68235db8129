//! Relationship write intents and the per-type batches that render updates
//! and deletions.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value as Json};
use smallvec::{smallvec, SmallVec};

use super::escape::{type_param_name, write_identifier};
use super::identifiers::SymbolicId;
use super::mapped::Direction;
use super::statement::{Parameters, Statement, StatementBuilder};
use super::value::{PropertyRow, Value};
use crate::types::{CompileError, EntityRef, NodeId, RelId, Result};

/// A relationship created by this compile.
#[derive(Clone, Debug)]
pub struct NewRelationship {
    id: SymbolicId,
    rel_type: String,
    start: Option<SymbolicId>,
    end: Option<SymbolicId>,
    props: PropertyRow,
    singleton: bool,
    direction: Direction,
    entity: Option<EntityRef>,
}

impl NewRelationship {
    pub(crate) fn new(id: SymbolicId, rel_type: String, entity: Option<EntityRef>) -> Self {
        Self {
            id,
            rel_type,
            start: None,
            end: None,
            props: PropertyRow::new(),
            singleton: true,
            direction: Direction::Outgoing,
            entity,
        }
    }

    /// Declared start and end variables.
    pub fn endpoints(&self) -> (Option<SymbolicId>, Option<SymbolicId>) {
        (self.start, self.end)
    }

    /// Whether at most one relationship of this type may join the endpoints.
    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    /// Orientation of the stored relationship.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Owning object for relationship entities.
    pub fn entity(&self) -> Option<EntityRef> {
        self.entity
    }

    /// Relationship entities and relationships with properties carry per-row
    /// state that a shared batch block cannot express.
    pub fn needs_individual_rendering(&self) -> bool {
        self.entity.is_some() || !self.props.is_empty()
    }

    /// Orders `(a, b)` so the first element is where the stored relationship
    /// starts.
    pub fn oriented<T>(&self, a: T, b: T) -> (T, T) {
        match self.direction {
            Direction::Outgoing => (a, b),
            Direction::Incoming => (b, a),
        }
    }

    // MERGE (_0)-[_4:T {a: $_4.props.a}]->(_1)
    fn emit(&self, out: &mut StatementBuilder) -> Result<bool> {
        let start = resolved(out, self.start, self.id, &self.rel_type, "start")?;
        let end = resolved(out, self.end, self.id, &self.rel_type, "end")?;
        let keyword = if self.singleton { "MERGE" } else { "CREATE" };
        write_pattern(
            out,
            keyword,
            self.id,
            &self.rel_type,
            &self.props,
            (start, end),
            self.direction,
        );
        out.declare(self.id);
        Ok(true)
    }
}

/// A persisted relationship whose properties change.
#[derive(Clone, Debug)]
pub struct ExistingRelationship {
    id: SymbolicId,
    rel_type: String,
    rel_id: RelId,
    props: PropertyRow,
}

impl ExistingRelationship {
    pub(crate) fn new(id: SymbolicId, rel_type: String, rel_id: RelId) -> Self {
        Self {
            id,
            rel_type,
            rel_id,
            props: PropertyRow::new(),
        }
    }

    /// Persisted relationship id.
    pub fn rel_id(&self) -> RelId {
        self.rel_id
    }
}

/// A persisted relationship removed by this compile.
#[derive(Clone, Debug)]
pub struct DeletedRelationship {
    id: SymbolicId,
    rel_type: String,
    start: NodeId,
    end: NodeId,
    rel_id: Option<RelId>,
}

impl DeletedRelationship {
    pub(crate) fn new(
        id: SymbolicId,
        rel_type: String,
        start: NodeId,
        end: NodeId,
        rel_id: Option<RelId>,
    ) -> Self {
        Self {
            id,
            rel_type,
            start,
            end,
            rel_id,
        }
    }

    /// Persisted `(start, end)` pair.
    pub fn endpoints(&self) -> (NodeId, NodeId) {
        (self.start, self.end)
    }

    /// Persisted relationship id, when known.
    pub fn rel_id(&self) -> Option<RelId> {
        self.rel_id
    }
}

/// Two reciprocal relationships of one type between the same pair.
#[derive(Clone, Debug)]
pub struct BiDirectionalRelationship {
    id: SymbolicId,
    reverse: SymbolicId,
    rel_type: String,
    start: Option<SymbolicId>,
    end: Option<SymbolicId>,
    props: PropertyRow,
}

impl BiDirectionalRelationship {
    pub(crate) fn new(id: SymbolicId, reverse: SymbolicId, rel_type: String) -> Self {
        Self {
            id,
            reverse,
            rel_type,
            start: None,
            end: None,
            props: PropertyRow::new(),
        }
    }

    /// Variable of the `end -> start` relationship.
    pub fn reverse(&self) -> SymbolicId {
        self.reverse
    }

    // CREATE (_0)-[_4:T]->(_1) CREATE (_1)-[_5:T]->(_0)
    fn emit(&self, out: &mut StatementBuilder) -> Result<bool> {
        let start = resolved(out, self.start, self.id, &self.rel_type, "start")?;
        let end = resolved(out, self.end, self.id, &self.rel_type, "end")?;
        for (id, pair) in [(self.id, (start, end)), (self.reverse, (end, start))] {
            write_pattern(
                out,
                "CREATE",
                id,
                &self.rel_type,
                &self.props,
                pair,
                Direction::Outgoing,
            );
            out.declare(id);
        }
        Ok(true)
    }
}

/// Write intent for one relationship.
#[derive(Clone, Debug)]
pub enum RelationshipWriteIntent {
    /// Created by this compile.
    New(NewRelationship),
    /// Property patch on a persisted relationship.
    Existing(ExistingRelationship),
    /// Removal of a persisted relationship.
    Deleted(DeletedRelationship),
    /// Pair of reciprocal new relationships.
    BiDirectional(BiDirectionalRelationship),
}

impl RelationshipWriteIntent {
    /// Primary query variable of this intent.
    pub fn reference(&self) -> SymbolicId {
        match self {
            RelationshipWriteIntent::New(rel) => rel.id,
            RelationshipWriteIntent::Existing(rel) => rel.id,
            RelationshipWriteIntent::Deleted(rel) => rel.id,
            RelationshipWriteIntent::BiDirectional(rel) => rel.id,
        }
    }

    /// Every variable the intent owns.
    pub fn references(&self) -> SmallVec<[SymbolicId; 2]> {
        match self {
            RelationshipWriteIntent::BiDirectional(rel) => smallvec![rel.id, rel.reverse],
            other => smallvec![other.reference()],
        }
    }

    /// Relationship type.
    pub fn rel_type(&self) -> &str {
        match self {
            RelationshipWriteIntent::New(rel) => &rel.rel_type,
            RelationshipWriteIntent::Existing(rel) => &rel.rel_type,
            RelationshipWriteIntent::Deleted(rel) => &rel.rel_type,
            RelationshipWriteIntent::BiDirectional(rel) => &rel.rel_type,
        }
    }

    /// Node variables this intent connects, for intents that create
    /// relationships.
    pub fn endpoints(&self) -> Option<(Option<SymbolicId>, Option<SymbolicId>)> {
        match self {
            RelationshipWriteIntent::New(rel) => Some((rel.start, rel.end)),
            RelationshipWriteIntent::BiDirectional(rel) => Some((rel.start, rel.end)),
            _ => None,
        }
    }

    /// True when `node` is one of the connected node variables.
    pub fn touches(&self, node: SymbolicId) -> bool {
        matches!(self.endpoints(), Some((start, end)) if start == Some(node) || end == Some(node))
    }

    /// Sets a property. Ignored on deletions.
    pub fn add_property(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        match self {
            RelationshipWriteIntent::New(rel) => rel.props.insert(key, value),
            RelationshipWriteIntent::Existing(rel) => rel.props.insert(key, value),
            RelationshipWriteIntent::BiDirectional(rel) => rel.props.insert(key, value),
            RelationshipWriteIntent::Deleted(_) => {}
        }
        self
    }

    /// Connects two node variables. Ignored on persisted relationships.
    pub fn relate(&mut self, start: SymbolicId, end: SymbolicId) -> &mut Self {
        match self {
            RelationshipWriteIntent::New(rel) => {
                rel.start = Some(start);
                rel.end = Some(end);
            }
            RelationshipWriteIntent::BiDirectional(rel) => {
                rel.start = Some(start);
                rel.end = Some(end);
            }
            _ => {}
        }
        self
    }

    /// Sets the orientation of a new relationship.
    pub fn direction(&mut self, direction: Direction) -> &mut Self {
        if let RelationshipWriteIntent::New(rel) = self {
            rel.direction = direction;
        }
        self
    }

    /// Sets the singleton flag of a new relationship. Bidirectional pairs are
    /// never singletons, so the flag is ignored there.
    pub fn singleton(&mut self, singleton: bool) -> &mut Self {
        if let RelationshipWriteIntent::New(rel) = self {
            rel.singleton = singleton;
        }
        self
    }

    /// Pending properties.
    pub fn properties(&self) -> Option<&PropertyRow> {
        match self {
            RelationshipWriteIntent::New(rel) => Some(&rel.props),
            RelationshipWriteIntent::Existing(rel) => Some(&rel.props),
            RelationshipWriteIntent::BiDirectional(rel) => Some(&rel.props),
            RelationshipWriteIntent::Deleted(_) => None,
        }
    }

    /// Renders the intent.
    ///
    /// Creating intents append clauses to the main statement and return
    /// whether they expose RETURN variables; updates and deletions are
    /// collected into `batches` and always return false.
    pub(crate) fn emit(
        &self,
        main: &mut StatementBuilder,
        batches: &mut RelationshipBatches,
    ) -> Result<bool> {
        match self {
            RelationshipWriteIntent::New(rel) => rel.emit(main),
            RelationshipWriteIntent::BiDirectional(rel) => rel.emit(main),
            RelationshipWriteIntent::Existing(rel) => {
                batches.update(&rel.rel_type, rel.rel_id, &rel.props);
                Ok(false)
            }
            RelationshipWriteIntent::Deleted(rel) => {
                batches.delete(&rel.rel_type, rel.start, rel.end, rel.rel_id);
                Ok(false)
            }
        }
    }
}

fn resolved(
    out: &StatementBuilder,
    endpoint: Option<SymbolicId>,
    id: SymbolicId,
    rel_type: &str,
    end: &'static str,
) -> Result<SymbolicId> {
    match endpoint {
        Some(node) if out.is_declared(node) => Ok(node),
        _ => Err(CompileError::UnresolvedEndpoint {
            reference: id.to_string(),
            rel_type: rel_type.to_owned(),
            end,
        }),
    }
}

fn write_pattern(
    out: &mut StatementBuilder,
    keyword: &str,
    id: SymbolicId,
    rel_type: &str,
    props: &PropertyRow,
    (start, end): (SymbolicId, SymbolicId),
    direction: Direction,
) {
    let clause = out.clause();
    clause.push_str(keyword);
    clause.push_str(&format!(" ({start})"));
    clause.push_str(match direction {
        Direction::Outgoing => "-[",
        Direction::Incoming => "<-[",
    });
    clause.push_str(&id.to_string());
    clause.push(':');
    write_identifier(clause, rel_type);
    if !props.is_empty() {
        clause.push_str(" {");
        for (i, key) in props.keys().enumerate() {
            if i > 0 {
                clause.push_str(", ");
            }
            write_identifier(clause, key);
            clause.push_str(&format!(": ${id}.props."));
            write_identifier(clause, key);
        }
        clause.push('}');
    }
    clause.push_str(match direction {
        Direction::Outgoing => "]->",
        Direction::Incoming => "]-",
    });
    clause.push_str(&format!("({end})"));
    if !props.is_empty() {
        out.param(id.to_string(), json!({ "props": props.to_json() }));
    }
}

/// Identity of one relationship to delete.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
struct DeleteKey {
    rel_type: String,
    start: NodeId,
    end: NodeId,
}

/// Per-type rows for relationship updates and deletions, rendered as one
/// statement per type after the main statement.
#[derive(Debug, Default)]
pub(crate) struct RelationshipBatches {
    updates: BTreeMap<String, Vec<Json>>,
    deletes: BTreeMap<DeleteKey, Option<RelId>>,
}

impl RelationshipBatches {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues a property patch. Patches without properties are dropped.
    pub(crate) fn update(&mut self, rel_type: &str, rel_id: RelId, props: &PropertyRow) {
        if props.is_empty() {
            return;
        }
        self.updates
            .entry(rel_type.to_owned())
            .or_default()
            .push(json!({ "relId": rel_id.0, "props": props.to_json() }));
    }

    /// Queues a deletion. Repeated deletions of the same `(start, type, end)`
    /// collapse into one; a known relationship id wins over endpoint matching.
    pub(crate) fn delete(&mut self, rel_type: &str, start: NodeId, end: NodeId, rel_id: Option<RelId>) {
        let key = DeleteKey {
            rel_type: rel_type.to_owned(),
            start,
            end,
        };
        let slot = self.deletes.entry(key).or_insert(rel_id);
        if slot.is_none() {
            *slot = rel_id;
        }
    }

    pub(crate) fn has_updates(&self) -> bool {
        !self.updates.is_empty()
    }

    pub(crate) fn has_deletes(&self) -> bool {
        !self.deletes.is_empty()
    }

    /// Update statements by type, then delete statements by type.
    pub(crate) fn into_statements(self) -> Vec<Statement> {
        let mut statements = Vec::new();
        for (rel_type, rows) in self.updates {
            let param = type_param_name("rows", &rel_type, |_| false);
            let mut text = String::from("MATCH ()-[rel:");
            write_identifier(&mut text, &rel_type);
            text.push_str(&format!(
                "]->() WHERE id(rel) IN [r IN ${param} | r.relId] \
                 FOREACH (row IN [r IN ${param} WHERE r.relId = id(rel)] | SET rel += row.props)"
            ));
            statements.push(Statement::new(text, single(param, rows)));
        }

        let mut by_type: BTreeMap<String, (Vec<Json>, Vec<Json>)> = BTreeMap::new();
        for (key, rel_id) in self.deletes {
            let (by_endpoints, by_id) = by_type.entry(key.rel_type).or_default();
            match rel_id {
                Some(rel_id) => by_id.push(json!({ "relId": rel_id.0 })),
                None => by_endpoints.push(json!({
                    "startNodeId": key.start.0,
                    "endNodeId": key.end.0,
                })),
            }
        }
        for (rel_type, (by_endpoints, by_id)) in by_type {
            let param = type_param_name("rows", &rel_type, |_| false);
            let mut quoted = String::new();
            write_identifier(&mut quoted, &rel_type);
            if !by_endpoints.is_empty() {
                let text = format!(
                    "UNWIND ${param} AS row MATCH (start)-[rel:{quoted}]->(end) \
                     WHERE id(start) = row.startNodeId AND id(end) = row.endNodeId DELETE rel"
                );
                statements.push(Statement::new(text, single(param.clone(), by_endpoints)));
            }
            if !by_id.is_empty() {
                let text = format!(
                    "UNWIND ${param} AS row MATCH ()-[rel:{quoted}]->() WHERE id(rel) = row.relId DELETE rel"
                );
                statements.push(Statement::new(text, single(param, by_id)));
            }
        }
        statements
    }
}

fn single(name: String, rows: Vec<Json>) -> Parameters {
    let mut params = Parameters::new();
    params.insert(name, Json::Array(rows));
    params
}

/// Row shape shared by every optimized creation block.
pub(crate) fn creation_row(start: NodeId, end: NodeId, reference: SymbolicId) -> Json {
    let mut row = Map::new();
    row.insert("startNodeId".into(), json!(start.0));
    row.insert("endNodeId".into(), json!(end.0));
    row.insert("relRef".into(), json!(reference.to_string()));
    Json::Object(row)
}
