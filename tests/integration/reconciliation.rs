use std::sync::Once;

use sombra_ogm::compiler::{Compiler, MappedRelationship, Statement};
use sombra_ogm::types::{EntityKind, EntityRef, NodeId, RelId, Result};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("sombra_ogm=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn likes(start: u64, end: u64) -> MappedRelationship {
    MappedRelationship::new(NodeId(start), "LIKES", NodeId(end), "Person", "Movie")
}

fn deletes(statements: &[Statement]) -> usize {
    statements
        .iter()
        .filter(|statement| statement.text().contains("DELETE"))
        .count()
}

fn movie() -> EntityKind {
    EntityKind::from("Movie")
}

#[test]
fn deregister_then_register_renders_no_delete() -> Result<()> {
    init_tracing();
    let mut compiler = Compiler::default();
    compiler.context_mut().register_relationship(likes(1, 2));
    compiler
        .existing_node(EntityRef(1), NodeId(1))
        .add_property("name", "Ada");

    assert!(compiler.context_mut().deregister_outgoing(NodeId(1), "LIKES", &movie()));
    compiler.context_mut().register_relationship(likes(1, 2));

    assert!(compiler.context().is_registered(&likes(1, 2)));
    let ctx = compiler.compile()?;
    assert_eq!(deletes(ctx.statements()), 0);
    assert_eq!(ctx.statements().len(), 1);
    Ok(())
}

#[test]
fn single_clear_renders_one_delete() -> Result<()> {
    init_tracing();
    let mut compiler = Compiler::default();
    compiler.context_mut().register_relationship(likes(1, 2));
    compiler.context_mut().register_relationship(likes(1, 3));
    assert!(compiler.context_mut().deregister_outgoing(NodeId(1), "LIKES", &movie()));
    let ctx = compiler.compile()?;
    assert_eq!(deletes(ctx.statements()), 1);
    assert_eq!(
        ctx.statements()[0].parameters()["rowsLIKES"],
        serde_json::json!([
            {"startNodeId": 1, "endNodeId": 2},
            {"startNodeId": 1, "endNodeId": 3},
        ])
    );
    Ok(())
}

#[test]
fn double_clear_restores_the_relationship() -> Result<()> {
    init_tracing();
    let mut compiler = Compiler::default();
    compiler.context_mut().register_relationship(likes(1, 2));

    let first = compiler.context_mut().deregister_outgoing(NodeId(1), "LIKES", &movie());
    assert!(first);
    assert!(compiler.context().is_removed(&likes(1, 2)));

    let second = compiler.context_mut().deregister_outgoing(NodeId(1), "LIKES", &movie());
    assert!(!second, "a repeated clear reports the conflict");
    assert!(compiler.context().is_registered(&likes(1, 2)));
    assert_eq!(compiler.context().conflicts(), 1);

    let ctx = compiler.compile()?;
    assert_eq!(deletes(ctx.statements()), 0);
    Ok(())
}

#[test]
fn clearing_from_both_ends_deletes_once() -> Result<()> {
    init_tracing();
    let mut compiler = Compiler::default();
    compiler.context_mut().register_relationship(likes(1, 2));
    assert!(compiler.context_mut().deregister_outgoing(NodeId(1), "LIKES", &movie()));
    let person = EntityKind::from("Person");
    assert!(compiler.context_mut().deregister_incoming(NodeId(2), "LIKES", &person, false));
    assert!(compiler.context().is_removed(&likes(1, 2)));
    assert_eq!(compiler.context().conflicts(), 0);

    let ctx = compiler.compile()?;
    assert_eq!(deletes(ctx.statements()), 1);
    assert_eq!(
        ctx.statements()[0].parameters()["rowsLIKES"],
        serde_json::json!([{"startNodeId": 1, "endNodeId": 2}])
    );
    Ok(())
}

#[test]
fn recreating_an_unrelated_edge_keeps_it() -> Result<()> {
    init_tracing();
    let mut compiler = Compiler::default();
    let ada = compiler.existing_node(EntityRef(1), NodeId(1)).reference();
    let film = compiler.existing_node(EntityRef(2), NodeId(2)).reference();
    assert!(compiler.unrelate(NodeId(1), "LIKES", NodeId(2), None).is_some());
    let rel = compiler.new_relationship("LIKES").relate(ada, film).reference();

    let ctx = compiler.compile()?;
    assert_eq!(deletes(ctx.statements()), 0);
    assert_eq!(ctx.statements().len(), 1);
    assert!(ctx.returned_references().any(|id| id == rel));
    Ok(())
}

#[test]
fn recreating_a_cleared_edge_restores_it() -> Result<()> {
    init_tracing();
    let mut compiler = Compiler::default();
    compiler.context_mut().register_relationship(likes(1, 2));
    compiler.context_mut().register_relationship(likes(1, 3));
    assert!(compiler.context_mut().deregister_outgoing(NodeId(1), "LIKES", &movie()));
    let ada = compiler
        .existing_node(EntityRef(1), NodeId(1))
        .add_property("name", "Ada")
        .reference();
    let film = compiler.existing_node(EntityRef(2), NodeId(2)).reference();
    compiler.new_relationship("LIKES").relate(ada, film);

    let ctx = compiler.compile()?;
    let statements = ctx.statements();
    assert_eq!(statements.len(), 2);
    assert!(statements[0].text().contains("MERGE (_0)-[_2:LIKES]->(_1)"), "{}", statements[0].text());
    assert_eq!(
        statements[1].parameters()["rowsLIKES"],
        serde_json::json!([{"startNodeId": 1, "endNodeId": 3}])
    );
    assert!(ctx.is_registered(&likes(1, 2)));
    assert!(ctx.is_removed(&likes(1, 3)));
    Ok(())
}

#[test]
fn incoming_relationship_entities_delete_by_id() -> Result<()> {
    init_tracing();
    let mut compiler = Compiler::default();
    let rating = MappedRelationship::new(NodeId(1), "RATED", NodeId(2), "User", "Film")
        .with_rel_id(RelId(77));
    compiler.context_mut().register_relationship(rating.clone());

    let film = EntityKind::from("Film");
    let user = EntityKind::from("User");
    assert!(compiler.context_mut().deregister_incoming(NodeId(2), "RATED", &user, true));
    assert!(compiler.context().is_registered(&rating), "entity form compares the end kind");
    assert!(compiler.context_mut().deregister_incoming(NodeId(2), "RATED", &film, true));
    assert!(compiler.context().is_removed(&rating));

    let ctx = compiler.compile()?;
    assert_eq!(ctx.statements().len(), 1);
    let delete = &ctx.statements()[0];
    assert_eq!(
        delete.text(),
        "UNWIND $rowsRATED AS row MATCH ()-[rel:RATED]->() WHERE id(rel) = row.relId DELETE rel"
    );
    assert_eq!(delete.parameters()["rowsRATED"], serde_json::json!([{"relId": 77}]));
    Ok(())
}

#[test]
fn explicit_unrelate_and_reconciliation_delete_once() -> Result<()> {
    init_tracing();
    let mut compiler = Compiler::default();
    compiler.context_mut().register_relationship(likes(1, 2));
    assert!(compiler.context_mut().deregister_outgoing(NodeId(1), "LIKES", &movie()));
    assert!(compiler.unrelate(NodeId(1), "LIKES", NodeId(2), None).is_some());
    let ctx = compiler.compile()?;
    assert_eq!(deletes(ctx.statements()), 1);
    assert_eq!(
        ctx.statements()[0].parameters()["rowsLIKES"],
        serde_json::json!([{"startNodeId": 1, "endNodeId": 2}])
    );
    Ok(())
}

#[test]
fn removals_render_after_everything_else() -> Result<()> {
    init_tracing();
    let mut compiler = Compiler::default();
    compiler.context_mut().register_relationship(likes(1, 2));
    assert!(compiler.context_mut().deregister_outgoing(NodeId(1), "LIKES", &movie()));
    let ada = compiler.existing_node(EntityRef(1), NodeId(1)).reference();
    let film = compiler.new_node(EntityRef(5)).add_label("Movie").reference();
    compiler.new_relationship("LIKES").relate(ada, film);
    compiler
        .existing_relationship(RelId(3), "RATED")
        .add_property("stars", 2_i64);

    let ctx = compiler.compile()?;
    let statements = ctx.statements();
    assert_eq!(statements.len(), 3);
    assert!(statements[0].text().starts_with("CREATE (_1:Movie)"), "{}", statements[0].text());
    assert!(statements[1].text().starts_with("MATCH ()-[rel:RATED]"));
    assert!(statements[2].text().ends_with("DELETE rel"));
    Ok(())
}

#[test]
fn removed_registration_is_forgotten_without_delete() -> Result<()> {
    let mut compiler = Compiler::default();
    compiler.context_mut().register_relationship(likes(1, 2));
    assert!(compiler.context_mut().remove_registered_relationship(&likes(1, 2)));
    assert!(!compiler.context_mut().remove_registered_relationship(&likes(1, 2)));
    assert!(compiler.context_mut().deregister_outgoing(NodeId(1), "LIKES", &movie()));
    assert_eq!(compiler.statements()?.len(), 0);
    Ok(())
}
