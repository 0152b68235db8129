use serde_json::json;
use sombra_ogm::compiler::{
    Compiler, CompilerConfig, Direction, EndpointPolicy, IdentityRow, Statement,
};
use sombra_ogm::types::{CompileError, EntityRef, NodeId, RelId, Result};

fn mixed_save(compiler: &mut Compiler) {
    let ada = compiler
        .new_node(EntityRef(1))
        .add_label("Person")
        .add_property("name", "Ada")
        .reference();
    let bob = compiler
        .existing_node(EntityRef(2), NodeId(20))
        .add_property("age", 36_i64)
        .reference();
    compiler
        .new_relationship("KNOWS")
        .relate(ada, bob)
        .add_property("since", 2020_i64);
    compiler
        .existing_relationship(RelId(7), "RATED")
        .add_property("stars", 4_i64);
    compiler.unrelate(NodeId(20), "LIKES", NodeId(30), None);
}

fn texts(statements: &[Statement]) -> Vec<&str> {
    statements.iter().map(Statement::text).collect()
}

#[test]
fn mixed_save_renders_phases_in_order() -> Result<()> {
    let mut compiler = Compiler::default();
    mixed_save(&mut compiler);
    let ctx = compiler.compile()?;
    assert_eq!(
        texts(ctx.statements()),
        vec![
            "CREATE (_0:Person) SET _0 = $_0.props \
             WITH _0 MATCH (_1) WHERE id(_1) = $_1.nodeId SET _1 += $_1.props \
             MERGE (_0)-[_2:KNOWS {since: $_2.props.since}]->(_1) \
             RETURN id(_0) AS _0, id(_2) AS _2",
            "MATCH ()-[rel:RATED]->() WHERE id(rel) IN [r IN $rowsRATED | r.relId] \
             FOREACH (row IN [r IN $rowsRATED WHERE r.relId = id(rel)] | SET rel += row.props)",
            "UNWIND $rowsLIKES AS row MATCH (start)-[rel:LIKES]->(end) \
             WHERE id(start) = row.startNodeId AND id(end) = row.endNodeId DELETE rel",
        ]
    );
    let main = &ctx.statements()[0];
    assert_eq!(main.parameters()["_0"], json!({"props": {"name": "Ada"}}));
    assert_eq!(main.parameters()["_1"], json!({"nodeId": 20, "props": {"age": 36}}));
    assert_eq!(main.parameters()["_2"], json!({"props": {"since": 2020}}));
    assert_eq!(
        ctx.statements()[2].parameters()["rowsLIKES"],
        json!([{"startNodeId": 20, "endNodeId": 30}])
    );
    Ok(())
}

#[test]
fn same_input_compiles_to_identical_statements() -> Result<()> {
    let mut first = Compiler::default();
    mixed_save(&mut first);
    let mut second = Compiler::default();
    mixed_save(&mut second);
    let a = first.compile()?;
    let b = second.compile()?;
    assert_eq!(a.statements(), b.statements());

    // a recycled compiler numbers variables as a fresh one does
    mixed_save(&mut first);
    let c = first.compile()?;
    let rendered: Vec<_> = c.statements().iter().map(Statement::to_json).collect();
    let expected: Vec<_> = a.statements().iter().map(Statement::to_json).collect();
    assert_eq!(rendered, expected);
    Ok(())
}

#[test]
fn repeated_visit_emits_one_fragment() -> Result<()> {
    let mut compiler = Compiler::default();
    for _ in 0..3 {
        compiler.new_node(EntityRef(1)).add_label("Person");
        compiler.existing_node(EntityRef(2), NodeId(9)).add_label("Admin");
    }
    let ctx = compiler.compile()?;
    let text = ctx.statements()[0].text();
    assert_eq!(text.matches("CREATE").count(), 1);
    assert_eq!(text.matches("MATCH").count(), 1);
    assert!(text.contains("SET _1:Admin"), "{text}");
    Ok(())
}

#[test]
fn existing_node_label_diff_keeps_clause_order() -> Result<()> {
    let mut compiler = Compiler::default();
    compiler
        .existing_node(EntityRef(1), NodeId(4))
        .remove_label("Foo")
        .add_label("Foo")
        .add_label("Bar");
    let ctx = compiler.compile()?;
    assert_eq!(
        texts(ctx.statements()),
        vec!["MATCH (_0) WHERE id(_0) = $_0.nodeId REMOVE _0:Foo SET _0:Foo:Bar"]
    );
    assert_eq!(ctx.statements()[0].parameters()["_0"], json!({"nodeId": 4}));
    Ok(())
}

#[test]
fn primary_index_merges_by_key() -> Result<()> {
    let mut compiler = Compiler::default();
    compiler
        .new_node(EntityRef(1))
        .add_label("User")
        .add_label("Account")
        .add_property("email", "ada@example.com")
        .primary_index("email");
    let ctx = compiler.compile()?;
    assert_eq!(
        texts(ctx.statements()),
        vec!["MERGE (_0:Account:User {email: $_0.primaryKey}) SET _0 = $_0.props RETURN id(_0) AS _0"]
    );
    assert_eq!(
        ctx.statements()[0].parameters()["_0"]["primaryKey"],
        json!("ada@example.com")
    );
    Ok(())
}

#[test]
fn missing_primary_key_always_fails() {
    let mut compiler = Compiler::new(CompilerConfig::lenient()).expect("config");
    compiler.new_node(EntityRef(1)).primary_index("email");
    let err = compiler.compile().expect_err("missing key");
    assert!(matches!(err, CompileError::MissingPrimaryKey { ref key, .. } if key == "email"));
}

#[test]
fn new_node_with_five_relationships_falls_back_to_generic() -> Result<()> {
    let mut compiler = Compiler::default();
    let hub = compiler.new_node(EntityRef(100)).add_label("Hub").reference();
    for i in 0..5u64 {
        let spoke = compiler.existing_node(EntityRef(i), NodeId(i)).reference();
        compiler.new_relationship("KNOWS").relate(hub, spoke);
    }
    assert!(!compiler.is_batchable());
    let ctx = compiler.compile()?;
    assert_eq!(ctx.statements().len(), 1);
    let text = ctx.statements()[0].text();
    assert!(!text.contains("UNWIND"), "{text}");
    assert_eq!(text.matches("MERGE (_0)-[").count(), 5);
    let returns = text.split("RETURN ").nth(1).expect("return clause");
    assert_eq!(returns.split(", ").count(), 6);
    assert_eq!(ctx.returned_references().count(), 6);
    Ok(())
}

#[test]
fn every_placeholder_has_a_parameter() -> Result<()> {
    let mut compiler = Compiler::default();
    mixed_save(&mut compiler);
    let a = compiler.existing_node(EntityRef(40), NodeId(40)).reference();
    let b = compiler.existing_node(EntityRef(41), NodeId(41)).reference();
    compiler
        .new_bidirectional_relationship("SIBLING")
        .relate(a, b)
        .add_property("weight", 0.5);
    compiler
        .new_relationship("FOLLOWS")
        .relate(a, b)
        .direction(Direction::Incoming)
        .singleton(false);
    let ctx = compiler.compile()?;
    for statement in ctx.statements() {
        for name in statement.parameters().keys() {
            assert!(
                statement.text().contains(&format!("${name}")),
                "{name} unused in {}",
                statement.text()
            );
        }
    }
    let main = ctx.statements()[0].text();
    assert!(main.contains("CREATE (_5)-[_7:SIBLING {weight: $_7.props.weight}]->(_6)"), "{main}");
    assert!(main.contains("CREATE (_6)-[_8:SIBLING {weight: $_8.props.weight}]->(_5)"), "{main}");
    assert!(main.contains("CREATE (_5)<-[_9:FOLLOWS]-(_6)"), "{main}");
    Ok(())
}

#[test]
fn unresolved_endpoint_fails_by_default() {
    let mut compiler = Compiler::default();
    let a = compiler.existing_node(EntityRef(1), NodeId(1)).reference();
    compiler.new_relationship("KNOWS").relate(a, a);
    compiler.new_relationship("ORPHAN");
    let err = compiler.compile().expect_err("unresolved");
    match err {
        CompileError::UnresolvedEndpoint {
            reference,
            rel_type,
            end,
        } => {
            assert_eq!(reference, "_2");
            assert_eq!(rel_type, "ORPHAN");
            assert_eq!(end, "start");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn unresolved_endpoint_is_skipped_when_lenient() -> Result<()> {
    let config = CompilerConfig {
        batch_relationships: false,
        endpoint_policy: EndpointPolicy::Skip,
        ..CompilerConfig::default()
    };
    let mut compiler = Compiler::new(config)?;
    let a = compiler.new_node(EntityRef(1)).add_label("A").reference();
    compiler.new_relationship("ORPHAN").relate(a, a);
    let detached = compiler.existing_node(EntityRef(2), NodeId(2)).reference();
    compiler.unmap(detached);
    compiler.new_relationship("DANGLING").relate(a, detached);
    let ctx = compiler.compile()?;
    assert_eq!(
        texts(ctx.statements()),
        vec!["CREATE (_0:A) SET _0 = $_0.props MERGE (_0)-[_1:ORPHAN]->(_0) RETURN id(_0) AS _0, id(_1) AS _1"]
    );
    Ok(())
}

#[test]
fn identities_backfill_created_entities() -> Result<()> {
    let mut compiler = Compiler::default();
    let a = compiler.new_node(EntityRef(1)).add_label("Person").reference();
    let b = compiler.existing_node(EntityRef(2), NodeId(20)).reference();
    let rated = compiler
        .new_relationship_entity(EntityRef(3), "RATED")
        .relate(a, b)
        .add_property("stars", 5_i64)
        .reference();
    let mut ctx = compiler.compile()?;
    let resolved = ctx.apply_identities(vec![
        IdentityRow::new(a.to_string(), 1000),
        IdentityRow::new(rated.to_string(), 2000),
    ])?;
    assert_eq!(resolved, vec![(EntityRef(1), 1000), (EntityRef(3), 2000)]);
    assert_eq!(ctx.resolve_id(rated), Some(2000));

    let err = ctx
        .apply_identities(vec![IdentityRow::new(b.to_string(), 20)])
        .expect_err("existing nodes are not returned");
    assert_eq!(err.code(), "UnknownReference");
    Ok(())
}

#[test]
fn released_relationship_is_not_rendered() -> Result<()> {
    let mut compiler = Compiler::default();
    let a = compiler.new_node(EntityRef(1)).reference();
    let rel = compiler.new_relationship("KNOWS").relate(a, a).reference();
    assert!(compiler.release(rel));
    assert!(!compiler.release(rel));
    let statements = compiler.statements()?;
    assert_eq!(
        texts(&statements),
        vec!["CREATE (_0) SET _0 = $_0.props RETURN id(_0) AS _0"]
    );
    Ok(())
}

#[test]
fn statement_serializes_to_transport_shape() -> Result<()> {
    let mut compiler = Compiler::default();
    compiler.new_node(EntityRef(1)).add_label("Tag").add_property("name", "rust");
    let statements = compiler.statements()?;
    let encoded = serde_json::to_value(&statements[0]).expect("serialize");
    assert_eq!(
        encoded,
        json!({
            "statement": "CREATE (_0:Tag) SET _0 = $_0.props RETURN id(_0) AS _0",
            "parameters": {"_0": {"props": {"name": "rust"}}}
        })
    );
    assert_eq!(encoded, statements[0].to_json());
    Ok(())
}
