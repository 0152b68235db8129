//! Compiles in-memory object-graph changes into ordered, parameterized
//! Cypher write statements.
//!
//! ```
//! use sombra_ogm::compiler::Compiler;
//! use sombra_ogm::types::{EntityRef, NodeId};
//!
//! let mut compiler = Compiler::default();
//! let alice = compiler.existing_node(EntityRef(1), NodeId(10)).reference();
//! let bob = compiler.existing_node(EntityRef(2), NodeId(20)).reference();
//! compiler.new_relationship("KNOWS").relate(alice, bob);
//! let ctx = compiler.compile().expect("compile");
//! assert_eq!(ctx.statements().len(), 1);
//! assert!(ctx.statements()[0].text().starts_with("UNWIND $rowsKNOWS AS row"));
//! ```

#![warn(missing_docs)]

pub mod compiler;
pub mod types;
