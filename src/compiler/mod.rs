#![forbid(unsafe_code)]

//! Write-statement compiler for object-graph saves.
//!
//! The mapper registers node and relationship write intents on a
//! [`Compiler`], records what it knows about persisted relationships on the
//! [`CompileContext`], and compiles once. Output is an ordered list of
//! parameterized [`Statement`]s executed inside one transaction.

/// Symbolic query variables and their allocator.
pub mod identifiers;

/// Node write intents.
///
/// New nodes render as `CREATE` or merge-by-key `MERGE`; existing nodes as a
/// `MATCH` by id followed by label and property patches.
pub mod node;

/// Relationship write intents.
///
/// Creations render inline in the main statement; updates and deletions
/// render as one batched statement per relationship type.
pub mod relationship;

/// Per-compile state: visit deduplication, relationship reconciliation and
/// identity backfill.
pub mod context;

/// Intent registry and generic rendering.
pub mod compile;

/// `UNWIND`/`UNION ALL` batching for relationship-only compiles.
mod optimizer;

/// Query text plus parameters.
pub mod statement;

/// Property values and rows.
pub mod value;

/// Persisted-relationship records used by reconciliation.
pub mod mapped;

mod escape;

/// Compiler configuration.
///
/// Loaded from TOML or built from presets.
pub mod config;

/// Opt-in compile counters.
pub mod profile;

pub use compile::Compiler;
pub use config::{CompilerConfig, EndpointPolicy};
pub use context::{CompileContext, IdentityRow};
pub use identifiers::{IdentifierManager, SymbolicId};
pub use mapped::{Direction, MappedRelationship};
pub use node::NodeWriteIntent;
pub use profile::{compile_profile_snapshot, CompileProfileSnapshot};
pub use relationship::RelationshipWriteIntent;
pub use statement::{Parameters, Statement};
pub use value::{PropertyRow, Value};
