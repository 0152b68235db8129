#![forbid(unsafe_code)]

//! Identifier newtypes and the error type shared across the compiler.

use std::fmt;

use thiserror::Error;

/// Persisted identity of a node in the graph.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub u64);

/// Persisted identity of a relationship in the graph.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RelId(pub u64);

/// Opaque identity key for a domain object supplied by the mapper.
///
/// The compiler never inspects it; it only compares references for equality
/// when deduplicating visits and when backfilling created identities.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EntityRef(pub u64);

/// Kind of the entity sitting at one end of a relationship (the mapped type
/// name on the object side).
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EntityKind(pub String);

impl EntityKind {
    /// Creates a kind from its type name.
    pub fn new(name: impl Into<String>) -> Self {
        EntityKind(name.into())
    }

    /// Returns the type name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityKind {
    fn from(value: &str) -> Self {
        EntityKind(value.to_owned())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

impl From<u64> for RelId {
    fn from(value: u64) -> Self {
        RelId(value)
    }
}

/// Errors surfaced synchronously by [`crate::compiler::Compiler::compile`]
/// and its collaborators.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A relationship intent names an endpoint that no node intent declares.
    #[error("relationship {reference} of type '{rel_type}' has an unresolved {end} endpoint")]
    UnresolvedEndpoint {
        /// Symbolic name of the offending relationship intent.
        reference: String,
        /// Relationship type of the offending intent.
        rel_type: String,
        /// Which end failed to resolve (`start` or `end`).
        end: &'static str,
    },
    /// A node declared a primary index but never set that property.
    #[error("node {reference} merges on '{key}' but the property is not set")]
    MissingPrimaryKey {
        /// Symbolic name of the node intent.
        reference: String,
        /// Primary index property name.
        key: String,
    },
    /// The transport reported an identity for a name this compile never issued.
    #[error("identity reported for unknown reference '{0}'")]
    UnknownReference(String),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// I/O error while reading configuration.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Configuration file was not valid TOML for [`crate::compiler::CompilerConfig`].
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CompileError>;

impl CompileError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::UnresolvedEndpoint { .. } => "UnresolvedEndpoint",
            CompileError::MissingPrimaryKey { .. } => "MissingPrimaryKey",
            CompileError::UnknownReference(_) => "UnknownReference",
            CompileError::InvalidConfig(_) => "InvalidConfig",
            CompileError::Io(_) => "Io",
            CompileError::Toml(_) => "InvalidConfig",
        }
    }
}
