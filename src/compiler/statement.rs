//! Rendered statements and the text/parameter assembly buffer behind them.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value as Json;

use super::identifiers::SymbolicId;

/// Statement parameters keyed by placeholder name.
pub type Parameters = BTreeMap<String, Json>;

/// Immutable query text plus the parameters it references.
///
/// Serializes to the `{"statement", "parameters"}` shape accepted by the
/// transactional HTTP endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Statement {
    #[serde(rename = "statement")]
    text: String,
    parameters: Parameters,
}

impl Statement {
    /// Builds a statement, checking that `parameters` covers exactly the
    /// `$name` placeholders of `text`.
    ///
    /// # Panics
    ///
    /// Panics on any mismatch. A mismatch means a builder rendered a
    /// placeholder without its row (or the reverse) and the statement must
    /// never reach a transport.
    pub fn new(text: impl Into<String>, parameters: Parameters) -> Self {
        let text = text.into();
        let referenced = placeholders(&text);
        let supplied: BTreeSet<&str> = parameters.keys().map(String::as_str).collect();
        if referenced != supplied {
            let missing: Vec<_> = referenced.difference(&supplied).collect();
            let orphan: Vec<_> = supplied.difference(&referenced).collect();
            panic!(
                "statement parameters out of sync with text: missing {missing:?}, orphan {orphan:?} in `{text}`"
            );
        }
        Self { text, parameters }
    }

    /// Query text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parameter map.
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Serializes the statement for the transport layer.
    pub fn to_json(&self) -> Json {
        serde_json::json!({
            "statement": self.text,
            "parameters": self.parameters,
        })
    }
}

/// Returns every `$name` placeholder in `text`, ignoring backtick-quoted
/// identifiers and single- or double-quoted string literals.
pub(crate) fn placeholders(text: &str) -> BTreeSet<&str> {
    let bytes = text.as_bytes();
    let mut found = BTreeSet::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'`' | b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'$' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                    end += 1;
                }
                if end > start {
                    found.insert(&text[start..end]);
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    found
}

/// Clause-by-clause text assembly for one statement.
///
/// Tracks the query variables declared so far so later clauses can carry
/// them across a `WITH`.
#[derive(Debug, Default)]
pub(crate) struct StatementBuilder {
    text: String,
    params: Parameters,
    declared: BTreeSet<SymbolicId>,
}

impl StatementBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Starts a new clause, separating it from the previous one.
    pub(crate) fn clause(&mut self) -> &mut String {
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        &mut self.text
    }

    /// Emits `WITH <declared>` when earlier clauses exist, as required before
    /// a read clause that follows an update clause.
    pub(crate) fn carry_declared(&mut self) {
        if self.text.is_empty() || self.declared.is_empty() {
            return;
        }
        let vars = join_ids(self.declared.iter());
        let out = self.clause();
        out.push_str("WITH ");
        out.push_str(&vars);
    }

    pub(crate) fn declare(&mut self, id: SymbolicId) {
        self.declared.insert(id);
    }

    pub(crate) fn is_declared(&self, id: SymbolicId) -> bool {
        self.declared.contains(&id)
    }

    pub(crate) fn param(&mut self, name: impl Into<String>, value: Json) {
        self.params.insert(name.into(), value);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub(crate) fn finish(self) -> Option<Statement> {
        if self.is_empty() {
            return None;
        }
        Some(Statement::new(self.text, self.params))
    }
}

pub(crate) fn join_ids<'a, I>(ids: I) -> String
where
    I: IntoIterator<Item = &'a SymbolicId>,
{
    let mut out = String::new();
    for (i, id) in ids.into_iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&id.to_string());
    }
    out
}
