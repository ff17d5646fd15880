//! # Core Type Definitions
//!
//! This module contains the data model shared by every layer of the engine:
//! - Graph identifiers (`Iri`, `Resource`, `RdfType`)
//! - Statement components (`Literal`, `Term`, `Statement`, `StatementPattern`)
//! - Session identity (`SessionId`)
//! - Error types (`EngineError`, `StoreError`)
//!
//! ## Ordering Guarantees
//!
//! Every type here implements `Ord`, so statement sets, type sets and cache
//! keys iterate in a deterministic order.

use crate::primitives::{RDF_LANG_STRING, XSD_STRING};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// An absolute IRI.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Iri(String);

impl Iri {
    /// Create a new IRI from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the IRI as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Iri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque graph-node identifier.
///
/// Resources are immutable. Renaming a resource produces a new identity;
/// the old one disappears once its statements have been migrated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Resource {
    /// A resource with a global IRI.
    Named(Iri),
    /// An anonymous (blank) node, identified by a store-local label.
    Blank(String),
}

impl Resource {
    /// Create a named resource.
    #[must_use]
    pub fn named(iri: impl Into<String>) -> Self {
        Self::Named(Iri::new(iri))
    }

    /// Create a blank node with the given label.
    #[must_use]
    pub fn blank(label: impl Into<String>) -> Self {
        Self::Blank(label.into())
    }

    /// Whether this resource is anonymous.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Blank(_))
    }

    /// The IRI of a named resource.
    #[must_use]
    pub fn iri(&self) -> Option<&Iri> {
        match self {
            Self::Named(iri) => Some(iri),
            Self::Blank(_) => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(iri) => write!(f, "<{}>", iri),
            Self::Blank(label) => write!(f, "_:{}", label),
        }
    }
}

impl From<Iri> for Resource {
    fn from(iri: Iri) -> Self {
        Self::Named(iri)
    }
}

/// A store-level class asserted on a resource through `rdf:type`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RdfType(pub Iri);

impl RdfType {
    /// Create a new type from an IRI string.
    #[must_use]
    pub fn new(iri: impl Into<String>) -> Self {
        Self(Iri::new(iri))
    }

    /// The class IRI.
    #[must_use]
    pub fn iri(&self) -> &Iri {
        &self.0
    }

    /// The class as a resource (the object of an `rdf:type` statement).
    #[must_use]
    pub fn as_resource(&self) -> Resource {
        Resource::Named(self.0.clone())
    }
}

impl fmt::Display for RdfType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

/// The set of types of one resource. Duplicate-free, order-irrelevant.
pub type TypeSet = BTreeSet<RdfType>;

/// Identifier of a session. Every entity is bound to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

// =============================================================================
// STATEMENT COMPONENTS
// =============================================================================

/// A literal value as stored: lexical form, datatype, optional language.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Literal {
    /// The lexical form.
    pub lexical: String,
    /// The datatype IRI.
    pub datatype: Iri,
    /// Language tag (only for `rdf:langString`).
    pub language: Option<String>,
}

impl Literal {
    /// Create a typed literal.
    #[must_use]
    pub fn typed(lexical: impl Into<String>, datatype: Iri) -> Self {
        Self {
            lexical: lexical.into(),
            datatype,
            language: None,
        }
    }

    /// Create an `xsd:string` literal.
    #[must_use]
    pub fn string(lexical: impl Into<String>) -> Self {
        Self::typed(lexical, Iri::new(XSD_STRING))
    }

    /// Create a language-tagged string.
    #[must_use]
    pub fn lang_string(lexical: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            lexical: lexical.into(),
            datatype: Iri::new(RDF_LANG_STRING),
            language: Some(language.into()),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.language {
            Some(lang) => write!(f, "{:?}@{}", self.lexical, lang),
            None => write!(f, "{:?}^^<{}>", self.lexical, self.datatype),
        }
    }
}

/// The object position of a statement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Term {
    /// A graph node.
    Resource(Resource),
    /// A literal value.
    Literal(Literal),
}

impl Term {
    /// The resource, if this term is one.
    #[must_use]
    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            Self::Resource(r) => Some(r),
            Self::Literal(_) => None,
        }
    }

    /// The literal, if this term is one.
    #[must_use]
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Self::Resource(_) => None,
            Self::Literal(l) => Some(l),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(r) => r.fmt(f),
            Self::Literal(l) => l.fmt(f),
        }
    }
}

impl From<Resource> for Term {
    fn from(r: Resource) -> Self {
        Self::Resource(r)
    }
}

impl From<Literal> for Term {
    fn from(l: Literal) -> Self {
        Self::Literal(l)
    }
}

impl From<RdfType> for Term {
    fn from(t: RdfType) -> Self {
        Self::Resource(t.as_resource())
    }
}

// =============================================================================
// STATEMENT
// =============================================================================

/// A single subject/predicate/object statement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Statement {
    /// The subject resource.
    pub subject: Resource,
    /// The predicate IRI.
    pub predicate: Iri,
    /// The object term.
    pub object: Term,
}

impl Statement {
    /// Create a new statement.
    #[must_use]
    pub fn new(subject: Resource, predicate: Iri, object: impl Into<Term>) -> Self {
        Self {
            subject,
            predicate,
            object: object.into(),
        }
    }

    /// Whether the resource occurs as subject or object.
    #[must_use]
    pub fn mentions(&self, resource: &Resource) -> bool {
        &self.subject == resource || self.object.as_resource() == Some(resource)
    }

    /// Copy of this statement with `before` replaced by `after` in the
    /// subject and object positions.
    #[must_use]
    pub fn substitute(&self, before: &Resource, after: &Resource) -> Self {
        let subject = if &self.subject == before {
            after.clone()
        } else {
            self.subject.clone()
        };
        let object = match &self.object {
            Term::Resource(r) if r == before => Term::Resource(after.clone()),
            other => other.clone(),
        };
        Self {
            subject,
            predicate: self.predicate.clone(),
            object,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> {} .", self.subject, self.predicate, self.object)
    }
}

/// A statement pattern; `None` positions match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementPattern {
    pub subject: Option<Resource>,
    pub predicate: Option<Iri>,
    pub object: Option<Term>,
}

impl StatementPattern {
    /// Pattern matching every statement.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Pattern on subject only.
    #[must_use]
    pub fn subject(subject: Resource) -> Self {
        Self {
            subject: Some(subject),
            ..Self::default()
        }
    }

    /// Pattern on object only.
    #[must_use]
    pub fn object(object: impl Into<Term>) -> Self {
        Self {
            object: Some(object.into()),
            ..Self::default()
        }
    }

    /// Restrict the predicate.
    #[must_use]
    pub fn with_predicate(mut self, predicate: Iri) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Restrict the object.
    #[must_use]
    pub fn with_object(mut self, object: impl Into<Term>) -> Self {
        self.object = Some(object.into());
        self
    }

    /// Check whether a statement matches this pattern.
    #[must_use]
    pub fn matches(&self, statement: &Statement) -> bool {
        self.subject.as_ref().is_none_or(|s| s == &statement.subject)
            && self
                .predicate
                .as_ref()
                .is_none_or(|p| p == &statement.predicate)
            && self.object.as_ref().is_none_or(|o| o == &statement.object)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Failures reported by a store adapter.
///
/// Backend errors (redb, postcard, ...) are stringified at the adapter
/// boundary; they never cross it in their raw form.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying storage failed.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A statement could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// `commit`/`rollback` without an active transaction.
    #[error("No active transaction")]
    NoActiveTransaction,

    /// `begin` while a transaction is already active.
    #[error("Transaction already active")]
    TransactionAlreadyActive,

    /// A concurrent writer invalidated this transaction.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    /// The adapter cannot evaluate the given query.
    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),
}

/// Errors surfaced by the mapping engine.
///
/// - No partial states: an entity is either fully constructed and bound,
///   or the call fails
/// - Use `Result<T, EngineError>` for fallible operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// A store adapter failed.
    #[error("Store failure: {0}")]
    Store(StoreError),

    /// The store rejected a transaction because of a concurrent writer.
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// An entity could not be constructed and bound.
    #[error("Cannot construct entity for {resource}: {reason}")]
    EntityConstruction { resource: Resource, reason: String },

    /// A single-result query produced no rows.
    #[error("Query produced no result")]
    NoResult,

    /// A single-result query produced more than one row.
    #[error("Query produced more than one result")]
    NonUniqueResult,

    /// A session cannot be closed while its transaction is open.
    #[error("Cannot close a session with an active transaction")]
    TransactionActive,

    /// The session has been closed.
    #[error("Session is closed")]
    SessionClosed,

    /// A name could not be resolved to a resource.
    #[error("Invalid resource name: {0}")]
    InvalidName(String),

    /// A literal could not be encoded or decoded.
    #[error("Literal codec error: {0}")]
    Codec(String),

    /// The engine configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(reason) => Self::TransactionConflict(reason),
            other => Self::Store(other),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
