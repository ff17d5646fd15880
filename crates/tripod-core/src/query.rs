//! # Query Binding
//!
//! Collaborator contracts for prepared queries, and the session-side
//! projection of their results into entities, decoded values, statements
//! and rows.
//!
//! Results are lazy: a `Results` iterator pulls one raw row at a time from
//! the store cursor and projects it on demand. The cursor is closed exactly
//! once, either explicitly, when the iterator is exhausted, or on drop.

use crate::codec::NativeValue;
use crate::entity::Entity;
use crate::session::Session;
use crate::{EngineError, Iri, Resource, Statement, StoreError, Term, TypeSet};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// =============================================================================
// COLLABORATOR CONTRACTS
// =============================================================================

/// Query languages a store may understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryLanguage {
    /// A single triple pattern, understood by the reference adapters.
    Pattern,
    /// SPARQL, for stores backed by an external evaluator.
    Sparql,
}

/// Variable name to value.
pub type BindingSet = BTreeMap<String, Term>;

/// A closable stream of query results.
pub trait Cursor<T>: Iterator<Item = Result<T, StoreError>> + Send {
    /// Release the underlying store resources. Further calls to `next`
    /// return `None`.
    fn close(&mut self);
}

/// Cursor over an already materialized result set.
#[derive(Debug)]
pub struct VecCursor<T> {
    items: std::vec::IntoIter<T>,
}

impl<T> VecCursor<T> {
    #[must_use]
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }
}

impl<T> Iterator for VecCursor<T> {
    type Item = Result<T, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next().map(Ok)
    }
}

impl<T: Send> Cursor<T> for VecCursor<T> {
    fn close(&mut self) {
        self.items = Vec::new().into_iter();
    }
}

/// The raw shape of a query result.
pub enum QueryResult {
    Tuple {
        columns: Vec<String>,
        rows: Box<dyn Cursor<BindingSet>>,
    },
    Graph(Box<dyn Cursor<Statement>>),
    Boolean(bool),
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tuple { columns, .. } => f
                .debug_struct("Tuple")
                .field("columns", columns)
                .finish_non_exhaustive(),
            Self::Graph(_) => f.write_str("Graph(..)"),
            Self::Boolean(value) => f.debug_tuple("Boolean").field(value).finish(),
        }
    }
}

/// A query prepared by a store, ready for binding and evaluation.
pub trait PreparedQuery: Send {
    /// Fix a variable to a value.
    fn set_binding(&mut self, name: &str, value: Term);

    /// The variables fixed so far.
    fn bindings(&self) -> &BindingSet;

    /// Whether inferred statements take part in evaluation.
    fn set_include_inferred(&mut self, include: bool);

    /// Ask the evaluator to stop after `limit` results. Returns `false`
    /// when limits are not supported.
    fn set_limit(&mut self, _limit: usize) -> bool {
        false
    }

    /// Run the query.
    fn evaluate(&mut self) -> Result<QueryResult, StoreError>;
}

// =============================================================================
// PROJECTION
// =============================================================================

/// How query results should be projected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResultType {
    /// Pick the projection from the result shape.
    #[default]
    Auto,
    /// Project resources as entities with these explicit types. For graph
    /// results, project the matched subjects.
    Entity(TypeSet),
    /// Decode literals towards this datatype.
    Value(Iri),
}

/// A multi-column result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    columns: Vec<String>,
    values: BindingSet,
}

impl Row {
    /// The effective columns, in projection order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Term> {
        self.values.get(column)
    }

    #[must_use]
    pub fn into_bindings(self) -> BindingSet {
        self.values
    }
}

/// One projected query result.
#[derive(Debug, Clone)]
pub enum Projected {
    Entity(Entity),
    Value(NativeValue),
    Statement(Statement),
    Boolean(bool),
    Row(Row),
}

impl Projected {
    #[must_use]
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Self::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_value(&self) -> Option<&NativeValue> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// A prepared query bound to a session.
pub struct TypedQuery<'s> {
    session: &'s mut Session,
    query: Box<dyn PreparedQuery>,
    first: usize,
    max: Option<usize>,
}

impl fmt::Debug for TypedQuery<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedQuery")
            .field("session", &self.session.id())
            .field("bindings", self.query.bindings())
            .field("first", &self.first)
            .field("max", &self.max)
            .finish()
    }
}

impl<'s> TypedQuery<'s> {
    pub(crate) fn new(
        session: &'s mut Session,
        mut query: Box<dyn PreparedQuery>,
        include_inferred: bool,
    ) -> Self {
        query.set_include_inferred(include_inferred);
        Self {
            session,
            query,
            first: 0,
            max: None,
        }
    }

    /// Fix a variable. Bound variables drop out of the effective columns.
    #[must_use]
    pub fn bind(mut self, name: &str, value: impl Into<Term>) -> Self {
        self.query.set_binding(name, value.into());
        self
    }

    #[must_use]
    pub fn include_inferred(mut self, include: bool) -> Self {
        self.query.set_include_inferred(include);
        self
    }

    /// Skip the first `n` raw results.
    #[must_use]
    pub fn first_result(mut self, n: usize) -> Self {
        self.first = n;
        self
    }

    /// Yield at most `n` results.
    #[must_use]
    pub fn max_results(mut self, n: usize) -> Self {
        self.max = Some(n);
        self
    }

    /// Evaluate and return a lazy result stream.
    pub fn evaluate(mut self, result_type: ResultType) -> Result<Results<'s>, EngineError> {
        // Entity projection collapses graph statements per subject, so a raw
        // row limit would undercount; `remaining` is enforced locally instead.
        let collapses = matches!(result_type, ResultType::Entity(_));
        if let Some(max) = self.max {
            let pushed = !collapses && self.query.set_limit(self.first.saturating_add(max));
            tracing::trace!(limit = max, pushed, "query limit");
        }

        let bound = self.query.bindings().clone();
        let source = match self.query.evaluate()? {
            QueryResult::Tuple { columns, rows } => {
                let effective: Vec<String> = columns
                    .into_iter()
                    .filter(|c| !bound.contains_key(c))
                    .collect();
                Source::Tuple {
                    columns: effective,
                    rows,
                }
            }
            QueryResult::Graph(statements) => Source::Graph(statements),
            QueryResult::Boolean(value) => Source::Boolean(Some(value)),
        };

        Ok(Results {
            session: self.session,
            source,
            to_skip: self.first,
            remaining: self.max,
            result_type,
            seen: BTreeSet::new(),
            closed: false,
        })
    }

    /// Evaluate expecting exactly one result.
    ///
    /// The cursor is closed exactly once whatever the outcome.
    pub fn single_result(self, result_type: ResultType) -> Result<Projected, EngineError> {
        let mut results = self.evaluate(result_type)?;
        let outcome = match results.next() {
            None => Err(EngineError::NoResult),
            Some(Err(e)) => Err(e),
            Some(Ok(first)) => match results.next() {
                None => Ok(first),
                Some(Err(e)) => Err(e),
                Some(Ok(_)) => Err(EngineError::NonUniqueResult),
            },
        };
        results.close();
        outcome
    }
}

enum Source {
    Tuple {
        columns: Vec<String>,
        rows: Box<dyn Cursor<BindingSet>>,
    },
    Graph(Box<dyn Cursor<Statement>>),
    Boolean(Option<bool>),
}

enum Raw {
    Row(BindingSet),
    Statement(Statement),
    Boolean(bool),
}

impl Source {
    fn next_raw(&mut self) -> Option<Result<Raw, StoreError>> {
        match self {
            Self::Tuple { rows, .. } => rows.next().map(|r| r.map(Raw::Row)),
            Self::Graph(statements) => statements.next().map(|r| r.map(Raw::Statement)),
            Self::Boolean(value) => value.take().map(|v| Ok(Raw::Boolean(v))),
        }
    }

    fn close(&mut self) {
        match self {
            Self::Tuple { rows, .. } => rows.close(),
            Self::Graph(statements) => statements.close(),
            Self::Boolean(value) => *value = None,
        }
    }
}

/// Lazy projected query results.
pub struct Results<'s> {
    session: &'s mut Session,
    source: Source,
    to_skip: usize,
    remaining: Option<usize>,
    result_type: ResultType,
    seen: BTreeSet<Resource>,
    closed: bool,
}

impl fmt::Debug for Results<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Results")
            .field("session", &self.session.id())
            .field("to_skip", &self.to_skip)
            .field("remaining", &self.remaining)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Results<'_> {
    /// Close the underlying cursor. Idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.source.close();
            tracing::trace!("query cursor closed");
        }
    }

    /// The effective columns of a tuple result.
    #[must_use]
    pub fn columns(&self) -> Option<&[String]> {
        match &self.source {
            Source::Tuple { columns, .. } => Some(columns),
            _ => None,
        }
    }

    fn explicit_types(&self) -> Option<TypeSet> {
        match &self.result_type {
            ResultType::Entity(types) if !types.is_empty() => Some(types.clone()),
            _ => None,
        }
    }

    fn project_term(&mut self, term: Term) -> Result<Projected, EngineError> {
        match term {
            Term::Resource(resource) => {
                let explicit = self.explicit_types();
                self.session
                    .lookup(&resource, explicit.as_ref())
                    .map(Projected::Entity)
            }
            Term::Literal(literal) => {
                let target = match &self.result_type {
                    ResultType::Value(datatype) => Some(datatype),
                    _ => None,
                };
                self.session
                    .decode_literal(&literal, target)
                    .map(Projected::Value)
            }
        }
    }

    /// Project one raw result. `None` means the result is filtered out.
    fn project(&mut self, raw: Raw) -> Option<Result<Projected, EngineError>> {
        match raw {
            Raw::Boolean(value) => Some(Ok(Projected::Boolean(value))),
            Raw::Statement(statement) => match self.result_type {
                ResultType::Entity(_) => {
                    if !self.seen.insert(statement.subject.clone()) {
                        return None;
                    }
                    Some(self.project_term(Term::Resource(statement.subject)))
                }
                _ => Some(Ok(Projected::Statement(statement))),
            },
            Raw::Row(mut values) => {
                let columns = match &self.source {
                    Source::Tuple { columns, .. } => columns.clone(),
                    _ => Vec::new(),
                };
                if let [column] = columns.as_slice() {
                    // Unbound in this row: nothing to project.
                    let term = values.remove(column)?;
                    return Some(self.project_term(term));
                }
                values.retain(|name, _| columns.contains(name));
                Some(Ok(Projected::Row(Row { columns, values })))
            }
        }
    }
}

impl Iterator for Results<'_> {
    type Item = Result<Projected, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        while self.to_skip > 0 {
            match self.source.next_raw() {
                None => {
                    self.close();
                    return None;
                }
                Some(Err(e)) => return Some(Err(e.into())),
                Some(Ok(_)) => self.to_skip -= 1,
            }
        }
        loop {
            if self.remaining == Some(0) {
                self.close();
                return None;
            }
            let raw = match self.source.next_raw() {
                None => {
                    self.close();
                    return None;
                }
                Some(Err(e)) => return Some(Err(e.into())),
                Some(Ok(raw)) => raw,
            };
            if let Some(projected) = self.project(raw) {
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                return Some(projected);
            }
        }
    }
}

impl Drop for Results<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// TESTS
// =============================================================================
