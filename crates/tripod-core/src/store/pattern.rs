//! # Triple-Pattern Queries
//!
//! The reference adapters evaluate exactly one triple pattern:
//!
//! ```text
//! [select|construct|ask] <subject> <predicate> <object> [.]
//! ```
//!
//! Terms are `?var`, `<iri>`, `_:label`, `"literal"` (optionally
//! `"..."@lang` or `"..."^^<datatype>`), and `a` for `rdf:type` in the
//! predicate position. Anything richer belongs to an external query engine.

use crate::primitives::RDF_TYPE;
use crate::query::{BindingSet, PreparedQuery, QueryResult, VecCursor};
use crate::{Iri, Literal, Resource, Statement, StatementPattern, StoreError, Term};
use std::fmt;
use std::sync::Arc;

/// Callback that yields the statements matching a pattern at evaluation time.
pub(crate) type StatementSource =
    Arc<dyn Fn(&StatementPattern) -> Result<Vec<Statement>, StoreError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryForm {
    Select,
    Construct,
    Ask,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Var(String),
    Fixed(Term),
}

/// A prepared single-pattern query.
pub struct PatternQuery {
    form: QueryForm,
    slots: [Slot; 3],
    bindings: BindingSet,
    include_inferred: bool,
    limit: Option<usize>,
    source: StatementSource,
}

impl fmt::Debug for PatternQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternQuery")
            .field("form", &self.form)
            .field("slots", &self.slots)
            .field("bindings", &self.bindings)
            .field("include_inferred", &self.include_inferred)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl PatternQuery {
    /// Parse the query text.
    pub(crate) fn parse(text: &str, source: StatementSource) -> Result<Self, StoreError> {
        let mut tokens = tokenize(text)?;
        if tokens.last().map(String::as_str) == Some(".") {
            tokens.pop();
        }

        let form = match tokens.first().map(|t| t.to_ascii_lowercase()) {
            Some(keyword) if keyword == "select" => Some(QueryForm::Select),
            Some(keyword) if keyword == "construct" => Some(QueryForm::Construct),
            Some(keyword) if keyword == "ask" => Some(QueryForm::Ask),
            _ => None,
        };
        let terms = if form.is_some() { &tokens[1..] } else { &tokens[..] };

        let [subject, predicate, object] = terms else {
            return Err(StoreError::UnsupportedQuery(format!(
                "expected exactly one triple pattern, got {} terms",
                terms.len()
            )));
        };

        let slots = [
            parse_slot(subject, Position::Subject)?,
            parse_slot(predicate, Position::Predicate)?,
            parse_slot(object, Position::Object)?,
        ];

        Ok(Self {
            form: form.unwrap_or(QueryForm::Select),
            slots,
            bindings: BindingSet::new(),
            include_inferred: true,
            limit: None,
            source,
        })
    }

    /// Variables in order of first appearance.
    fn variables(&self) -> Vec<String> {
        let mut vars: Vec<String> = Vec::new();
        for slot in &self.slots {
            if let Slot::Var(name) = slot {
                if !vars.contains(name) {
                    vars.push(name.clone());
                }
            }
        }
        vars
    }

    fn resolve(&self, slot: &Slot) -> Option<Term> {
        match slot {
            Slot::Fixed(term) => Some(term.clone()),
            Slot::Var(name) => self.bindings.get(name).cloned(),
        }
    }

    /// The store pattern, or `None` when a bound value can never match.
    fn store_pattern(&self) -> Option<StatementPattern> {
        let subject = match self.resolve(&self.slots[0]) {
            None => None,
            Some(Term::Resource(r)) => Some(r),
            Some(Term::Literal(_)) => return None,
        };
        let predicate = match self.resolve(&self.slots[1]) {
            None => None,
            Some(Term::Resource(Resource::Named(iri))) => Some(iri),
            Some(_) => return None,
        };
        let object = self.resolve(&self.slots[2]);
        Some(StatementPattern {
            subject,
            predicate,
            object,
        })
    }

    /// One row per statement; statements inconsistent with a repeated
    /// variable are dropped.
    fn solutions(&self, statements: Vec<Statement>) -> Vec<(Statement, BindingSet)> {
        let mut out = Vec::new();
        'statements: for st in statements {
            let values = [
                Term::Resource(st.subject.clone()),
                Term::Resource(Resource::Named(st.predicate.clone())),
                st.object.clone(),
            ];
            let mut row = self.bindings.clone();
            for (slot, value) in self.slots.iter().zip(values) {
                if let Slot::Var(name) = slot {
                    match row.get(name) {
                        Some(existing) if existing != &value => continue 'statements,
                        Some(_) => {}
                        None => {
                            row.insert(name.clone(), value);
                        }
                    }
                }
            }
            out.push((st, row));
        }
        out
    }
}

impl PreparedQuery for PatternQuery {
    fn set_binding(&mut self, name: &str, value: Term) {
        self.bindings.insert(name.to_string(), value);
    }

    fn bindings(&self) -> &BindingSet {
        &self.bindings
    }

    fn set_include_inferred(&mut self, include: bool) {
        // The reference stores hold no inferred statements; the flag is kept
        // so callers can round-trip it.
        self.include_inferred = include;
    }

    fn set_limit(&mut self, limit: usize) -> bool {
        self.limit = Some(limit);
        true
    }

    fn evaluate(&mut self) -> Result<QueryResult, StoreError> {
        let mut solutions = match self.store_pattern() {
            Some(pattern) => self.solutions((self.source)(&pattern)?),
            None => Vec::new(),
        };
        if let Some(limit) = self.limit {
            solutions.truncate(limit);
        }

        Ok(match self.form {
            QueryForm::Ask => QueryResult::Boolean(!solutions.is_empty()),
            QueryForm::Construct => QueryResult::Graph(Box::new(VecCursor::new(
                solutions.into_iter().map(|(st, _)| st).collect(),
            ))),
            QueryForm::Select => QueryResult::Tuple {
                columns: self.variables(),
                rows: Box::new(VecCursor::new(
                    solutions.into_iter().map(|(_, row)| row).collect(),
                )),
            },
        })
    }
}

// =============================================================================
// PARSING
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Subject,
    Predicate,
    Object,
}

fn unsupported(msg: impl Into<String>) -> StoreError {
    StoreError::UnsupportedQuery(msg.into())
}

fn tokenize(text: &str) -> Result<Vec<String>, StoreError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut token = String::new();
        if c == '"' {
            token.push(c);
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                token.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        token.push(escaped);
                    }
                } else if c == '"' {
                    closed = true;
                    break;
                }
            }
            if !closed {
                return Err(unsupported("unterminated literal"));
            }
        }
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            token.push(c);
            chars.next();
        }
        tokens.push(token);
    }
    Ok(tokens)
}

fn parse_iri(token: &str) -> Option<Iri> {
    token
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
        .filter(|iri| !iri.is_empty())
        .map(Iri::new)
}

fn parse_literal(token: &str) -> Result<Literal, StoreError> {
    let body = &token[1..];
    let mut end = None;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => {
                end = Some(i);
                break;
            }
            _ => {}
        }
    }
    let end = end.ok_or_else(|| unsupported("unterminated literal"))?;
    let lexical = body[..end].replace("\\\"", "\"").replace("\\\\", "\\");
    let suffix = &body[end + 1..];

    if suffix.is_empty() {
        Ok(Literal::string(lexical))
    } else if let Some(lang) = suffix.strip_prefix('@') {
        Ok(Literal::lang_string(lexical, lang))
    } else if let Some(datatype) = suffix.strip_prefix("^^").and_then(parse_iri) {
        Ok(Literal::typed(lexical, datatype))
    } else {
        Err(unsupported(format!("bad literal suffix: {}", suffix)))
    }
}

fn parse_slot(token: &str, position: Position) -> Result<Slot, StoreError> {
    if let Some(name) = token.strip_prefix('?').or_else(|| token.strip_prefix('$')) {
        if name.is_empty() {
            return Err(unsupported("empty variable name"));
        }
        return Ok(Slot::Var(name.to_string()));
    }
    if position == Position::Predicate && token == "a" {
        return Ok(Slot::Fixed(Term::Resource(Resource::named(RDF_TYPE))));
    }
    if let Some(iri) = parse_iri(token) {
        return Ok(Slot::Fixed(Term::Resource(Resource::Named(iri))));
    }
    if position != Position::Predicate {
        if let Some(label) = token.strip_prefix("_:") {
            return Ok(Slot::Fixed(Term::Resource(Resource::blank(label))));
        }
    }
    if position == Position::Object && token.starts_with('"') {
        return Ok(Slot::Fixed(Term::Literal(parse_literal(token)?)));
    }
    Err(unsupported(format!(
        "unrecognized {:?} term: {}",
        position, token
    )))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn data() -> Vec<Statement> {
        let knows = Iri::new("http://ex/knows");
        let name = Iri::new("http://ex/name");
        vec![
            Statement::new(Resource::named("http://ex/a"), knows.clone(), Resource::named("http://ex/b")),
            Statement::new(Resource::named("http://ex/a"), knows.clone(), Resource::named("http://ex/a")),
            Statement::new(Resource::named("http://ex/b"), knows, Resource::named("http://ex/c")),
            Statement::new(Resource::named("http://ex/a"), name, Literal::string("A b")),
        ]
    }

    fn source() -> StatementSource {
        let statements = data();
        Arc::new(move |pattern: &StatementPattern| {
            Ok(statements
                .iter()
                .filter(|st| pattern.matches(st))
                .cloned()
                .collect())
        })
    }

    fn rows(result: QueryResult) -> (Vec<String>, Vec<BindingSet>) {
        match result {
            QueryResult::Tuple { columns, rows } => (
                columns,
                rows.collect::<Result<Vec<_>, _>>().expect("rows"),
            ),
            other => panic!("expected tuple result, got {:?}", other),
        }
    }

    #[test]
    fn select_projects_variables_in_order() {
        let mut q = PatternQuery::parse("?s <http://ex/knows> ?o", source()).expect("parse");
        let (columns, rows) = rows(q.evaluate().expect("evaluate"));
        assert_eq!(columns, vec!["s".to_string(), "o".to_string()]);
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn bound_variable_restricts_matches() {
        let mut q = PatternQuery::parse("select ?s <http://ex/knows> ?o .", source()).expect("parse");
        q.set_binding("s", Term::Resource(Resource::named("http://ex/b")));
        let (_, rows) = rows(q.evaluate().expect("evaluate"));
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].get("o"),
            Some(&Term::Resource(Resource::named("http://ex/c")))
        );
    }

    #[test]
    fn repeated_variable_must_agree() {
        let mut q = PatternQuery::parse("?x <http://ex/knows> ?x", source()).expect("parse");
        let (_, rows) = rows(q.evaluate().expect("evaluate"));
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn literal_with_spaces_parses() {
        let mut q = PatternQuery::parse("ask ?s <http://ex/name> \"A b\"", source()).expect("parse");
        assert!(matches!(q.evaluate().expect("evaluate"), QueryResult::Boolean(true)));
    }

    #[test]
    fn construct_returns_graph() {
        let mut q = PatternQuery::parse("construct <http://ex/a> ?p ?o", source()).expect("parse");
        match q.evaluate().expect("evaluate") {
            QueryResult::Graph(cursor) => assert_eq!(cursor.count(), 3),
            other => panic!("expected graph result, got {:?}", other),
        }
    }

    #[test]
    fn limit_truncates() {
        let mut q = PatternQuery::parse("?s ?p ?o", source()).expect("parse");
        assert!(q.set_limit(2));
        let (_, rows) = rows(q.evaluate().expect("evaluate"));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn malformed_queries_are_rejected() {
        assert!(PatternQuery::parse("?s ?p", source()).is_err());
        assert!(PatternQuery::parse("?s \"lit\" ?o", source()).is_err());
        assert!(PatternQuery::parse("?s <p> \"open", source()).is_err());
    }
}
