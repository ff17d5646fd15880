//! # In-Memory Repository
//!
//! A volatile triple store backed by a `BTreeSet<Statement>`.
//!
//! The statement set sits behind an `RwLock`; a commit applies the whole
//! staged batch under one write lock, then publishes the batch on the
//! change bus.

use super::pattern::{PatternQuery, StatementSource};
use super::{PendingChanges, Repository, StoreConnection};
use crate::change::{ChangeBus, ChangeEvent, StatementChange};
use crate::primitives::DEFAULT_NAMESPACES;
use crate::query::{PreparedQuery, QueryLanguage};
use crate::{Iri, Resource, Statement, StatementPattern, StoreError, Term};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct MemoryState {
    statements: RwLock<BTreeSet<Statement>>,
    namespaces: RwLock<BTreeMap<String, Iri>>,
    changes: ChangeBus,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Smallest statement with the given subject, used as a range start.
fn subject_floor(subject: &Resource) -> Statement {
    Statement::new(
        subject.clone(),
        Iri::new(""),
        Term::Resource(Resource::Named(Iri::new(""))),
    )
}

fn committed_matches(state: &MemoryState, pattern: &StatementPattern) -> Vec<Statement> {
    let statements = read(&state.statements);
    match &pattern.subject {
        Some(subject) => statements
            .range(subject_floor(subject)..)
            .take_while(|st| &st.subject == subject)
            .filter(|st| pattern.matches(st))
            .cloned()
            .collect(),
        None => statements
            .iter()
            .filter(|st| pattern.matches(st))
            .cloned()
            .collect(),
    }
}

/// Shared in-memory triple store.
///
/// Cloning the repository yields another handle to the same statements.
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    state: Arc<MemoryState>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    /// Create an empty repository with the default namespace prefixes.
    #[must_use]
    pub fn new() -> Self {
        let state = MemoryState::default();
        {
            let mut namespaces = write(&state.namespaces);
            for (prefix, ns) in DEFAULT_NAMESPACES {
                namespaces.insert((*prefix).to_string(), Iri::new(*ns));
            }
        }
        Self {
            state: Arc::new(state),
        }
    }

    /// Create a repository pre-populated with statements.
    ///
    /// Seeding does not publish change events.
    #[must_use]
    pub fn with_statements(statements: impl IntoIterator<Item = Statement>) -> Self {
        let repo = Self::new();
        write(&repo.state.statements).extend(statements);
        repo
    }

    /// Register a namespace prefix.
    pub fn set_namespace(&self, prefix: impl Into<String>, namespace: Iri) {
        write(&self.state.namespaces).insert(prefix.into(), namespace);
    }

    /// Snapshot of every committed statement.
    #[must_use]
    pub fn statements(&self) -> Vec<Statement> {
        read(&self.state.statements).iter().cloned().collect()
    }

    /// Number of committed statements.
    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.state.statements).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Repository for MemoryRepository {
    fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
            pending: None,
        }))
    }

    fn changes(&self) -> &ChangeBus {
        &self.state.changes
    }
}

/// A connection to a `MemoryRepository`.
#[derive(Debug)]
pub struct MemoryConnection {
    state: Arc<MemoryState>,
    pending: Option<PendingChanges>,
}

impl StoreConnection for MemoryConnection {
    fn add(&mut self, statement: &Statement) -> Result<(), StoreError> {
        match self.pending.as_mut() {
            Some(pending) => {
                let committed = read(&self.state.statements).contains(statement);
                pending.stage_add(statement, committed);
            }
            None => {
                let inserted = write(&self.state.statements).insert(statement.clone());
                if inserted {
                    self.state
                        .changes
                        .publish(ChangeEvent::new(vec![StatementChange::added(
                            statement.clone(),
                        )]));
                }
            }
        }
        Ok(())
    }

    fn remove(&mut self, statement: &Statement) -> Result<(), StoreError> {
        match self.pending.as_mut() {
            Some(pending) => {
                let committed = read(&self.state.statements).contains(statement);
                pending.stage_remove(statement, committed);
            }
            None => {
                let removed = write(&self.state.statements).remove(statement);
                if removed {
                    self.state
                        .changes
                        .publish(ChangeEvent::new(vec![StatementChange::removed(
                            statement.clone(),
                        )]));
                }
            }
        }
        Ok(())
    }

    fn find_statements(&self, pattern: &StatementPattern) -> Result<Vec<Statement>, StoreError> {
        let committed = committed_matches(&self.state, pattern);
        Ok(match &self.pending {
            Some(pending) => pending.overlay(committed, pattern),
            None => committed,
        })
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if self.pending.is_some() {
            return Err(StoreError::TransactionAlreadyActive);
        }
        self.pending = Some(PendingChanges::default());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let pending = self.pending.take().ok_or(StoreError::NoActiveTransaction)?;
        {
            let mut statements = write(&self.state.statements);
            for st in pending.removed() {
                statements.remove(st);
            }
            for st in pending.added() {
                statements.insert(st.clone());
            }
        }
        self.state.changes.publish(pending.into_event());
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.pending
            .take()
            .map(|_| ())
            .ok_or(StoreError::NoActiveTransaction)
    }

    fn is_active(&self) -> bool {
        self.pending.is_some()
    }

    fn prepare_query(
        &self,
        language: QueryLanguage,
        text: &str,
    ) -> Result<Box<dyn PreparedQuery>, StoreError> {
        if language != QueryLanguage::Pattern {
            return Err(StoreError::UnsupportedQuery(format!(
                "{:?} queries are not supported by the in-memory store",
                language
            )));
        }
        let state = Arc::clone(&self.state);
        let pending = self.pending.clone();
        let source: StatementSource = Arc::new(move |pattern: &StatementPattern| {
            let committed = committed_matches(&state, pattern);
            Ok(match &pending {
                Some(p) => p.overlay(committed, pattern),
                None => committed,
            })
        });
        Ok(Box::new(PatternQuery::parse(text, source)?))
    }

    fn namespaces(&self) -> Result<BTreeMap<String, Iri>, StoreError> {
        Ok(read(&self.state.namespaces).clone())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeKind;

    fn st(s: &str, o: &str) -> Statement {
        Statement::new(
            Resource::named(s),
            Iri::new("http://ex/p"),
            Resource::named(o),
        )
    }

    #[test]
    fn autocommit_add_is_visible_to_other_connections() {
        let repo = MemoryRepository::new();
        let mut a = repo.connect().expect("connect");
        let b = repo.connect().expect("connect");

        a.add(&st("http://ex/a", "http://ex/b")).expect("add");
        assert!(b.contains(&st("http://ex/a", "http://ex/b")).expect("contains"));
    }

    #[test]
    fn staged_writes_are_private_until_commit() {
        let repo = MemoryRepository::new();
        let mut a = repo.connect().expect("connect");
        let b = repo.connect().expect("connect");

        a.begin().expect("begin");
        a.add(&st("http://ex/a", "http://ex/b")).expect("add");
        assert!(a.contains(&st("http://ex/a", "http://ex/b")).expect("contains"));
        assert!(!b.contains(&st("http://ex/a", "http://ex/b")).expect("contains"));

        a.commit().expect("commit");
        assert!(b.contains(&st("http://ex/a", "http://ex/b")).expect("contains"));
    }

    #[test]
    fn rollback_discards() {
        let repo = MemoryRepository::new();
        let mut conn = repo.connect().expect("connect");
        conn.begin().expect("begin");
        conn.add(&st("http://ex/a", "http://ex/b")).expect("add");
        conn.rollback().expect("rollback");
        assert!(repo.is_empty());
        assert!(!conn.is_active());
    }

    #[test]
    fn commit_publishes_one_event() {
        let repo = MemoryRepository::with_statements(vec![st("http://ex/a", "http://ex/old")]);
        let sub = repo.changes().subscribe();
        let mut conn = repo.connect().expect("connect");

        conn.begin().expect("begin");
        conn.remove(&st("http://ex/a", "http://ex/old")).expect("remove");
        conn.add(&st("http://ex/a", "http://ex/new")).expect("add");
        conn.commit().expect("commit");

        let events = sub.drain();
        assert_eq!(events.len(), 1);
        let kinds: Vec<_> = events[0].changes.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Removed, ChangeKind::Added]);
    }

    #[test]
    fn duplicate_add_publishes_nothing() {
        let repo = MemoryRepository::with_statements(vec![st("http://ex/a", "http://ex/b")]);
        let sub = repo.changes().subscribe();
        let mut conn = repo.connect().expect("connect");
        conn.add(&st("http://ex/a", "http://ex/b")).expect("add");
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn subject_range_scan_matches_filter() {
        let repo = MemoryRepository::with_statements(vec![
            st("http://ex/a", "http://ex/b"),
            st("http://ex/a", "http://ex/c"),
            st("http://ex/b", "http://ex/c"),
        ]);
        let conn = repo.connect().expect("connect");
        let found = conn
            .find_statements(&StatementPattern::subject(Resource::named("http://ex/a")))
            .expect("find");
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn commit_without_begin_fails() {
        let repo = MemoryRepository::new();
        let mut conn = repo.connect().expect("connect");
        assert!(matches!(conn.commit(), Err(StoreError::NoActiveTransaction)));
        assert!(matches!(conn.rollback(), Err(StoreError::NoActiveTransaction)));
    }

    #[test]
    fn default_namespaces_present() {
        let repo = MemoryRepository::new();
        let conn = repo.connect().expect("connect");
        let ns = conn.namespaces().expect("namespaces");
        assert!(ns.contains_key("rdf"));
        assert!(ns.contains_key("xsd"));
    }
}
