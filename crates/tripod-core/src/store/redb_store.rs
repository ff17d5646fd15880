//! # redb-backed Repository
//!
//! A persistent triple store on the redb embedded database:
//! - ACID commits (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//! - Zero configuration
//!
//! Statements are stored as postcard-encoded keys. postcard writes the
//! subject first, so every statement of one subject shares the encoded
//! subject as a key prefix and subject lookups are a single range scan.

use super::pattern::{PatternQuery, StatementSource};
use super::{PendingChanges, Repository, StoreConnection};
use crate::change::{ChangeBus, ChangeEvent, StatementChange};
use crate::primitives::DEFAULT_NAMESPACES;
use crate::query::{PreparedQuery, QueryLanguage};
use crate::{Iri, Statement, StatementPattern, StoreError};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Table for statements: postcard(Statement) -> ()
const STATEMENTS: TableDefinition<&[u8], ()> = TableDefinition::new("statements");

/// Table for namespaces: prefix -> namespace IRI
const NAMESPACES: TableDefinition<&str, &str> = TableDefinition::new("namespaces");

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn encode(statement: &Statement) -> Result<Vec<u8>, StoreError> {
    postcard::to_allocvec(statement).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<Statement, StoreError> {
    postcard::from_bytes(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn committed_matches(
    db: &Database,
    pattern: &StatementPattern,
) -> Result<Vec<Statement>, StoreError> {
    let read_txn = db.begin_read().map_err(backend)?;
    let table = read_txn.open_table(STATEMENTS).map_err(backend)?;

    let mut found = Vec::new();
    match &pattern.subject {
        Some(subject) => {
            let prefix = postcard::to_allocvec(subject)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            for entry in table.range(prefix.as_slice()..).map_err(backend)? {
                let (key, _) = entry.map_err(backend)?;
                if !key.value().starts_with(&prefix) {
                    break;
                }
                let statement = decode(key.value())?;
                if pattern.matches(&statement) {
                    found.push(statement);
                }
            }
        }
        None => {
            for entry in table.iter().map_err(backend)? {
                let (key, _) = entry.map_err(backend)?;
                let statement = decode(key.value())?;
                if pattern.matches(&statement) {
                    found.push(statement);
                }
            }
        }
    }
    found.sort();
    Ok(found)
}

fn committed_contains(db: &Database, statement: &Statement) -> Result<bool, StoreError> {
    let key = encode(statement)?;
    let read_txn = db.begin_read().map_err(backend)?;
    let table = read_txn.open_table(STATEMENTS).map_err(backend)?;
    Ok(table.get(key.as_slice()).map_err(backend)?.is_some())
}

/// A persistent triple store.
///
/// Cloning the repository yields another handle to the same database.
#[derive(Clone)]
pub struct RedbRepository {
    db: Arc<Database>,
    changes: ChangeBus,
}

impl std::fmt::Debug for RedbRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRepository")
            .field("listeners", &self.changes.listener_count())
            .finish_non_exhaustive()
    }
}

impl RedbRepository {
    /// Open or create a repository at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(backend)?;

        // Initialize tables and seed the default prefixes
        {
            let write_txn = db.begin_write().map_err(backend)?;
            let _ = write_txn.open_table(STATEMENTS).map_err(backend)?;
            {
                let mut namespaces = write_txn.open_table(NAMESPACES).map_err(backend)?;
                for (prefix, ns) in DEFAULT_NAMESPACES {
                    if namespaces.get(*prefix).map_err(backend)?.is_none() {
                        namespaces.insert(*prefix, *ns).map_err(backend)?;
                    }
                }
            }
            write_txn.commit().map_err(backend)?;
        }

        tracing::debug!(path = %path.as_ref().display(), "redb repository opened");
        Ok(Self {
            db: Arc::new(db),
            changes: ChangeBus::new(),
        })
    }

    /// Register a namespace prefix.
    pub fn set_namespace(&self, prefix: &str, namespace: &Iri) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = write_txn.open_table(NAMESPACES).map_err(backend)?;
            table.insert(prefix, namespace.as_str()).map_err(backend)?;
        }
        write_txn.commit().map_err(backend)
    }

    /// Every committed statement, in statement order.
    pub fn statements(&self) -> Result<Vec<Statement>, StoreError> {
        committed_matches(&self.db, &StatementPattern::any())
    }

    /// Number of committed statements.
    pub fn len(&self) -> Result<u64, StoreError> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(STATEMENTS).map_err(backend)?;
        table.len().map_err(backend)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<bool, StoreError> {
        match Arc::get_mut(&mut self.db) {
            Some(db) => db.compact().map_err(backend),
            None => Err(StoreError::Backend(
                "cannot compact while connections are open".to_string(),
            )),
        }
    }
}

impl Repository for RedbRepository {
    fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        Ok(Box::new(RedbConnection {
            db: Arc::clone(&self.db),
            changes: self.changes.clone(),
            pending: None,
        }))
    }

    fn changes(&self) -> &ChangeBus {
        &self.changes
    }
}

/// A connection to a `RedbRepository`.
pub struct RedbConnection {
    db: Arc<Database>,
    changes: ChangeBus,
    pending: Option<PendingChanges>,
}

impl std::fmt::Debug for RedbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbConnection")
            .field("active", &self.pending.is_some())
            .finish_non_exhaustive()
    }
}

impl RedbConnection {
    /// Apply additions and removals in one write transaction.
    ///
    /// Returns the changes that actually altered the table.
    fn apply(
        &self,
        removed: Vec<&Statement>,
        added: Vec<&Statement>,
    ) -> Result<Vec<StatementChange>, StoreError> {
        let mut applied = Vec::new();
        let write_txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = write_txn.open_table(STATEMENTS).map_err(backend)?;
            for statement in removed {
                let key = encode(statement)?;
                if table.remove(key.as_slice()).map_err(backend)?.is_some() {
                    applied.push(StatementChange::removed(statement.clone()));
                }
            }
            for statement in added {
                let key = encode(statement)?;
                if table.insert(key.as_slice(), ()).map_err(backend)?.is_none() {
                    applied.push(StatementChange::added(statement.clone()));
                }
            }
        }
        write_txn.commit().map_err(backend)?;
        Ok(applied)
    }
}

impl StoreConnection for RedbConnection {
    fn add(&mut self, statement: &Statement) -> Result<(), StoreError> {
        if self.pending.is_some() {
            let committed = committed_contains(&self.db, statement)?;
            if let Some(pending) = self.pending.as_mut() {
                pending.stage_add(statement, committed);
            }
            return Ok(());
        }
        let applied = self.apply(Vec::new(), vec![statement])?;
        self.changes.publish(ChangeEvent::new(applied));
        Ok(())
    }

    fn remove(&mut self, statement: &Statement) -> Result<(), StoreError> {
        if self.pending.is_some() {
            let committed = committed_contains(&self.db, statement)?;
            if let Some(pending) = self.pending.as_mut() {
                pending.stage_remove(statement, committed);
            }
            return Ok(());
        }
        let applied = self.apply(vec![statement], Vec::new())?;
        self.changes.publish(ChangeEvent::new(applied));
        Ok(())
    }

    fn find_statements(&self, pattern: &StatementPattern) -> Result<Vec<Statement>, StoreError> {
        let committed = committed_matches(&self.db, pattern)?;
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
        let applied = self.apply(
            pending.removed().iter().collect(),
            pending.added().iter().collect(),
        )?;
        tracing::trace!(changes = applied.len(), "redb transaction committed");
        self.changes.publish(ChangeEvent::new(applied));
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
                "{:?} queries are not supported by the redb store",
                language
            )));
        }
        let db = Arc::clone(&self.db);
        let pending = self.pending.clone();
        let source: StatementSource = Arc::new(move |pattern: &StatementPattern| {
            let committed = committed_matches(&db, pattern)?;
            Ok(match &pending {
                Some(p) => p.overlay(committed, pattern),
                None => committed,
            })
        });
        Ok(Box::new(PatternQuery::parse(text, source)?))
    }

    fn namespaces(&self) -> Result<BTreeMap<String, Iri>, StoreError> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(NAMESPACES).map_err(backend)?;
        let mut namespaces = BTreeMap::new();
        for entry in table.iter().map_err(backend)? {
            let (prefix, ns) = entry.map_err(backend)?;
            namespaces.insert(prefix.value().to_string(), Iri::new(ns.value()));
        }
        Ok(namespaces)
    }
}

// =============================================================================
// TESTS
// =============================================================================
