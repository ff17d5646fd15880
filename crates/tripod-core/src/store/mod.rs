//! # Store Contracts
//!
//! The engine talks to the physical triple store through two traits:
//! - `Repository`: the shared store, hands out connections and owns the
//!   change bus
//! - `StoreConnection`: one session's view, with its own transaction
//!
//! Two reference adapters ship with the crate:
//! - `MemoryRepository`: `RwLock`-guarded statement set (fast, volatile)
//! - `RedbRepository`: redb-backed (ACID, persistent)
//!
//! Both stage transactional writes in `PendingChanges` and apply them in
//! one step on commit, so readers of other connections never observe a
//! half-applied batch.

pub mod memory;
pub mod pattern;
pub mod redb_store;

pub use memory::{MemoryConnection, MemoryRepository};
pub use pattern::PatternQuery;
pub use redb_store::{RedbConnection, RedbRepository};

use crate::change::{ChangeBus, ChangeEvent, StatementChange};
use crate::query::{PreparedQuery, QueryLanguage};
use crate::{Iri, Statement, StatementPattern, StoreError};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// COLLABORATOR CONTRACTS
// =============================================================================

/// A shared triple store.
pub trait Repository: Send + Sync {
    /// Open a new connection with its own transaction state.
    fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError>;

    /// The bus on which committed change batches are published.
    fn changes(&self) -> &ChangeBus;
}

/// One connection to a triple store.
///
/// Outside a transaction every write is applied (and published) on its own.
/// Inside a transaction writes are staged, visible to this connection's
/// reads, and applied atomically on `commit`.
pub trait StoreConnection: Send {
    /// Add a statement. Adding an existing statement is a no-op.
    fn add(&mut self, statement: &Statement) -> Result<(), StoreError>;

    /// Remove a statement. Removing an absent statement is a no-op.
    fn remove(&mut self, statement: &Statement) -> Result<(), StoreError>;

    /// Every statement matching the pattern, in statement order.
    fn find_statements(&self, pattern: &StatementPattern) -> Result<Vec<Statement>, StoreError>;

    /// Whether the statement is present.
    fn contains(&self, statement: &Statement) -> Result<bool, StoreError> {
        let pattern = StatementPattern::subject(statement.subject.clone())
            .with_predicate(statement.predicate.clone())
            .with_object(statement.object.clone());
        Ok(!self.find_statements(&pattern)?.is_empty())
    }

    /// Open a transaction.
    fn begin(&mut self) -> Result<(), StoreError>;

    /// Apply the staged writes and publish them as one change event.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard the staged writes.
    fn rollback(&mut self) -> Result<(), StoreError>;

    /// Whether a transaction is open.
    fn is_active(&self) -> bool;

    /// Prepare a query in the given language.
    fn prepare_query(
        &self,
        language: QueryLanguage,
        text: &str,
    ) -> Result<Box<dyn PreparedQuery>, StoreError>;

    /// Namespace prefix to IRI mapping.
    fn namespaces(&self) -> Result<BTreeMap<String, Iri>, StoreError>;
}

// =============================================================================
// STAGED WRITES
// =============================================================================

/// Net effect of the writes of one open transaction.
///
/// Only changes that differ from the committed state are recorded, so the
/// event published on commit contains exactly what changed.
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingChanges {
    added: BTreeSet<Statement>,
    removed: BTreeSet<Statement>,
}

impl PendingChanges {
    /// Stage an addition. `committed` tells whether the statement is
    /// already present in the committed state.
    pub(crate) fn stage_add(&mut self, statement: &Statement, committed: bool) {
        if !self.removed.remove(statement) && !committed {
            self.added.insert(statement.clone());
        }
    }

    /// Stage a removal.
    pub(crate) fn stage_remove(&mut self, statement: &Statement, committed: bool) {
        if !self.added.remove(statement) && committed {
            self.removed.insert(statement.clone());
        }
    }

    /// Overlay staged writes on committed matches.
    pub(crate) fn overlay(
        &self,
        committed: Vec<Statement>,
        pattern: &StatementPattern,
    ) -> Vec<Statement> {
        let mut merged: BTreeSet<Statement> = committed
            .into_iter()
            .filter(|st| !self.removed.contains(st))
            .collect();
        merged.extend(self.added.iter().filter(|st| pattern.matches(st)).cloned());
        merged.into_iter().collect()
    }

    pub(crate) fn added(&self) -> &BTreeSet<Statement> {
        &self.added
    }

    pub(crate) fn removed(&self) -> &BTreeSet<Statement> {
        &self.removed
    }

    /// The change event describing this batch.
    pub(crate) fn into_event(self) -> ChangeEvent {
        let mut changes: Vec<StatementChange> =
            self.removed.into_iter().map(StatementChange::removed).collect();
        changes.extend(self.added.into_iter().map(StatementChange::added));
        ChangeEvent::new(changes)
    }
}

// =============================================================================
// TESTS
// =============================================================================
