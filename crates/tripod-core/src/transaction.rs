//! # Transaction Discipline
//!
//! Every mutating operation runs through `in_transaction`:
//! - if no transaction is active, one is opened and this call owns it
//! - an owned transaction is committed on success and rolled back on error
//! - a joined transaction (opened by the caller) is never committed or
//!   rolled back here
//!
//! The error that triggered a rollback is the one returned, even if the
//! rollback itself fails.

use crate::store::StoreConnection;
use crate::EngineError;

/// Anything that exposes a store connection to run a transaction on.
pub trait TransactionScope {
    fn connection(&mut self) -> &mut dyn StoreConnection;

    /// Called after a transaction opened by `in_transaction` commits.
    fn committed(&mut self) {}

    /// Called after a transaction opened by `in_transaction` is rolled
    /// back, or fails to commit.
    fn rolled_back(&mut self) {}
}

impl<'c> TransactionScope for dyn StoreConnection + 'c {
    fn connection(&mut self) -> &mut dyn StoreConnection {
        self
    }
}

/// Run `f` inside a transaction, opening one if none is active.
pub fn in_transaction<S, T, F>(scope: &mut S, f: F) -> Result<T, EngineError>
where
    S: TransactionScope + ?Sized,
    F: FnOnce(&mut S) -> Result<T, EngineError>,
{
    let owned = !scope.connection().is_active();
    if owned {
        scope.connection().begin()?;
    }

    match f(scope) {
        Ok(value) => {
            if owned {
                if let Err(e) = scope.connection().commit() {
                    scope.rolled_back();
                    return Err(e.into());
                }
                scope.committed();
            }
            Ok(value)
        }
        Err(e) => {
            if owned {
                if let Err(rollback) = scope.connection().rollback() {
                    tracing::warn!(error = %rollback, "rollback of implicit transaction failed");
                }
                scope.rolled_back();
            }
            Err(e)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
