//! # Resource Manager
//!
//! Allocation, removal and renaming of resources.
//!
//! Remove and rename touch every statement in which the resource occurs,
//! as subject or as object, and run inside one transaction so no reader
//! sees a half-removed or half-renamed graph. Cache eviction is left to
//! the caller.

use crate::store::StoreConnection;
use crate::transaction::in_transaction;
use crate::{EngineError, Iri, Resource, Statement, StatementPattern};
use std::collections::BTreeSet;

/// Stateless resource lifecycle operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceManager;

/// Every statement with `resource` as subject or object.
fn statements_mentioning(
    conn: &dyn StoreConnection,
    resource: &Resource,
) -> Result<BTreeSet<Statement>, EngineError> {
    let mut found: BTreeSet<Statement> = conn
        .find_statements(&StatementPattern::subject(resource.clone()))?
        .into_iter()
        .collect();
    found.extend(conn.find_statements(&StatementPattern::object(resource.clone()))?);
    Ok(found)
}

impl ResourceManager {
    /// A named resource, or a fresh blank node when no name is given.
    #[must_use]
    pub fn create_resource(name: Option<Iri>) -> Resource {
        match name {
            Some(iri) => Resource::Named(iri),
            None => Resource::Blank(uuid::Uuid::new_v4().simple().to_string()),
        }
    }

    /// Delete every statement mentioning `resource`. Returns the number of
    /// statements removed.
    pub fn remove_resource(
        conn: &mut dyn StoreConnection,
        resource: &Resource,
    ) -> Result<usize, EngineError> {
        let removed = in_transaction(conn, |c| {
            let statements = statements_mentioning(c, resource)?;
            for st in &statements {
                c.remove(st)?;
            }
            Ok(statements.len())
        })?;
        tracing::debug!(resource = %resource, removed, "resource removed");
        Ok(removed)
    }

    /// Move every statement mentioning `before` over to `after`. Returns
    /// the number of statements migrated.
    pub fn rename_resource(
        conn: &mut dyn StoreConnection,
        before: &Resource,
        after: &Resource,
    ) -> Result<usize, EngineError> {
        if before == after {
            return Ok(0);
        }
        let migrated = in_transaction(conn, |c| {
            let statements = statements_mentioning(c, before)?;
            for st in &statements {
                c.add(&st.substitute(before, after))?;
            }
            for st in &statements {
                c.remove(st)?;
            }
            Ok(statements.len())
        })?;
        tracing::debug!(before = %before, after = %after, migrated, "resource renamed");
        Ok(migrated)
    }
}
