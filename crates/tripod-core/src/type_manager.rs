//! # Type Manager
//!
//! Reads and writes the `rdf:type` statements of a resource. The implicit
//! root type is never asserted, never removed and never reported.

use crate::primitives::{RDF_TYPE, ROOT_TYPE};
use crate::store::StoreConnection;
use crate::{Iri, RdfType, Resource, Statement, StatementPattern, StoreError, Term, TypeSet};

/// Stateless access to `rdf:type` statements.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeManager;

fn is_root(rdf_type: &RdfType) -> bool {
    rdf_type.iri().as_str() == ROOT_TYPE
}

fn type_statement(resource: &Resource, rdf_type: &RdfType) -> Statement {
    Statement::new(resource.clone(), Iri::new(RDF_TYPE), rdf_type.as_resource())
}

impl TypeManager {
    /// The asserted types of a resource. Empty when there are none.
    pub fn get_types(
        conn: &dyn StoreConnection,
        resource: &Resource,
    ) -> Result<TypeSet, StoreError> {
        let pattern = StatementPattern::subject(resource.clone()).with_predicate(Iri::new(RDF_TYPE));
        Ok(conn
            .find_statements(&pattern)?
            .into_iter()
            .filter_map(|st| match st.object {
                Term::Resource(Resource::Named(iri)) => Some(RdfType(iri)),
                _ => None,
            })
            .filter(|t| !is_root(t))
            .collect())
    }

    /// Assert a type. Returns whether the store changed.
    pub fn add_type(
        conn: &mut dyn StoreConnection,
        resource: &Resource,
        rdf_type: &RdfType,
    ) -> Result<bool, StoreError> {
        if is_root(rdf_type) {
            return Ok(false);
        }
        let statement = type_statement(resource, rdf_type);
        if conn.contains(&statement)? {
            return Ok(false);
        }
        conn.add(&statement)?;
        Ok(true)
    }

    /// Retract a type. Returns whether the store changed.
    pub fn remove_type(
        conn: &mut dyn StoreConnection,
        resource: &Resource,
        rdf_type: &RdfType,
    ) -> Result<bool, StoreError> {
        if is_root(rdf_type) {
            return Ok(false);
        }
        let statement = type_statement(resource, rdf_type);
        if !conn.contains(&statement)? {
            return Ok(false);
        }
        conn.remove(&statement)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryRepository, Repository};

    #[test]
    fn add_and_remove_are_idempotent() {
        let repo = MemoryRepository::new();
        let mut conn = repo.connect().expect("connect");
        let alice = Resource::named("http://ex/alice");
        let person = RdfType::new("http://ex/Person");

        assert!(TypeManager::get_types(conn.as_ref(), &alice)
            .expect("types")
            .is_empty());
        assert!(TypeManager::add_type(conn.as_mut(), &alice, &person).expect("add"));
        assert!(!TypeManager::add_type(conn.as_mut(), &alice, &person).expect("add again"));
        assert_eq!(repo.len(), 1);

        assert!(TypeManager::remove_type(conn.as_mut(), &alice, &person).expect("remove"));
        assert!(!TypeManager::remove_type(conn.as_mut(), &alice, &person).expect("remove again"));
        assert!(repo.is_empty());
    }

    #[test]
    fn root_type_is_never_asserted_or_reported() {
        let alice = Resource::named("http://ex/alice");
        let root = RdfType::new(ROOT_TYPE);
        let repo = MemoryRepository::with_statements(vec![type_statement(&alice, &root)]);
        let mut conn = repo.connect().expect("connect");

        assert!(TypeManager::get_types(conn.as_ref(), &alice)
            .expect("types")
            .is_empty());
        assert!(!TypeManager::add_type(conn.as_mut(), &alice, &root).expect("add"));
        assert!(!TypeManager::remove_type(conn.as_mut(), &alice, &root).expect("remove"));
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn literal_type_objects_are_ignored() {
        let alice = Resource::named("http://ex/alice");
        let repo = MemoryRepository::with_statements(vec![Statement::new(
            alice.clone(),
            Iri::new(RDF_TYPE),
            crate::Literal::string("Person"),
        )]);
        let conn = repo.connect().expect("connect");
        assert!(TypeManager::get_types(conn.as_ref(), &alice)
            .expect("types")
            .is_empty());
    }
}
