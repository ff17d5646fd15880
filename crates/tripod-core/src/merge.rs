//! # Merge and Designate
//!
//! `merge` promotes a detached value into a managed entity: the value gets
//! a stable resource from the session's identity table, its roles (with
//! every super-role) are asserted as types, and its properties are copied
//! in when the resulting composite supports merge-from.
//!
//! `designate` widens an existing entity with extra roles and rebuilds it
//! against the enlarged composite. `remove_designation` is the inverse.
//!
//! All of them run through `in_transaction`, so they join a transaction
//! the caller opened and never commit or roll it back.

use crate::entity::Entity;
use crate::resources::ResourceManager;
use crate::session::{Session, replace_values};
use crate::transaction::in_transaction;
use crate::type_manager::TypeManager;
use crate::{EngineError, Iri, RdfType, Resource, Term, TypeSet};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

// =============================================================================
// DETACHED VALUES
// =============================================================================

/// Stable identity of a detached value, supplied by its owner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DetachedKey(pub String);

impl DetachedKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

/// An in-memory object not yet bound to a resource.
pub trait Detached {
    fn detached_key(&self) -> DetachedKey;

    /// Roles the value plays. Super-roles are added automatically.
    fn roles(&self) -> Vec<String>;

    /// Preferred resource name. Anonymous when `None`.
    fn name(&self) -> Option<Iri> {
        None
    }

    /// State copied into entities whose composite supports merge-from.
    fn properties(&self) -> Vec<(Iri, Term)> {
        Vec::new()
    }
}

/// A plain detached value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedValue {
    key: DetachedKey,
    name: Option<Iri>,
    roles: Vec<String>,
    properties: Vec<(Iri, Term)>,
}

impl DetachedValue {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: DetachedKey::new(key),
            name: None,
            roles: Vec::new(),
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn named(mut self, iri: impl Into<String>) -> Self {
        self.name = Some(Iri::new(iri));
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    #[must_use]
    pub fn with_property(mut self, predicate: impl Into<String>, value: impl Into<Term>) -> Self {
        self.properties.push((Iri::new(predicate), value.into()));
        self
    }
}

impl Detached for DetachedValue {
    fn detached_key(&self) -> DetachedKey {
        self.key.clone()
    }

    fn roles(&self) -> Vec<String> {
        self.roles.clone()
    }

    fn name(&self) -> Option<Iri> {
        self.name.clone()
    }

    fn properties(&self) -> Vec<(Iri, Term)> {
        self.properties.clone()
    }
}

// =============================================================================
// IDENTITY TABLE
// =============================================================================

/// Detached key to resource, for one session.
///
/// Keys allocated inside a transaction stay pending until it commits; a
/// rollback forgets them again.
#[derive(Debug, Default)]
pub struct IdentityTable {
    entries: Mutex<Entries>,
}

#[derive(Debug, Default)]
struct Entries {
    assigned: BTreeMap<DetachedKey, Resource>,
    pending: Vec<DetachedKey>,
}

impl IdentityTable {
    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The resource already assigned to the value, or a newly allocated one.
    pub fn resolve_or_allocate(&self, value: &dyn Detached) -> Resource {
        let key = value.detached_key();
        let mut entries = self.entries();
        if let Some(found) = entries.assigned.get(&key) {
            return found.clone();
        }
        let resource = ResourceManager::create_resource(value.name());
        tracing::trace!(key = %key.0, resource = %resource, "detached value allocated");
        entries.assigned.insert(key.clone(), resource.clone());
        entries.pending.push(key);
        resource
    }

    #[must_use]
    pub fn get(&self, key: &DetachedKey) -> Option<Resource> {
        self.entries().assigned.get(key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().assigned.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().assigned.is_empty()
    }

    /// Keep every pending allocation.
    pub(crate) fn settle(&self) {
        self.entries().pending.clear();
    }

    /// Forget allocations made since the last commit.
    pub(crate) fn discard_pending(&self) {
        let mut entries = self.entries();
        let pending = std::mem::take(&mut entries.pending);
        for key in &pending {
            entries.assigned.remove(key);
        }
    }

    /// Drop every key pointing at a removed resource.
    pub(crate) fn forget(&self, resource: &Resource) {
        self.entries().assigned.retain(|_, r| r != resource);
    }

    pub(crate) fn renamed(&self, before: &Resource, after: &Resource) {
        for r in self.entries().assigned.values_mut() {
            if r == before {
                *r = after.clone();
            }
        }
    }
}

// =============================================================================
// SESSION OPERATIONS
// =============================================================================

impl Session {
    /// Merge a detached value. Merging the same value twice yields the
    /// same resource.
    pub fn merge(&mut self, value: &dyn Detached) -> Result<Entity, EngineError> {
        self.ensure_open()?;
        let resource = self.identities.resolve_or_allocate(value);
        let roles = value.roles();
        let types = self
            .registry()
            .types_for_roles(roles.iter().map(String::as_str));

        in_transaction(self, |s| {
            for t in &types {
                TypeManager::add_type(s.connection.as_mut(), &resource, t)?;
            }
            let entity = s.lookup(&resource, None)?;
            if entity.composite().supports_merge_from() {
                let mut grouped: BTreeMap<Iri, Vec<Term>> = BTreeMap::new();
                for (predicate, term) in value.properties() {
                    grouped.entry(predicate).or_default().push(term);
                }
                for (predicate, values) in grouped {
                    replace_values(s.connection.as_mut(), &resource, &predicate, values)?;
                    entity.forget(&predicate);
                }
            }
            Ok(entity)
        })
    }

    /// Merge every value in one transaction.
    pub fn merge_all(&mut self, values: &[&dyn Detached]) -> Result<Vec<Entity>, EngineError> {
        self.ensure_open()?;
        in_transaction(self, |s| values.iter().map(|value| s.merge(*value)).collect())
    }

    /// Add roles to an entity and rebuild it against the wider composite.
    pub fn designate(&mut self, entity: &Entity, roles: &[&str]) -> Result<Entity, EngineError> {
        let extra = self.registry().types_for_roles(roles.iter().copied());
        self.designate_types(entity, &extra)
    }

    /// Add store types to an entity and rebuild it.
    ///
    /// The rebuilt entity replaces the cached one.
    pub fn designate_types(
        &mut self,
        entity: &Entity,
        extra: &TypeSet,
    ) -> Result<Entity, EngineError> {
        self.ensure_open()?;
        let resource = entity.resource();
        in_transaction(self, |s| {
            let mut types = TypeManager::get_types(s.connection.as_ref(), &resource)?;
            types.extend(entity.types().iter().cloned());
            for t in extra {
                TypeManager::add_type(s.connection.as_mut(), &resource, t)?;
                types.insert(t.clone());
            }
            s.rebuild(&resource, &types)
        })
    }

    /// Retract the types of the given roles and rebuild the entity.
    ///
    /// Only the roles' own types are retracted; super-role types stay.
    pub fn remove_designation(
        &mut self,
        entity: &Entity,
        roles: &[&str],
    ) -> Result<Entity, EngineError> {
        self.ensure_open()?;
        let resource = entity.resource();
        let retracted: TypeSet = roles
            .iter()
            .filter_map(|role| self.registry().find_type(role))
            .collect();

        in_transaction(self, |s| {
            let mut types = TypeManager::get_types(s.connection.as_ref(), &resource)?;
            types.extend(entity.types().iter().cloned());
            for t in &retracted {
                TypeManager::remove_type(s.connection.as_mut(), &resource, t)?;
            }
            types.retain(|t: &RdfType| !retracted.contains(t));
            s.rebuild(&resource, &types)
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
