//! # Type Registry
//!
//! Maps roles (host-side interface descriptions) to store types and
//! resolves the composite runtime type of a resource from its type set.
//!
//! A `CompositeType` is a dispatch table, not generated code: the role
//! closure, the bulk-initializable properties, the merge-from capability
//! and the initializers of every role. Composites are memoized per sorted
//! type set, so one type set always maps to the same `Arc`.
//!
//! Types nobody registered are tolerated: they resolve to a composite with
//! no roles that still carries its type set.

use crate::entity::Entity;
use crate::primitives::ROOT_TYPE;
use crate::{Iri, RdfType, TypeSet};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Hook run once for every entity whose composite includes the role.
pub type RoleInitializer = Arc<dyn Fn(&Entity) -> Result<(), String> + Send + Sync>;

/// Description of one role.
#[derive(Clone)]
pub struct RoleDef {
    name: String,
    rdf_type: Option<RdfType>,
    extends: BTreeSet<String>,
    bulk_properties: BTreeSet<Iri>,
    merge_from: bool,
    initializer: Option<RoleInitializer>,
}

impl fmt::Debug for RoleDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleDef")
            .field("name", &self.name)
            .field("rdf_type", &self.rdf_type)
            .field("extends", &self.extends)
            .field("bulk_properties", &self.bulk_properties)
            .field("merge_from", &self.merge_from)
            .field("initializer", &self.initializer.is_some())
            .finish()
    }
}

impl RoleDef {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rdf_type: None,
            extends: BTreeSet::new(),
            bulk_properties: BTreeSet::new(),
            merge_from: false,
            initializer: None,
        }
    }

    /// The store type this role maps to.
    #[must_use]
    pub fn with_type(mut self, iri: impl Into<String>) -> Self {
        self.rdf_type = Some(RdfType::new(iri));
        self
    }

    /// Declare a super-role.
    #[must_use]
    pub fn extends(mut self, role: impl Into<String>) -> Self {
        self.extends.insert(role.into());
        self
    }

    /// A property that may be primed from a pre-fetched graph.
    #[must_use]
    pub fn bulk_property(mut self, predicate: impl Into<String>) -> Self {
        self.bulk_properties.insert(Iri::new(predicate));
        self
    }

    /// Entities with this role accept state copied from detached values.
    #[must_use]
    pub fn merge_from(mut self) -> Self {
        self.merge_from = true;
        self
    }

    #[must_use]
    pub fn with_initializer<F>(mut self, init: F) -> Self
    where
        F: Fn(&Entity) -> Result<(), String> + Send + Sync + 'static,
    {
        self.initializer = Some(Arc::new(init));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn rdf_type(&self) -> Option<&RdfType> {
        self.rdf_type.as_ref()
    }
}

/// The resolved runtime shape for one type set.
pub struct CompositeType {
    types: TypeSet,
    roles: BTreeSet<String>,
    bulk_properties: BTreeSet<Iri>,
    merge_from: bool,
    initializers: Vec<(String, RoleInitializer)>,
}

impl fmt::Debug for CompositeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let initializers: Vec<&str> = self.initializers.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("CompositeType")
            .field("types", &self.types)
            .field("roles", &self.roles)
            .field("bulk_properties", &self.bulk_properties)
            .field("merge_from", &self.merge_from)
            .field("initializers", &initializers)
            .finish()
    }
}

impl CompositeType {
    /// The type set this composite was resolved for (root type excluded).
    #[must_use]
    pub fn types(&self) -> &TypeSet {
        &self.types
    }

    /// Every role implemented, super-roles included.
    #[must_use]
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    #[must_use]
    pub fn implements(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// True when no registered role applies.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.roles.is_empty()
    }

    #[must_use]
    pub fn bulk_properties(&self) -> &BTreeSet<Iri> {
        &self.bulk_properties
    }

    #[must_use]
    pub fn supports_merge_from(&self) -> bool {
        self.merge_from
    }

    /// Run every role initializer. Stops at the first failure.
    pub(crate) fn initialize(&self, entity: &Entity) -> Result<(), String> {
        for (role, init) in &self.initializers {
            init(entity).map_err(|reason| format!("initializer of role {}: {}", role, reason))?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    roles: BTreeMap<String, RoleDef>,
    by_type: BTreeMap<RdfType, BTreeSet<String>>,
}

/// Role to type mapping and composite resolution.
#[derive(Default)]
pub struct TypeRegistry {
    state: RwLock<RegistryState>,
    composites: Mutex<BTreeMap<TypeSet, Arc<CompositeType>>>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("roles", &self.role_names())
            .field("composites", &lock(&self.composites).len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a role, replacing any role of the same name.
    ///
    /// Memoized composites are discarded.
    pub fn register(&self, role: RoleDef) {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = state.roles.remove(&role.name) {
                if let Some(t) = previous.rdf_type {
                    if let Some(names) = state.by_type.get_mut(&t) {
                        names.remove(&previous.name);
                    }
                }
            }
            if let Some(t) = &role.rdf_type {
                state
                    .by_type
                    .entry(t.clone())
                    .or_default()
                    .insert(role.name.clone());
            }
            tracing::debug!(role = %role.name, rdf_type = ?role.rdf_type, "role registered");
            state.roles.insert(role.name.clone(), role);
        }
        lock(&self.composites).clear();
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with_role(self, role: RoleDef) -> Self {
        self.register(role);
        self
    }

    /// Names of every registered role.
    #[must_use]
    pub fn role_names(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.roles.keys().cloned().collect()
    }

    #[must_use]
    pub fn find_type(&self, role: &str) -> Option<RdfType> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.roles.get(role).and_then(|r| r.rdf_type.clone())
    }

    /// Roles mapped to a store type.
    #[must_use]
    pub fn find_roles(&self, rdf_type: &RdfType) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .by_type
            .get(rdf_type)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Add the role's own type and the type of every role that
    /// transitively extends it.
    pub fn find_sub_types(&self, role: &str, out: &mut TypeSet) {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        for def in state.roles.values() {
            let Some(t) = &def.rdf_type else { continue };
            if closure_of(&state, [def.name.as_str()]).contains(role) {
                out.insert(t.clone());
            }
        }
    }

    /// The given roles plus every transitive super-role.
    ///
    /// Unknown roles are logged and left out.
    #[must_use]
    pub fn role_closure<'a>(&self, roles: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        closure_of(&state, roles)
    }

    /// Store types of the role closure.
    #[must_use]
    pub fn types_for_roles<'a>(&self, roles: impl IntoIterator<Item = &'a str>) -> TypeSet {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        closure_of(&state, roles)
            .iter()
            .filter_map(|name| state.roles.get(name).and_then(|r| r.rdf_type.clone()))
            .collect()
    }

    /// The memoized composite for a type set.
    pub fn resolve_composite(&self, types: &TypeSet) -> Arc<CompositeType> {
        let key: TypeSet = types
            .iter()
            .filter(|t| t.iri().as_str() != ROOT_TYPE)
            .cloned()
            .collect();

        let mut memo = lock(&self.composites);
        if let Some(found) = memo.get(&key) {
            return Arc::clone(found);
        }

        let composite = Arc::new(self.build_composite(key.clone()));
        tracing::trace!(types = key.len(), roles = composite.roles.len(), "composite resolved");
        memo.insert(key, Arc::clone(&composite));
        composite
    }

    fn build_composite(&self, types: TypeSet) -> CompositeType {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);

        let mut direct: Vec<&str> = Vec::new();
        for t in &types {
            match state.by_type.get(t) {
                Some(names) if !names.is_empty() => direct.extend(names.iter().map(String::as_str)),
                _ => tracing::debug!(rdf_type = %t, "no role registered for type"),
            }
        }

        let roles = closure_of(&state, direct);
        let mut bulk_properties = BTreeSet::new();
        let mut merge_from = false;
        let mut initializers = Vec::new();
        for def in roles.iter().filter_map(|name| state.roles.get(name)) {
            bulk_properties.extend(def.bulk_properties.iter().cloned());
            merge_from |= def.merge_from;
            if let Some(init) = &def.initializer {
                initializers.push((def.name.clone(), Arc::clone(init)));
            }
        }

        CompositeType {
            types,
            roles,
            bulk_properties,
            merge_from,
            initializers,
        }
    }
}

fn closure_of<'a>(
    state: &RegistryState,
    roles: impl IntoIterator<Item = &'a str>,
) -> BTreeSet<String> {
    let mut closure = BTreeSet::new();
    let mut queue: VecDeque<String> = roles.into_iter().map(str::to_string).collect();
    while let Some(name) = queue.pop_front() {
        if closure.contains(&name) {
            continue;
        }
        match state.roles.get(&name) {
            Some(def) => {
                queue.extend(def.extends.iter().cloned());
                closure.insert(name);
            }
            None => tracing::debug!(role = %name, "unknown role ignored"),
        }
    }
    closure
}

// =============================================================================
// TESTS
// =============================================================================
