//! # Entities and the Entity Factory
//!
//! An `Entity` is a cheap handle bound to one `(Resource, SessionId)` pair
//! and one composite type. Equality and hashing follow the resource;
//! `Entity::ptr_eq` tells whether two handles are the same instance.
//!
//! Construction order in `EntityFactory::create_entity`:
//! 1. effective types: explicit, else staged, else read from the store
//! 2. composite type from the registry
//! 3. bind, run role initializers, run decorators
//! 4. prime bulk properties from the staged graph, if any
//!
//! Any failure is reported as `EngineError::EntityConstruction` and the
//! partially built entity is dropped.

use crate::primitives::RDF_TYPE;
use crate::registry::{CompositeType, TypeRegistry};
use crate::store::StoreConnection;
use crate::type_manager::TypeManager;
use crate::{EngineError, Iri, RdfType, Resource, SessionId, Statement, Term, TypeSet};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

// =============================================================================
// ENTITY
// =============================================================================

struct EntityInner {
    resource: RwLock<Resource>,
    session: SessionId,
    composite: Arc<CompositeType>,
    /// Property-level cache: predicate -> values.
    properties: Mutex<BTreeMap<Iri, Vec<Term>>>,
}

/// A managed object projected from the store.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<EntityInner>,
}

impl Entity {
    fn bind(resource: Resource, session: SessionId, composite: Arc<CompositeType>) -> Self {
        Self {
            inner: Arc::new(EntityInner {
                resource: RwLock::new(resource),
                session,
                composite,
                properties: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn resource(&self) -> Resource {
        self.inner
            .resource
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn session(&self) -> SessionId {
        self.inner.session
    }

    #[must_use]
    pub fn composite(&self) -> &Arc<CompositeType> {
        &self.inner.composite
    }

    /// The types this entity was constructed with.
    #[must_use]
    pub fn types(&self) -> &TypeSet {
        self.inner.composite.types()
    }

    #[must_use]
    pub fn implements(&self, role: &str) -> bool {
        self.inner.composite.implements(role)
    }

    /// Whether two handles are the same instance.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Values cached for a predicate, if primed.
    #[must_use]
    pub fn cached_values(&self, predicate: &Iri) -> Option<Vec<Term>> {
        self.properties().get(predicate).cloned()
    }

    /// Whether a handle exists outside the one being asked.
    pub(crate) fn is_shared(&self) -> bool {
        Arc::strong_count(&self.inner) > 1
    }

    pub(crate) fn prime(&self, predicate: Iri, values: Vec<Term>) {
        self.properties().insert(predicate, values);
    }

    pub(crate) fn forget(&self, predicate: &Iri) {
        self.properties().remove(predicate);
    }

    pub(crate) fn clear_properties(&self) {
        self.properties().clear();
    }

    /// Point the entity at a renamed resource.
    pub(crate) fn rebind(&self, resource: Resource) {
        *self
            .inner
            .resource
            .write()
            .unwrap_or_else(PoisonError::into_inner) = resource;
        self.clear_properties();
    }

    fn properties(&self) -> MutexGuard<'_, BTreeMap<Iri, Vec<Term>>> {
        self.inner
            .properties
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other) || self.resource() == other.resource()
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resource().hash(state);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("resource", &self.resource())
            .field("session", &self.inner.session)
            .field("roles", self.inner.composite.roles())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource())
    }
}

// =============================================================================
// STAGED GRAPH
// =============================================================================

/// Statements fetched ahead of construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedGraph {
    statements: BTreeSet<Statement>,
}

impl StagedGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, statement: Statement) {
        self.statements.insert(statement);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Values of one property of one subject, in statement order.
    #[must_use]
    pub fn values(&self, subject: &Resource, predicate: &Iri) -> Vec<Term> {
        self.statements
            .iter()
            .filter(|st| &st.subject == subject && &st.predicate == predicate)
            .map(|st| st.object.clone())
            .collect()
    }

    /// Types staged for a subject, `None` when none are staged.
    #[must_use]
    pub fn types_of(&self, subject: &Resource) -> Option<TypeSet> {
        let types: TypeSet = self
            .values(subject, &Iri::new(RDF_TYPE))
            .into_iter()
            .filter_map(|term| match term {
                Term::Resource(Resource::Named(iri)) => Some(RdfType(iri)),
                _ => None,
            })
            .collect();
        (!types.is_empty()).then_some(types)
    }
}

impl FromIterator<Statement> for StagedGraph {
    fn from_iter<I: IntoIterator<Item = Statement>>(iter: I) -> Self {
        Self {
            statements: iter.into_iter().collect(),
        }
    }
}

// =============================================================================
// FACTORY
// =============================================================================

/// Post-construction hook. Decorators run in no particular order and must
/// be idempotent.
pub trait EntityDecorator: Send + Sync {
    /// Unique name; registering a second decorator with the same name
    /// replaces the first.
    fn name(&self) -> &str;

    fn decorate(&self, entity: &Entity) -> Result<(), String>;
}

/// Builds and binds entities.
#[derive(Clone)]
pub struct EntityFactory {
    registry: Arc<TypeRegistry>,
    decorators: BTreeMap<String, Arc<dyn EntityDecorator>>,
}

impl fmt::Debug for EntityFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityFactory")
            .field("registry", &self.registry)
            .field("decorators", &self.decorators.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EntityFactory {
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            decorators: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_decorator(mut self, decorator: Arc<dyn EntityDecorator>) -> Self {
        self.decorators
            .insert(decorator.name().to_string(), decorator);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Build the entity for `resource` in `session`.
    pub fn create_entity(
        &self,
        conn: &dyn StoreConnection,
        session: SessionId,
        resource: &Resource,
        explicit: Option<&TypeSet>,
        staged: Option<&StagedGraph>,
    ) -> Result<Entity, EngineError> {
        let failed = |reason: String| EngineError::EntityConstruction {
            resource: resource.clone(),
            reason,
        };

        let types = match (explicit, staged.and_then(|g| g.types_of(resource))) {
            (Some(types), _) => types.clone(),
            (None, Some(types)) => types,
            (None, None) => {
                TypeManager::get_types(conn, resource).map_err(|e| failed(e.to_string()))?
            }
        };

        let composite = self.registry.resolve_composite(&types);
        let entity = Entity::bind(resource.clone(), session, composite);

        entity.composite().initialize(&entity).map_err(failed)?;
        for (name, decorator) in &self.decorators {
            decorator
                .decorate(&entity)
                .map_err(|reason| failed(format!("decorator {}: {}", name, reason)))?;
        }

        if let Some(graph) = staged {
            for predicate in entity.composite().bulk_properties() {
                let values = graph.values(resource, predicate);
                if !values.is_empty() {
                    entity.prime(predicate.clone(), values);
                }
            }
        }

        tracing::trace!(resource = %resource, session = %session, types = types.len(), "entity constructed");
        Ok(entity)
    }
}

// =============================================================================
// TESTS
// =============================================================================
