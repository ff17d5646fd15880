//! # Sessions
//!
//! A `SessionFactory` owns what sessions share: the repository, the type
//! registry, the literal codec, the decorators, the configuration and an
//! optional shared backing cache. A `Session` is one unit of work: one
//! store connection, its transaction, its cache chain and its merge
//! identity table.
//!
//! ## Lookups
//!
//! `find*` goes through the cache chain and falls back to the
//! `EntityFactory` on a miss. Under an eager layer, repeated lookups of one
//! resource return the same instance; without caching they return equal
//! but distinct handles.
//!
//! ## Transactions
//!
//! Mutations join the caller's transaction if one is open (`begin`),
//! otherwise each runs in its own. A session with an open transaction
//! cannot be closed; dropping it rolls the transaction back.

use crate::cache::{
    CacheChain, ChangeTrackedCache, EagerCache, EntityCache, NoCache, SharedEntityCache,
    shared_entity_cache,
};
use crate::codec::{LiteralCodec, NativeValue, XsdCodec};
use crate::config::{CachePolicy, EngineConfig};
use crate::entity::{Entity, EntityDecorator, EntityFactory, StagedGraph};
use crate::merge::IdentityTable;
use crate::primitives::MAX_NAME_LENGTH;
use crate::query::{PreparedQuery, QueryLanguage, TypedQuery};
use crate::registry::TypeRegistry;
use crate::resources::ResourceManager;
use crate::store::{Repository, StoreConnection};
use crate::transaction::{TransactionScope, in_transaction};
use crate::type_manager::TypeManager;
use crate::{
    EngineError, Iri, Literal, Resource, SessionId, Statement, StatementPattern, Term, TypeSet,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// FACTORY
// =============================================================================

/// Opens sessions over one repository.
pub struct SessionFactory {
    repository: Arc<dyn Repository>,
    entities: EntityFactory,
    codec: Arc<dyn LiteralCodec>,
    config: EngineConfig,
    shared_cache: Option<SharedEntityCache>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory")
            .field("entities", &self.entities)
            .field("config", &self.config)
            .field("shared_cache", &self.shared_cache.is_some())
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl SessionFactory {
    #[must_use]
    pub fn new(repository: Arc<dyn Repository>, registry: Arc<TypeRegistry>) -> Self {
        Self {
            repository,
            entities: EntityFactory::new(registry),
            codec: Arc::new(XsdCodec),
            config: EngineConfig::default(),
            shared_cache: None,
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn LiteralCodec>) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn with_decorator(mut self, decorator: Arc<dyn EntityDecorator>) -> Self {
        self.entities = self.entities.with_decorator(decorator);
        self
    }

    /// Back every tracked layer of every session with one cache.
    #[must_use]
    pub fn with_shared_cache(mut self, cache: SharedEntityCache) -> Self {
        self.shared_cache = Some(cache);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        self.entities.registry()
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn build_chain(&self, id: SessionId) -> CacheChain {
        let cache = &self.config.cache;
        let layers = cache
            .layers
            .iter()
            .map(|policy| -> Box<dyn EntityCache> {
                match policy {
                    CachePolicy::None => Box::new(NoCache),
                    CachePolicy::Eager => Box::new(EagerCache::new(cache.eager_capacity)),
                    CachePolicy::Tracked => {
                        let backing = self.shared_cache.clone().unwrap_or_else(|| {
                            shared_entity_cache(cache.tracked_capacity, cache.tracked_ttl())
                        });
                        Box::new(ChangeTrackedCache::new(
                            backing,
                            id,
                            self.repository.changes(),
                        ))
                    }
                }
            })
            .collect();
        CacheChain::new(layers)
    }

    /// Open a new session with its own connection.
    pub fn open(&self) -> Result<Session, EngineError> {
        self.config.validate()?;
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let connection = self.repository.connect()?;
        let cache = self.build_chain(id);
        tracing::info!(session = %id, layers = ?cache.layer_names(), "session opened");

        Ok(Session {
            id,
            connection,
            entities: self.entities.clone(),
            codec: Arc::clone(&self.codec),
            cache,
            identities: IdentityTable::default(),
            include_inferred: self.config.query.include_inferred,
            closed: false,
        })
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// One unit of work over the store.
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) connection: Box<dyn StoreConnection>,
    pub(crate) entities: EntityFactory,
    pub(crate) codec: Arc<dyn LiteralCodec>,
    pub(crate) cache: CacheChain,
    pub(crate) identities: IdentityTable,
    include_inferred: bool,
    closed: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("active", &self.connection.is_active())
            .field("cache", &self.cache)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl TransactionScope for Session {
    fn connection(&mut self) -> &mut dyn StoreConnection {
        self.connection.as_mut()
    }

    fn committed(&mut self) {
        self.identities.settle();
    }

    fn rolled_back(&mut self) {
        self.discard_uncommitted();
        tracing::debug!(session = %self.id, "implicit transaction rolled back, caches cleared");
    }
}

impl Session {
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        self.entities.registry()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed {
            Err(EngineError::SessionClosed)
        } else {
            Ok(())
        }
    }

    /// Resolve a name to a resource.
    ///
    /// Accepted forms: `<iri>`, `_:label`, `prefix:local` with a prefix the
    /// store knows, and absolute IRIs.
    pub fn resolve(&self, name: &str) -> Result<Resource, EngineError> {
        self.ensure_open()?;
        let invalid = || EngineError::InvalidName(name.to_string());
        let name = name.trim();
        if name.is_empty() || name.len() > MAX_NAME_LENGTH || name.contains(char::is_whitespace)
        {
            return Err(invalid());
        }

        if let Some(inner) = name.strip_prefix('<').and_then(|n| n.strip_suffix('>')) {
            return if inner.is_empty() {
                Err(invalid())
            } else {
                Ok(Resource::named(inner))
            };
        }
        if let Some(label) = name.strip_prefix("_:") {
            return if label.is_empty() {
                Err(invalid())
            } else {
                Ok(Resource::blank(label))
            };
        }

        let (prefix, local) = name.split_once(':').ok_or_else(invalid)?;
        let namespaces = self.connection.namespaces()?;
        if let Some(ns) = namespaces.get(prefix) {
            return Ok(Resource::named(format!("{}{}", ns, local)));
        }
        let is_scheme = prefix
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if is_scheme && !local.is_empty() {
            Ok(Resource::named(name))
        } else {
            Err(invalid())
        }
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    /// Look up the entity for a name.
    pub fn find(&mut self, name: &str) -> Result<Entity, EngineError> {
        let resource = self.resolve(name)?;
        self.lookup(&resource, None)
    }

    pub fn find_resource(&mut self, resource: &Resource) -> Result<Entity, EngineError> {
        self.lookup(resource, None)
    }

    /// Look up with explicit types. A cached entity is returned as is.
    pub fn find_typed(
        &mut self,
        resource: &Resource,
        types: &TypeSet,
    ) -> Result<Entity, EngineError> {
        self.lookup(resource, Some(types))
    }

    /// Look up, constructing from a pre-fetched graph on a miss.
    pub fn find_in(
        &mut self,
        resource: &Resource,
        staged: &StagedGraph,
    ) -> Result<Entity, EngineError> {
        self.lookup_with(resource, None, Some(staged))
    }

    pub(crate) fn lookup(
        &mut self,
        resource: &Resource,
        explicit: Option<&TypeSet>,
    ) -> Result<Entity, EngineError> {
        self.lookup_with(resource, explicit, None)
    }

    fn lookup_with(
        &mut self,
        resource: &Resource,
        explicit: Option<&TypeSet>,
        staged: Option<&StagedGraph>,
    ) -> Result<Entity, EngineError> {
        self.ensure_open()?;
        if let Some(entity) = self.cache.lookup(resource) {
            return Ok(entity);
        }
        tracing::trace!(session = %self.id, resource = %resource, "cache miss");
        let entity = self.entities.create_entity(
            self.connection.as_ref(),
            self.id,
            resource,
            explicit,
            staged,
        )?;
        self.cache.store(&entity);
        Ok(entity)
    }

    /// Rebuild an entity against `types` and make it the cached instance.
    pub(crate) fn rebuild(
        &mut self,
        resource: &Resource,
        types: &TypeSet,
    ) -> Result<Entity, EngineError> {
        self.cache.evict(resource);
        let entity = self.entities.create_entity(
            self.connection.as_ref(),
            self.id,
            resource,
            Some(types),
            None,
        )?;
        self.cache.store(&entity);
        Ok(entity)
    }

    /// The asserted types of a resource.
    pub fn types(&self, resource: &Resource) -> Result<TypeSet, EngineError> {
        self.ensure_open()?;
        Ok(TypeManager::get_types(self.connection.as_ref(), resource)?)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Create an anonymous resource with the given roles.
    pub fn create(&mut self, roles: &[&str]) -> Result<Entity, EngineError> {
        let resource = ResourceManager::create_resource(None);
        self.assert_roles(resource, roles)
    }

    /// Create (or extend) a named resource with the given roles.
    pub fn create_named(&mut self, name: &str, roles: &[&str]) -> Result<Entity, EngineError> {
        let resource = self.resolve(name)?;
        self.assert_roles(resource, roles)
    }

    fn assert_roles(&mut self, resource: Resource, roles: &[&str]) -> Result<Entity, EngineError> {
        self.ensure_open()?;
        let types = self.registry().types_for_roles(roles.iter().copied());
        in_transaction(self, |s| {
            for t in &types {
                TypeManager::add_type(s.connection.as_mut(), &resource, t)?;
            }
            Ok(())
        })?;
        self.cache.evict(&resource);
        self.lookup(&resource, None)
    }

    /// Delete every statement mentioning the entity's resource.
    pub fn remove(&mut self, entity: &Entity) -> Result<usize, EngineError> {
        self.ensure_open()?;
        let resource = entity.resource();
        self.forget_incoming(&resource)?;
        let removed = ResourceManager::remove_resource(self.connection.as_mut(), &resource)?;
        self.cache.evict(&resource);
        self.identities.forget(&resource);
        entity.clear_properties();
        Ok(removed)
    }

    /// Rename the entity's resource. Returns the entity for the new name.
    pub fn rename(&mut self, entity: &Entity, new_name: &str) -> Result<Entity, EngineError> {
        let after = self.resolve(new_name)?;
        let before = entity.resource();
        self.forget_incoming(&before)?;
        ResourceManager::rename_resource(self.connection.as_mut(), &before, &after)?;
        self.cache.renamed(&before, &after);
        self.identities.renamed(&before, &after);
        self.lookup(&after, None)
    }

    /// Drop property values cached on entities that point at `resource`.
    fn forget_incoming(&mut self, resource: &Resource) -> Result<(), EngineError> {
        let incoming = self
            .connection
            .find_statements(&StatementPattern::object(resource.clone()))?;
        for st in incoming {
            if let Some(entity) = self.cache.lookup(&st.subject) {
                entity.forget(&st.predicate);
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------------

    /// Values of a property, served from the entity's property cache when
    /// primed.
    pub fn property_values(
        &mut self,
        entity: &Entity,
        predicate: &Iri,
    ) -> Result<Vec<Term>, EngineError> {
        self.ensure_open()?;
        if let Some(values) = entity.cached_values(predicate) {
            return Ok(values);
        }
        let pattern = StatementPattern::subject(entity.resource()).with_predicate(predicate.clone());
        let values: Vec<Term> = self
            .connection
            .find_statements(&pattern)?
            .into_iter()
            .map(|st| st.object)
            .collect();
        entity.prime(predicate.clone(), values.clone());
        Ok(values)
    }

    /// Literal values of a property, decoded through the codec.
    pub fn literal_values(
        &mut self,
        entity: &Entity,
        predicate: &Iri,
    ) -> Result<Vec<NativeValue>, EngineError> {
        self.property_values(entity, predicate)?
            .iter()
            .filter_map(Term::as_literal)
            .map(|literal| self.codec.decode(literal, None))
            .collect()
    }

    /// Replace every value of a property.
    pub fn set_property(
        &mut self,
        entity: &Entity,
        predicate: &Iri,
        values: Vec<Term>,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        let resource = entity.resource();
        in_transaction(self, |s| {
            replace_values(s.connection.as_mut(), &resource, predicate, values)
        })?;
        entity.forget(predicate);
        Ok(())
    }

    /// Add one value to a property.
    pub fn add_property(
        &mut self,
        entity: &Entity,
        predicate: &Iri,
        value: impl Into<Term>,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        let statement = Statement::new(entity.resource(), predicate.clone(), value);
        in_transaction(self, |s| Ok(s.connection.add(&statement)?))?;
        entity.forget(predicate);
        Ok(())
    }

    /// Replace a property with one encoded literal.
    pub fn set_literal(
        &mut self,
        entity: &Entity,
        predicate: &Iri,
        value: &NativeValue,
    ) -> Result<(), EngineError> {
        let literal: Literal = self.codec.encode(value)?;
        self.set_property(entity, predicate, vec![Term::Literal(literal)])
    }

    pub(crate) fn decode_literal(
        &self,
        literal: &Literal,
        target: Option<&Iri>,
    ) -> Result<NativeValue, EngineError> {
        self.codec.decode(literal, target)
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    /// Open a caller-owned transaction. Mutations join it until `commit`
    /// or `rollback`.
    pub fn begin(&mut self) -> Result<(), EngineError> {
        self.ensure_open()?;
        Ok(self.connection.begin()?)
    }

    pub fn commit(&mut self) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.connection.commit()?;
        self.identities.settle();
        Ok(())
    }

    /// Discard the caller-owned transaction and every cached entity.
    pub fn rollback(&mut self) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.connection.rollback()?;
        self.discard_uncommitted();
        tracing::debug!(session = %self.id, "transaction rolled back, caches cleared");
        Ok(())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.connection.is_active()
    }

    /// Entities and identities may reflect rolled-back statements.
    fn discard_uncommitted(&mut self) {
        self.cache.clear();
        self.identities.discard_pending();
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Prepare a query on the store and bind it to this session.
    pub fn create_query(
        &mut self,
        language: QueryLanguage,
        text: &str,
    ) -> Result<TypedQuery<'_>, EngineError> {
        self.ensure_open()?;
        let query = self.connection.prepare_query(language, text)?;
        self.bind_query(query)
    }

    /// Bind a query prepared elsewhere, such as an external evaluator.
    pub fn bind_query(
        &mut self,
        query: Box<dyn PreparedQuery>,
    ) -> Result<TypedQuery<'_>, EngineError> {
        self.ensure_open()?;
        let include_inferred = self.include_inferred;
        Ok(TypedQuery::new(self, query, include_inferred))
    }

    // -------------------------------------------------------------------------
    // Close
    // -------------------------------------------------------------------------

    /// Close the session. Fails while a transaction is open.
    pub fn close(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        if self.connection.is_active() {
            return Err(EngineError::TransactionActive);
        }
        self.cache.close();
        self.closed = true;
        tracing::info!(session = %self.id, "session closed");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if self.connection.is_active() {
            tracing::warn!(session = %self.id, "session dropped with an open transaction, rolling back");
            if let Err(e) = self.connection.rollback() {
                tracing::warn!(session = %self.id, error = %e, "rollback on drop failed");
            }
        }
        self.cache.close();
    }
}

/// Remove every `(resource, predicate, _)` statement and add the new values.
pub(crate) fn replace_values(
    conn: &mut dyn StoreConnection,
    resource: &Resource,
    predicate: &Iri,
    values: Vec<Term>,
) -> Result<(), EngineError> {
    let pattern = StatementPattern::subject(resource.clone()).with_predicate(predicate.clone());
    for st in conn.find_statements(&pattern)? {
        conn.remove(&st)?;
    }
    for value in values {
        conn.add(&Statement::new(resource.clone(), predicate.clone(), value))?;
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
