//! # Entity Cache Layers
//!
//! A session looks entities up through a `CacheChain`: zero or more
//! `EntityCache` layers in front of the `EntityFactory`.
//!
//! | Policy | Layer | Identity across lookups |
//! |--------|-------|-------------------------|
//! | none | `NoCache` | value equality only |
//! | eager | `EagerCache` | same instance |
//! | tracked | `ChangeTrackedCache` | same instance until the store changes |
//!
//! A hit in a later layer back-fills the earlier ones; a store goes to
//! every layer. Before either, resources any layer reports as changed in
//! the store are evicted from all layers.

pub mod eager;
pub mod tracked;

pub use eager::EagerCache;
pub use tracked::{ChangeTrackedCache, EntityKey, KeyedCache, SharedEntityCache, shared_entity_cache};

use crate::Resource;
use crate::entity::Entity;

/// One layer of the lookup chain.
pub trait EntityCache: Send {
    /// Short policy name, used in logs.
    fn name(&self) -> &'static str;

    fn get(&mut self, resource: &Resource) -> Option<Entity>;

    fn put(&mut self, entity: &Entity);

    fn evict(&mut self, resource: &Resource);

    /// Re-key an entry after its resource was renamed.
    fn renamed(&mut self, before: &Resource, after: &Resource);

    /// Drop every entry this layer holds.
    fn clear(&mut self);

    /// Resources invalidated by store changes since the last call. The
    /// layer has already dropped its own entries for them.
    fn take_changes(&mut self) -> Vec<Resource> {
        Vec::new()
    }

    /// Release the layer when its session closes.
    fn close(&mut self) {
        self.clear();
    }
}

/// The pass-through policy: nothing is ever cached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl EntityCache for NoCache {
    fn name(&self) -> &'static str {
        "none"
    }

    fn get(&mut self, _resource: &Resource) -> Option<Entity> {
        None
    }

    fn put(&mut self, _entity: &Entity) {}

    fn evict(&mut self, _resource: &Resource) {}

    fn renamed(&mut self, _before: &Resource, _after: &Resource) {}

    fn clear(&mut self) {}
}

/// Ordered cache layers.
#[derive(Default)]
pub struct CacheChain {
    layers: Vec<Box<dyn EntityCache>>,
}

impl std::fmt::Debug for CacheChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheChain")
            .field("layers", &self.layer_names())
            .finish()
    }
}

impl CacheChain {
    #[must_use]
    pub fn new(layers: Vec<Box<dyn EntityCache>>) -> Self {
        Self { layers }
    }

    #[must_use]
    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    /// Evict resources reported changed by any layer from every layer.
    fn sync(&mut self) {
        let changed: Vec<Resource> = self
            .layers
            .iter_mut()
            .flat_map(|layer| layer.take_changes())
            .collect();
        for resource in &changed {
            self.evict(resource);
        }
    }

    /// First hit wins; earlier layers are back-filled with it.
    pub fn lookup(&mut self, resource: &Resource) -> Option<Entity> {
        self.sync();
        let (index, entity) = self
            .layers
            .iter_mut()
            .enumerate()
            .find_map(|(i, layer)| layer.get(resource).map(|e| (i, e)))?;

        tracing::trace!(resource = %resource, layer = self.layers[index].name(), "cache hit");
        for layer in &mut self.layers[..index] {
            layer.put(&entity);
        }
        Some(entity)
    }

    pub fn store(&mut self, entity: &Entity) {
        self.sync();
        for layer in &mut self.layers {
            layer.put(entity);
        }
    }

    pub fn evict(&mut self, resource: &Resource) {
        for layer in &mut self.layers {
            layer.evict(resource);
        }
    }

    pub fn renamed(&mut self, before: &Resource, after: &Resource) {
        for layer in &mut self.layers {
            layer.renamed(before, after);
        }
    }

    pub fn clear(&mut self) {
        for layer in &mut self.layers {
            layer.clear();
        }
    }

    pub fn close(&mut self) {
        for layer in &mut self.layers {
            layer.close();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityFactory;
    use crate::registry::TypeRegistry;
    use crate::store::{MemoryRepository, Repository};
    use crate::change::{ChangeBus, ChangeEvent, StatementChange};
    use crate::{Iri, Literal, SessionId, Statement};
    use std::sync::Arc;

    fn entity(iri: &str) -> Entity {
        let repo = MemoryRepository::new();
        let conn = repo.connect().expect("connect");
        EntityFactory::new(Arc::new(TypeRegistry::new()))
            .create_entity(conn.as_ref(), SessionId(1), &Resource::named(iri), None, None)
            .expect("entity")
    }

    #[test]
    fn no_cache_never_hits() {
        let mut chain = CacheChain::new(vec![Box::new(NoCache)]);
        let e = entity("http://ex/a");
        chain.store(&e);
        assert!(chain.lookup(&e.resource()).is_none());
    }

    #[test]
    fn hit_in_later_layer_backfills_earlier() {
        let mut chain = CacheChain::new(vec![
            Box::new(EagerCache::new(10)),
            Box::new(EagerCache::new(10)),
        ]);
        let e = entity("http://ex/a");
        chain.layers[1].put(&e);

        let hit = chain.lookup(&e.resource()).expect("hit");
        assert!(Entity::ptr_eq(&hit, &e));
        let front = chain.layers[0].get(&e.resource()).expect("back-filled");
        assert!(Entity::ptr_eq(&front, &e));
    }

    #[test]
    fn change_in_later_layer_evicts_earlier_layers() {
        let bus = ChangeBus::new();
        let mut chain = CacheChain::new(vec![
            Box::new(EagerCache::new(10)),
            Box::new(ChangeTrackedCache::new(
                shared_entity_cache(10, None),
                SessionId(1),
                &bus,
            )),
        ]);
        let s = entity("http://ex/s");
        let other = entity("http://ex/other");
        chain.store(&s);
        chain.store(&other);
        assert!(chain.lookup(&s.resource()).is_some());

        bus.publish(ChangeEvent::new(vec![StatementChange::added(Statement::new(
            Resource::named("http://ex/s"),
            Iri::new("http://ex/p"),
            Literal::string("v"),
        ))]));

        assert!(chain.lookup(&s.resource()).is_none());
        let kept = chain.lookup(&other.resource()).expect("untouched entry");
        assert!(Entity::ptr_eq(&kept, &other));
    }

    #[test]
    fn evict_and_clear_reach_every_layer() {
        let mut chain = CacheChain::new(vec![
            Box::new(EagerCache::new(10)),
            Box::new(EagerCache::new(10)),
        ]);
        let a = entity("http://ex/a");
        let b = entity("http://ex/b");
        chain.store(&a);
        chain.store(&b);

        chain.evict(&a.resource());
        assert!(chain.lookup(&a.resource()).is_none());
        assert!(chain.lookup(&b.resource()).is_some());

        chain.clear();
        assert!(chain.lookup(&b.resource()).is_none());
        assert_eq!(chain.layer_names(), vec!["eager", "eager"]);
    }
}
