//! # Change-Tracked Cache
//!
//! A cache layer over a generic, thread-safe `KeyedCache` (moka by
//! default) that stays consistent with the store by listening to committed
//! change batches.
//!
//! Before every access the layer drains its `ChangeSubscription` and
//! evicts the entries keyed by the subject and the object of each changed
//! statement. Entries are keyed by `(SessionId, Resource)`, so one backing
//! cache can be shared by many sessions.

use super::EntityCache;
use crate::change::{ChangeBus, ChangeSubscription};
use crate::entity::Entity;
use crate::{Resource, SessionId};
use std::collections::BTreeSet;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Minimal contract of a concurrent key-value cache.
pub trait KeyedCache<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;

    fn insert(&self, key: K, value: V);

    fn invalidate(&self, key: &K);

    fn entry_count(&self) -> u64;
}

impl<K, V> KeyedCache<K, V> for moka::sync::Cache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        moka::sync::Cache::get(self, key)
    }

    fn insert(&self, key: K, value: V) {
        moka::sync::Cache::insert(self, key, value);
    }

    fn invalidate(&self, key: &K) {
        moka::sync::Cache::invalidate(self, key);
    }

    fn entry_count(&self) -> u64 {
        moka::sync::Cache::entry_count(self)
    }
}

/// Key of a tracked entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    pub session: SessionId,
    pub resource: Resource,
}

/// A backing cache that may be shared across sessions.
pub type SharedEntityCache = Arc<dyn KeyedCache<EntityKey, Entity>>;

/// Build a moka-backed cache.
#[must_use]
pub fn shared_entity_cache(capacity: u64, ttl: Option<Duration>) -> SharedEntityCache {
    let mut builder = moka::sync::Cache::builder().max_capacity(capacity);
    if let Some(ttl) = ttl {
        builder = builder.time_to_live(ttl);
    }
    let cache: moka::sync::Cache<EntityKey, Entity> = builder.build();
    Arc::new(cache)
}

/// Cache layer invalidated by store change events.
pub struct ChangeTrackedCache {
    cache: SharedEntityCache,
    session: SessionId,
    subscription: Option<ChangeSubscription>,
    /// Resources this layer inserted, so `clear` leaves other sessions'
    /// entries alone.
    owned: BTreeSet<Resource>,
}

impl std::fmt::Debug for ChangeTrackedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeTrackedCache")
            .field("session", &self.session)
            .field("owned", &self.owned.len())
            .field("subscribed", &self.subscription.is_some())
            .finish_non_exhaustive()
    }
}

impl ChangeTrackedCache {
    /// Subscribe to `bus` and cache into `cache`.
    #[must_use]
    pub fn new(cache: SharedEntityCache, session: SessionId, bus: &ChangeBus) -> Self {
        Self {
            cache,
            session,
            subscription: Some(bus.subscribe()),
            owned: BTreeSet::new(),
        }
    }

    fn key(&self, resource: &Resource) -> EntityKey {
        EntityKey {
            session: self.session,
            resource: resource.clone(),
        }
    }

    fn drop_entry(&mut self, resource: &Resource) {
        self.cache.invalidate(&self.key(resource));
        self.owned.remove(resource);
    }

    /// Apply every change event received since the last access and return
    /// the affected resources.
    fn sync(&mut self) -> BTreeSet<Resource> {
        let Some(subscription) = &self.subscription else {
            return BTreeSet::new();
        };
        let affected: BTreeSet<Resource> = subscription
            .drain()
            .iter()
            .flat_map(|event| event.affected_resources())
            .collect();
        if affected.is_empty() {
            return affected;
        }
        tracing::debug!(
            session = %self.session,
            affected = affected.len(),
            "tracked cache invalidation"
        );
        for resource in &affected {
            self.drop_entry(resource);
        }
        affected
    }
}

impl EntityCache for ChangeTrackedCache {
    fn name(&self) -> &'static str {
        "tracked"
    }

    fn get(&mut self, resource: &Resource) -> Option<Entity> {
        self.sync();
        let hit = self.cache.get(&self.key(resource));
        if hit.is_none() {
            // Capacity or TTL eviction by the backing cache.
            self.owned.remove(resource);
        }
        hit
    }

    fn put(&mut self, entity: &Entity) {
        self.sync();
        let resource = entity.resource();
        self.cache.insert(self.key(&resource), entity.clone());
        self.owned.insert(resource);
    }

    fn evict(&mut self, resource: &Resource) {
        self.drop_entry(resource);
    }

    fn renamed(&mut self, before: &Resource, after: &Resource) {
        self.drop_entry(before);
        self.drop_entry(after);
    }

    fn take_changes(&mut self) -> Vec<Resource> {
        self.sync().into_iter().collect()
    }

    fn clear(&mut self) {
        for resource in std::mem::take(&mut self.owned) {
            self.cache.invalidate(&self.key(&resource));
        }
    }

    fn close(&mut self) {
        self.clear();
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
