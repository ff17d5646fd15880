//! # Eager Identity Cache
//!
//! An explicit `Resource -> Entity` table. A hit returns the cached
//! instance as is, whatever types the caller asked for.
//!
//! Growth is bounded by LRU eviction over `capacity`, except that an entity
//! still referenced outside the cache is never evicted: while any handle is
//! alive, lookups keep returning that same instance. The table is cleared
//! when the session closes.

use super::EntityCache;
use crate::Resource;
use crate::entity::Entity;
use std::collections::BTreeMap;

#[derive(Debug)]
struct Slot {
    entity: Entity,
    tick: u64,
}

/// LRU-bounded identity map.
#[derive(Debug)]
pub struct EagerCache {
    capacity: usize,
    entries: BTreeMap<Resource, Slot>,
    /// Last-use tick -> resource, oldest first.
    recency: BTreeMap<u64, Resource>,
    tick: u64,
}

impl EagerCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: BTreeMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn next_tick(&mut self) -> u64 {
        self.tick = self.tick.saturating_add(1);
        self.tick
    }

    fn touch(&mut self, resource: &Resource) {
        let tick = self.next_tick();
        if let Some(slot) = self.entries.get_mut(resource) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            self.recency.insert(tick, resource.clone());
        }
    }

    fn remove(&mut self, resource: &Resource) -> Option<Entity> {
        let slot = self.entries.remove(resource)?;
        self.recency.remove(&slot.tick);
        Some(slot.entity)
    }

    /// Evict least recently used entries nobody else holds until the table
    /// fits its capacity again.
    fn shrink(&mut self) {
        while self.entries.len() > self.capacity {
            let victim = self
                .recency
                .values()
                .find(|r| self.entries.get(*r).is_some_and(|s| !s.entity.is_shared()))
                .cloned();
            match victim {
                Some(resource) => {
                    self.remove(&resource);
                    tracing::trace!(resource = %resource, "eager cache eviction");
                }
                None => break,
            }
        }
    }
}

impl EntityCache for EagerCache {
    fn name(&self) -> &'static str {
        "eager"
    }

    fn get(&mut self, resource: &Resource) -> Option<Entity> {
        let entity = self.entries.get(resource)?.entity.clone();
        self.touch(resource);
        Some(entity)
    }

    fn put(&mut self, entity: &Entity) {
        let resource = entity.resource();
        let tick = self.next_tick();
        if let Some(previous) = self.entries.insert(
            resource.clone(),
            Slot {
                entity: entity.clone(),
                tick,
            },
        ) {
            self.recency.remove(&previous.tick);
        }
        self.recency.insert(tick, resource);
        self.shrink();
    }

    fn evict(&mut self, resource: &Resource) {
        self.remove(resource);
    }

    fn renamed(&mut self, before: &Resource, after: &Resource) {
        if let Some(entity) = self.remove(before) {
            entity.rebind(after.clone());
            self.put(&entity);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }
}
