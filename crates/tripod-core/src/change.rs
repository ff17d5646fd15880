//! # Change Notification
//!
//! Repositories publish one `ChangeEvent` per committed write batch.
//! Consumers (change-tracked cache layers) own a `ChangeSubscription`: a
//! channel receiver registered on the repository's `ChangeBus`. Dropping the
//! subscription unregisters it, so there is no global listener set to clean
//! up.

use crate::{Resource, Statement};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Whether a statement was added or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    Added,
    Removed,
}

/// One statement delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementChange {
    pub statement: Statement,
    pub kind: ChangeKind,
}

impl StatementChange {
    #[must_use]
    pub fn added(statement: Statement) -> Self {
        Self {
            statement,
            kind: ChangeKind::Added,
        }
    }

    #[must_use]
    pub fn removed(statement: Statement) -> Self {
        Self {
            statement,
            kind: ChangeKind::Removed,
        }
    }
}

/// A batch of statement deltas published after a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeEvent {
    pub changes: Vec<StatementChange>,
}

impl ChangeEvent {
    #[must_use]
    pub fn new(changes: Vec<StatementChange>) -> Self {
        Self { changes }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Every resource occurring as subject or object of a changed statement.
    ///
    /// An entity can be reachable from either end of a relation, so both
    /// ends count as affected.
    #[must_use]
    pub fn affected_resources(&self) -> BTreeSet<Resource> {
        let mut affected = BTreeSet::new();
        for change in &self.changes {
            affected.insert(change.statement.subject.clone());
            if let Some(object) = change.statement.object.as_resource() {
                affected.insert(object.clone());
            }
        }
        affected
    }
}

#[derive(Debug, Default)]
struct BusState {
    next_id: u64,
    listeners: BTreeMap<u64, Sender<ChangeEvent>>,
}

fn lock(state: &Mutex<BusState>) -> MutexGuard<'_, BusState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fan-out of change events to subscribers.
///
/// Cloning the bus yields another handle to the same listener set.
#[derive(Debug, Clone, Default)]
pub struct ChangeBus {
    state: Arc<Mutex<BusState>>,
}

impl ChangeBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> ChangeSubscription {
        let (sender, receiver) = mpsc::channel();
        let mut state = lock(&self.state);
        let id = state.next_id;
        state.next_id = state.next_id.saturating_add(1);
        state.listeners.insert(id, sender);
        tracing::trace!(subscription = id, "change subscription registered");
        ChangeSubscription {
            id,
            receiver,
            bus: Arc::downgrade(&self.state),
        }
    }

    /// Deliver an event to every live subscriber. Empty events are dropped.
    pub fn publish(&self, event: ChangeEvent) {
        if event.is_empty() {
            return;
        }
        let mut state = lock(&self.state);
        // A send only fails when the receiver is gone.
        state
            .listeners
            .retain(|_, sender| sender.send(event.clone()).is_ok());
        tracing::trace!(
            changes = event.changes.len(),
            listeners = state.listeners.len(),
            "change event published"
        );
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.state).listeners.len()
    }
}

/// A live registration on a `ChangeBus`.
#[derive(Debug)]
pub struct ChangeSubscription {
    id: u64,
    receiver: Receiver<ChangeEvent>,
    bus: Weak<Mutex<BusState>>,
}

impl ChangeSubscription {
    /// Take every event delivered since the last drain, without blocking.
    pub fn drain(&self) -> Vec<ChangeEvent> {
        self.receiver.try_iter().collect()
    }

    /// Unregister explicitly. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(state) = self.bus.upgrade() {
            lock(&state).listeners.remove(&self.id);
            tracing::trace!(subscription = self.id, "change subscription dropped");
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Iri, Literal};

    fn statement(s: &str, o: Resource) -> Statement {
        Statement::new(Resource::named(s), Iri::new("http://example.org/p"), o)
    }

    #[test]
    fn affected_resources_include_subject_and_object() {
        let event = ChangeEvent::new(vec![
            StatementChange::added(statement("http://ex/s", Resource::named("http://ex/o"))),
            StatementChange::removed(Statement::new(
                Resource::named("http://ex/t"),
                Iri::new("http://example.org/name"),
                Literal::string("t"),
            )),
        ]);

        let affected = event.affected_resources();
        assert_eq!(affected.len(), 3);
        assert!(affected.contains(&Resource::named("http://ex/s")));
        assert!(affected.contains(&Resource::named("http://ex/o")));
        assert!(affected.contains(&Resource::named("http://ex/t")));
    }

    #[test]
    fn subscribers_receive_published_events() {
        let bus = ChangeBus::new();
        let sub = bus.subscribe();

        let event = ChangeEvent::new(vec![StatementChange::added(statement(
            "http://ex/s",
            Resource::named("http://ex/o"),
        ))]);
        bus.publish(event.clone());

        assert_eq!(sub.drain(), vec![event]);
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn empty_events_are_not_delivered() {
        let bus = ChangeBus::new();
        let sub = bus.subscribe();
        bus.publish(ChangeEvent::default());
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let bus = ChangeBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();
        assert_eq!(bus.listener_count(), 2);

        drop(first);
        assert_eq!(bus.listener_count(), 1);

        second.unsubscribe();
        assert_eq!(bus.listener_count(), 0);
    }
}
