//! Identity-keyed state container shared by every flow.

use super::identity::{ConversationId, KeyScope, StateKey};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct StateEntry<T> {
    pub value: T,
    pub created_at: Instant,
    pub updated_at: Instant,
}

impl<T> StateEntry<T> {
    fn new(value: T) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One value per conversation.
///
/// Setting again overwrites. Reads hand out clones so no shard lock
/// outlives the call.
#[derive(Debug)]
pub struct StateMap<T> {
    name: &'static str,
    scope: KeyScope,
    entries: DashMap<StateKey, StateEntry<T>>,
}

impl<T: Clone> StateMap<T> {
    pub fn new(name: &'static str, scope: KeyScope) -> Self {
        Self {
            name,
            scope,
            entries: DashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn key(&self, id: &ConversationId) -> StateKey {
        id.key(self.scope)
    }

    pub fn get(&self, id: &ConversationId) -> Option<T> {
        self.entries
            .get(&self.key(id))
            .map(|entry| entry.value.clone())
    }

    pub fn has(&self, id: &ConversationId) -> bool {
        self.entries.contains_key(&self.key(id))
    }

    pub fn set(&self, id: &ConversationId, value: T) {
        self.entries.insert(self.key(id), StateEntry::new(value));
    }

    /// Insert only when no entry exists. Returns whether the value was stored.
    pub fn insert_if_absent(&self, id: &ConversationId, value: T) -> bool {
        match self.entries.entry(self.key(id)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(StateEntry::new(value));
                true
            }
        }
    }

    pub fn delete(&self, id: &ConversationId) -> bool {
        self.entries.remove(&self.key(id)).is_some()
    }

    pub fn take(&self, id: &ConversationId) -> Option<T> {
        self.entries
            .remove(&self.key(id))
            .map(|(_, entry)| entry.value)
    }

    /// Mutate the entry in place. `None` when there is no entry.
    pub fn update<R>(&self, id: &ConversationId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut entry = self.entries.get_mut(&self.key(id))?;
        entry.updated_at = Instant::now();
        Some(f(&mut entry.value))
    }

    /// Overwrite only if the entry still exists, keeping its creation time.
    ///
    /// Used after an await point: a cancel that landed meanwhile wins.
    pub fn replace_if_present(&self, id: &ConversationId, value: T) -> bool {
        match self.entries.get_mut(&self.key(id)) {
            Some(mut entry) => {
                entry.value = value;
                entry.updated_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove entries not written for `max_idle`. Returns the removed keys.
    pub fn purge_idle(&self, max_idle: Duration) -> Vec<StateKey> {
        let now = Instant::now();
        let mut removed = Vec::new();
        self.entries.retain(|key, entry| {
            let keep = now.duration_since(entry.updated_at) < max_idle;
            if !keep {
                debug!(
                    "{}: expiring {} after {:?}",
                    self.name,
                    key,
                    now.duration_since(entry.created_at)
                );
                removed.push(*key);
            }
            keep
        });
        removed
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Type-erased view used by cleanup and expiry to walk every map.
pub trait TrackedState: Send + Sync {
    fn name(&self) -> &'static str;
    fn has(&self, id: &ConversationId) -> bool;
    fn delete(&self, id: &ConversationId) -> bool;
    fn purge_idle(&self, max_idle: Duration) -> Vec<StateKey>;
}

impl<T: Clone + Send + Sync> TrackedState for StateMap<T> {
    fn name(&self) -> &'static str {
        StateMap::name(self)
    }

    fn has(&self, id: &ConversationId) -> bool {
        StateMap::has(self, id)
    }

    fn delete(&self, id: &ConversationId) -> bool {
        StateMap::delete(self, id)
    }

    fn purge_idle(&self, max_idle: Duration) -> Vec<StateKey> {
        StateMap::purge_idle(self, max_idle)
    }
}
