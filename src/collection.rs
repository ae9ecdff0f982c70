//! In-memory collection bound to the identity that loaded it
//!
//! Every commit names the owner it was computed for; a commit for an owner
//! that is no longer active is dropped, so a response that lands after an
//! identity switch never leaks into the new identity's list.
//!
//! A full reload reads the store, awaits, then swaps the list in. Changes
//! committed through [`OwnedCollection::commit_change`] while a [`Load`] is
//! outstanding are journaled and replayed onto the fresh rows, so a reply
//! read before those changes never erases them.

use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{RepoError, RepoResult};
use crate::local::{self, LocalStore};

struct State<T, E> {
    owner: Option<String>,
    items: Vec<T>,
    /// Sequence number of the last journaled change
    seq: u64,
    /// Outstanding loads; the journal is only kept while this is non-zero
    loads: usize,
    journal: Vec<(u64, E)>,
}

pub(crate) struct OwnedCollection<T, E = ()> {
    key: fn(&str) -> String,
    state: Mutex<State<T, E>>,
}

impl<T, E> OwnedCollection<T, E> {
    /// `key` maps an owner id to its local-storage key
    pub(crate) fn new(key: fn(&str) -> String) -> Self {
        Self {
            key,
            state: Mutex::new(State {
                owner: None,
                items: Vec::new(),
                seq: 0,
                loads: 0,
                journal: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Serialize, E> OwnedCollection<T, E> {
    /// Bind to `owner` with an empty list
    pub(crate) fn reset(&self, owner: &str) {
        let mut state = self.lock();
        state.owner = Some(owner.to_string());
        state.items.clear();
        state.journal.clear();
    }

    pub(crate) fn clear(&self) {
        let mut state = self.lock();
        state.owner = None;
        state.items.clear();
        state.journal.clear();
    }

    pub(crate) fn snapshot(&self) -> Vec<T> {
        self.lock().items.clone()
    }

    pub(crate) fn find(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        self.lock().items.iter().find(|item| pred(item)).cloned()
    }

    /// Local path: persist the new list first, adopt it only if the write succeeded
    pub(crate) fn write_through<R>(
        &self,
        store: &dyn LocalStore,
        owner: &str,
        f: impl FnOnce(&mut Vec<T>) -> RepoResult<R>,
    ) -> RepoResult<R> {
        let mut state = self.lock();
        if state.owner.as_deref() != Some(owner) {
            return Err(RepoError::IdentityChanged);
        }

        let mut next = state.items.clone();
        let out = f(&mut next)?;
        local::save_list(store, &(self.key)(owner), &next)?;
        state.items = next;
        Ok(out)
    }

    /// Remote path: the store already accepted the change; adopt it and
    /// refresh the device copy. Returns `None` if `owner` is no longer active.
    pub(crate) fn commit<R>(
        &self,
        store: &dyn LocalStore,
        owner: &str,
        f: impl FnOnce(&mut Vec<T>) -> R,
    ) -> Option<R> {
        let mut state = self.lock();
        if state.owner.as_deref() != Some(owner) {
            tracing::debug!(owner, "Dropping result for an inactive identity");
            return None;
        }

        let out = f(&mut state.items);
        self.mirror(store, owner, &state.items);
        Some(out)
    }

    /// Like [`commit`](Self::commit) for a change that a load in flight
    /// must replay; returns whether it was applied
    pub(crate) fn commit_change(
        &self,
        store: &dyn LocalStore,
        owner: &str,
        change: E,
        apply: impl Fn(&mut Vec<T>, &E),
    ) -> bool {
        let mut state = self.lock();
        if state.owner.as_deref() != Some(owner) {
            tracing::debug!(owner, "Dropping change for an inactive identity");
            return false;
        }

        apply(&mut state.items, &change);
        if state.loads > 0 {
            state.seq += 1;
            let seq = state.seq;
            state.journal.push((seq, change));
        }
        self.mirror(store, owner, &state.items);
        true
    }

    /// Start a reload; call before the store is read
    pub(crate) fn begin_load(&self) -> Load<'_, T, E> {
        let mut state = self.lock();
        state.loads += 1;
        Load {
            collection: self,
            since: state.seq,
        }
    }

    /// Replace the whole list without touching local storage
    pub(crate) fn replace(&self, owner: &str, items: Vec<T>) -> bool {
        let mut state = self.lock();
        if state.owner.as_deref() != Some(owner) {
            return false;
        }
        state.items = items;
        true
    }

    fn mirror(&self, store: &dyn LocalStore, owner: &str, items: &[T]) {
        if let Err(e) = local::save_list(store, &(self.key)(owner), items) {
            tracing::warn!(owner, error = %e, "Failed to refresh local copy");
        }
    }
}

/// An outstanding reload of an [`OwnedCollection`]
pub(crate) struct Load<'a, T, E> {
    collection: &'a OwnedCollection<T, E>,
    since: u64,
}

impl<T: Clone + Serialize, E> Load<'_, T, E> {
    /// Adopt `rows` with every change journaled since the load began
    /// replayed on top, and mirror the result to the device copy
    ///
    /// Returns `None` if `owner` is no longer active.
    pub(crate) fn finish(
        self,
        store: &dyn LocalStore,
        owner: &str,
        mut rows: Vec<T>,
        replay: impl Fn(&mut Vec<T>, &E),
    ) -> Option<Vec<T>> {
        let mut state = self.collection.lock();
        if state.owner.as_deref() != Some(owner) {
            tracing::debug!(owner, "Dropping load for an inactive identity");
            return None;
        }

        let mut replayed = 0;
        for (_, change) in state.journal.iter().filter(|(seq, _)| *seq > self.since) {
            replay(&mut rows, change);
            replayed += 1;
        }
        if replayed > 0 {
            tracing::debug!(owner, replayed, "Replayed changes that raced the load");
        }

        state.items = rows.clone();
        self.collection.mirror(store, owner, &rows);
        Some(rows)
    }
}

impl<T, E> Drop for Load<'_, T, E> {
    fn drop(&mut self) {
        let mut state = self.collection.lock();
        state.loads = state.loads.saturating_sub(1);
        if state.loads == 0 {
            state.journal.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LocalStoreError;
    use crate::local::{MemoryLocalStore, tasks_key};

    struct ReadOnly;

    impl LocalStore for ReadOnly {
        fn get(&self, _key: &str) -> Result<Option<String>, LocalStoreError> {
            Ok(None)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), LocalStoreError> {
            Err(std::io::Error::other("read-only").into())
        }
        fn remove(&self, _key: &str) -> Result<(), LocalStoreError> {
            Err(std::io::Error::other("read-only").into())
        }
    }

    #[test]
    fn failed_write_leaves_list_untouched() {
        let list: OwnedCollection<String> = OwnedCollection::new(tasks_key);
        list.reset("temp_1");
        list.commit(&MemoryLocalStore::new(), "temp_1", |items| {
            items.push("kept".to_string())
        });

        let result = list.write_through(&ReadOnly, "temp_1", |items| {
            items.clear();
            Ok(())
        });
        assert!(matches!(result, Err(RepoError::Local(_))));
        assert_eq!(list.snapshot(), vec!["kept".to_string()]);
    }

    #[test]
    fn commit_for_inactive_owner_is_dropped() {
        let store = MemoryLocalStore::new();
        let list: OwnedCollection<String> = OwnedCollection::new(tasks_key);
        list.reset("new_owner");

        let applied = list.commit(&store, "old_owner", |items| items.push("late".into()));
        assert!(applied.is_none());
        assert!(list.snapshot().is_empty());
        assert_eq!(store.get("tasks_old_owner").unwrap(), None);
    }

    fn push(items: &mut Vec<String>, change: &String) {
        if !items.contains(change) {
            items.push(change.clone());
        }
    }

    #[test]
    fn changes_during_a_load_are_replayed_onto_its_rows() {
        let store = MemoryLocalStore::new();
        let list: OwnedCollection<String, String> = OwnedCollection::new(tasks_key);
        list.reset("owner");

        let load = list.begin_load();
        // Arrives while the read is in flight, after the store snapshot
        assert!(list.commit_change(&store, "owner", "fresh".to_string(), push));

        let rows = load
            .finish(&store, "owner", vec!["stale".to_string()], push)
            .unwrap();
        assert_eq!(rows, vec!["stale".to_string(), "fresh".to_string()]);
        assert_eq!(list.snapshot(), rows);

        let mirrored: Vec<String> = local::load_list(&store, "tasks_owner").unwrap();
        assert_eq!(mirrored, rows);
    }

    #[test]
    fn journal_is_dropped_once_no_load_is_outstanding() {
        let store = MemoryLocalStore::new();
        let list: OwnedCollection<String, String> = OwnedCollection::new(tasks_key);
        list.reset("owner");

        let abandoned = list.begin_load();
        list.commit_change(&store, "owner", "during".to_string(), push);
        drop(abandoned);
        list.commit_change(&store, "owner", "after".to_string(), push);

        let rows = list
            .begin_load()
            .finish(&store, "owner", Vec::new(), push)
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn load_for_a_replaced_owner_is_dropped() {
        let store = MemoryLocalStore::new();
        let list: OwnedCollection<String, String> = OwnedCollection::new(tasks_key);
        list.reset("old");

        let load = list.begin_load();
        list.reset("new");

        assert!(load.finish(&store, "old", vec!["x".into()], push).is_none());
        assert!(list.snapshot().is_empty());
    }
}
