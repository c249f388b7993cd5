// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Task and topic registries.
//!
//! The task registry turns opaque platform task handles into the dense
//! one-byte [`TaskId`]s the rest of the pipeline runs on. Registration is
//! idempotent per handle and serialized by a mutex; ids are assigned
//! monotonically and returned to a free pool on unregistration.
//!
//! The topic registry assigns [`Topic`] values from an atomic counter and
//! stores each topic's human-readable prefix in a one-shot slot, so
//! readers on the logging fast path never take a lock.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI8, Ordering};

use skald_types::{TaskId, Topic, TopicCell};

/// Error returned when a fixed-capacity map has no room left.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MapFull;

/// The dense task id space is exhausted. Whether this is fatal is the
/// platform adapter's call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OutOfTaskIds;

/// No topic values left. Registration fails silently at the logging call
/// sites: sessions on the unregistered topic are inert.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OutOfTopics;

/// A fixed-capacity map kept sorted by key, with binary-search lookup.
///
/// Capacity is fixed at construction; the backing vector never
/// reallocates after `new`. Keys and values are stored by value.
#[derive(Debug)]
pub struct SortedMap<K, V> {
    entries: Vec<(K, V)>,
}

impl<K: Ord + Copy, V: Copy> SortedMap<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: K) -> Option<V> {
        self.entries
            .binary_search_by_key(&key, |&(k, _)| k)
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Inserts or replaces. Returns the previous value for an existing
    /// key, or `MapFull` if a new key would exceed capacity.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>, MapFull> {
        match self.entries.binary_search_by_key(&key, |&(k, _)| k) {
            Ok(i) => {
                let old = self.entries[i].1;
                self.entries[i].1 = value;
                Ok(Some(old))
            }
            Err(i) => {
                if self.entries.len() == self.entries.capacity() {
                    return Err(MapFull);
                }
                self.entries.insert(i, (key, value));
                Ok(None)
            }
        }
    }

    pub fn remove(&mut self, key: K) -> Option<V> {
        self.entries
            .binary_search_by_key(&key, |&(k, _)| k)
            .ok()
            .map(|i| self.entries.remove(i).1)
    }
}

struct TaskTable {
    ids: SortedMap<u64, TaskId>,
    /// Indexed by `TaskId::index()`; slot 0 (the ISR pseudo-task) stays
    /// empty here, its representation is the adapter's business.
    names: Box<[Option<&'static str>]>,
    /// Unregistered ids awaiting reuse.
    free: Vec<TaskId>,
    /// Next never-assigned id.
    next: u8,
    capacity: u8,
}

/// Maps opaque platform task handles to dense [`TaskId`]s.
pub struct TaskRegistry {
    inner: spin::Mutex<TaskTable>,
}

impl TaskRegistry {
    /// `capacity` is the number of normal tasks, at most
    /// [`TaskId::MAX_CAPACITY`].
    pub fn new(capacity: u8) -> Self {
        assert!(capacity >= 1 && capacity <= TaskId::MAX_CAPACITY);
        Self {
            inner: spin::Mutex::new(TaskTable {
                ids: SortedMap::new(capacity as usize),
                names: alloc::vec![None; capacity as usize + 1]
                    .into_boxed_slice(),
                free: Vec::with_capacity(capacity as usize),
                next: TaskId::FIRST_NORMAL.raw(),
                capacity,
            }),
        }
    }

    /// Registers `handle`, assigning the next free id. Registering an
    /// already-known handle returns its existing id unchanged.
    pub fn register(
        &self,
        handle: u64,
        name: Option<&'static str>,
    ) -> Result<TaskId, OutOfTaskIds> {
        let mut table = self.inner.lock();
        if let Some(id) = table.ids.get(handle) {
            return Ok(id);
        }

        let id = match table.free.pop() {
            Some(id) => id,
            None => {
                if table.next > table.capacity {
                    return Err(OutOfTaskIds);
                }
                let id = TaskId::new(table.next);
                table.next += 1;
                id
            }
        };
        table.ids.insert(handle, id).map_err(|_| OutOfTaskIds)?;
        table.names[id.index()] = name;
        Ok(id)
    }

    /// Forgets `handle` and returns its id to the free pool.
    pub fn unregister(&self, handle: u64) -> Option<TaskId> {
        let mut table = self.inner.lock();
        let id = table.ids.remove(handle)?;
        table.names[id.index()] = None;
        table.free.push(id);
        Some(id)
    }

    /// The id registered for `handle`, or [`TaskId::INVALID`].
    pub fn lookup(&self, handle: u64) -> TaskId {
        self.inner
            .lock()
            .ids
            .get(handle)
            .unwrap_or(TaskId::INVALID)
    }

    /// The name given at registration, if any.
    pub fn name_of(&self, id: TaskId) -> Option<&'static str> {
        let table = self.inner.lock();
        if id.is_normal() && id.index() < table.names.len() {
            table.names[id.index()]
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Assigns [`Topic`] values and serves their prefixes lock-free.
pub struct TopicRegistry {
    /// Next value to hand out; moves only upward.
    next: AtomicI8,
    /// Indexed by `Topic::index()`, slot 0 unused. One-shot: a prefix is
    /// written exactly once, before the topic value is published.
    prefixes: Box<[spin::Once<&'static str>]>,
    capacity: i8,
}

impl TopicRegistry {
    /// `capacity` must leave room for the allocation counter to move one
    /// past the last topic value.
    pub fn new(capacity: i8) -> Self {
        assert!(capacity >= 1 && capacity < i8::MAX);
        let mut prefixes = Vec::with_capacity(capacity as usize + 1);
        prefixes.resize_with(capacity as usize + 1, spin::Once::new);
        Self {
            next: AtomicI8::new(1),
            prefixes: prefixes.into_boxed_slice(),
            capacity,
        }
    }

    /// Assigns the next topic value, stores `prefix` for it, and
    /// publishes the value through `cell`.
    pub fn register(
        &self,
        cell: &TopicCell,
        prefix: &'static str,
    ) -> Result<Topic, OutOfTopics> {
        let mut current = self.next.load(Ordering::Relaxed);
        let raw = loop {
            if current > self.capacity {
                return Err(OutOfTopics);
            }
            match self.next.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break current,
                Err(seen) => current = seen,
            }
        };

        let topic = Topic::new(raw);
        self.prefixes[topic.index()].call_once(|| prefix);
        cell.assign(topic);
        Ok(topic)
    }

    /// Lock-free prefix lookup for the producer path.
    pub fn prefix(&self, topic: Topic) -> Option<&'static str> {
        if !topic.is_valid() || topic.index() >= self.prefixes.len() {
            return None;
        }
        self.prefixes[topic.index()].get().copied()
    }

    pub fn is_registered(&self, topic: Topic) -> bool {
        self.prefix(topic).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_map_basics() {
        let mut map = SortedMap::new(3);
        assert!(map.insert(20, 'b').unwrap().is_none());
        assert!(map.insert(10, 'a').unwrap().is_none());
        assert!(map.insert(30, 'c').unwrap().is_none());

        assert_eq!(map.get(10), Some('a'));
        assert_eq!(map.get(20), Some('b'));
        assert_eq!(map.get(25), None);

        assert_eq!(map.insert(20, 'B'), Ok(Some('b')));
        assert_eq!(map.insert(40, 'd'), Err(MapFull));

        assert_eq!(map.remove(10), Some('a'));
        assert_eq!(map.remove(10), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn register_is_monotonic_and_idempotent() {
        let reg = TaskRegistry::new(4);
        let a = reg.register(100, Some("alpha")).unwrap();
        let b = reg.register(200, Some("beta")).unwrap();
        assert_eq!(a, TaskId::new(1));
        assert_eq!(b, TaskId::new(2));

        // Same handle, same id, name untouched.
        assert_eq!(reg.register(100, None).unwrap(), a);
        assert_eq!(reg.name_of(a), Some("alpha"));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn lookup_unknown_is_invalid() {
        let reg = TaskRegistry::new(2);
        assert!(reg.lookup(55).is_invalid());
        let id = reg.register(55, None).unwrap();
        assert_eq!(reg.lookup(55), id);
    }

    #[test]
    fn exhaustion_and_reuse() {
        let reg = TaskRegistry::new(2);
        let a = reg.register(1, Some("a")).unwrap();
        let _b = reg.register(2, Some("b")).unwrap();
        assert_eq!(reg.register(3, None), Err(OutOfTaskIds));

        assert_eq!(reg.unregister(1), Some(a));
        assert!(reg.lookup(1).is_invalid());
        assert_eq!(reg.name_of(a), None);

        // The freed id is handed out again.
        assert_eq!(reg.register(3, Some("c")).unwrap(), a);
        assert_eq!(reg.name_of(a), Some("c"));
    }

    #[test]
    fn topics_assign_upward() {
        let topics = TopicRegistry::new(3);
        let cell_a = TopicCell::new();
        let cell_b = TopicCell::new();

        let a = topics.register(&cell_a, "sys").unwrap();
        let b = topics.register(&cell_b, "net").unwrap();
        assert_eq!(a.raw(), 1);
        assert_eq!(b.raw(), 2);
        assert_eq!(cell_a.get(), a);
        assert_eq!(topics.prefix(a), Some("sys"));
        assert_eq!(topics.prefix(b), Some("net"));
    }

    #[test]
    fn topic_exhaustion_is_reported() {
        let topics = TopicRegistry::new(1);
        let cell = TopicCell::new();
        topics.register(&cell, "only").unwrap();

        let spare = TopicCell::new();
        assert_eq!(topics.register(&spare, "nope"), Err(OutOfTopics));
        assert!(!spare.get().is_valid());
    }

    #[test]
    fn invalid_topic_has_no_prefix() {
        let topics = TopicRegistry::new(2);
        assert_eq!(topics.prefix(Topic::INVALID), None);
        assert!(!topics.is_registered(Topic::new(9)));
    }
}
