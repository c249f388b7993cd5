// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-capacity FIFO rings of [`MessageUnit`]s.
//!
//! [`UnitRing`] is the single-owner building block: a circular buffer with
//! positional access and order-preserving removal, used both for the
//! transmitter worker's reassembly buffer (where it must pull matching
//! units out of the middle) and as the storage behind [`SharedQueue`].
//!
//! [`SharedQueue`] is the bounded producer→worker channel: many producers,
//! one consumer, FIFO across all producers, no reordering and no priority
//! lanes. Producers that find it full decide between retrying and dropping
//! at the call site; the queue itself never blocks.
//!
//! Design goals, in order:
//!
//! 1. `no_std` (storage is a single heap allocation sized at init).
//! 2. No arithmetical cleverness -- circular index math is written out
//!    plainly so it can be read and reviewed.
//! 3. Push and pop never panic; full and empty are ordinary results.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec;

use skald_types::MessageUnit;

/// Error returned when the ring has no room for another unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueueFull;

/// A single-owner circular FIFO of message units.
///
/// Entries are addressed oldest-first: index 0 is the next unit `pop`
/// would return.
#[derive(Debug)]
pub struct UnitRing {
    backing: Box<[MessageUnit]>,
    /// Position the next pushed unit lands in.
    head: usize,
    /// Position of the oldest unit.
    tail: usize,
    available: usize,
}

impl UnitRing {
    /// Creates an empty ring holding up to `capacity` units. `capacity`
    /// must be non-zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            backing: vec![MessageUnit::discard(); capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            available: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.backing.len()
    }

    pub fn len(&self) -> usize {
        self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    pub fn is_full(&self) -> bool {
        self.available == self.backing.len()
    }

    /// Appends a unit at the young end.
    pub fn push(&mut self, unit: MessageUnit) -> Result<(), QueueFull> {
        if self.is_full() {
            return Err(QueueFull);
        }
        self.backing[self.head] = unit;
        self.head = circular_add(self.head, 1, self.backing.len());
        self.available += 1;
        Ok(())
    }

    /// Removes and returns the oldest unit.
    pub fn pop(&mut self) -> Option<MessageUnit> {
        let unit = *self.get(0)?;
        self.tail = circular_add(self.tail, 1, self.backing.len());
        self.available -= 1;
        Some(unit)
    }

    /// The oldest unit, without removing it.
    pub fn peek(&self) -> Option<&MessageUnit> {
        self.get(0)
    }

    /// The `n`th-oldest unit, if `n < len()`.
    pub fn get(&self, n: usize) -> Option<&MessageUnit> {
        if n >= self.available {
            return None;
        }
        Some(&self.backing[circular_add(self.tail, n, self.backing.len())])
    }

    /// Removes the `n`th-oldest unit, keeping every other unit in its
    /// original order. Costs one slot copy per entry older than `n`.
    pub fn remove(&mut self, n: usize) -> Option<MessageUnit> {
        if n >= self.available {
            return None;
        }
        let cap = self.backing.len();
        let removed = self.backing[circular_add(self.tail, n, cap)];
        // Shift the entries older than the removed one towards the young
        // end, then retire the tail slot they vacated.
        for i in (0..n).rev() {
            self.backing[circular_add(self.tail, i + 1, cap)] =
                self.backing[circular_add(self.tail, i, cap)];
        }
        self.tail = circular_add(self.tail, 1, cap);
        self.available -= 1;
        Some(removed)
    }
}

/// Circular index arithmetic without assuming hardware divide. `b` must be
/// less than `limit`.
fn circular_add(a: usize, b: usize, limit: usize) -> usize {
    let n = a + b;
    // This slightly weird formulation avoids generating an overflow panic
    // that the compiler would have to optimize away.
    n.checked_sub(limit).unwrap_or(n)
}

/// The bounded producer→worker channel: a [`UnitRing`] behind a spin
/// mutex.
///
/// Many producers may push concurrently (including from interrupt
/// handlers -- the critical section is a handful of copies); only the
/// transmitter worker pops. Within one producer, push order is preserved;
/// across producers the queue is FIFO in arrival order.
pub struct SharedQueue {
    inner: spin::Mutex<UnitRing>,
}

impl SharedQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: spin::Mutex::new(UnitRing::new(capacity)),
        }
    }

    /// Attempts to enqueue one unit. Never blocks beyond the lock.
    pub fn push(&self, unit: MessageUnit) -> Result<(), QueueFull> {
        self.inner.lock().push(unit)
    }

    /// Dequeues the oldest unit, if any. Worker-only.
    pub fn pop(&self) -> Option<MessageUnit> {
        self.inner.lock().pop()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skald_types::{Payload, TaskId};

    fn unit(task: u8, seq: u8) -> MessageUnit {
        MessageUnit {
            payload: Payload::U8(task),
            base: 10,
            fill: 0,
            task: TaskId::new(task),
            seq,
        }
    }

    #[test]
    fn base_state() {
        let ring = UnitRing::new(4);
        assert!(ring.is_empty());
        assert!(!ring.is_full());
        assert_eq!(ring.len(), 0);
        assert_eq!(ring.capacity(), 4);
        assert!(ring.peek().is_none());
    }

    #[test]
    fn fifo_order_across_wrap() {
        let mut ring = UnitRing::new(4);

        // Shift the head/tail off zero so pushes wrap.
        for _ in 0..3 {
            ring.push(unit(9, 1)).unwrap();
            ring.pop().unwrap();
        }

        for seq in 1..=4 {
            ring.push(unit(1, seq)).unwrap();
        }
        assert!(ring.is_full());
        assert_eq!(ring.push(unit(1, 5)), Err(QueueFull));

        for seq in 1..=4 {
            assert_eq!(ring.pop().unwrap().seq, seq);
        }
        assert!(ring.pop().is_none());
    }

    #[test]
    fn positional_access() {
        let mut ring = UnitRing::new(4);
        ring.push(unit(1, 1)).unwrap();
        ring.push(unit(2, 1)).unwrap();
        ring.push(unit(3, 1)).unwrap();

        assert_eq!(ring.get(0).unwrap().task, TaskId::new(1));
        assert_eq!(ring.get(2).unwrap().task, TaskId::new(3));
        assert!(ring.get(3).is_none());
    }

    #[test]
    fn remove_preserves_order() {
        let mut ring = UnitRing::new(5);
        for t in 1..=5 {
            ring.push(unit(t, 1)).unwrap();
        }

        let removed = ring.remove(2).unwrap();
        assert_eq!(removed.task, TaskId::new(3));
        assert_eq!(ring.len(), 4);

        let order: alloc::vec::Vec<u8> = core::iter::from_fn(|| ring.pop())
            .map(|u| u.task.raw())
            .collect();
        assert_eq!(order, [1, 2, 4, 5]);
    }

    #[test]
    fn remove_oldest_and_youngest() {
        let mut ring = UnitRing::new(3);
        for t in 1..=3 {
            ring.push(unit(t, 1)).unwrap();
        }
        assert_eq!(ring.remove(0).unwrap().task, TaskId::new(1));
        assert_eq!(ring.remove(1).unwrap().task, TaskId::new(3));
        assert_eq!(ring.pop().unwrap().task, TaskId::new(2));
        assert!(ring.is_empty());
    }

    #[test]
    fn shared_queue_many_producers() {
        use std::sync::Arc;

        let q = Arc::new(SharedQueue::new(64));
        let mut handles = std::vec::Vec::new();
        for t in 1..=4u8 {
            let q = Arc::clone(&q);
            handles.push(std::thread::spawn(move || {
                for seq in 1..=8 {
                    while q.push(unit(t, seq)).is_err() {
                        std::thread::yield_now();
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        // All 32 units arrive, and each producer's units stay in its own
        // push order.
        let mut last_seq = [0u8; 5];
        let mut count = 0;
        while let Some(u) = q.pop() {
            let t = u.task.raw() as usize;
            assert!(u.seq > last_seq[t]);
            last_seq[t] = u.seq;
            count += 1;
        }
        assert_eq!(count, 32);
    }
}
