// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-task record builders and the arena that houses them.
//!
//! Each task owns one builder slot for the lifetime of a session; the
//! slot tracks where the in-flight record is (sequence numbering, lazy
//! header, the one-shot format directive) while the atoms themselves go
//! straight to the queue. Slot 0 belongs to the interrupt pseudo-task and
//! is never shared with a registered task.
//!
//! Slot ownership is a per-slot state machine: `claim` moves a slot from
//! free to claimed with a compare-exchange and hands out a
//! [`BuilderHandle`]; dropping the handle moves the slot back. A task is
//! single-threaded, so a claimed slot can only be met by buggy task
//! overrides -- the losing caller gets a null session rather than a
//! panic.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU8, Ordering};

use alloc::boxed::Box;
use alloc::vec::Vec;

use skald_types::{
    next_sequence, FormatDirective, MessageUnit, Payload, TaskId, Topic,
    SEQ_FIRST,
};

pub(crate) struct RecordBuilder {
    task: TaskId,
    next_seq: u8,
    pending: Option<FormatDirective>,
    with_header: bool,
    topic: Topic,
    header_emitted: bool,
    dropped: bool,
}

impl RecordBuilder {
    pub(crate) fn new() -> Self {
        Self {
            task: TaskId::INVALID,
            next_seq: SEQ_FIRST,
            pending: None,
            with_header: false,
            topic: Topic::INVALID,
            header_emitted: true,
            dropped: false,
        }
    }

    /// Rearms the builder for a fresh record. Anything a previous session
    /// left behind (an unfinished record included) is forgotten.
    pub(crate) fn start(
        &mut self,
        task: TaskId,
        with_header: bool,
        topic: Topic,
    ) {
        self.task = task;
        self.next_seq = SEQ_FIRST;
        self.pending = None;
        self.with_header = with_header;
        self.topic = topic;
        self.header_emitted = false;
        self.dropped = false;
    }

    pub(crate) fn task(&self) -> TaskId {
        self.task
    }

    pub(crate) fn topic(&self) -> Topic {
        self.topic
    }

    pub(crate) fn with_header(&self) -> bool {
        self.with_header
    }

    pub(crate) fn header_pending(&self) -> bool {
        !self.header_emitted
    }

    pub(crate) fn mark_header_emitted(&mut self) {
        self.header_emitted = true;
    }

    pub(crate) fn set_pending(&mut self, directive: FormatDirective) {
        self.pending = Some(directive);
    }

    pub(crate) fn take_pending(&mut self) -> Option<FormatDirective> {
        self.pending.take()
    }

    /// Builds the record's next body atom and advances the sequence,
    /// wrapping past the terminal value.
    pub(crate) fn next_unit(
        &mut self,
        payload: Payload,
        directive: FormatDirective,
    ) -> MessageUnit {
        let unit =
            MessageUnit::new(payload, directive, self.task, self.next_seq);
        self.next_seq = next_sequence(self.next_seq);
        unit
    }

    pub(crate) fn terminal(&self) -> MessageUnit {
        MessageUnit::terminal(self.task)
    }

    /// Records that an atom of this record was lost to a full queue; the
    /// rest of the record, terminal included, is suppressed.
    pub(crate) fn mark_dropped(&mut self) {
        self.dropped = true;
    }

    pub(crate) fn is_dropped(&self) -> bool {
        self.dropped
    }
}

const SLOT_FREE: u8 = 0;
const SLOT_CLAIMED: u8 = 1;

/// One claim state and one builder per task id, index 0 reserved for the
/// ISR pseudo-task.
pub(crate) struct BuilderArena {
    states: Box<[AtomicU8]>,
    builders: Box<[UnsafeCell<RecordBuilder>]>,
}

// Safety: a builder cell is only reached through a successful
// SLOT_FREE → SLOT_CLAIMED transition on the matching state, which admits
// one handle per slot at a time; RecordBuilder itself holds no shared
// references.
unsafe impl Sync for BuilderArena {}

impl BuilderArena {
    pub(crate) fn new(task_capacity: u8) -> Self {
        let len = task_capacity as usize + 1;
        let mut states = Vec::with_capacity(len);
        states.resize_with(len, || AtomicU8::new(SLOT_FREE));
        let mut builders = Vec::with_capacity(len);
        builders.resize_with(len, || UnsafeCell::new(RecordBuilder::new()));
        Self {
            states: states.into_boxed_slice(),
            builders: builders.into_boxed_slice(),
        }
    }

    /// Claims `task`'s builder slot for one session. Fails for ids
    /// outside the arena and for slots whose session is still open.
    pub(crate) fn claim(&self, task: TaskId) -> Option<BuilderHandle<'_>> {
        if task.is_invalid() {
            return None;
        }
        let state = self.states.get(task.index())?;
        state
            .compare_exchange(
                SLOT_FREE,
                SLOT_CLAIMED,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .ok()?;
        // Safety: this caller won the claim transition above, so until the
        // handle's drop releases the state no other reference to this
        // builder exists.
        let builder = unsafe { &mut *self.builders[task.index()].get() };
        Some(BuilderHandle { builder, state })
    }
}

/// Exclusive access to one task's record builder; the slot returns to the
/// free state on drop.
pub(crate) struct BuilderHandle<'a> {
    builder: &'a mut RecordBuilder,
    state: &'a AtomicU8,
}

impl Drop for BuilderHandle<'_> {
    fn drop(&mut self) {
        self.state.store(SLOT_FREE, Ordering::Release);
    }
}

impl Deref for BuilderHandle<'_> {
    type Target = RecordBuilder;

    fn deref(&self) -> &Self::Target {
        self.builder
    }
}

impl DerefMut for BuilderHandle<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_advance_and_wrap() {
        let mut builder = RecordBuilder::new();
        builder.start(TaskId::new(3), false, Topic::INVALID);

        let first = builder
            .next_unit(Payload::U8(0), FormatDirective::DEFAULT);
        assert_eq!(first.seq, SEQ_FIRST);
        assert_eq!(first.task, TaskId::new(3));

        // Walk to the wrap point; the terminal value is skipped.
        for _ in 0..253 {
            builder.next_unit(Payload::U8(0), FormatDirective::DEFAULT);
        }
        let at_max = builder
            .next_unit(Payload::U8(0), FormatDirective::DEFAULT);
        assert_eq!(at_max.seq, u8::MAX);
        let wrapped = builder
            .next_unit(Payload::U8(0), FormatDirective::DEFAULT);
        assert_eq!(wrapped.seq, SEQ_FIRST);
    }

    #[test]
    fn start_clears_previous_state() {
        let mut builder = RecordBuilder::new();
        builder.start(TaskId::new(1), true, Topic::new(2));
        builder.set_pending(FormatDirective::X2);
        builder.mark_dropped();
        builder.next_unit(Payload::U8(0), FormatDirective::DEFAULT);

        builder.start(TaskId::new(1), false, Topic::INVALID);
        assert!(builder.take_pending().is_none());
        assert!(!builder.is_dropped());
        assert_eq!(
            builder
                .next_unit(Payload::U8(0), FormatDirective::DEFAULT)
                .seq,
            SEQ_FIRST
        );
    }

    #[test]
    fn arena_bounds_and_exclusivity() {
        let arena = BuilderArena::new(2);

        assert!(arena.claim(TaskId::INVALID).is_none());
        assert!(arena.claim(TaskId::new(3)).is_none());

        let isr = arena.claim(TaskId::ISR).unwrap();
        let one = arena.claim(TaskId::new(1)).unwrap();
        assert!(arena.claim(TaskId::new(1)).is_none());
        drop(one);
        assert!(arena.claim(TaskId::new(1)).is_some());
        drop(isr);
    }

    #[test]
    fn released_slot_keeps_its_builder_state() {
        let arena = BuilderArena::new(1);

        let mut handle = arena.claim(TaskId::new(1)).unwrap();
        handle.start(TaskId::new(1), false, Topic::INVALID);
        handle.set_pending(FormatDirective::B8);
        drop(handle);

        // The next claim sees the same builder; `start` is what resets it.
        let mut again = arena.claim(TaskId::new(1)).unwrap();
        assert_eq!(again.take_pending(), Some(FormatDirective::B8));
    }
}
