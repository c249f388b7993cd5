// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data model shared by every stage of the skald logging pipeline.
//!
//! The pipeline moves fixed-size [`MessageUnit`]s: a producer session turns
//! each streamed value into one unit (or several, for copied strings), the
//! queue carries units between tasks, and the transmitter worker regroups
//! them into records before rendering. Everything in this crate is `Copy`
//! and free of heap references so a unit can cross an ISR boundary or sit
//! in a static ring without ceremony.

#![cfg_attr(not(test), no_std)]

use core::sync::atomic::{AtomicI8, Ordering};

use static_assertions::const_assert;

/// Dense one-byte task identifier.
///
/// Id 0 is the interrupt pseudo-task, ids `1..=capacity` are normal tasks
/// handed out by the task registry, and 255 marks a unit that every
/// consumer must discard without effect.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u8);

impl TaskId {
    /// Pseudo-task for records produced from interrupt context. Its builder
    /// slot is dedicated and never shared with a registered task.
    pub const ISR: Self = Self(0);

    /// Discard marker. Units carrying this id produce no output.
    pub const INVALID: Self = Self(u8::MAX);

    /// First id the registry hands out.
    pub const FIRST_NORMAL: Self = Self(1);

    /// Largest usable task capacity: ids 1..=254, leaving 0 for the ISR
    /// slot and 255 for the discard marker.
    pub const MAX_CAPACITY: u8 = u8::MAX - 1;

    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Index of this task's builder slot (slot 0 belongs to the ISR
    /// pseudo-task). Only meaningful for non-INVALID ids.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn is_invalid(self) -> bool {
        self.0 == u8::MAX
    }

    pub const fn is_isr(self) -> bool {
        self.0 == 0
    }

    pub const fn is_normal(self) -> bool {
        !self.is_invalid() && !self.is_isr()
    }
}

/// One-byte signed topic identifier. Topic 0 is invalid; registered topics
/// count upward from 1.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Topic(i8);

impl Topic {
    pub const INVALID: Self = Self(0);

    /// Topics occupy `1..=126`; the allocation counter needs one value
    /// of headroom past the last topic.
    pub const MAX_CAPACITY: i8 = i8::MAX - 1;

    pub const fn new(raw: i8) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i8 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 > 0
    }

    /// Registry slot index for a valid topic.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// User-declared registration slot for a topic.
///
/// Declare one as a `static`, hand it to the topic registry once, and use
/// `get()` at the logging call sites. Until registration succeeds it reads
/// as [`Topic::INVALID`] and sessions opened on it are inert.
pub struct TopicCell(AtomicI8);

impl TopicCell {
    pub const fn new() -> Self {
        Self(AtomicI8::new(Topic::INVALID.raw()))
    }

    pub fn get(&self) -> Topic {
        Topic::new(self.0.load(Ordering::Relaxed))
    }

    /// Stores the assigned value. Called by the topic registry; user code
    /// has no reason to touch this.
    pub fn assign(&self, topic: Topic) {
        self.0.store(topic.raw(), Ordering::Release);
    }
}

impl Default for TopicCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Log severity. Only used for the compile-time maximum; units do not
/// carry it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i8)]
pub enum Level {
    Error = 0,
    Warning = 1,
    Info = 2,
    Debug = 3,
}

impl Level {
    /// Whether this level survives the compile-time maximum selected via
    /// the `max-level-*` cargo features. With no feature set everything is
    /// enabled; the strictest feature present wins. The result is a
    /// constant, so a disabled call site folds away.
    pub const fn enabled(self) -> bool {
        let max = if cfg!(feature = "max-level-off") {
            -1
        } else if cfg!(feature = "max-level-error") {
            Level::Error as i8
        } else if cfg!(feature = "max-level-warning") {
            Level::Warning as i8
        } else if cfg!(feature = "max-level-info") {
            Level::Info as i8
        } else {
            Level::Debug as i8
        };
        self as i8 <= max
    }
}

/// Numeric bases the text converter understands.
pub mod base {
    pub const INVALID: u8 = 0;
    pub const BINARY: u8 = 2;
    pub const DECIMAL: u8 = 10;
    pub const HEXADECIMAL: u8 = 16;
}

/// Per-value rendering directive: numeric base plus minimum digit count
/// (mantissa digit count for floats), zero-filled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FormatDirective {
    pub base: u8,
    pub fill: u8,
}

impl FormatDirective {
    /// Fill sentinel on an inline string fragment: the next atom joins it
    /// without a separator. Used when a copied string spans several units.
    pub const FILL_JOIN: u8 = u8::MAX;

    pub const fn new(base: u8, fill: u8) -> Self {
        Self { base, fill }
    }

    /// Disables the associated header field.
    pub const NONE: Self = Self::new(base::INVALID, 0);

    /// Plain decimal, natural width.
    pub const DEFAULT: Self = Self::new(base::DECIMAL, 0);

    pub const B4: Self = Self::new(base::BINARY, 4);
    pub const B8: Self = Self::new(base::BINARY, 8);
    pub const B12: Self = Self::new(base::BINARY, 12);
    pub const B16: Self = Self::new(base::BINARY, 16);
    pub const B24: Self = Self::new(base::BINARY, 24);
    pub const B32: Self = Self::new(base::BINARY, 32);
    pub const D1: Self = Self::new(base::DECIMAL, 1);
    pub const D2: Self = Self::new(base::DECIMAL, 2);
    pub const D3: Self = Self::new(base::DECIMAL, 3);
    pub const D4: Self = Self::new(base::DECIMAL, 4);
    pub const D5: Self = Self::new(base::DECIMAL, 5);
    pub const D6: Self = Self::new(base::DECIMAL, 6);
    pub const D7: Self = Self::new(base::DECIMAL, 7);
    pub const D8: Self = Self::new(base::DECIMAL, 8);
    pub const X1: Self = Self::new(base::HEXADECIMAL, 1);
    pub const X2: Self = Self::new(base::HEXADECIMAL, 2);
    pub const X3: Self = Self::new(base::HEXADECIMAL, 3);
    pub const X4: Self = Self::new(base::HEXADECIMAL, 4);
    pub const X6: Self = Self::new(base::HEXADECIMAL, 6);
    pub const X8: Self = Self::new(base::HEXADECIMAL, 8);

    pub const fn is_renderable(self) -> bool {
        matches!(
            self.base,
            base::BINARY | base::DECIMAL | base::HEXADECIMAL
        )
    }
}

/// Data bytes an inline (by-copy) string fragment can hold.
pub const INLINE_BYTES: usize = 8;

/// One by-copy string fragment. Long strings chain several of these, all
/// but the last carrying [`FormatDirective::FILL_JOIN`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InlineChunk {
    len: u8,
    data: [u8; INLINE_BYTES],
}

impl InlineChunk {
    /// Fills one fragment from the front of `bytes` and returns the
    /// remainder.
    pub fn take(bytes: &[u8]) -> (Self, &[u8]) {
        let n = bytes.len().min(INLINE_BYTES);
        let mut data = [0u8; INLINE_BYTES];
        data[..n].copy_from_slice(&bytes[..n]);
        (Self { len: n as u8, data }, &bytes[n..])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// Payload kind, used as the key of the per-kind default format table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, enum_map::Enum)]
pub enum ValueKind {
    Bool,
    Char,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Str,
}

/// The tagged value carried by one unit.
///
/// By-reference strings require `'static` so the bytes are guaranteed to
/// outlive the moment the worker renders them; anything shorter-lived goes
/// through the by-copy inline path.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Payload {
    Bool(bool),
    Char(u8),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(&'static str),
    Inline(InlineChunk),
}

impl Payload {
    pub fn kind(&self) -> ValueKind {
        match self {
            Payload::Bool(_) => ValueKind::Bool,
            Payload::Char(_) => ValueKind::Char,
            Payload::U8(_) => ValueKind::U8,
            Payload::U16(_) => ValueKind::U16,
            Payload::U32(_) => ValueKind::U32,
            Payload::U64(_) => ValueKind::U64,
            Payload::I8(_) => ValueKind::I8,
            Payload::I16(_) => ValueKind::I16,
            Payload::I32(_) => ValueKind::I32,
            Payload::I64(_) => ValueKind::I64,
            Payload::F32(_) => ValueKind::F32,
            Payload::F64(_) => ValueKind::F64,
            Payload::Str(_) | Payload::Inline(_) => ValueKind::Str,
        }
    }
}

/// Sequence number of a record's terminal atom.
pub const SEQ_TERMINAL: u8 = 0;

/// Sequence number of a record's first atom.
pub const SEQ_FIRST: u8 = 1;

/// Successor of a body sequence number; wraps within the record, skipping
/// the terminal value.
pub const fn next_sequence(seq: u8) -> u8 {
    if seq == u8::MAX {
        SEQ_FIRST
    } else {
        seq + 1
    }
}

/// The fixed-size carrier of one atom: a value, its format directive, the
/// producing task, and its position in the record.
///
/// A record is a maximal run of same-task units with contiguous body
/// sequence numbers, closed by exactly one unit with `seq == SEQ_TERMINAL`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MessageUnit {
    pub payload: Payload,
    pub base: u8,
    pub fill: u8,
    pub task: TaskId,
    pub seq: u8,
}

impl MessageUnit {
    pub fn new(
        payload: Payload,
        directive: FormatDirective,
        task: TaskId,
        seq: u8,
    ) -> Self {
        Self {
            payload,
            base: directive.base,
            fill: directive.fill,
            task,
            seq,
        }
    }

    /// The terminal atom closing `task`'s current record.
    pub fn terminal(task: TaskId) -> Self {
        Self {
            payload: Payload::Bool(false),
            base: base::INVALID,
            fill: 0,
            task,
            seq: SEQ_TERMINAL,
        }
    }

    /// A unit every consumer discards. Used as a queue wake-up nudge at
    /// shutdown.
    pub fn discard() -> Self {
        Self::terminal(TaskId::INVALID)
    }

    pub fn is_terminal(&self) -> bool {
        self.seq == SEQ_TERMINAL
    }

    pub fn directive(&self) -> FormatDirective {
        FormatDirective::new(self.base, self.fill)
    }
}

// A unit must stay comfortably small; it is copied on every queue hop.
const_assert!(core::mem::size_of::<MessageUnit>() <= 40);
