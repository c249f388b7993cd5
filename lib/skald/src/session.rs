// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The producer-side session: a fluent, consuming builder for one record.
//!
//! ```ignore
//! skald::info().push("reading").push(value).fmt(FormatDirective::X4)
//!     .push(raw_bits).finish();
//! ```
//!
//! A session either holds its task's builder slot or is *null*: null
//! sessions are handed out when the level is compiled out, the logger is
//! down, the caller is in an interrupt with ISR logging disabled, or the
//! topic is unregistered. Every operation on a null session, `finish`
//! included, is a no-op, so call sites never need to care.

use skald_types::{base, FormatDirective, InlineChunk, Payload};

use crate::builder::BuilderHandle;
use crate::config::TaskRepresentation;
use crate::Logger;

/// Name shown for tasks that have none, the interrupt pseudo-task
/// included.
const UNKNOWN_TASK_NAME: &str = "?";

/// An in-progress record. Dropping it without `finish` abandons the
/// record; the task's next session starts clean.
#[derive(Default)]
pub struct Session {
    inner: Option<Active>,
}

struct Active {
    logger: &'static Logger,
    builder: BuilderHandle<'static>,
}

impl Session {
    pub(crate) fn null() -> Self {
        Self { inner: None }
    }

    pub(crate) fn active(
        logger: &'static Logger,
        builder: BuilderHandle<'static>,
    ) -> Self {
        Self {
            inner: Some(Active { logger, builder }),
        }
    }

    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    /// Sets the directive for exactly the next pushed value, after which
    /// the per-kind default applies again.
    #[must_use]
    pub fn fmt(mut self, directive: FormatDirective) -> Self {
        if let Some(active) = &mut self.inner {
            active.builder.set_pending(directive);
        }
        self
    }

    /// Appends one value as a single atom.
    #[must_use]
    pub fn push<T: Loggable>(mut self, value: T) -> Self {
        if let Some(active) = &mut self.inner {
            active.value(value.payload());
        }
        self
    }

    /// Appends a string by copy. Unlike `push(&'static str)` the bytes
    /// are captured now, so any lifetime works; long strings chain
    /// across several units.
    #[must_use]
    pub fn copied(mut self, text: &str) -> Self {
        if let Some(active) = &mut self.inner {
            active.copied(text);
        }
        self
    }

    /// Closes the record with its terminal atom and releases the
    /// builder slot.
    pub fn finish(mut self) {
        if let Some(active) = &mut self.inner {
            active.finish();
        }
        self.inner = None;
    }
}

impl Active {
    /// The header (task representation, tick, topic prefix) rides in
    /// front of the first atom, not at `begin`; a session that never
    /// pushes still gets it from `finish`.
    fn ensure_header(&mut self) {
        if !self.builder.header_pending() {
            return;
        }
        self.builder.mark_header_emitted();
        let config = &self.logger.config;

        if self.builder.with_header() {
            let task = self.builder.task();
            match config.task_representation {
                TaskRepresentation::None => {}
                TaskRepresentation::Id => {
                    self.emit(
                        Payload::U8(task.raw()),
                        config.task_id_format,
                    );
                }
                TaskRepresentation::Name => {
                    let name = if task.is_isr() {
                        UNKNOWN_TASK_NAME
                    } else {
                        self.logger
                            .tasks
                            .name_of(task)
                            .or_else(|| {
                                self.logger.platform.current_task_name()
                            })
                            .unwrap_or(UNKNOWN_TASK_NAME)
                    };
                    self.emit(Payload::Str(name), FormatDirective::DEFAULT);
                }
            }
            if config.tick_format.base != base::INVALID {
                self.emit(
                    Payload::U32(self.logger.platform.tick_millis()),
                    config.tick_format,
                );
            }
        }

        let topic = self.builder.topic();
        if topic.is_valid() {
            if let Some(prefix) = self.logger.topics.prefix(topic) {
                self.emit(Payload::Str(prefix), FormatDirective::DEFAULT);
            }
        }
    }

    fn value(&mut self, payload: Payload) {
        self.ensure_header();
        let directive = self
            .builder
            .take_pending()
            .unwrap_or(self.logger.config.defaults[payload.kind()]);
        self.emit(payload, directive);
    }

    fn copied(&mut self, text: &str) {
        self.ensure_header();
        // Directives don't apply to strings; discard any pending one so
        // it cannot leak onto a later value.
        let _ = self.builder.take_pending();

        let mut rest = text.as_bytes();
        loop {
            let (chunk, tail) = InlineChunk::take(rest);
            let fill = if tail.is_empty() {
                0
            } else {
                FormatDirective::FILL_JOIN
            };
            self.emit(
                Payload::Inline(chunk),
                FormatDirective::new(base::INVALID, fill),
            );
            if tail.is_empty() {
                break;
            }
            rest = tail;
        }
    }

    fn emit(&mut self, payload: Payload, directive: FormatDirective) {
        if self.builder.is_dropped() {
            return;
        }
        let unit = self.builder.next_unit(payload, directive);
        if self.logger.dispatch_unit(unit).is_err() {
            self.builder.mark_dropped();
        }
    }

    fn finish(&mut self) {
        self.ensure_header();
        if !self.builder.is_dropped() {
            let _ = self.logger.dispatch_unit(self.builder.terminal());
        }
    }
}

/// Values a session can stream. Implementations pick the payload tag at
/// compile time; the worker dispatches on it when rendering.
pub trait Loggable {
    fn payload(self) -> Payload;
}

impl Loggable for bool {
    fn payload(self) -> Payload {
        Payload::Bool(self)
    }
}

impl Loggable for char {
    fn payload(self) -> Payload {
        if self.is_ascii() {
            Payload::Char(self as u8)
        } else {
            Payload::Char(b'?')
        }
    }
}

macro_rules! impl_loggable {
    ($($ty:ty => $variant:ident as $repr:ty;)*) => {
        $(
            impl Loggable for $ty {
                fn payload(self) -> Payload {
                    Payload::$variant(self as $repr)
                }
            }
        )*
    };
}

impl_loggable! {
    u8 => U8 as u8;
    u16 => U16 as u16;
    u32 => U32 as u32;
    u64 => U64 as u64;
    usize => U64 as u64;
    i8 => I8 as i8;
    i16 => I16 as i16;
    i32 => I32 as i32;
    i64 => I64 as i64;
    isize => I64 as i64;
    f32 => F32 as f32;
    f64 => F64 as f64;
}

impl Loggable for &'static str {
    fn payload(self) -> Payload {
        Payload::Str(self)
    }
}
