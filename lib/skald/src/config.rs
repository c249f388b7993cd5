// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime configuration of the logger singleton.

use enum_map::{enum_map, EnumMap};
use skald_convert::ConvertOptions;
use skald_types::{FormatDirective, TaskId, ValueKind};

/// How the sending task shows up in a record's header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskRepresentation {
    /// No task field.
    None,
    /// The dense task id, rendered with `task_id_format`.
    Id,
    /// The name given at registration, or `?` when there is none (ISR
    /// context included).
    Name,
}

/// What a producer does when the queue is full.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockingPolicy {
    /// Retry with short sleeps up to `pause_millis`, then drop. Interrupt
    /// context never retries.
    Block,
    /// Drop immediately. The rest of the record is suppressed so the
    /// output never shows a half-assembled line as complete.
    Drop,
}

/// How units travel from producers to the sink.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Bounded queue drained by the transmitter worker. The default.
    Queued,
    /// No queue, no worker: producers convert on their own thread under
    /// the sink lock. For cheap sinks where blocking is acceptable.
    Direct,
}

/// `init`-time configuration. The defaults match the shipped prototype
/// setups; anything invalid is rejected by `init`.
#[derive(Clone)]
pub struct Config {
    /// Announce successful task registrations in the output.
    pub allow_registration_log: bool,
    /// Accept records from interrupt context. When false, ISR sessions
    /// are inert.
    pub log_from_isr: bool,
    /// Number of registrable tasks, at most [`TaskId::MAX_CAPACITY`].
    pub task_capacity: u8,
    /// Number of registrable topics.
    pub topic_capacity: i8,
    /// Producer→worker queue capacity, in units.
    pub queue_length: usize,
    /// Worker-side reassembly buffer capacity, in units.
    pub circular_length: usize,
    /// Size of each transmit buffer, in bytes.
    pub transmit_length: usize,
    /// Queue-pop timeout and the bound on blocking-mode push retries, in
    /// milliseconds.
    pub pause_millis: u32,
    /// A partially filled transmit buffer older than this is flushed, in
    /// milliseconds.
    pub refresh_millis: u32,
    pub blocking: BlockingPolicy,
    pub task_representation: TaskRepresentation,
    /// Directive for the header task-id field.
    pub task_id_format: FormatDirective,
    /// Directive for the header tick field; base 0 disables the field.
    pub tick_format: FormatDirective,
    /// Prepend `0b` / `0x` to binary and hexadecimal numbers.
    pub append_base_prefix: bool,
    /// Prepend a space to non-negative numbers so columns align.
    pub align_signed: bool,
    /// Bytes closing every record line.
    pub end_of_line: &'static [u8],
    /// Default directive per payload kind, used when a push is not
    /// preceded by an explicit one.
    pub defaults: EnumMap<ValueKind, FormatDirective>,
    pub dispatch: Dispatch,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allow_registration_log: true,
            log_from_isr: false,
            task_capacity: 16,
            topic_capacity: 16,
            queue_length: 64,
            circular_length: 64,
            transmit_length: 256,
            pause_millis: 100,
            refresh_millis: 1000,
            blocking: BlockingPolicy::Block,
            task_representation: TaskRepresentation::Id,
            task_id_format: FormatDirective::X2,
            tick_format: FormatDirective::D5,
            append_base_prefix: false,
            align_signed: false,
            end_of_line: b"\n",
            defaults: default_formats(),
            dispatch: Dispatch::Queued,
        }
    }
}

/// Decimal for the integers, 5 mantissa digits for `f32`, 8 for `f64`.
pub fn default_formats() -> EnumMap<ValueKind, FormatDirective> {
    enum_map! {
        ValueKind::F32 => FormatDirective::D5,
        ValueKind::F64 => FormatDirective::D8,
        _ => FormatDirective::DEFAULT,
    }
}

/// Reasons `init` can refuse to bring the logger up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InitError {
    AlreadyInitialized,
    BadConfig(&'static str),
}

impl Config {
    pub(crate) fn validate(&self) -> Result<(), InitError> {
        if self.task_capacity == 0 || self.task_capacity > TaskId::MAX_CAPACITY
        {
            return Err(InitError::BadConfig("task_capacity out of range"));
        }
        if self.topic_capacity < 1 || self.topic_capacity == i8::MAX {
            return Err(InitError::BadConfig("topic_capacity out of range"));
        }
        if self.queue_length < 2 {
            return Err(InitError::BadConfig("queue_length too small"));
        }
        if self.circular_length < 1 {
            return Err(InitError::BadConfig("circular_length too small"));
        }
        if self.transmit_length < 128 {
            return Err(InitError::BadConfig("transmit_length too small"));
        }
        if self.pause_millis == 0 {
            return Err(InitError::BadConfig("pause_millis must be non-zero"));
        }
        if self.end_of_line.is_empty() {
            return Err(InitError::BadConfig("end_of_line must be non-empty"));
        }
        Ok(())
    }

    pub(crate) fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            append_base_prefix: self.append_base_prefix,
            align_signed: self.align_signed,
            end_of_line: self.end_of_line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn bad_configs_are_rejected() {
        let mut c = Config::default();
        c.task_capacity = 0;
        assert!(matches!(c.validate(), Err(InitError::BadConfig(_))));

        let mut c = Config::default();
        c.queue_length = 1;
        assert!(matches!(c.validate(), Err(InitError::BadConfig(_))));

        let mut c = Config::default();
        c.end_of_line = b"";
        assert!(matches!(c.validate(), Err(InitError::BadConfig(_))));
    }

    #[test]
    fn float_defaults_differ_by_width() {
        let defaults = default_formats();
        assert_eq!(defaults[ValueKind::F32], FormatDirective::D5);
        assert_eq!(defaults[ValueKind::F64], FormatDirective::D8);
        assert_eq!(defaults[ValueKind::U32], FormatDirective::DEFAULT);
    }
}
