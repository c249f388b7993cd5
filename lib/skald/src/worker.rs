// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The transmitter worker: the queue's single consumer.
//!
//! The worker streams one task's record at a time into the converter so
//! records come out atomically even though producers interleave freely in
//! the queue. Units belonging to other tasks are parked in a circular
//! reassembly buffer until the active record closes; when that buffer
//! fills up and the active task still cannot make progress, the active
//! record is given up and goes out truncated. That release valve keeps
//! the consumer moving under adversarial load and is documented behavior,
//! not a bug.

use core::sync::atomic::Ordering;

use alloc::boxed::Box;

use skald_convert::{Cursor, TextConverter};
use skald_queue::UnitRing;
use skald_types::{next_sequence, MessageUnit, TaskId, SEQ_FIRST};

use crate::Logger;

/// Bytes kept free in the fill buffer for the next atom; crossing this
/// watermark triggers a flush. Atoms longer than the reserve (extreme
/// fill directives) truncate at the buffer edge.
const ATOM_RESERVE: usize = 80;

/// Double buffer feeding the sink: one side fills while the other is
/// written out.
pub(crate) struct TransmitBuffers {
    buffers: [Box<[u8]>; 2],
    lens: [usize; 2],
    fill: usize,
    last_flush_tick: u32,
}

impl TransmitBuffers {
    pub(crate) fn new(capacity: usize, now: u32) -> Self {
        Self {
            buffers: [
                alloc::vec![0; capacity].into_boxed_slice(),
                alloc::vec![0; capacity].into_boxed_slice(),
            ],
            lens: [0, 0],
            fill: 0,
            last_flush_tick: now,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lens[self.fill]
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buffers[self.fill].len() - self.lens[self.fill]
    }

    pub(crate) fn cursor(&mut self) -> Cursor<'_> {
        let fill = self.fill;
        Cursor::new(&mut self.buffers[fill][..], &mut self.lens[fill])
    }

    /// Makes the other buffer current and returns the index of the one
    /// to transmit.
    fn swap(&mut self) -> usize {
        let sending = self.fill;
        self.fill = 1 - sending;
        sending
    }
}

impl Logger {
    /// Worker entry point; runs until `done()` clears the keep-running
    /// flag and everything enqueued before that has drained.
    pub(crate) fn worker_main(&'static self) {
        let config = &self.config;
        let mut circular = UnitRing::new(config.circular_length);
        let mut xmit = TransmitBuffers::new(
            config.transmit_length,
            self.platform.tick_millis(),
        );
        let mut conv = TextConverter::new(config.convert_options());
        let mut active = TaskId::INVALID;
        let mut expected = SEQ_FIRST;

        self.platform
            .start_refresh_timer(config.refresh_millis, &self.refresh_flag);

        loop {
            let running = self.keep_running.load(Ordering::Acquire);

            // Pick the next unit to route. With an active record only its
            // own task's units may reach the converter; everything else
            // parks in the circular buffer in arrival order.
            let next = if active.is_invalid() {
                match circular.pop() {
                    Some(unit) => Some(unit),
                    None => self.pop_queue(running),
                }
            } else if let Some(n) = find_task(&circular, active) {
                circular.remove(n)
            } else if circular.is_full() {
                // Release valve: the active record is starved and there
                // is nowhere left to park. It goes out truncated.
                conv.end_line(&mut xmit.cursor());
                active = TaskId::INVALID;
                continue;
            } else {
                match self.pop_queue(running) {
                    Some(unit) if unit.task == active => Some(unit),
                    Some(unit) if unit.task.is_invalid() => None,
                    Some(unit) => {
                        // Not full, checked above.
                        let _ = circular.push(unit);
                        None
                    }
                    None => None,
                }
            };

            match next {
                Some(unit) if unit.task.is_invalid() => {}
                Some(unit) if active.is_invalid() => {
                    if unit.is_terminal() {
                        // Terminal with no body left; nothing to close.
                    } else {
                        active = unit.task;
                        expected = next_sequence(unit.seq);
                        conv.value(&mut xmit.cursor(), &unit);
                    }
                }
                Some(unit) => {
                    if unit.is_terminal() {
                        conv.value(&mut xmit.cursor(), &unit);
                        active = TaskId::INVALID;
                        purge_discards(&mut circular);
                    } else if unit.seq == expected {
                        conv.value(&mut xmit.cursor(), &unit);
                        expected = next_sequence(expected);
                    } else if unit.seq == SEQ_FIRST {
                        // The record lost its terminal (dropped atom);
                        // close its line and start the new record.
                        conv.end_line(&mut xmit.cursor());
                        expected = next_sequence(SEQ_FIRST);
                        conv.value(&mut xmit.cursor(), &unit);
                    } else {
                        // Sequence gap: the record is torn, skip the atom.
                    }
                }
                None => {}
            }

            self.transmit_if_due(&mut xmit, running);

            if !running && self.queue.is_empty() {
                if !active.is_invalid() {
                    // The rest of the active record will never arrive.
                    conv.end_line(&mut xmit.cursor());
                    active = TaskId::INVALID;
                    continue;
                }
                if !circular.is_empty() {
                    continue;
                }
                if conv.line_open() {
                    conv.end_line(&mut xmit.cursor());
                }
                self.flush_transmit(&mut xmit);
                break;
            }
        }
    }

    /// Pops the queue, sleeping in adapter-sized steps up to the
    /// configured pause when `block` is set.
    fn pop_queue(&self, block: bool) -> Option<MessageUnit> {
        if let Some(unit) = self.queue.pop() {
            return Some(unit);
        }
        if !block {
            return None;
        }
        let mut waited = 0;
        while waited < self.config.pause_millis {
            self.platform.sleep_millis(1);
            waited += 1;
            if let Some(unit) = self.queue.pop() {
                return Some(unit);
            }
            if !self.keep_running.load(Ordering::Acquire) {
                return self.queue.pop();
            }
        }
        None
    }

    /// Flushes the fill buffer when it is nearly full, when the refresh
    /// timer or period says a partial buffer has waited long enough, or
    /// unconditionally during shutdown drain.
    fn transmit_if_due(&'static self, xmit: &mut TransmitBuffers, running: bool) {
        if xmit.len() == 0 {
            xmit.last_flush_tick = self.platform.tick_millis();
            return;
        }
        let now = self.platform.tick_millis();
        let refresh = self.refresh_flag.swap(false, Ordering::AcqRel)
            || now.wrapping_sub(xmit.last_flush_tick)
                >= self.config.refresh_millis;
        if xmit.remaining() < ATOM_RESERVE || refresh || !running {
            self.flush_transmit(xmit);
            if refresh && running {
                self.platform.start_refresh_timer(
                    self.config.refresh_millis,
                    &self.refresh_flag,
                );
            }
        }
    }

    fn flush_transmit(&self, xmit: &mut TransmitBuffers) {
        if xmit.len() == 0 {
            return;
        }
        let sending = xmit.swap();
        let len = xmit.lens[sending];
        self.write_sink(&xmit.buffers[sending][..len]);
        xmit.lens[sending] = 0;
        xmit.last_flush_tick = self.platform.tick_millis();
    }
}

fn find_task(ring: &UnitRing, task: TaskId) -> Option<usize> {
    (0..ring.len()).find(|&n| ring.get(n).is_some_and(|u| u.task == task))
}

/// Drops discard-marked units stranded at the reassembly buffer's head.
fn purge_discards(ring: &mut UnitRing) {
    while ring.peek().is_some_and(|u| u.task.is_invalid()) {
        ring.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transmit_buffers_alternate() {
        use skald_convert::ConvertOptions;
        use skald_types::{FormatDirective, Payload};

        let mut xmit = TransmitBuffers::new(128, 0);
        assert_eq!(xmit.len(), 0);
        assert_eq!(xmit.remaining(), 128);

        let mut conv = TextConverter::new(ConvertOptions::default());
        conv.value(
            &mut xmit.cursor(),
            &MessageUnit::new(
                Payload::U8(42),
                FormatDirective::DEFAULT,
                TaskId::new(1),
                1,
            ),
        );
        assert_eq!(xmit.len(), 2);
        assert_eq!(xmit.remaining(), 126);

        let sending = xmit.swap();
        assert_eq!(xmit.lens[sending], 2);
        assert_eq!(&xmit.buffers[sending][..2], b"42");
        assert_eq!(xmit.len(), 0);
        assert_ne!(xmit.swap(), sending);
    }
}
