// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lock-free flight recorder for post-mortem inspection.
//!
//! A [`FlightRecorder`] is a fixed array of numeric samples plus an atomic
//! write counter. `push` costs one relaxed `fetch_add` and one relaxed
//! store, so it is safe from any context -- interrupt handlers included --
//! and never waits. Readers take a snapshot of the whole array and
//! linearize it with the returned offset; a reader racing a writer may see
//! a mix of old and new samples, but never a torn one, because every slot
//! is a native-width atomic.
//!
//! This is deliberately not part of the logging pipeline: the design
//! center is crash-dump style recording that keeps working when the rest
//! of the system does not.

#![cfg_attr(not(test), no_std)]

use core::sync::atomic::{
    AtomicBool, AtomicU16, AtomicU32, AtomicU8, AtomicUsize, Ordering,
};

mod sealed {
    pub trait Sealed {}
}

/// One recorder slot: an atomic wide enough to hold the sample type.
pub trait Slot: sealed::Sealed {
    type Value: Copy + PartialEq;

    fn new(value: Self::Value) -> Self;
    fn read(&self) -> Self::Value;
    fn write(&self, value: Self::Value);
}

/// Sample types with a native atomic store width on the target.
pub trait FlightValue: Copy + PartialEq + sealed::Sealed {
    type Slot: Slot<Value = Self>;
}

macro_rules! impl_flight_value {
    ($($value:ty => $atomic:ty;)*) => {
        $(
            impl sealed::Sealed for $value {}
            impl sealed::Sealed for $atomic {}

            impl Slot for $atomic {
                type Value = $value;

                fn new(value: $value) -> Self {
                    <$atomic>::new(value)
                }

                fn read(&self) -> $value {
                    self.load(Ordering::Relaxed)
                }

                fn write(&self, value: $value) {
                    self.store(value, Ordering::Relaxed)
                }
            }

            impl FlightValue for $value {
                type Slot = $atomic;
            }
        )*
    };
}

impl_flight_value! {
    u8 => AtomicU8;
    u16 => AtomicU16;
    u32 => AtomicU32;
    usize => AtomicUsize;
}

/// Fixed-size lock-free sample ring. `N` must be a power of two.
pub struct FlightRecorder<V: FlightValue, const N: usize> {
    slots: [V::Slot; N],
    next: AtomicUsize,
    send_requested: AtomicBool,
    sentinel: V,
}

impl<V: FlightValue, const N: usize> FlightRecorder<V, N> {
    /// Creates a recorder with every slot holding `sentinel`, the value
    /// readers treat as "never written".
    pub fn new(sentinel: V) -> Self {
        assert!(N.is_power_of_two());
        Self {
            slots: core::array::from_fn(|_| <V::Slot as Slot>::new(sentinel)),
            next: AtomicUsize::new(0),
            send_requested: AtomicBool::new(false),
            sentinel,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn sentinel(&self) -> V {
        self.sentinel
    }

    /// Records one sample. Wait-free; overwrites the oldest sample once
    /// the ring has wrapped.
    pub fn push(&self, value: V) {
        // N is a power of two, so masking keeps the slot index in range
        // even when the counter itself wraps.
        let i = self.next.fetch_add(1, Ordering::Relaxed) & (N - 1);
        self.slots[i].write(value);
    }

    /// Copies the raw ring into `out` and returns the current write
    /// offset. The logical oldest-first order is
    /// `out[offset..] ++ out[..offset]`.
    pub fn snapshot_into(&self, out: &mut [V; N]) -> usize {
        for (slot, out) in self.slots.iter().zip(out.iter_mut()) {
            *out = slot.read();
        }
        self.next.load(Ordering::Relaxed) & (N - 1)
    }

    /// Copies the ring into `out` already rotated oldest-first, skipping
    /// nothing: slots never written still hold the sentinel.
    pub fn read_linearized(&self, out: &mut [V; N]) {
        let offset = self.next.load(Ordering::Relaxed) & (N - 1);
        for (j, out) in out.iter_mut().enumerate() {
            *out = self.slots[(offset + j) & (N - 1)].read();
        }
    }

    /// Refills every slot with the sentinel. Not atomic with respect to
    /// concurrent pushes; meant for (re)initialization.
    pub fn invalidate(&self) {
        for slot in &self.slots {
            slot.write(self.sentinel);
        }
    }

    /// Flags the ring for an external drain to pick up.
    pub fn schedule_send(&self) {
        self.send_requested.store(true, Ordering::Release);
    }

    pub fn send_requested(&self) -> bool {
        self.send_requested.load(Ordering::Acquire)
    }

    /// Consumes the drain request, returning whether one was pending.
    pub fn take_send_request(&self) -> bool {
        self.send_requested.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_invalidated() {
        let ring = FlightRecorder::<u32, 8>::new(u32::MAX);
        let mut out = [0u32; 8];
        ring.read_linearized(&mut out);
        assert_eq!(out, [u32::MAX; 8]);
    }

    #[test]
    fn partial_fill_keeps_push_order() {
        let ring = FlightRecorder::<u32, 8>::new(u32::MAX);
        for v in 1..=5 {
            ring.push(v);
        }

        let mut out = [0u32; 8];
        let offset = ring.snapshot_into(&mut out);
        assert_eq!(offset, 5);
        assert_eq!(&out[..5], &[1, 2, 3, 4, 5]);
        assert_eq!(&out[5..], &[u32::MAX; 3]);
    }

    #[test]
    fn wrapped_ring_linearizes_oldest_first() {
        let ring = FlightRecorder::<u16, 4>::new(0);
        for v in 1..=10u16 {
            ring.push(v);
        }

        // 10 pushes into 4 slots: the last 4 survive, in push order.
        let mut out = [0u16; 4];
        ring.read_linearized(&mut out);
        assert_eq!(out, [7, 8, 9, 10]);
    }

    #[test]
    fn invalidate_clears_history() {
        let ring = FlightRecorder::<u8, 4>::new(0xee);
        ring.push(1);
        ring.push(2);
        ring.invalidate();

        let mut out = [0u8; 4];
        ring.read_linearized(&mut out);
        assert_eq!(out, [0xee; 4]);
    }

    #[test]
    fn send_request_is_consumed_once() {
        let ring = FlightRecorder::<u32, 2>::new(0);
        assert!(!ring.take_send_request());
        ring.schedule_send();
        assert!(ring.send_requested());
        assert!(ring.take_send_request());
        assert!(!ring.take_send_request());
    }

    #[test]
    fn concurrent_pushes_all_land() {
        use std::sync::Arc;

        let ring = Arc::new(FlightRecorder::<usize, 64>::new(usize::MAX));
        let mut handles = std::vec::Vec::new();
        for t in 0..4usize {
            let ring = Arc::clone(&ring);
            handles.push(std::thread::spawn(move || {
                for i in 0..8 {
                    ring.push(t * 8 + i);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        // 32 distinct samples, 64 slots: every sample is present exactly
        // once regardless of interleaving.
        let mut out = [0usize; 64];
        ring.read_linearized(&mut out);
        let mut seen: std::vec::Vec<usize> =
            out.iter().copied().filter(|&v| v != usize::MAX).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..32).collect::<std::vec::Vec<_>>());
    }
}
