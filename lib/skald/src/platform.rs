// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The platform adapter: everything the pipeline needs from the OS or
//! hardware, behind one trait.
//!
//! The core calls these methods and nothing else for task identity, time,
//! scheduling and error disposition, so porting skald to an RTOS or
//! bare-metal target means implementing this trait and a [`Sink`]. The
//! hosted reference adapter, [`HostPlatform`], lives behind the `std`
//! feature.
//!
//! [`Sink`]: crate::sink::Sink

use core::sync::atomic::AtomicBool;

use alloc::boxed::Box;

use crate::sink::SinkError;

/// Programmer-contract violations. The adapter decides how hard to stop;
/// this call does not return.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FatalError {
    /// The dense task id space is exhausted.
    OutOfTaskIds,
}

/// Recoverable runtime failures, reported for disposition.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RuntimeError {
    /// The sink rejected a write. On hosted targets this typically
    /// raises; bare-metal adapters tend to halt or latch an error state.
    Sink(SinkError),
}

/// Capabilities the core consumes. Implementations must be callable from
/// any producer context the target allows, interrupt handlers included,
/// except for `spawn_worker`/`join_worker` which run at init/teardown.
pub trait Platform: Send + Sync {
    /// Stable opaque identity of the calling task, used as the task
    /// registry key.
    fn current_task_handle(&self) -> u64;

    /// Name of the calling task, when the target tracks one outside the
    /// registry.
    fn current_task_name(&self) -> Option<&'static str> {
        None
    }

    fn in_interrupt(&self) -> bool {
        false
    }

    /// Monotonic milliseconds. Wraps at `u32::MAX`.
    fn tick_millis(&self) -> u32;

    fn sleep_millis(&self, millis: u32);

    /// Starts the long-lived transmitter worker.
    fn spawn_worker(&self, entry: Box<dyn FnOnce() + Send>);

    /// Waits for the worker started by `spawn_worker` to exit.
    fn join_worker(&self);

    /// Arms a one-shot timer that sets `flag` after `millis`. The worker
    /// polls the flag between iterations to flush partially filled
    /// transmit buffers; adapters without a timer can leave this a no-op,
    /// the worker also derives refresh from the tick.
    fn start_refresh_timer(&self, millis: u32, flag: &'static AtomicBool) {
        let _ = (millis, flag);
    }

    fn error(&self, error: RuntimeError);

    fn fatal_error(&self, error: FatalError) -> !;
}

#[cfg(feature = "std")]
mod host {
    use super::{FatalError, Platform, RuntimeError};
    use core::sync::atomic::AtomicBool;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::thread::JoinHandle;
    use std::time::{Duration, Instant};

    /// Artificial per-thread handles, assigned on first use. The std
    /// thread id type has no stable integer form, so we mint our own the
    /// way the original hosted backend did.
    static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

    thread_local! {
        static HANDLE: Cell<u64> = const { Cell::new(0) };
    }

    /// Reference adapter for hosted targets: std threads, a steady-clock
    /// millisecond tick, and panics for both error severities.
    pub struct HostPlatform {
        epoch: Instant,
        worker: Mutex<Option<JoinHandle<()>>>,
    }

    impl HostPlatform {
        pub fn new() -> Self {
            Self {
                epoch: Instant::now(),
                worker: Mutex::new(None),
            }
        }
    }

    impl Default for HostPlatform {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Platform for HostPlatform {
        fn current_task_handle(&self) -> u64 {
            HANDLE.with(|h| {
                if h.get() == 0 {
                    h.set(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed));
                }
                h.get()
            })
        }

        fn tick_millis(&self) -> u32 {
            self.epoch.elapsed().as_millis() as u32
        }

        fn sleep_millis(&self, millis: u32) {
            std::thread::sleep(Duration::from_millis(millis.into()));
        }

        fn spawn_worker(&self, entry: Box<dyn FnOnce() + Send>) {
            let mut slot = self.worker.lock().unwrap();
            assert!(slot.is_none(), "worker already running");
            *slot = Some(std::thread::spawn(entry));
        }

        fn join_worker(&self) {
            let handle = self.worker.lock().unwrap().take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        }

        fn start_refresh_timer(
            &self,
            millis: u32,
            flag: &'static AtomicBool,
        ) {
            // One detached thread per arming; the flag outlives it.
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(millis.into()));
                flag.store(true, Ordering::Release);
            });
        }

        fn error(&self, error: RuntimeError) {
            panic!("skald runtime error: {error:?}");
        }

        fn fatal_error(&self, error: FatalError) -> ! {
            panic!("skald fatal error: {error:?}");
        }
    }
}

#[cfg(feature = "std")]
pub use host::HostPlatform;

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn handles_are_stable_per_thread_and_distinct() {
        let platform = HostPlatform::new();
        let here = platform.current_task_handle();
        assert_eq!(platform.current_task_handle(), here);

        let there = std::thread::spawn({
            let p = HostPlatform::new();
            move || p.current_task_handle()
        })
        .join()
        .unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn tick_is_monotonic() {
        let platform = HostPlatform::new();
        let a = platform.tick_millis();
        platform.sleep_millis(2);
        let b = platform.tick_millis();
        assert!(b >= a);
    }

    #[test]
    fn worker_spawn_join_roundtrip() {
        let platform = HostPlatform::new();
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(
            false,
        ));
        let seen = flag.clone();
        platform.spawn_worker(Box::new(move || {
            seen.store(true, std::sync::atomic::Ordering::Release);
        }));
        platform.join_worker();
        assert!(flag.load(std::sync::atomic::Ordering::Acquire));
    }
}
