// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High-throughput structured logging for multi-threaded and embedded
//! targets.
//!
//! Producers stream typed values into a per-task [`Session`]; each value
//! becomes one fixed-size message unit in a bounded queue. A single
//! transmitter worker drains the queue, reassembles concurrent records so
//! no line ever interleaves another task's atoms, renders them to text
//! and hands the bytes to a pluggable [`Sink`]. Producer-side work is a
//! handful of copies and one queue push per value, so logging is cheap
//! enough for interrupt handlers when the configuration allows them.
//!
//! ```ignore
//! skald::init(Config::default(), HostPlatform::new(), WriteSink::new(io::stdout()))?;
//! skald::register_current_task(Some("main"));
//! skald::info().push("boot complete after").push(elapsed_ms).push("ms").finish();
//! // ...
//! skald::done();
//! ```
//!
//! Porting to an RTOS or bare metal means implementing [`Platform`] and
//! [`Sink`]; everything above those traits is target-independent.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod builder;
mod config;
mod platform;
mod session;
mod sink;
mod worker;

pub use config::{
    default_formats, BlockingPolicy, Config, Dispatch, InitError,
    TaskRepresentation,
};
#[cfg(feature = "std")]
pub use platform::HostPlatform;
pub use platform::{FatalError, Platform, RuntimeError};
pub use session::{Loggable, Session};
#[cfg(feature = "std")]
pub use sink::WriteSink;
pub use sink::{Sink, SinkError, VoidSink};
pub use skald_types::{
    base, FormatDirective, Level, Payload, TaskId, Topic, TopicCell,
    ValueKind,
};

use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use alloc::boxed::Box;

use builder::BuilderArena;
use skald_convert::{Cursor, TextConverter};
use skald_queue::SharedQueue;
use skald_registry::{TaskRegistry, TopicRegistry};
use skald_types::MessageUnit;

/// A unit could not be enqueued; the producing record is truncated.
pub(crate) struct UnitDropped;

pub(crate) struct DirectLine {
    conv: TextConverter,
    buf: Box<[u8]>,
    len: usize,
}

pub(crate) struct SinkState {
    sink: Box<dyn Sink>,
    /// Present only in [`Dispatch::Direct`] mode.
    direct: Option<DirectLine>,
}

/// The logger singleton. Obtained through [`instance`]; all public
/// operations are also available as free functions that no-op while the
/// logger is down.
pub struct Logger {
    pub(crate) config: Config,
    pub(crate) platform: Box<dyn Platform>,
    pub(crate) tasks: TaskRegistry,
    pub(crate) topics: TopicRegistry,
    pub(crate) arena: BuilderArena,
    pub(crate) queue: SharedQueue,
    pub(crate) sink: spin::Mutex<SinkState>,
    pub(crate) keep_running: AtomicBool,
    pub(crate) refresh_flag: AtomicBool,
}

static INSTANCE: AtomicPtr<Logger> = AtomicPtr::new(ptr::null_mut());
static LIFECYCLE: spin::Mutex<()> = spin::Mutex::new(());

/// Brings the singleton up and, in queued mode, starts the transmitter
/// worker. Fails if a logger is already running or the configuration is
/// invalid.
pub fn init(
    config: Config,
    platform: impl Platform + 'static,
    sink: impl Sink + 'static,
) -> Result<(), InitError> {
    config.validate()?;
    let _guard = LIFECYCLE.lock();
    if !INSTANCE.load(Ordering::Acquire).is_null() {
        return Err(InitError::AlreadyInitialized);
    }

    let direct = matches!(config.dispatch, Dispatch::Direct).then(|| {
        DirectLine {
            conv: TextConverter::new(config.convert_options()),
            buf: alloc::vec![0; config.transmit_length].into_boxed_slice(),
            len: 0,
        }
    });
    let tasks = TaskRegistry::new(config.task_capacity);
    let topics = TopicRegistry::new(config.topic_capacity);
    let arena = BuilderArena::new(config.task_capacity);
    let queue = SharedQueue::new(config.queue_length);

    let logger: &'static Logger = Box::leak(Box::new(Logger {
        platform: Box::new(platform),
        tasks,
        topics,
        arena,
        queue,
        sink: spin::Mutex::new(SinkState {
            sink: Box::new(sink),
            direct,
        }),
        keep_running: AtomicBool::new(true),
        refresh_flag: AtomicBool::new(false),
        config,
    }));
    INSTANCE.store(logger as *const Logger as *mut Logger, Ordering::Release);

    if matches!(logger.config.dispatch, Dispatch::Queued) {
        logger
            .platform
            .spawn_worker(Box::new(move || logger.worker_main()));
    }
    Ok(())
}

/// Drains and finalizes the singleton: every record fully enqueued before
/// this call reaches the sink; partial records still in producer hands
/// are lost. Re-`init` afterwards is permitted.
pub fn done() {
    let _guard = LIFECYCLE.lock();
    let raw = INSTANCE.swap(ptr::null_mut(), Ordering::AcqRel);
    if raw.is_null() {
        return;
    }
    // Producers may still hold references loaded before the swap, so the
    // shell must outlive them; it is never freed.
    let logger: &'static Logger = unsafe { &*raw };

    logger.keep_running.store(false, Ordering::Release);
    if matches!(logger.config.dispatch, Dispatch::Queued) {
        let _ = logger.queue.push(MessageUnit::discard());
        logger.platform.join_worker();
    }

    let mut state = logger.sink.lock();
    let SinkState { sink, direct } = &mut *state;
    if let Some(direct) = direct.as_mut() {
        if direct.len > 0 {
            let _ = sink.write(&direct.buf[..direct.len]);
            direct.len = 0;
        }
    }
    let _ = sink.flush();
}

/// The running logger, if any.
pub fn instance() -> Option<&'static Logger> {
    let raw = INSTANCE.load(Ordering::Acquire);
    if raw.is_null() {
        None
    } else {
        Some(unsafe { &*raw })
    }
}

impl Logger {
    /// Opens a record with the configured header (task representation,
    /// tick).
    pub fn begin(&'static self, level: Level) -> Session {
        self.begin_inner(level, true, None, None)
    }

    /// Opens a header-carrying record under a topic. Null if the topic
    /// was never registered.
    pub fn begin_topic(&'static self, level: Level, topic: Topic) -> Session {
        self.begin_inner(level, true, Some(topic), None)
    }

    /// Opens a record with no header fields.
    pub fn begin_bare(&'static self, level: Level) -> Session {
        self.begin_inner(level, false, None, None)
    }

    pub fn begin_bare_topic(
        &'static self,
        level: Level,
        topic: Topic,
    ) -> Session {
        self.begin_inner(level, false, Some(topic), None)
    }

    /// Opens a record on behalf of `task` instead of the calling task.
    /// The caller is responsible for not racing the task's own sessions.
    pub fn begin_for(&'static self, level: Level, task: TaskId) -> Session {
        self.begin_inner(level, true, None, Some(task))
    }

    pub fn begin_bare_for(
        &'static self,
        level: Level,
        task: TaskId,
    ) -> Session {
        self.begin_inner(level, false, None, Some(task))
    }

    fn begin_inner(
        &'static self,
        level: Level,
        with_header: bool,
        topic: Option<Topic>,
        task_override: Option<TaskId>,
    ) -> Session {
        if !level.enabled() {
            return Session::null();
        }
        let in_isr = self.platform.in_interrupt();
        if in_isr && !self.config.log_from_isr {
            return Session::null();
        }
        let topic = match topic {
            None => Topic::INVALID,
            Some(topic) => {
                if !self.topics.is_registered(topic) {
                    return Session::null();
                }
                topic
            }
        };
        let task = match task_override {
            Some(task) => task,
            None if in_isr => TaskId::ISR,
            None => {
                self.tasks.lookup(self.platform.current_task_handle())
            }
        };
        let Some(mut guard) = self.arena.claim(task) else {
            return Session::null();
        };
        guard.start(task, with_header, topic);
        Session::active(self, guard)
    }

    /// Registers the calling task, assigning it a dense id. Idempotent
    /// per task; exhaustion of the id space goes to
    /// [`Platform::fatal_error`].
    pub fn register_current_task(
        &'static self,
        name: Option<&'static str>,
    ) -> TaskId {
        let handle = self.platform.current_task_handle();
        match self.tasks.register(handle, name) {
            Ok(id) => {
                if self.config.allow_registration_log {
                    let mut session =
                        self.begin(Level::Info).push("-=- Registered task:");
                    if let Some(name) = name {
                        session = session.push(name);
                    }
                    session.push(id.raw()).push("-=-").finish();
                }
                id
            }
            Err(_) => {
                self.platform.fatal_error(FatalError::OutOfTaskIds)
            }
        }
    }

    /// Returns the calling task's id to the free pool.
    pub fn unregister_current_task(&'static self) {
        self.tasks
            .unregister(self.platform.current_task_handle());
    }

    /// Assigns a topic value and publishes it through `cell`. Returns
    /// false when the topic space is exhausted; sessions on the cell
    /// then stay inert.
    pub fn register_topic(
        &'static self,
        cell: &TopicCell,
        prefix: &'static str,
    ) -> bool {
        self.topics.register(cell, prefix).is_ok()
    }

    /// The calling context's task id: the ISR pseudo-task from interrupt
    /// context, the registered id otherwise, or the discard id for
    /// unregistered tasks.
    pub fn current_task(&self) -> TaskId {
        if self.platform.in_interrupt() {
            TaskId::ISR
        } else {
            self.tasks.lookup(self.platform.current_task_handle())
        }
    }

    /// Routes one unit according to the dispatch mode and blocking
    /// policy.
    pub(crate) fn dispatch_unit(
        &self,
        unit: MessageUnit,
    ) -> Result<(), UnitDropped> {
        match self.config.dispatch {
            Dispatch::Direct => {
                self.direct_emit(&unit);
                Ok(())
            }
            Dispatch::Queued => self.enqueue(unit),
        }
    }

    fn enqueue(&self, unit: MessageUnit) -> Result<(), UnitDropped> {
        if self.queue.push(unit).is_ok() {
            return Ok(());
        }
        let may_block = matches!(self.config.blocking, BlockingPolicy::Block)
            && !self.platform.in_interrupt();
        if !may_block {
            return Err(UnitDropped);
        }
        // Bounded retry: the adapter's short sleep, up to one pause.
        let mut waited = 0;
        while waited < self.config.pause_millis {
            self.platform.sleep_millis(1);
            waited += 1;
            if self.queue.push(unit).is_ok() {
                return Ok(());
            }
            if !self.keep_running.load(Ordering::Acquire) {
                break;
            }
        }
        Err(UnitDropped)
    }

    /// Direct mode: render on the calling thread and write whole lines
    /// under the sink lock.
    fn direct_emit(&self, unit: &MessageUnit) {
        let mut state = self.sink.lock();
        let SinkState { sink, direct } = &mut *state;
        let Some(line) = direct.as_mut() else {
            return;
        };
        {
            let mut cursor = Cursor::new(&mut line.buf[..], &mut line.len);
            line.conv.value(&mut cursor, unit);
        }
        if unit.is_terminal() {
            let result = sink.write(&line.buf[..line.len]);
            line.len = 0;
            if let Err(error) = result {
                drop(state);
                self.platform.error(RuntimeError::Sink(error));
            }
        }
    }

    pub(crate) fn write_sink(&self, bytes: &[u8]) {
        let result = self.sink.lock().sink.write(bytes);
        if let Err(error) = result {
            self.platform.error(RuntimeError::Sink(error));
        }
    }
}

/// Opens a header-carrying record at `level` on the running logger; a
/// null session when the logger is down.
pub fn log(level: Level) -> Session {
    match instance() {
        Some(logger) => logger.begin(level),
        None => Session::null(),
    }
}

/// Like [`log`], scoped under a registered topic.
pub fn log_topic(level: Level, topic: Topic) -> Session {
    match instance() {
        Some(logger) => logger.begin_topic(level, topic),
        None => Session::null(),
    }
}

pub fn error() -> Session {
    log(Level::Error)
}

pub fn warning() -> Session {
    log(Level::Warning)
}

pub fn info() -> Session {
    log(Level::Info)
}

pub fn debug() -> Session {
    log(Level::Debug)
}

/// One-shot convenience: open, push one value, finish.
pub fn send<T: Loggable>(level: Level, value: T) {
    log(level).push(value).finish();
}

/// See [`Logger::register_current_task`]. Returns the discard id while
/// the logger is down.
pub fn register_current_task(name: Option<&'static str>) -> TaskId {
    match instance() {
        Some(logger) => logger.register_current_task(name),
        None => TaskId::INVALID,
    }
}

pub fn unregister_current_task() {
    if let Some(logger) = instance() {
        logger.unregister_current_task();
    }
}

/// See [`Logger::register_topic`].
pub fn register_topic(cell: &TopicCell, prefix: &'static str) -> bool {
    match instance() {
        Some(logger) => logger.register_topic(cell, prefix),
        None => false,
    }
}
