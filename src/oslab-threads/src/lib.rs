//! Preemptive user-level threads over a single host thread.
//!
//! Implements round-robin scheduling of fibers that all share one kernel
//! thread. Preemption comes from the host's virtual-time interval timer:
//! every `quantum_usecs` microseconds of consumed CPU time the alarm signal
//! fires, the tick handler runs, and the next thread in the FIFO ready queue
//! is dispatched by a direct context switch. Threads can also give up their
//! quantum early by sleeping, blocking themselves or terminating themselves;
//! those paths synthesize the same tick.
//!
//! Exactly one thread is `Running` at any observable instant. The ready
//! queue holds every `Ready` thread and never the running one. A thread that
//! is both mid-sleep and explicitly blocked must see the sleep expire *and*
//! a [`resume`] before it becomes runnable again.
//!
//! # Critical sections
//!
//! Blocking the alarm signal is the sole mutual-exclusion mechanism: every
//! public entry point and the tick bracket their body with block/unblock of
//! the alarm (see [`critical`]). The library assumes no other host thread
//! touches it.
//!
//! # Errors
//!
//! Caller faults (unknown tid, full table, invalid quantum) are recovered:
//! the library prints `thread library error: <msg>` to standard error and
//! returns the error. Host failures (signal mask, timer, signal action) are
//! fatal: the library prints `system error: <msg>`, releases every record
//! and exits the process with a nonzero status.

mod arch;
mod critical;
mod sleeplist;
mod thread;
mod timer;

use std::fmt;
use std::io;
use std::process;

use log::debug;
use oslab_runqueue::RunQueue;

pub use oslab_runqueue::ThreadId;

use arch::{Arch, Cpu, ThreadData};
use critical::{CriticalSection, SignalMasked};
use sleeplist::SleepList;
use thread::{Thread, ThreadState};

/// The maximum number of concurrent threads, the initial thread included.
pub const MAX_THREAD_NUM: usize = 100;

/// Stack size of each spawned thread, in bytes.
///
/// Hosted fiber stacks also take the signal frames of the alarm delivery, so
/// this is deliberately far above what the thread functions themselves need.
pub const STACK_SIZE: usize = 64 * 1024;

/// Entry point of a spawned thread.
pub type ThreadFn = fn();

/// Recoverable library errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// `init` was called with a non-positive quantum.
    InvalidQuantum,
    /// No thread with this id currently exists.
    UnknownThread(ThreadId),
    /// All `MAX_THREAD_NUM` thread slots are in use.
    ThreadTableFull,
    /// The initial thread cannot be blocked.
    MainThreadBlock,
    /// The initial thread cannot sleep.
    MainThreadSleep,
    /// `sleep` was called with a negative quantum count.
    NegativeSleep,
    /// The library has not been initialized yet.
    NotInitialized,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidQuantum => write!(f, "quantum must be positive"),
            Error::UnknownThread(tid) => write!(f, "no thread with id {tid}"),
            Error::ThreadTableFull => write!(f, "no free thread id"),
            Error::MainThreadBlock => write!(f, "cannot block the main thread"),
            Error::MainThreadSleep => write!(f, "cannot send the main thread to sleep"),
            Error::NegativeSleep => write!(f, "sleep quanta must be non-negative"),
            Error::NotInitialized => write!(f, "thread library is not initialized"),
        }
    }
}

impl std::error::Error for Error {}

static SCHEDULER: SignalMasked<Scheduler> = SignalMasked::new(Scheduler::new());

/// Struct holding all scheduler state.
struct Scheduler {
    /// The actual thread records, indexed by tid.
    threads: [Option<Box<Thread>>; MAX_THREAD_NUM],
    /// FIFO of `Ready` threads; never contains the running thread.
    ready: RunQueue<MAX_THREAD_NUM>,
    /// Remaining sleep quanta per tid.
    sleepers: SleepList,
    /// The currently running thread, `None` only mid-self-termination.
    current: Option<ThreadId>,
    /// A thread that terminated itself is parked here; its stack is still in
    /// use until the successor runs, so the record is freed on a later tick.
    reap: Option<Box<Thread>>,
    /// Quanta started since `init`, the init quantum included.
    total_quantums: u64,
    quantum_usecs: i64,
    initialized: bool,
}

/// What the caller of [`Scheduler::tick`] has to do once the scheduler
/// borrow is released. Raw pointers so no borrow outlives the state access;
/// the records are heap-pinned and stay valid across the switch.
enum Dispatch {
    /// The current thread keeps running.
    Stay,
    /// Save into `prev`, resume `next`.
    Switch {
        prev: *mut ThreadData,
        next: *const ThreadData,
    },
    /// Resume `next` without saving; the caller's thread is gone.
    Leap { next: *const ThreadData },
}

impl Scheduler {
    const fn new() -> Self {
        Self {
            threads: [const { None }; MAX_THREAD_NUM],
            ready: RunQueue::new(),
            sleepers: SleepList::new(),
            current: None,
            reap: None,
            total_quantums: 0,
            quantum_usecs: 0,
            initialized: false,
        }
    }

    fn is_alive(&self, tid: ThreadId) -> bool {
        usize::from(tid) < MAX_THREAD_NUM && self.threads[usize::from(tid)].is_some()
    }

    /// # Panics
    ///
    /// Panics if no record exists for `tid`; callers validate first.
    fn thread_mut(&mut self, tid: ThreadId) -> &mut Thread {
        self.threads[usize::from(tid)].as_mut().unwrap()
    }

    fn free_tid(&self) -> Option<ThreadId> {
        (1..MAX_THREAD_NUM)
            .find(|&i| self.threads[i].is_none())
            .map(|i| i as ThreadId)
    }

    /// Drops every record and resets the scheduler.
    ///
    /// `leak_stack_of` names a record whose stack is still the one being
    /// executed on; that stack is leaked instead of freed.
    fn release_all(&mut self, leak_stack_of: Option<ThreadId>) {
        for slot in self.threads.iter_mut() {
            if let Some(mut th) = slot.take() {
                if Some(th.tid) == leak_stack_of {
                    th.leak_stack();
                }
            }
        }
        self.reap = None;
        self.ready = RunQueue::new();
        self.sleepers = SleepList::new();
        self.current = None;
        self.total_quantums = 0;
        self.initialized = false;
    }

    /// Decrements every active sleep counter and wakes the expired sleepers.
    ///
    /// `skip` is the thread that registered its sleep in this very tick: its
    /// own quantum does not count towards the sleep, so its counter starts
    /// moving on the next tick.
    fn advance_sleepers(&mut self, skip: Option<ThreadId>) {
        for i in 0..MAX_THREAD_NUM {
            let tid = i as ThreadId;
            if skip == Some(tid) || self.threads[i].is_none() {
                continue;
            }
            if !self.sleepers.tick_one(tid) {
                continue;
            }
            let enqueue = {
                let th = self.thread_mut(tid);
                match th.state {
                    ThreadState::Sleeping => {
                        th.state = ThreadState::Ready;
                        true
                    }
                    ThreadState::SleepingBlocked => {
                        th.state = ThreadState::Blocked;
                        false
                    }
                    _ => false,
                }
            };
            if enqueue {
                self.ready.push(tid);
            }
        }
    }

    /// Marks `tid` running, counts its quantum and makes it current.
    fn install(&mut self, tid: ThreadId) -> *const ThreadData {
        let th = self.thread_mut(tid);
        th.state = ThreadState::Running;
        th.quantums += 1;
        self.current = Some(tid);
        &self.threads[usize::from(tid)].as_ref().unwrap().data as *const ThreadData
    }

    fn rearm_timer(&self) {
        if let Err(e) = timer::arm(self.quantum_usecs) {
            die("arming the virtual timer", e);
        }
    }

    /// The quantum tick, shared by the alarm handler and the synthetic calls
    /// from `sleep`, `block(self)` and `terminate(self)`.
    ///
    /// Runs with the alarm blocked. `exiting` means the caller's record is
    /// already parked for reaping and must not be saved or re-enqueued.
    fn tick(&mut self, skip: Option<ThreadId>, exiting: bool) -> Dispatch {
        if !self.initialized {
            return Dispatch::Stay;
        }
        if !exiting {
            // Free the record a predecessor left behind; we are no longer on
            // its stack.
            self.reap = None;
        }
        self.advance_sleepers(skip);
        self.total_quantums += 1;

        if exiting {
            self.rearm_timer();
            let Some(next) = self.ready.pop_head() else {
                die_msg("the last runnable thread terminated itself");
            };
            let next = self.install(next);
            return Dispatch::Leap { next };
        }

        let Some(cur) = self.current else {
            return Dispatch::Stay;
        };
        if self.ready.is_empty() {
            self.thread_mut(cur).quantums += 1;
            return Dispatch::Stay;
        }

        let requeue = {
            let th = self.thread_mut(cur);
            if th.is_blocked_or_sleeping() {
                false
            } else {
                th.state = ThreadState::Ready;
                true
            }
        };
        if requeue {
            self.ready.push(cur);
        }
        self.rearm_timer();

        // Non-empty was checked before the requeue, so the head is always a
        // thread other than `cur`.
        let next_tid = self.ready.pop_head().unwrap();
        let next = self.install(next_tid);
        let prev = &mut self.thread_mut(cur).data as *mut ThreadData;
        Dispatch::Switch { prev, next }
    }
}

/// Executes a tick and the context switch it decided on.
///
/// Must run with the alarm blocked. For a `Switch`, returns only when the
/// calling thread is dispatched again.
fn reschedule(cs: CriticalSection<'_>, skip: Option<ThreadId>, exiting: bool) {
    let plan = SCHEDULER.with_mut_cs(cs, |s| s.tick(skip, exiting));
    match plan {
        Dispatch::Stay => {}
        Dispatch::Switch { prev, next } => unsafe { Cpu::switch(prev, next) },
        Dispatch::Leap { next } => unsafe { Cpu::resume(next) },
    }
}

extern "C" fn alarm_handler(_signum: libc::c_int) {
    critical::with(|cs| reschedule(cs, None, false));
}

/// First code a spawned thread runs; calls its entry and then terminates it
/// through the library, so a returning entry behaves like an explicit
/// self-termination.
extern "C" fn thread_start() {
    let entry = critical::with(|cs| {
        SCHEDULER.with_mut_cs(cs, |s| {
            let tid = s.current.unwrap();
            s.thread_mut(tid).entry.unwrap()
        })
    });
    entry();
    let _ = terminate(current_tid());
    unreachable!("a terminated thread cannot be dispatched again");
}

/// Prints the library diagnostic for `e` and hands it back.
fn fail<T>(e: Error) -> Result<T, Error> {
    eprintln!("thread library error: {e}");
    Err(e)
}

/// Fatal host failure: release what we can and exit nonzero.
pub(crate) fn die(what: &str, err: io::Error) -> ! {
    eprintln!("system error: {what}: {err}");
    SCHEDULER.try_with_mut(|s| {
        let cur = s.current;
        s.release_all(cur);
    });
    process::exit(1);
}

fn die_msg(what: &str) -> ! {
    eprintln!("system error: {what}");
    SCHEDULER.try_with_mut(|s| {
        let cur = s.current;
        s.release_all(cur);
    });
    process::exit(1);
}

/// Initializes the library and starts the quantum clock.
///
/// The calling context becomes thread 0, bound to the host stack, in state
/// `Running`. Immediately after a successful return both
/// [`total_quantums`] and `quantums(0)` read 1.
///
/// Calling `init` again tears the previous state down and starts fresh.
///
/// # Errors
///
/// [`Error::InvalidQuantum`] when `quantum_usecs` is not positive.
pub fn init(quantum_usecs: i64) -> Result<(), Error> {
    if quantum_usecs <= 0 {
        return fail(Error::InvalidQuantum);
    }
    critical::with(|cs| {
        SCHEDULER.with_mut_cs(cs, |s| {
            let cur = s.current;
            s.release_all(cur);
            if let Err(e) = Cpu::install_alarm_handler(alarm_handler) {
                die("installing the timer signal handler", e);
            }
            s.threads[0] = Some(Thread::initial());
            s.current = Some(0);
            s.thread_mut(0).quantums = 1;
            s.total_quantums = 1;
            s.quantum_usecs = quantum_usecs;
            s.initialized = true;
            if let Err(e) = timer::arm(quantum_usecs) {
                die("arming the virtual timer", e);
            }
        });
    });
    debug!("thread library initialized, quantum = {quantum_usecs}us");
    Ok(())
}

/// Spawns a new thread running `entry` and appends it to the ready queue.
///
/// The new thread gets the smallest unused tid. Spawning never yields; the
/// caller keeps its quantum.
///
/// # Errors
///
/// [`Error::ThreadTableFull`] when all tids are taken.
pub fn spawn(entry: ThreadFn) -> Result<ThreadId, Error> {
    let spawned = critical::with(|cs| {
        SCHEDULER.with_mut_cs(cs, |s| {
            if !s.initialized {
                return Err(Error::NotInitialized);
            }
            let Some(tid) = s.free_tid() else {
                return Err(Error::ThreadTableFull);
            };
            let th = match Thread::spawned(tid, entry, thread_start) {
                Ok(th) => th,
                Err(e) => die("preparing a thread context", e),
            };
            s.threads[usize::from(tid)] = Some(th);
            s.ready.push(tid);
            Ok(tid)
        })
    });
    match spawned {
        Ok(tid) => {
            debug!("spawned thread {tid}");
            Ok(tid)
        }
        Err(e) => fail(e),
    }
}

enum TerminateAction {
    /// tid 0: the whole process goes down with status 0.
    ExitProcess,
    /// The caller terminated itself; dispatch a successor, never return.
    SelfExit,
    /// Some other thread; its record is already gone.
    Removed,
}

/// Terminates the thread `tid` and releases its record.
///
/// Terminating tid 0 releases every record and exits the process with
/// status 0. A thread terminating itself never returns; the scheduler frees
/// its stack from a successor's context.
///
/// # Errors
///
/// [`Error::UnknownThread`] when no such thread exists.
pub fn terminate(tid: ThreadId) -> Result<(), Error> {
    critical::with(|cs| {
        let action = SCHEDULER.with_mut_cs(cs, |s| {
            if !s.initialized {
                return Err(Error::NotInitialized);
            }
            if !s.is_alive(tid) {
                return Err(Error::UnknownThread(tid));
            }
            if tid == 0 {
                return Ok(TerminateAction::ExitProcess);
            }
            s.sleepers.cancel(tid);
            if s.current == Some(tid) {
                let th = self_park(s, tid);
                s.reap = Some(th);
                return Ok(TerminateAction::SelfExit);
            }
            s.ready.del(tid);
            s.threads[usize::from(tid)] = None;
            Ok(TerminateAction::Removed)
        });
        match action {
            Err(e) => fail(e),
            Ok(TerminateAction::Removed) => {
                debug!("terminated thread {tid}");
                Ok(())
            }
            Ok(TerminateAction::ExitProcess) => {
                SCHEDULER.with_mut_cs(cs, |s| {
                    let cur = s.current;
                    s.release_all(cur);
                });
                process::exit(0);
            }
            Ok(TerminateAction::SelfExit) => {
                reschedule(cs, None, true);
                unreachable!("a terminated thread cannot be dispatched again");
            }
        }
    })
}

/// Detaches the running thread's record from the table.
fn self_park(s: &mut Scheduler, tid: ThreadId) -> Box<Thread> {
    s.current = None;
    s.threads[usize::from(tid)].take().unwrap()
}

/// Blocks the thread `tid` until it is [`resume`]d.
///
/// A sleeping thread additionally becomes blocked and will need both the
/// sleep to expire and a resume. Blocking an already blocked thread is a
/// no-op. Blocking yourself yields immediately.
///
/// # Errors
///
/// [`Error::MainThreadBlock`] for tid 0, [`Error::UnknownThread`] otherwise.
pub fn block(tid: ThreadId) -> Result<(), Error> {
    critical::with(|cs| {
        let blocked_self = SCHEDULER.with_mut_cs(cs, |s| {
            if !s.initialized {
                return Err(Error::NotInitialized);
            }
            if tid == 0 {
                return Err(Error::MainThreadBlock);
            }
            if !s.is_alive(tid) {
                return Err(Error::UnknownThread(tid));
            }
            s.ready.del(tid);
            let th = s.thread_mut(tid);
            match th.state {
                ThreadState::Blocked | ThreadState::SleepingBlocked => {}
                ThreadState::Sleeping => th.state = ThreadState::SleepingBlocked,
                _ => th.state = ThreadState::Blocked,
            }
            Ok(s.current == Some(tid))
        });
        match blocked_self {
            Err(e) => fail(e),
            Ok(true) => {
                reschedule(cs, None, false);
                Ok(())
            }
            Ok(false) => Ok(()),
        }
    })
}

/// Moves a blocked thread back to the ready queue.
///
/// A `SleepingBlocked` thread drops the block but keeps sleeping. Resuming a
/// ready or running thread is a no-op.
///
/// # Errors
///
/// [`Error::UnknownThread`] when no such thread exists.
pub fn resume(tid: ThreadId) -> Result<(), Error> {
    critical::with(|cs| {
        let res = SCHEDULER.with_mut_cs(cs, |s| {
            if !s.initialized {
                return Err(Error::NotInitialized);
            }
            if !s.is_alive(tid) {
                return Err(Error::UnknownThread(tid));
            }
            let enqueue = {
                let th = s.thread_mut(tid);
                match th.state {
                    ThreadState::Blocked => {
                        th.state = ThreadState::Ready;
                        true
                    }
                    ThreadState::SleepingBlocked => {
                        th.state = ThreadState::Sleeping;
                        false
                    }
                    _ => false,
                }
            };
            if enqueue {
                s.ready.push(tid);
            }
            Ok(())
        });
        match res {
            Err(e) => fail(e),
            Ok(()) => Ok(()),
        }
    })
}

/// Puts the calling thread to sleep for `num_quantums` further quanta.
///
/// The quantum the call is made in does not count. After the sleep expires
/// the thread joins the tail of the ready queue.
///
/// # Errors
///
/// [`Error::MainThreadSleep`] when called from tid 0,
/// [`Error::NegativeSleep`] for a negative count.
pub fn sleep(num_quantums: i64) -> Result<(), Error> {
    critical::with(|cs| {
        let res = SCHEDULER.with_mut_cs(cs, |s| {
            if !s.initialized {
                return Err(Error::NotInitialized);
            }
            let tid = s.current.unwrap();
            if tid == 0 {
                return Err(Error::MainThreadSleep);
            }
            if num_quantums < 0 {
                return Err(Error::NegativeSleep);
            }
            s.thread_mut(tid).state = ThreadState::Sleeping;
            s.sleepers.register(tid, num_quantums);
            Ok(tid)
        });
        match res {
            Err(e) => fail(e),
            Ok(tid) => {
                // The synthetic tick must not advance the counter registered
                // just now; the sleeper's own quantum doesn't count.
                reschedule(cs, Some(tid), false);
                Ok(())
            }
        }
    })
}

/// Returns the tid of the calling thread (0 before `init`).
pub fn current_tid() -> ThreadId {
    SCHEDULER.with_mut(|s| s.current.unwrap_or(0))
}

/// Total number of quanta started since `init`, the current one included.
pub fn total_quantums() -> u64 {
    SCHEDULER.with_mut(|s| s.total_quantums)
}

/// Number of quanta the thread `tid` has spent running, its current quantum
/// included.
///
/// # Errors
///
/// [`Error::UnknownThread`] when no such thread exists.
pub fn quantums(tid: ThreadId) -> Result<u64, Error> {
    let res = SCHEDULER.with_mut(|s| {
        if s.is_alive(tid) {
            Ok(s.thread_mut(tid).quantums)
        } else {
            Err(Error::UnknownThread(tid))
        }
    });
    match res {
        Err(e) => fail(e),
        ok => ok,
    }
}

/// Whether a thread with this tid currently exists.
pub fn is_alive(tid: ThreadId) -> bool {
    SCHEDULER.with_mut(|s| s.is_alive(tid))
}
