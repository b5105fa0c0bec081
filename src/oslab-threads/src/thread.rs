use std::io;

use crate::arch::{Arch, Cpu, ThreadData};
use crate::{ThreadFn, ThreadId, STACK_SIZE};

/// Possible states of a thread.
///
/// `SleepingBlocked` is the overlap state: the thread has a positive
/// remaining-sleep counter *and* an explicit block request, and must see both
/// the sleep expire and a `resume` before it becomes runnable again.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum ThreadState {
    Ready,
    Running,
    Blocked,
    Sleeping,
    SleepingBlocked,
}

/// Main struct for holding thread data.
///
/// The record exclusively owns its stack; dropping the record frees it. The
/// initial thread (tid 0) runs on the host thread's stack and owns none.
pub(crate) struct Thread {
    pub tid: ThreadId,
    pub state: ThreadState,
    /// Count of quanta this thread has spent `Running`, including the
    /// current one if it is running now.
    pub quantums: u64,
    /// Entry point; `None` for the initial thread.
    pub entry: Option<ThreadFn>,
    stack: Option<Box<[u8]>>,
    /// Saved machine context. Only ever saved and restored, never inspected.
    pub(crate) data: ThreadData,
}

impl Thread {
    /// The record for tid 0, bound to the stack `init` was called on.
    ///
    /// Its context is filled in by the first switch away from it.
    pub(crate) fn initial() -> Box<Thread> {
        Box::new(Thread {
            tid: 0,
            state: ThreadState::Running,
            quantums: 0,
            entry: None,
            stack: None,
            data: ThreadData::new(),
        })
    }

    /// Builds a record for a spawned thread with a fresh `STACK_SIZE` stack,
    /// prepared so that its first dispatch starts executing `trampoline`.
    ///
    /// The record is boxed before the context is prepared: the saved context
    /// refers into itself on some libc implementations and must not move
    /// afterwards.
    pub(crate) fn spawned(
        tid: ThreadId,
        entry: ThreadFn,
        trampoline: extern "C" fn(),
    ) -> io::Result<Box<Thread>> {
        let stack = vec![0u8; STACK_SIZE].into_boxed_slice();
        let mut th = Box::new(Thread {
            tid,
            state: ThreadState::Ready,
            quantums: 0,
            entry: Some(entry),
            stack: Some(stack),
            data: ThreadData::new(),
        });
        let Thread { data, stack, .. } = th.as_mut();
        Cpu::setup_context(data, stack.as_mut().map(|s| &mut s[..]).unwrap(), trampoline)?;
        Ok(th)
    }

    pub(crate) fn is_blocked_or_sleeping(&self) -> bool {
        matches!(
            self.state,
            ThreadState::Blocked | ThreadState::Sleeping | ThreadState::SleepingBlocked
        )
    }

    /// Leaks the stack. Used on the exit paths that still execute on it.
    pub(crate) fn leak_stack(&mut self) {
        if let Some(stack) = self.stack.take() {
            std::mem::forget(stack);
        }
    }
}
