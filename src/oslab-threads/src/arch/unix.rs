//! Context switching and alarm plumbing over the host libc.
//!
//! Contexts are `ucontext_t` snapshots: program counter, stack pointer,
//! callee-saved registers and the signal mask. `swapcontext` both saves the
//! outgoing context and restores the incoming one, which is exactly the
//! snapshot/resume pair the tick needs.

use std::io;
use std::mem;
use std::ptr;

use super::Arch;

pub(crate) struct Cpu;

/// A saved execution context.
///
/// The libc may store self-referential pointers inside `ucontext_t` (glibc's
/// x86-64 FPU area is one), so a `Context` must stay at a fixed address from
/// the moment it is first saved into. Thread records are boxed for this
/// reason.
pub(crate) struct Context {
    inner: libc::ucontext_t,
}

impl Context {
    pub(crate) fn new() -> Context {
        // Zeroed is fine as a save target: getcontext/swapcontext fill in
        // every field they later rely on.
        Context {
            inner: unsafe { mem::zeroed() },
        }
    }
}

fn alarm_sigset() -> libc::sigset_t {
    unsafe {
        let mut set = mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGVTALRM);
        set
    }
}

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

impl Arch for Cpu {
    type ThreadData = Context;

    fn setup_context(
        data: &mut Context,
        stack: &mut [u8],
        entry: extern "C" fn(),
    ) -> io::Result<()> {
        unsafe {
            check(libc::getcontext(&mut data.inner))?;
            data.inner.uc_stack.ss_sp = stack.as_mut_ptr().cast();
            data.inner.uc_stack.ss_size = stack.len();
            data.inner.uc_stack.ss_flags = 0;
            data.inner.uc_link = ptr::null_mut();
            // First dispatch enters `entry` with the alarm deliverable.
            libc::sigemptyset(&mut data.inner.uc_sigmask);
            libc::makecontext(&mut data.inner, entry, 0);
        }
        Ok(())
    }

    unsafe fn switch(prev: *mut Context, next: *const Context) {
        if libc::swapcontext(&mut (*prev).inner, &(*next).inner) == -1 {
            crate::die("switching thread contexts", io::Error::last_os_error());
        }
    }

    unsafe fn resume(next: *const Context) -> ! {
        libc::setcontext(&(*next).inner);
        // setcontext only returns on failure.
        crate::die("restoring a thread context", io::Error::last_os_error());
    }

    fn install_alarm_handler(handler: extern "C" fn(libc::c_int)) -> io::Result<()> {
        unsafe {
            let mut act: libc::sigaction = mem::zeroed();
            act.sa_sigaction = handler as usize;
            act.sa_flags = 0;
            libc::sigemptyset(&mut act.sa_mask);
            check(libc::sigaction(libc::SIGVTALRM, &act, ptr::null_mut()))
        }
    }

    fn mask_alarm() -> io::Result<()> {
        let set = alarm_sigset();
        unsafe { check(libc::sigprocmask(libc::SIG_BLOCK, &set, ptr::null_mut())) }
    }

    fn unmask_alarm() -> io::Result<()> {
        let set = alarm_sigset();
        unsafe { check(libc::sigprocmask(libc::SIG_UNBLOCK, &set, ptr::null_mut())) }
    }
}
