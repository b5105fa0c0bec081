//! Signal-masked access to the scheduler state.
//!
//! The library's one and only mutual-exclusion mechanism is blocking the
//! virtual-alarm signal: every public API entry and the tick handler run
//! their body with the alarm blocked, so the tick can never observe the
//! scheduler mid-mutation. This module provides that discipline as a closure
//! guard, plus a `RefCell` wrapper so the state itself is handed out as an
//! ordinary `&mut`.

use std::cell::RefCell;
use std::marker::PhantomData;

use crate::arch::{Arch, Cpu};

/// Token proving the virtual alarm is currently blocked.
#[derive(Clone, Copy)]
pub(crate) struct CriticalSection<'cs> {
    _marker: PhantomData<&'cs ()>,
}

/// Runs `f` with the virtual alarm blocked, unblocking it afterwards.
///
/// A context switch may happen inside `f`; the unblock then runs once the
/// calling thread is dispatched again and `f` finally returns. Nesting is
/// harmless: the inner unblock simply opens the window a little earlier,
/// exactly as the reference discipline does.
pub(crate) fn with<R>(f: impl FnOnce(CriticalSection<'_>) -> R) -> R {
    if let Err(e) = Cpu::mask_alarm() {
        crate::die("blocking the timer signal", e);
    }
    let r = f(CriticalSection {
        _marker: PhantomData,
    });
    if let Err(e) = Cpu::unmask_alarm() {
        crate::die("unblocking the timer signal", e);
    }
    r
}

/// The scheduler state cell: a `RefCell` whose borrows only ever happen
/// inside a [`CriticalSection`].
///
/// The library is single-threaded by construction (one host thread, fibers
/// multiplexed on it), and the only reentrancy source is the alarm signal,
/// which a [`CriticalSection`] keeps blocked. No borrow can therefore be
/// interrupted by another.
pub(crate) struct SignalMasked<T> {
    inner: RefCell<T>,
}

unsafe impl<T> Sync for SignalMasked<T> {}

impl<T> SignalMasked<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            inner: RefCell::new(inner),
        }
    }

    pub fn with_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        with(|cs| self.with_mut_cs(cs, f))
    }

    pub fn with_mut_cs<F, R>(&self, _cs: CriticalSection<'_>, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        f(&mut *self.inner.borrow_mut())
    }

    /// Fallible borrow for the fatal-error path, which may run while a
    /// borrow is already live.
    pub fn try_with_mut<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            f(&mut *inner);
        }
    }
}
