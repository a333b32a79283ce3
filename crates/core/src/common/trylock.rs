//! A non-blocking, explicitly acquire/release lock.
//!
//! The cache and bus protocol calls for locks that are tried (never
//! blocked on) and that can be held across several distinct method calls —
//! `acquire_external`, `snoop_find`, `release_external` are three separate
//! calls that must all see the same held lock. `std::sync::Mutex`'s RAII
//! guard doesn't fit that shape, so this wraps a spinlock-style flag around
//! the protected data instead.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

/// Data protected by a non-blocking, manually acquired/released lock.
pub struct TryLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only granted while `locked` has been
// successfully claimed via `try_acquire`, and released exactly once via
// `release`; callers never hold more than one live reference at a time.
unsafe impl<T: Send> Sync for TryLock<T> {}

impl<T> TryLock<T> {
    /// Wraps `value` in a new, unlocked `TryLock`.
    pub fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Attempts to claim the lock without blocking. Returns `true` on success.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases a previously claimed lock.
    ///
    /// # Safety
    ///
    /// The caller must have previously observed `try_acquire` return `true`,
    /// with no intervening `release` for that acquisition.
    pub fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Returns a reference to the protected data.
    ///
    /// # Safety
    ///
    /// The caller must currently hold the lock (a successful, unreleased
    /// `try_acquire`).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn data(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }
}
