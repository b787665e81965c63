// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 wireup contributors
//
// Pluggable lock strategy. Port of na/wireup/wiring.c's
// wiring_lock_bundle_t (a {lock, unlock, assert_locked} function
// triple plus an opaque arg) as a trait: the trait's `&self` receiver
// plays the role of the opaque arg, so no separate argument is
// threaded through. `assert_locked` mirrors wires.c's
// custom_assert_locked, which uses pthread_mutex_trylock to check that
// the mutex is currently held by *someone*, not specifically by the
// calling thread — the same, weaker check is what's reproduced here.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};

use crate::spin::adaptive_yield;

/// A lock strategy a `Wiring` can be parameterized over.
///
/// All mutating `Wiring` operations call `lock`/`unlock` around their
/// body and `assert_locked` at entry in debug builds. Implementations
/// must be `Send + Sync` since the lock itself may be shared across
/// threads even when only one thread at a time drives the wiring.
pub trait LockBundle: Send + Sync {
    /// Acquire the lock, blocking until available.
    fn lock(&self);
    /// Release a previously acquired lock.
    fn unlock(&self);
    /// Return true if the lock is currently held (by anyone).
    ///
    /// Only consulted under `cfg!(debug_assertions)` — see
    /// `SPEC_FULL.md` section 5.1 and `DESIGN.md`'s Open Question 1.
    /// A release build never calls this and pays nothing for it.
    fn assert_locked(&self) -> bool;

    /// Debug-only assertion wrapper; panics if the lock is not held.
    fn debug_assert_locked(&self) {
        debug_assert!(self.assert_locked(), "wiring operation invoked without holding its lock");
    }
}

/// Single-threaded no-op lock bundle.
///
/// Correct only when the embedding application guarantees a single
/// thread ever touches a given `Wiring`. `assert_locked` always
/// reports true since there is no actual mutual exclusion to violate.
#[derive(Debug, Default)]
pub struct NullLock;

impl LockBundle for NullLock {
    fn lock(&self) {}
    fn unlock(&self) {}
    fn assert_locked(&self) -> bool {
        true
    }
}

/// Spin-lock-backed bundle for real multi-threaded use.
///
/// Adaptive backoff (busy spin, pause, yield, sleep) matches the
/// teacher crate's own `SpinLock`; `assert_locked` reports whether the
/// underlying word is currently non-zero, the same "is anyone holding
/// this" check `custom_assert_locked` performs via `EBUSY`.
#[derive(Debug, Default)]
pub struct SpinLockBundle {
    held: AtomicU32,
}

impl SpinLockBundle {
    pub const fn new() -> Self {
        Self { held: AtomicU32::new(0) }
    }
}

impl LockBundle for SpinLockBundle {
    fn lock(&self) {
        let mut k = 0u32;
        while self.held.swap(1, Ordering::Acquire) != 0 {
            adaptive_yield(&mut k);
        }
    }

    fn unlock(&self) {
        self.held.store(0, Ordering::Release);
    }

    fn assert_locked(&self) -> bool {
        self.held.load(Ordering::Relaxed) != 0
    }
}

// Safety: all mutation goes through the atomic word.
unsafe impl Send for SpinLockBundle {}
unsafe impl Sync for SpinLockBundle {}

/// Blocking mutex bundle for applications with a mutex-heavy threading
/// model, the direct analogue of `wires.c`'s `custom_lock`/
/// `custom_unlock`/`custom_assert_locked` over a `pthread_mutex_t`.
///
/// Built from a plain `Mutex<bool>` + `Condvar` rather than holding a
/// `MutexGuard` across the `lock`/`unlock` call boundary, since the
/// trait's explicit, non-RAII lock/unlock pair has no borrow for a
/// guard to live in.
pub struct MutexLock {
    held: Mutex<bool>,
    cv: Condvar,
}

impl Default for MutexLock {
    fn default() -> Self {
        Self::new()
    }
}

impl MutexLock {
    pub fn new() -> Self {
        Self { held: Mutex::new(false), cv: Condvar::new() }
    }
}

impl LockBundle for MutexLock {
    fn lock(&self) {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        while *held {
            held = self.cv.wait(held).unwrap_or_else(|p| p.into_inner());
        }
        *held = true;
    }

    fn unlock(&self) {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        *held = false;
        drop(held);
        self.cv.notify_one();
    }

    fn assert_locked(&self) -> bool {
        *self.held.lock().unwrap_or_else(|p| p.into_inner())
    }
}
