// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 wireup contributors
//
// The one array an unlocked reader actually touches (SPEC_FULL.md
// section 5: "only get_data is read without the lock"). Represented
// as a pointer-swapped slice of per-slot AtomicPtr — the direct
// analogue of the original's `wiring->assoc` array of opaque user
// data pointers, made sound for Rust's aliasing rules by publishing
// the whole backing slice through one `AtomicPtr` swap on growth
// (the old slice is hatched off to the garbage scheduler, see
// `wiring.rs`) and each element through its own `AtomicPtr` swap on
// association-data updates (the old boxed value is likewise handed to
// the garbage scheduler rather than freed immediately, since a reader
// may have already loaded it).

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

struct AssocArray<A> {
    slots: Box<[AtomicPtr<A>]>,
}

/// A growable array of optional, independently-swappable association
/// values, safe for one writer plus any number of unlocked readers.
pub struct AssocTable<A> {
    current: AtomicPtr<AssocArray<A>>,
}

/// A slice retired by `grow`; holds live element pointers (now owned
/// by the new array) but the backing allocation itself must not be
/// freed until no reader can still be mid-dereference of it.
pub struct RetiredAssocArray<A> {
    ptr: *mut AssocArray<A>,
}

// Safety: the pointer is only ever freed once, by whoever calls
// `free`, after the epoch scheduler confirms no reader pins it.
unsafe impl<A: Send> Send for RetiredAssocArray<A> {}

impl<A> RetiredAssocArray<A> {
    /// Drop the retired backing allocation. Does not drop the element
    /// values: those pointers were copied into the new array and are
    /// still owned by it.
    pub fn free(self) {
        let mut arr = unsafe { Box::from_raw(self.ptr) };
        for slot in arr.slots.iter_mut() {
            slot.store(ptr::null_mut(), Ordering::Relaxed);
        }
    }
}

impl<A> AssocTable<A> {
    pub fn new(capacity: usize) -> Self {
        let slots: Box<[AtomicPtr<A>]> =
            (0..capacity).map(|_| AtomicPtr::new(ptr::null_mut())).collect();
        let arr = Box::into_raw(Box::new(AssocArray { slots }));
        Self { current: AtomicPtr::new(arr) }
    }

    /// Set slot `idx`'s association value, returning the previous one
    /// (as an owned `Box`) so the caller can defer freeing it. Only
    /// the single mutator calls this.
    pub fn set(&self, idx: usize, data: Option<A>) -> Option<Box<A>> {
        let arr = unsafe { &*self.current.load(Ordering::Acquire) };
        let new_ptr = match data {
            Some(d) => Box::into_raw(Box::new(d)),
            None => ptr::null_mut(),
        };
        let old_ptr = arr.slots[idx].swap(new_ptr, Ordering::AcqRel);
        if old_ptr.is_null() {
            None
        } else {
            Some(unsafe { Box::from_raw(old_ptr) })
        }
    }

    /// Read slot `idx` while pinned (see `epoch::Ref`), handing the
    /// borrowed value to `f` rather than returning it directly so its
    /// lifetime cannot outlive the pin.
    pub fn get_with<R>(&self, idx: usize, f: impl FnOnce(Option<&A>) -> R) -> R {
        let arr = unsafe { &*self.current.load(Ordering::Acquire) };
        let ptr = arr.slots[idx].load(Ordering::Acquire);
        f(unsafe { ptr.as_ref() })
    }

    pub fn capacity(&self) -> usize {
        unsafe { &*self.current.load(Ordering::Acquire) }.slots.len()
    }

    /// Publish a larger backing array, copying existing slot pointers
    /// across (ownership of the pointed-to values moves with them).
    /// Returns the old array for deferred reclamation.
    pub fn grow(&self, new_capacity: usize) -> RetiredAssocArray<A> {
        let old_ptr = self.current.load(Ordering::Acquire);
        let old_arr = unsafe { &*old_ptr };
        let mut new_slots = Vec::with_capacity(new_capacity);
        for i in 0..new_capacity {
            let p = if i < old_arr.slots.len() {
                old_arr.slots[i].load(Ordering::Relaxed)
            } else {
                ptr::null_mut()
            };
            new_slots.push(AtomicPtr::new(p));
        }
        let new_arr = Box::into_raw(Box::new(AssocArray { slots: new_slots.into_boxed_slice() }));
        self.current.store(new_arr, Ordering::Release);
        RetiredAssocArray { ptr: old_ptr }
    }
}

impl<A> Drop for AssocTable<A> {
    fn drop(&mut self) {
        let arr = unsafe { Box::from_raw(self.current.load(Ordering::Acquire)) };
        for slot in arr.slots.iter() {
            let p = slot.load(Ordering::Acquire);
            if !p.is_null() {
                drop(unsafe { Box::from_raw(p) });
            }
        }
    }
}

unsafe impl<A: Send> Send for AssocTable<A> {}
unsafe impl<A: Sync> Sync for AssocTable<A> {}
