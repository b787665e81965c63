// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 wireup contributors
//
// RCU-like epoch reclamation. Port of na/wireup/wiring.c's
// wiring_garbage_init, wiring_ref_init, wiring_ref_holds_epoch,
// wiring_reclaim_bin_for_epoch and wiring_reclaim. A fixed-size ring
// of garbage bins, each holding a lock-free stack of reader references
// plus (owned by the single mutator, so no atomics needed there) a
// closing-wire list and at most one retired table + association array.
//
// Readers attach to the bin for the *current* epoch without taking the
// wiring lock (`Ref::new`/`ref_get`/`ref_put`); only the mutator thread
// ever advances the epoch window or reclaims a bin, under the wiring
// lock. The lock-free stack's CAS retry loop reuses the adaptive
// backoff from `spin.rs`, the same helper the teacher crate's
// `SpinLock` is built on.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};

use crate::spin::adaptive_yield;

/// Number of bins in the garbage ring. `last - first` never exceeds
/// this; `garbage_add` forces a synchronous reclaim if it would.
pub const BIN_COUNT: usize = 4;

/// Sentinel stack-head value marking a bin that has already been
/// reclaimed for its epoch: any reader mid-attach that observes this
/// must retry against the (by then advanced) current epoch.
fn reclaimed_sentinel<T>() -> *mut T {
    usize::MAX as *mut T
}

struct RefNode {
    next: AtomicPtr<RefNode>,
    busy: AtomicBool,
    epoch: AtomicU64,
}

/// A long-lived reader handle pinning epochs as it goes. One per
/// concurrent unlocked reader (e.g. one per thread calling
/// `Wiring::get_data`), created once and reused for the reader's whole
/// lifetime via `get`/`put` brackets around each access.
pub struct Ref {
    node: *mut RefNode,
}

// Safety: `node` is heap-allocated once and only ever touched through
// atomic operations on its fields, or exclusively by the single
// mutator thread during reclaim/teardown.
unsafe impl Send for Ref {}
unsafe impl Sync for Ref {}

struct Bin {
    stack: AtomicPtr<RefNode>,
    closing: Vec<u32>,
}

impl Default for Bin {
    fn default() -> Self {
        Self { stack: AtomicPtr::new(ptr::null_mut()), closing: Vec::new() }
    }
}

/// The garbage ring plus its epoch window. Owned by a `Wiring`;
/// mutating methods require the wiring lock (the lock-free reader
/// attach path is the one exception).
pub struct GarbageSchedule {
    bins: [Bin; BIN_COUNT],
    first: u64,
    last: AtomicU64,
}

impl Default for GarbageSchedule {
    fn default() -> Self {
        Self { bins: std::array::from_fn(|_| Bin::default()), first: 0, last: AtomicU64::new(0) }
    }
}

impl GarbageSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    fn bin(&self, epoch: u64) -> &Bin {
        &self.bins[(epoch as usize) % BIN_COUNT]
    }

    pub fn current_epoch(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }

    /// Attach `r` to the current epoch's bin via a lock-free CAS push.
    /// Retries with the (by-then newer) current epoch if it observes
    /// the bin it targeted has already been reclaimed in the interim.
    pub fn ref_attach(&self, r: &Ref) {
        let mut k = 0u32;
        loop {
            let epoch = self.current_epoch();
            let bin = self.bin(epoch);
            let head = bin.stack.load(Ordering::Acquire);
            if head == reclaimed_sentinel() {
                adaptive_yield(&mut k);
                continue;
            }
            unsafe {
                (*r.node).next.store(head, Ordering::Relaxed);
                (*r.node).epoch.store(epoch, Ordering::Relaxed);
            }
            if bin
                .stack
                .compare_exchange_weak(head, r.node, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
            adaptive_yield(&mut k);
        }
    }

    /// Retire `table` and `assoc` into the current epoch's bin and
    /// advance the epoch. Forces a synchronous, non-finalizing reclaim
    /// first if the ring is already full.
    /// Close out the current epoch and open the next one. Blocks,
    /// forcing synchronous reclamation passes, if the ring is already
    /// at capacity (`last - first == BIN_COUNT - 1`): opening another
    /// epoch without first freeing one would alias two live epochs
    /// onto the same physical bin via the modulo index.
    pub fn garbage_add<F>(&mut self, mut reclaim_ready: F)
    where
        F: FnMut(u64, Vec<u32>),
    {
        while self.last.load(Ordering::Acquire) - self.first >= (BIN_COUNT - 1) as u64 {
            if !self.reclaim_step(&mut reclaim_ready) {
                std::thread::yield_now();
            }
        }
        self.last.fetch_add(1, Ordering::AcqRel);
    }

    /// Push a wire id onto the closing list for the current epoch.
    /// Only the single mutator calls this, under the wiring lock.
    pub fn closing_put(&mut self, wire_id: u32) {
        let epoch = self.current_epoch();
        let idx = (epoch as usize) % BIN_COUNT;
        self.bins[idx].closing.push(wire_id);
    }

    fn bin_holds_epoch(bin: &Bin, epoch: u64) -> bool {
        let mut cur = bin.stack.load(Ordering::Acquire);
        while !cur.is_null() && cur != reclaimed_sentinel() {
            let node = unsafe { &*cur };
            if node.busy.load(Ordering::Acquire) && node.epoch.load(Ordering::Acquire) <= epoch {
                return true;
            }
            cur = node.next.load(Ordering::Acquire);
        }
        false
    }

    /// Migrate every reference currently parked in `from` onto `to`,
    /// cutting `from` off (marking it reclaimed) in the same swap so
    /// any racing attach that targeted `from` is forced to retry
    /// against the newer epoch instead.
    fn migrate(from: &Bin, to: &Bin) {
        let mut head = from.stack.swap(reclaimed_sentinel(), Ordering::AcqRel);
        while !head.is_null() && head != reclaimed_sentinel() {
            let node = unsafe { &*head };
            let next = node.next.load(Ordering::Acquire);
            let mut k = 0u32;
            loop {
                let to_head = to.stack.load(Ordering::Acquire);
                if to_head == reclaimed_sentinel() {
                    // `to` cannot be reclaimed while we are actively
                    // migrating into it: it is always the newest bin.
                    unreachable!("destination bin reclaimed during migration");
                }
                node.next.store(to_head, Ordering::Relaxed);
                if to.stack.compare_exchange_weak(to_head, head, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                    break;
                }
                adaptive_yield(&mut k);
            }
            head = next;
        }
    }

    /// Reclaim exactly the epoch at `first`, if it is not pinned by
    /// any reference. Returns whether it advanced.
    fn reclaim_step<F>(&mut self, on_finalize: &mut F) -> bool
    where
        F: FnMut(u64, Vec<u32>),
    {
        if self.first >= self.current_epoch() {
            return false;
        }
        let epoch = self.first;
        let bin_idx = epoch as usize % BIN_COUNT;
        if Self::bin_holds_epoch(&self.bins[bin_idx], epoch) {
            return false;
        }
        let next_idx = self.current_epoch() as usize % BIN_COUNT;
        if bin_idx != next_idx {
            let (lo, hi) = if bin_idx < next_idx { (bin_idx, next_idx) } else { (next_idx, bin_idx) };
            let (left, right) = self.bins.split_at_mut(hi);
            let (from, to) = if bin_idx < next_idx { (&left[lo], &right[0]) } else { (&right[0], &left[lo]) };
            Self::migrate(from, to);
        } else {
            // garbage_add's cap keeps first/last within BIN_COUNT - 1
            // of each other, so this never aliases in practice; kept
            // as a defensive fallback rather than an invariant panic.
            self.bins[bin_idx].stack.store(ptr::null_mut(), Ordering::Release);
        }
        let closing = std::mem::take(&mut self.bins[bin_idx].closing);
        on_finalize(epoch, closing);
        self.first += 1;
        true
    }

    /// Collapse the still-open current epoch in place, flushing its
    /// closing list if nothing pins it, without advancing `first`
    /// (there is no next epoch to hand live references off to). Ports
    /// wiring_reclaim's finalize-only trailing call to
    /// wiring_reclaim_bin_for_epoch(wiring, epoch, epoch, progressp),
    /// reached only once the ordinary [first, last) sweep has fully
    /// drained. Only called from teardown, where no further epoch will
    /// ever open, so unlike `reclaim_step` this never needs to mark the
    /// bin reclaimed for future attachers.
    fn reclaim_open_epoch<F>(&mut self, on_finalize: &mut F) -> bool
    where
        F: FnMut(u64, Vec<u32>),
    {
        let epoch = self.first;
        let bin_idx = epoch as usize % BIN_COUNT;
        if Self::bin_holds_epoch(&self.bins[bin_idx], epoch) {
            return false;
        }
        let closing = std::mem::take(&mut self.bins[bin_idx].closing);
        if closing.is_empty() {
            return false;
        }
        on_finalize(epoch, closing);
        true
    }

    /// Attempt to advance `first` forward through fully-drained
    /// epochs. Stops at the first epoch that is still pinned, unless
    /// `finalize` is set, in which case it keeps retrying the whole
    /// window once more after a pass makes no progress, then collapses
    /// the still-open current epoch too (used by teardown to flush
    /// wires closed since the last epoch bump).
    pub fn reclaim<F>(&mut self, finalize: bool, on_finalize: &mut F)
    where
        F: FnMut(u64, Vec<u32>),
    {
        loop {
            let mut progressed = false;
            while self.reclaim_step(on_finalize) {
                progressed = true;
            }
            if !finalize || !progressed {
                break;
            }
        }
        if finalize && self.first == self.current_epoch() {
            self.reclaim_open_epoch(on_finalize);
        }
    }
}

impl Ref {
    /// Create a reference and attach it to the current epoch.
    pub fn new(schedule: &GarbageSchedule) -> Self {
        let node = Box::into_raw(Box::new(RefNode {
            next: AtomicPtr::new(ptr::null_mut()),
            busy: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        }));
        let r = Ref { node };
        schedule.ref_attach(&r);
        r
    }

    /// Begin an unlocked critical section: the storage this reference
    /// can reach (at the epoch it is currently parked at) is
    /// guaranteed not to be reclaimed until the matching `put`.
    pub fn get(&self) {
        unsafe {
            (*self.node).busy.store(true, Ordering::Release);
        }
    }

    /// End the critical section begun by `get`, publishing the current
    /// epoch so a later reclaim does not consider this reference as
    /// still pinning whatever epoch it attached at.
    pub fn put(&self, schedule: &GarbageSchedule) {
        unsafe {
            (*self.node).epoch.store(schedule.current_epoch(), Ordering::Release);
            (*self.node).busy.store(false, Ordering::Release);
        }
    }
}

impl Drop for GarbageSchedule {
    fn drop(&mut self) {
        for bin in &self.bins {
            let mut cur = bin.stack.swap(ptr::null_mut(), Ordering::AcqRel);
            while !cur.is_null() && cur != reclaimed_sentinel() {
                let node = unsafe { Box::from_raw(cur) };
                cur = node.next.load(Ordering::Acquire);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reclaim_is_a_noop_with_no_garbage() {
        let mut sched = GarbageSchedule::new();
        let mut finalized = Vec::new();
        sched.reclaim(false, &mut |epoch, closing| finalized.push((epoch, closing)));
        assert!(finalized.is_empty());
    }

    #[test]
    fn a_pinned_reference_blocks_reclamation_of_its_epoch() {
        let mut sched = GarbageSchedule::new();
        let r = Ref::new(&sched);
        r.get(); // pin epoch 0

        sched.closing_put(5);
        sched.garbage_add(|_, _| {});

        let mut finalized = Vec::new();
        sched.reclaim(false, &mut |epoch, closing| finalized.push((epoch, closing)));
        assert!(finalized.is_empty(), "pinned reference must block reclaim");

        r.put(&sched); // release the pin
        sched.reclaim(false, &mut |epoch, closing| finalized.push((epoch, closing)));
        assert_eq!(finalized, vec![(0, vec![5])]);
    }

    #[test]
    fn an_idle_reference_does_not_block_reclamation() {
        let mut sched = GarbageSchedule::new();
        let r = Ref::new(&sched);
        // never call get(): reference exists but is not in a critical section
        sched.closing_put(9);
        sched.garbage_add(|_, _| {});

        let mut finalized = Vec::new();
        sched.reclaim(false, &mut |epoch, closing| finalized.push((epoch, closing)));
        assert_eq!(finalized, vec![(0, vec![9])]);
        drop(r);
    }

    #[test]
    fn multiple_epochs_reclaim_in_order() {
        let mut sched = GarbageSchedule::new();
        sched.closing_put(1);
        sched.garbage_add(|_, _| {});
        sched.closing_put(2);
        sched.garbage_add(|_, _| {});

        let mut finalized = Vec::new();
        sched.reclaim(false, &mut |epoch, closing| finalized.push((epoch, closing)));
        assert_eq!(finalized, vec![(0, vec![1]), (1, vec![2])]);
    }
}
