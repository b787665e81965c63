// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 wireup contributors
//
// Adaptive backoff for CAS retry loops: busy spin, then a pause hint,
// then a thread yield, then a short sleep. Shared by the epoch
// reclamation scheduler's reference-stack and bin-migration CAS loops.

/// Advance a retry counter and back off accordingly.
///
/// - `k < 4`:  busy spin (do nothing)
/// - `k < 16`: CPU pause hint
/// - `k < 32`: thread yield
/// - `k >= 32`: sleep 1ms
#[inline]
pub(crate) fn adaptive_yield(k: &mut u32) {
    if *k < 4 {
        // busy spin
    } else if *k < 16 {
        std::hint::spin_loop();
    } else if *k < 32 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(std::time::Duration::from_millis(1));
        return;
    }
    *k += 1;
}
