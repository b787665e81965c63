// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 wireup contributors
//
// Wire record and state machine vocabulary. Port of na/wireup/wiring.c's
// wire_t, wire_id_t, wire_state_t and the wire_state[] dispatch table —
// the actual per-state handler bodies live in wiring.rs alongside the
// driver loop they're invoked from, since the original keeps state
// transitions and the loop that drives them in one file too.

use crate::tag::WIRE_ID_NIL;
use crate::timeout::TimeoutLink;

/// Process-local wire handle. `WIRE_ID_NIL` denotes "no wire" the same
/// way a negative index would in a signed scheme (see `SPEC_FULL.md`
/// section 3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WireId(pub u32);

impl WireId {
    pub const NIL: WireId = WireId(WIRE_ID_NIL);

    pub fn is_valid(&self) -> bool {
        self.0 != WIRE_ID_NIL
    }
}

/// The four lifecycle states, in `wiring.c`'s `wire_state[]` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initial,
    Live,
    Closing,
    Free,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Initial => "initial",
            State::Live => "live",
            State::Closing => "closing",
            State::Free => "free",
        }
    }
}

/// Which of the three driver events caused a transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireEvent {
    Receive,
    Wakeup,
    Expire,
}

impl WireEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WireEvent::Receive => "receive",
            WireEvent::Wakeup => "wakeup",
            WireEvent::Expire => "expire",
        }
    }
}

/// What happened to a wire, reported to its installed callback once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireLifecycleEvent {
    /// Handshake completed (INITIAL → LIVE) or a peer connected to us.
    Established,
    /// Transitioned to CLOSING.
    Closed,
    /// Storage reclaimed; the slot has returned to the free list.
    Reclaimed,
}

/// Passed to a wire's event callback.
#[derive(Debug, Clone, Copy)]
pub struct WireEventInfo {
    pub wire_id: WireId,
    pub sender_id: Option<u32>,
    pub event: WireLifecycleEvent,
}

/// A per-wire event callback. Returns `true` to keep receiving future
/// events, `false` to be cleared after this call (one-shot).
pub type WireEventCb = Box<dyn FnMut(WireEventInfo) -> bool + Send>;

/// One slot in the wire table.
///
/// `next` is reused for both the free list and a bin's closing list,
/// exactly as the original overlays `wire_t::w_next` across both
/// purposes — only one of those lists can ever own a given slot at a
/// time (see the invariant in `SPEC_FULL.md` section 3).
pub struct Wire<Ep> {
    pub state: State,
    pub endpoint: Option<Ep>,
    /// Peer-assigned local slot id, learned from ACK (originator) or
    /// carried in the REQ we answered (responder). `None` until then.
    pub sender_id: Option<u32>,
    pub expire: TimeoutLink,
    pub wakeup: TimeoutLink,
    pub next: u32,
    /// Encoded REQ retained for retry until ACKed; cleared once LIVE.
    pub pending: Option<Vec<u8>>,
    pub callback: Option<WireEventCb>,
}

impl<Ep> Wire<Ep> {
    pub fn free(self_index: u32) -> Self {
        Self {
            state: State::Free,
            endpoint: None,
            sender_id: None,
            expire: TimeoutLink::unlinked(self_index),
            wakeup: TimeoutLink::unlinked(self_index),
            next: u32::MAX,
            pending: None,
            callback: None,
        }
    }
}
