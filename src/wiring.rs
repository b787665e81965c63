// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 wireup contributors
//
// Public façade: `Wiring<T, L, A>` owns the wire table, the parallel
// association array, the garbage schedule, the request pool, and the
// expire/wakeup timeout queues, and drives the per-wire state machine
// ported from na/wireup/wiring.c (`wireup_start`, `wireup_respond`,
// `wireup_stop[_internal]`, `wireup_once[_locked]`, `wiring_teardown`).
// State transition bodies (`start_life`, `continue_life`,
// `send_keepalive`, `retry`, `destroy`) live here rather than in
// `wire.rs` for the same reason the original keeps them in `wiring.c`
// next to the loop that drives them instead of `wire.h`.

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::assoc::{AssocTable, RetiredAssocArray};
use crate::codec::{self, Message, Opcode};
use crate::epoch::{GarbageSchedule, Ref};
use crate::error::{Result, WireupError};
use crate::lock::LockBundle;
use crate::request_pool::RequestPool;
use crate::tag::{self, WIREUP_START_TAG};
use crate::timeout::{LinkStore, TimeoutLink, TimeoutQueue};
use crate::transport::{RequestHandle, RxDescriptor, RxStatus, SendOutcome, Transport};
use crate::wire::{State, WireEvent, WireEventCb, WireEventInfo, WireId, WireLifecycleEvent};
use crate::wire_table::WireTable;

/// Tunable intervals and initial sizing, the Rust analogue of the
/// original's file-scope `static const` timing constants.
#[derive(Debug, Clone, Copy)]
pub struct WiringConfig {
    /// Cadence at which a LIVE wire resends KEEPALIVE.
    pub keepalive_interval: Duration,
    /// Cadence at which an INITIAL wire resends its REQ.
    pub retry_interval: Duration,
    /// How long a wire may go without a qualifying receive before it
    /// is torn down. `None` disables expire entirely (the spec's "∞").
    pub timeout_interval: Option<Duration>,
}

impl Default for WiringConfig {
    fn default() -> Self {
        // SPEC_FULL.md section 5 states defaults for keepalive (1s) and
        // retry (250ms) but leaves timeout_interval's default to the
        // implementer ("configurable; ∞ disables expire"). Ten
        // keepalive periods of silence is chosen here as a default
        // that tears down genuinely dead peers without being trigger
        // happy about a single delayed keepalive; see DESIGN.md.
        Self {
            keepalive_interval: Duration::from_secs(1),
            retry_interval: Duration::from_millis(250),
            timeout_interval: Some(Duration::from_secs(10)),
        }
    }
}

/// Passed to an accept callback when a peer's REQ is answered.
pub struct AcceptInfo<'a, Ep> {
    pub addr: &'a [u8],
    pub wire_id: WireId,
    pub sender_id: u32,
    pub endpoint: &'a Ep,
}

/// Invoked on the responder path: returns the opaque association data
/// to store for the new wire plus an optional per-wire event callback.
pub type AcceptCb<Ep, A> =
    Box<dyn FnMut(AcceptInfo<'_, Ep>) -> (Option<A>, Option<WireEventCb>) + Send>;

/// A resource retired by a mutating operation but not yet safe to
/// free: either a whole retired association array (table growth) or
/// one association value swapped out from under a slot (a wire
/// closing). Both are freed only once the epoch they were retired
/// in has fully drained — see `finalize_epoch`.
enum Retired<A> {
    Array(RetiredAssocArray<A>),
    Value(Box<A>),
}

/// `timeout::LinkStore` view over a wire table's `expire` links.
struct ExpireLinks<'a, Ep>(&'a mut WireTable<Ep>);
impl<Ep> LinkStore for ExpireLinks<'_, Ep> {
    fn link(&mut self, idx: u32) -> &mut TimeoutLink {
        &mut self.0.wire_mut(idx).expire
    }
}

/// `timeout::LinkStore` view over a wire table's `wakeup` links.
struct WakeupLinks<'a, Ep>(&'a mut WireTable<Ep>);
impl<Ep> LinkStore for WakeupLinks<'_, Ep> {
    fn link(&mut self, idx: u32) -> &mut TimeoutLink {
        &mut self.0.wire_mut(idx).wakeup
    }
}

/// Upper bound on teardown's request-drain spin count; the original
/// polls `ucp_worker_progress` in a tight loop with no bound of its
/// own, but an embeddable library should not be able to hang a
/// caller's shutdown path forever on a transport that never completes
/// a request. Chosen generously (tens of thousands of polls) so it
/// only engages against a genuinely stuck transport.
const DESTROY_MAX_SPINS: u32 = 50_000;

/// The wireup control-plane core: establishes, maintains, and tears
/// down logical connections ("wires") over a non-blocking tagged
/// transport `T`, serialized by lock strategy `L`, carrying
/// user-supplied opaque association data `A` per wire.
pub struct Wiring<T: Transport, L: LockBundle, A> {
    transport: T,
    lock: L,
    config: WiringConfig,
    started_at: Instant,
    table: WireTable<T::Endpoint>,
    assoc: AssocTable<A>,
    garbage: GarbageSchedule,
    requests: RequestPool<T::Request>,
    expire_q: TimeoutQueue,
    wakeup_q: TimeoutQueue,
    retired: Vec<(u64, Retired<A>)>,
    accept_cb: Option<AcceptCb<T::Endpoint, A>>,
}

impl<T: Transport, L: LockBundle, A> Wiring<T, L, A> {
    pub fn new(transport: T, lock: L, config: WiringConfig) -> Self {
        Self {
            transport,
            lock,
            config,
            started_at: Instant::now(),
            table: WireTable::new(),
            assoc: AssocTable::new(crate::wire_table::INITIAL_CAPACITY),
            garbage: GarbageSchedule::new(),
            requests: RequestPool::new(),
            expire_q: TimeoutQueue::default(),
            wakeup_q: TimeoutQueue::default(),
            retired: Vec::new(),
            accept_cb: None,
        }
    }

    /// Register the responder-side accept callback (`respond`'s
    /// `accept_cb` in SPEC_FULL.md section 4.3).
    pub fn set_accept_callback(&mut self, cb: AcceptCb<T::Endpoint, A>) {
        self.accept_cb = Some(cb);
    }

    /// `(tag, mask)` such that `recv_tag & mask == tag` selects the
    /// application's channel — the low id bits remain free for the
    /// caller's own use. Wireup never inspects a tag satisfying this.
    pub fn app_tag(&self) -> (u64, u64) {
        tag::app_tag()
    }

    /// Create a new reader reference, pinned to the current epoch.
    /// Callers bracket unlocked `get_data` calls with it; one `Ref`
    /// per concurrent reading thread is the intended lifetime.
    pub fn new_ref(&self) -> Ref {
        Ref::new(&self.garbage)
    }

    /// Read a wire's associated opaque data without taking the lock.
    /// `r` must have been created by [`Wiring::new_ref`] on this same
    /// instance. Returns `None` (the spec's `NIL_DATA` sentinel) for
    /// an out-of-range id or a slot with no association value set.
    pub fn get_data<R>(&self, r: &Ref, id: WireId, f: impl FnOnce(Option<&A>) -> R) -> R {
        r.get();
        let result = if (id.0 as usize) < self.assoc.capacity() {
            self.assoc.get_with(id.0 as usize, f)
        } else {
            f(None)
        };
        r.put(&self.garbage);
        result
    }

    /// Current wire table capacity (slot count, not active-wire count).
    /// Grows in discrete doublings as `start`/`respond` need a free
    /// slot and find none.
    pub fn wire_count(&self) -> usize {
        self.table.capacity()
    }

    /// Current state of `id`, or `None` if it is out of range. A
    /// diagnostic accessor only — `get_data` is the contract readers
    /// should otherwise rely on; this exists for tests and tooling
    /// that want to observe the state machine directly.
    pub fn state_of(&self, id: WireId) -> Option<State> {
        self.table.state_of(id)
    }

    fn now_nanos(&self) -> u64 {
        self.started_at.elapsed().as_nanos() as u64
    }

    fn expire_due(&self, now: u64) -> Option<u64> {
        self.config.timeout_interval.map(|d| now + d.as_nanos() as u64)
    }

    /// Grow the association table to keep up with a wire-table growth
    /// event, retiring the old backing array through the garbage
    /// schedule's epoch bump (SPEC_FULL.md section 4.5).
    fn grow_assoc(&mut self, new_capacity: usize) {
        let epoch = self.garbage.current_epoch();
        let retired = self.assoc.grow(new_capacity);
        self.retired.push((epoch, Retired::Array(retired)));
        self.garbage.garbage_add(|epoch, closing| {
            Self::finalize_epoch(
                &mut self.table,
                &mut self.retired,
                &self.transport,
                &mut self.requests,
                epoch,
                closing,
            );
        });
    }

    /// Re-arm the expire timer for `idx`, dropping any existing
    /// enqueue first. A `None` `timeout_interval` leaves it unarmed.
    fn rearm_expire(&mut self, idx: u32, now: u64) {
        if self.table.wire(idx).expire.is_enqueued(idx) {
            let mut store = ExpireLinks(&mut self.table);
            self.expire_q.remove(&mut store, idx);
        }
        if let Some(due) = self.expire_due(now) {
            let mut store = ExpireLinks(&mut self.table);
            self.expire_q.put_monotonic(&mut store, idx, due);
        }
    }

    /// Re-arm the wakeup timer for `idx` at `now + interval`, dropping
    /// any existing enqueue first.
    fn rearm_wakeup(&mut self, idx: u32, now: u64, interval: Duration) {
        if self.table.wire(idx).wakeup.is_enqueued(idx) {
            let mut store = WakeupLinks(&mut self.table);
            self.wakeup_q.remove(&mut store, idx);
        }
        let due = now + interval.as_nanos() as u64;
        let mut store = WakeupLinks(&mut self.table);
        self.wakeup_q.put_monotonic(&mut store, idx, due);
    }

    fn unlink_timeouts(&mut self, idx: u32) {
        if self.table.wire(idx).expire.is_enqueued(idx) {
            let mut store = ExpireLinks(&mut self.table);
            self.expire_q.remove(&mut store, idx);
        }
        if self.table.wire(idx).wakeup.is_enqueued(idx) {
            let mut store = WakeupLinks(&mut self.table);
            self.wakeup_q.remove(&mut store, idx);
        }
    }

    fn fire_wire_event(table: &mut WireTable<T::Endpoint>, idx: u32, event: WireLifecycleEvent) {
        let sender_id = table.wire(idx).sender_id;
        let mut cb = table.wire_mut(idx).callback.take();
        if let Some(f) = cb.as_mut() {
            let info = WireEventInfo { wire_id: WireId(idx), sender_id, event };
            let keep = f(info);
            if keep {
                table.wire_mut(idx).callback = cb;
            }
        }
    }

    /// Transition `idx` into CLOSING: unlink both timeout queues, clear
    /// its association data (deferring the free to the current
    /// epoch's reclamation), fire the `closed` callback, and push it
    /// onto the garbage schedule's closing list for this epoch.
    /// SPEC_FULL.md section 4.4.
    fn enter_closing(&mut self, idx: u32) {
        self.unlink_timeouts(idx);
        if let Some(old) = self.assoc.set(idx as usize, None) {
            let epoch = self.garbage.current_epoch();
            self.retired.push((epoch, Retired::Value(old)));
        }
        Self::fire_wire_event(&mut self.table, idx, WireLifecycleEvent::Closed);
        self.garbage.closing_put(idx);
    }

    // -- state machine handlers (SPEC_FULL.md section 4.1) --

    /// INITIAL on receive: ACK completes the handshake, STOP tears
    /// down, anything else is dropped in place.
    fn start_life(&mut self, idx: u32, msg: Message<'_>) -> State {
        match msg.op {
            Opcode::Ack => {
                if !tag::is_valid_sender_id(msg.sender_id) {
                    warn!(target: "wireup::rx", wire = idx, "ACK carried out-of-range sender id");
                    return State::Initial;
                }
                if let Err(e) = codec::validate_no_addr(&msg) {
                    warn!(target: "wireup::rx", wire = idx, error = %e, "dropped invalid ACK");
                    return State::Initial;
                }
                let wire = self.table.wire_mut(idx);
                wire.sender_id = Some(msg.sender_id);
                wire.pending = None;
                let now = self.now_nanos();
                self.rearm_expire(idx, now);
                self.rearm_wakeup(idx, now, self.config.keepalive_interval);
                Self::fire_wire_event(&mut self.table, idx, WireLifecycleEvent::Established);
                trace!(target: "wireup::state", wire = idx, peer = msg.sender_id, "handshake established");
                State::Live
            }
            Opcode::Stop => State::Closing,
            _ => {
                trace!(target: "wireup::rx", wire = idx, op = ?msg.op, "dropped in INITIAL state");
                State::Initial
            }
        }
    }

    /// LIVE on receive: KEEPALIVE refreshes the expire timer (only if
    /// the sender id still matches the one adopted at handshake), STOP
    /// tears down, anything else is dropped in place.
    fn continue_life(&mut self, idx: u32, msg: Message<'_>) -> State {
        match msg.op {
            Opcode::Keepalive => {
                if let Err(e) = codec::validate_no_addr(&msg) {
                    warn!(target: "wireup::rx", wire = idx, error = %e, "dropped invalid keepalive");
                    return State::Live;
                }
                let adopted = self.table.wire(idx).sender_id;
                if adopted != Some(msg.sender_id) {
                    warn!(
                        target: "wireup::rx", wire = idx, expected = ?adopted, got = msg.sender_id,
                        "keepalive sender id mismatch, forcing close"
                    );
                    return State::Closing;
                }
                let now = self.now_nanos();
                self.rearm_expire(idx, now);
                State::Live
            }
            Opcode::Stop => State::Closing,
            _ => {
                trace!(target: "wireup::rx", wire = idx, op = ?msg.op, "dropped in LIVE state");
                State::Live
            }
        }
    }

    /// LIVE on wakeup: emit a KEEPALIVE and requeue at the keepalive
    /// cadence. A send failure is recovered by the next wakeup/expire,
    /// not by transitioning here.
    fn send_keepalive(&mut self, idx: u32) -> State {
        let local_slot = idx;
        let peer_id = match self.table.wire(idx).sender_id {
            Some(s) => s,
            None => return State::Live,
        };
        let mut buf = Vec::new();
        codec::encode(Opcode::Keepalive, local_slot, &[], &mut buf);
        if let Some(ep) = self.table.wire(idx).endpoint.as_ref() {
            match self.transport.send(ep, tag::wireup_tag(peer_id), &buf) {
                SendOutcome::Immediate => {}
                SendOutcome::Pending(req) => self.requests.submit(req),
                SendOutcome::Failed(e) => {
                    warn!(target: "wireup::tx", wire = idx, error = %e, "keepalive send failed");
                }
            }
        }
        let now = self.now_nanos();
        self.rearm_wakeup(idx, now, self.config.keepalive_interval);
        State::Live
    }

    /// INITIAL on wakeup: resend the stored REQ at the retry cadence,
    /// closing on an outright send failure.
    fn retry_send(&mut self, idx: u32) -> State {
        let buf = match self.table.wire(idx).pending.clone() {
            Some(b) => b,
            None => return State::Initial,
        };
        let ep = match self.table.wire(idx).endpoint.as_ref() {
            Some(ep) => ep,
            None => return State::Closing,
        };
        match self.transport.send(ep, WIREUP_START_TAG, &buf) {
            SendOutcome::Immediate => {
                let now = self.now_nanos();
                self.rearm_wakeup(idx, now, self.config.retry_interval);
                State::Initial
            }
            SendOutcome::Pending(req) => {
                self.requests.submit(req);
                let now = self.now_nanos();
                self.rearm_wakeup(idx, now, self.config.retry_interval);
                State::Initial
            }
            SendOutcome::Failed(e) => {
                warn!(target: "wireup::tx", wire = idx, error = %e, "REQ retry send failed, closing");
                State::Closing
            }
        }
    }

    /// Dispatch one of the three driver events to the state at `idx`,
    /// applying whatever transition the handler returns.
    fn dispatch_event(&mut self, idx: u32, event: WireEvent, msg: Option<Message<'_>>) {
        let old_state = match self.table.get(WireId(idx)) {
            Some(w) => w.state,
            None => return,
        };
        let new_state = match (old_state, event) {
            (State::Initial, WireEvent::Expire) | (State::Live, WireEvent::Expire) => {
                trace!(target: "wireup::timeout", wire = idx, state = old_state.name(), "expired");
                State::Closing
            }
            (State::Initial, WireEvent::Wakeup) => self.retry_send(idx),
            (State::Live, WireEvent::Wakeup) => self.send_keepalive(idx),
            (State::Initial, WireEvent::Receive) => {
                self.start_life(idx, msg.expect("receive event always carries a message"))
            }
            (State::Live, WireEvent::Receive) => {
                self.continue_life(idx, msg.expect("receive event always carries a message"))
            }
            (State::Closing, WireEvent::Receive) | (State::Free, WireEvent::Receive) => {
                trace!(target: "wireup::rx", wire = idx, state = old_state.name(), "message rejected");
                old_state
            }
            (State::Closing, _) | (State::Free, _) => old_state,
        };

        if new_state != old_state {
            debug!(
                target: "wireup::state", wire = idx,
                from = old_state.name(), to = new_state.name(), event = event.name()
            );
            self.table.wire_mut(idx).state = new_state;
            if new_state == State::Closing {
                self.enter_closing(idx);
            }
        }
    }

    // -- public API façade --

    /// Originate a wire to `raddr` (SPEC_FULL.md section 4.2). Returns
    /// the wire id on success. The returned id may be queried via
    /// `get_data` immediately, but the wire is not yet connected: it
    /// reports no association data until the handshake completes and
    /// the state becomes LIVE.
    pub fn start(
        &mut self,
        laddr: &[u8],
        raddr: &[u8],
        callback: Option<WireEventCb>,
        data: Option<A>,
    ) -> Result<WireId> {
        self.lock.debug_assert_locked();
        if laddr.len() > u16::MAX as usize {
            return Err(WireupError::ResourceExhausted("local address exceeds u16::MAX"));
        }

        let endpoint = self
            .transport
            .create_endpoint(raddr)
            .map_err(|e| WireupError::Transport(e.to_string()))?;

        let (wire_id, grown) = self.table.alloc();
        if let Some(new_cap) = grown {
            self.grow_assoc(new_cap);
        }

        let mut pending = Vec::new();
        codec::encode(Opcode::Req, wire_id.0, laddr, &mut pending);

        {
            let wire = self.table.wire_mut(wire_id.0);
            wire.state = State::Initial;
            wire.endpoint = Some(endpoint);
            wire.sender_id = None;
            wire.pending = Some(pending.clone());
            wire.callback = callback;
        }
        self.assoc.set(wire_id.0 as usize, data);

        let now = self.now_nanos();
        self.rearm_expire(wire_id.0, now);
        self.rearm_wakeup(wire_id.0, now, self.config.retry_interval);

        let ep = self.table.wire(wire_id.0).endpoint.as_ref().expect("endpoint just set above");
        match self.transport.send(ep, WIREUP_START_TAG, &pending) {
            SendOutcome::Immediate => {}
            SendOutcome::Pending(req) => self.requests.submit(req),
            SendOutcome::Failed(e) => {
                warn!(target: "wireup::tx", wire = wire_id.0, error = %e, "initial REQ send failed, will retry");
            }
        }

        debug!(target: "wireup::state", wire = wire_id.0, "originated wire, state=INITIAL");
        Ok(wire_id)
    }

    /// Answer a freshly received REQ (SPEC_FULL.md section 4.3). The
    /// new wire enters LIVE directly; an ACK carrying its slot id is
    /// sent back to the peer.
    fn respond(&mut self, peer_addr: &[u8], peer_sender_id: u32) {
        let endpoint = match self.transport.create_endpoint(peer_addr) {
            Ok(ep) => ep,
            Err(e) => {
                warn!(target: "wireup::ep", error = %e, "failed to create responder endpoint");
                return;
            }
        };

        let (wire_id, grown) = self.table.alloc();
        if let Some(new_cap) = grown {
            self.grow_assoc(new_cap);
        }

        let (data, per_wire_cb) = if let Some(accept_cb) = self.accept_cb.as_mut() {
            let info = AcceptInfo {
                addr: peer_addr,
                wire_id,
                sender_id: peer_sender_id,
                endpoint: &endpoint,
            };
            accept_cb(info)
        } else {
            (None, None)
        };

        {
            let wire = self.table.wire_mut(wire_id.0);
            wire.state = State::Live;
            wire.endpoint = Some(endpoint);
            wire.sender_id = Some(peer_sender_id);
            wire.pending = None;
            wire.callback = per_wire_cb;
        }
        self.assoc.set(wire_id.0 as usize, data);

        let now = self.now_nanos();
        self.rearm_expire(wire_id.0, now);
        self.rearm_wakeup(wire_id.0, now, self.config.keepalive_interval);
        Self::fire_wire_event(&mut self.table, wire_id.0, WireLifecycleEvent::Established);

        let mut buf = Vec::new();
        codec::encode(Opcode::Ack, wire_id.0, &[], &mut buf);
        let ep = self.table.wire(wire_id.0).endpoint.as_ref().expect("endpoint just set above");
        match self.transport.send(ep, tag::wireup_tag(peer_sender_id), &buf) {
            SendOutcome::Immediate => {}
            SendOutcome::Pending(req) => self.requests.submit(req),
            SendOutcome::Failed(e) => {
                warn!(target: "wireup::tx", wire = wire_id.0, error = %e, "ACK send failed");
            }
        }
        debug!(target: "wireup::state", wire = wire_id.0, peer = peer_sender_id, "answered REQ, state=LIVE");
    }

    /// Stop a wire (SPEC_FULL.md section 4.4). If `orderly`, best-effort
    /// notifies the peer with STOP first; a failed notification never
    /// blocks the local transition to CLOSING.
    pub fn stop(&mut self, id: WireId, orderly: bool) -> Result<()> {
        self.lock.debug_assert_locked();
        let idx = id.0;
        let state = match self.table.get(id) {
            Some(w) => w.state,
            None => return Ok(()),
        };
        if matches!(state, State::Closing | State::Free) {
            return Ok(());
        }

        if orderly {
            if let Some(peer_id) = self.table.wire(idx).sender_id {
                let mut buf = Vec::new();
                codec::encode(Opcode::Stop, idx, &[], &mut buf);
                if let Some(ep) = self.table.wire(idx).endpoint.as_ref() {
                    match self.transport.send(ep, tag::wireup_tag(peer_id), &buf) {
                        SendOutcome::Immediate => {}
                        SendOutcome::Pending(req) => self.requests.submit(req),
                        SendOutcome::Failed(e) => {
                            warn!(target: "wireup::tx", wire = idx, error = %e, "orderly STOP send failed, closing anyway");
                        }
                    }
                }
            }
        }

        debug!(target: "wireup::state", wire = idx, from = state.name(), to = "closing", "stop()");
        self.table.wire_mut(idx).state = State::Closing;
        self.enter_closing(idx);
        Ok(())
    }

    /// Free everything the garbage schedule reports as finalized for
    /// epoch `epoch`: retired association resources tagged at or
    /// before it, then each closing wire (endpoint close + FREE +
    /// return to the wire table's free list).
    fn finalize_epoch(
        table: &mut WireTable<T::Endpoint>,
        retired: &mut Vec<(u64, Retired<A>)>,
        transport: &T,
        requests: &mut RequestPool<T::Request>,
        epoch: u64,
        closing: Vec<u32>,
    ) {
        let mut i = 0;
        while i < retired.len() {
            if retired[i].0 <= epoch {
                let (_, item) = retired.remove(i);
                match item {
                    Retired::Array(arr) => arr.free(),
                    Retired::Value(_) => {}
                }
            } else {
                i += 1;
            }
        }

        for idx in closing {
            Self::fire_wire_event(table, idx, WireLifecycleEvent::Reclaimed);
            if let Some(ep) = table.wire_mut(idx).endpoint.take() {
                match transport.close_endpoint(ep) {
                    SendOutcome::Immediate => {}
                    SendOutcome::Pending(req) => requests.submit(req),
                    SendOutcome::Failed(e) => {
                        warn!(target: "wireup::ep", wire = idx, error = %e, "endpoint close failed during reclamation");
                    }
                }
            }
            table.free_put(WireId(idx));
            trace!(target: "wireup::reclaim", wire = idx, epoch, "finalized");
        }
    }

    /// Run one pass of epoch reclamation. `finalize` forces repeated
    /// passes until no further progress is made, used by `destroy`.
    fn reclaim(&mut self, finalize: bool) {
        self.garbage.reclaim(finalize, &mut |epoch, closing| {
            Self::finalize_epoch(
                &mut self.table,
                &mut self.retired,
                &self.transport,
                &mut self.requests,
                epoch,
                closing,
            );
        });
    }

    fn dispatch_receive(&mut self, sender_tag: u64, payload: &[u8]) {
        let msg = match codec::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(target: "wireup::rx", error = %e, "dropped malformed message");
                return;
            }
        };

        match msg.op {
            Opcode::Req => {
                if let Err(e) = codec::validate_req(&msg) {
                    warn!(target: "wireup::rx", error = %e, "dropped invalid REQ");
                    return;
                }
                self.respond(msg.addr, msg.sender_id);
            }
            _ => {
                // Sender id range only; STOP must still reach dispatch
                // regardless of addrlen (see codec::validate_reply).
                if let Err(e) = codec::validate_reply(&msg) {
                    warn!(target: "wireup::rx", error = %e, "dropped invalid message");
                    return;
                }
                let idx = tag::shift_out(sender_tag);
                if idx as usize >= self.table.capacity() {
                    warn!(target: "wireup::rx", wire = idx, "message addressed a wire id outside the table");
                    return;
                }
                self.dispatch_event(idx, WireEvent::Receive, Some(msg));
            }
        }
    }

    /// One pass of the driver loop (SPEC_FULL.md section 4.9): drain
    /// due wakeups then due expirations, recycle completed transport
    /// requests, run a non-finalizing reclamation pass, and dispatch
    /// one received descriptor if supplied.
    ///
    /// Returns `Ok(true)` if any wire changed state, a message was
    /// processed, or an expiration fired; `Ok(false)` if idle. A fatal
    /// receive error is returned as `Err` (the spec's `-1`): the
    /// caller must destroy this wiring afterward.
    pub fn once(&mut self, descriptor: Option<&dyn RxDescriptor>) -> Result<bool> {
        self.lock.debug_assert_locked();
        let now = self.now_nanos();
        let mut changed = false;

        loop {
            let due = {
                let mut store = WakeupLinks(&mut self.table);
                self.wakeup_q.peek_due(&mut store)
            };
            match due {
                Some(d) if d <= now => {
                    let idx = {
                        let mut store = WakeupLinks(&mut self.table);
                        self.wakeup_q.get(&mut store).expect("peek_due confirmed non-empty")
                    };
                    self.dispatch_event(idx, WireEvent::Wakeup, None);
                    changed = true;
                }
                _ => break,
            }
        }

        loop {
            let due = {
                let mut store = ExpireLinks(&mut self.table);
                self.expire_q.peek_due(&mut store)
            };
            match due {
                Some(d) if d <= now => {
                    let idx = {
                        let mut store = ExpireLinks(&mut self.table);
                        self.expire_q.get(&mut store).expect("peek_due confirmed non-empty")
                    };
                    self.dispatch_event(idx, WireEvent::Expire, None);
                    changed = true;
                }
                _ => break,
            }
        }

        if self.requests.check_status() > 0 {
            changed = true;
        }

        self.reclaim(false);

        let mut received = false;
        if let Some(desc) = descriptor {
            match desc.status() {
                RxStatus::Ok => {
                    received = true;
                    self.dispatch_receive(desc.sender_tag(), desc.payload());
                }
                RxStatus::Error => {
                    return Err(WireupError::Transport(
                        "receive descriptor reported a transport error".to_string(),
                    ));
                }
            }
        }

        Ok(changed || received)
    }

    /// Tear down this wiring (SPEC_FULL.md section 5, "Cancellation").
    /// Best-effort: STOPs every non-FREE wire if `orderly`, drains
    /// outstanding transport requests by polling progress, then forces
    /// reclamation until every bin is liberated or the spin budget is
    /// exhausted (logged as a shutdown-time leak, never a panic).
    pub fn destroy(mut self, orderly: bool) {
        self.lock.lock();
        let capacity = self.table.capacity() as u32;
        for idx in 0..capacity {
            if !matches!(self.table.wire(idx).state, State::Free) {
                let _ = self.stop(WireId(idx), orderly);
            }
        }

        let mut spins = 0u32;
        while self.requests.outstanding_count() > 0 {
            self.transport.progress();
            self.requests.check_status();
            spins += 1;
            if spins >= DESTROY_MAX_SPINS {
                warn!(target: "wireup::req", "outstanding requests did not drain before teardown deadline");
                self.requests.discard_all();
                break;
            }
        }

        self.reclaim(true);

        let leaked = (0..self.table.capacity() as u32)
            .filter(|&idx| !matches!(self.table.wire(idx).state, State::Free))
            .count();
        if leaked > 0 {
            warn!(target: "wireup::reclaim", leaked, "shutdown-time leak: wires did not fully reclaim");
        }
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::NullLock;
    use crate::transport::RequestStatus;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Debug, PartialEq, Eq)]
    struct NoRequest;
    impl RequestHandle for NoRequest {
        fn poll(&self) -> RequestStatus {
            RequestStatus::Complete
        }
    }

    /// A transport stub with one endpoint per peer address and a
    /// shared outbox so loopback tests can move bytes by hand.
    #[derive(Default)]
    struct StubTransport {
        outbox: Rc<RefCell<VecDeque<(u64, Vec<u8>)>>>,
        fail_next_send: Rc<RefCell<bool>>,
    }

    struct StubEndpoint;

    impl Transport for StubTransport {
        type Endpoint = StubEndpoint;
        type Request = NoRequest;

        fn create_endpoint(&self, _peer_addr: &[u8]) -> std::io::Result<Self::Endpoint> {
            Ok(StubEndpoint)
        }

        fn close_endpoint(&self, _ep: Self::Endpoint) -> SendOutcome<Self::Request> {
            SendOutcome::Immediate
        }

        fn send(&self, _ep: &Self::Endpoint, tag: u64, buf: &[u8]) -> SendOutcome<Self::Request> {
            if *self.fail_next_send.borrow() {
                *self.fail_next_send.borrow_mut() = false;
                return SendOutcome::Failed("injected failure".to_string());
            }
            self.outbox.borrow_mut().push_back((tag, buf.to_vec()));
            SendOutcome::Immediate
        }

        fn progress(&self) {}
    }

    struct StubDescriptor {
        tag: u64,
        buf: Vec<u8>,
    }
    impl RxDescriptor for StubDescriptor {
        fn status(&self) -> RxStatus {
            RxStatus::Ok
        }
        fn sender_tag(&self) -> u64 {
            self.tag
        }
        fn payload(&self) -> &[u8] {
            &self.buf
        }
    }

    fn new_wiring() -> Wiring<StubTransport, NullLock, u32> {
        Wiring::new(StubTransport::default(), NullLock, WiringConfig::default())
    }

    #[test]
    fn start_enqueues_initial_state_and_posts_req() {
        let mut w = new_wiring();
        let id = w.start(b"laddr", b"raddr", None, Some(7)).unwrap();
        assert_eq!(w.table.state_of(id), Some(State::Initial));
        let (tag, buf) = w.transport.outbox.borrow_mut().pop_front().unwrap();
        assert_eq!(tag, WIREUP_START_TAG);
        let msg = codec::decode(&buf).unwrap();
        assert_eq!(msg.op, Opcode::Req);
        assert_eq!(msg.sender_id, id.0);
    }

    #[test]
    fn req_then_ack_completes_handshake_on_both_sides() {
        let mut a = new_wiring();
        let mut b = new_wiring();

        let w_a = a.start(b"addr-a", b"addr-b", None, None).unwrap();
        let (_tag, req_buf) = a.transport.outbox.borrow_mut().pop_front().unwrap();

        // B receives the REQ.
        let desc = StubDescriptor { tag: WIREUP_START_TAG, buf: req_buf };
        b.once(Some(&desc)).unwrap();
        let w_b = WireId(0);
        assert_eq!(b.table.state_of(w_b), Some(State::Live));

        let (ack_tag, ack_buf) = b.transport.outbox.borrow_mut().pop_front().unwrap();
        assert_eq!(ack_tag, tag::wireup_tag(w_a.0));

        // A receives the ACK, addressed by A's own slot id (the tag
        // this wiring instance listens on for that wire).
        let desc = StubDescriptor { tag: tag::wireup_tag(w_a.0), buf: ack_buf };
        a.once(Some(&desc)).unwrap();
        assert_eq!(a.table.state_of(w_a), Some(State::Live));
        assert_eq!(a.table.wire(w_a.0).sender_id, Some(w_b.0));
    }

    #[test]
    fn mismatched_keepalive_sender_id_forces_closing() {
        let mut a = new_wiring();
        let w = a.start(b"laddr", b"raddr", None, None).unwrap();
        a.table.wire_mut(w.0).state = State::Live;
        a.table.wire_mut(w.0).sender_id = Some(3);

        let mut buf = Vec::new();
        codec::encode(Opcode::Keepalive, 99, &[], &mut buf); // wrong sender id
        let desc = StubDescriptor { tag: tag::wireup_tag(w.0), buf };
        a.once(Some(&desc)).unwrap();
        assert_eq!(a.table.state_of(w), Some(State::Closing));
    }

    #[test]
    fn stop_with_garbage_address_still_closes_the_wire() {
        // STOP must close the wire ahead of the addrlen check that
        // only gates ACK/KEEPALIVE — see codec::validate_reply.
        let mut a = new_wiring();
        let w = a.start(b"laddr", b"raddr", None, None).unwrap();
        a.table.wire_mut(w.0).state = State::Live;
        a.table.wire_mut(w.0).sender_id = Some(3);

        let mut buf = Vec::new();
        codec::encode(Opcode::Stop, 3, b"unexpected-address", &mut buf);
        let desc = StubDescriptor { tag: tag::wireup_tag(w.0), buf };
        a.once(Some(&desc)).unwrap();
        assert_eq!(a.table.state_of(w), Some(State::Closing));
    }

    #[test]
    fn wakeup_due_triggers_retry_resend() {
        let mut a = new_wiring();
        let w = a.start(b"laddr", b"raddr", None, None).unwrap();
        a.transport.outbox.borrow_mut().clear();
        // force the wakeup to be overdue
        a.table.wire_mut(w.0).wakeup.due = 0;
        a.once(None).unwrap();
        let (tag, buf) = a.transport.outbox.borrow_mut().pop_front().unwrap();
        assert_eq!(tag, WIREUP_START_TAG);
        let msg = codec::decode(&buf).unwrap();
        assert_eq!(msg.op, Opcode::Req);
        assert_eq!(a.table.state_of(w), Some(State::Initial));
    }

    #[test]
    fn expire_due_on_live_wire_closes_it() {
        let mut a = new_wiring();
        let w = a.start(b"laddr", b"raddr", None, None).unwrap();
        a.table.wire_mut(w.0).state = State::Live;
        a.table.wire_mut(w.0).expire.due = 0;
        a.once(None).unwrap();
        assert_eq!(a.table.state_of(w), Some(State::Closing));
    }

    #[test]
    fn stop_orderly_sends_stop_and_transitions_to_closing() {
        let mut a = new_wiring();
        let w = a.start(b"laddr", b"raddr", None, None).unwrap();
        a.table.wire_mut(w.0).state = State::Live;
        a.table.wire_mut(w.0).sender_id = Some(42);
        a.transport.outbox.borrow_mut().clear();

        a.stop(w, true).unwrap();
        assert_eq!(a.table.state_of(w), Some(State::Closing));
        let (tag, buf) = a.transport.outbox.borrow_mut().pop_front().unwrap();
        assert_eq!(tag, tag::wireup_tag(42));
        assert_eq!(codec::decode(&buf).unwrap().op, Opcode::Stop);
    }

    #[test]
    fn reclaim_frees_closing_wires_once_epoch_drains() {
        let mut a = new_wiring();
        let w = a.start(b"laddr", b"raddr", None, None).unwrap();
        a.stop(w, false).unwrap();
        assert_eq!(a.table.state_of(w), Some(State::Closing));
        a.reclaim(false);
        assert_eq!(a.table.state_of(w), Some(State::Free));
    }

    #[test]
    fn get_data_returns_none_for_out_of_range_id() {
        let a = new_wiring();
        let r = a.new_ref();
        a.get_data(&r, WireId(999), |v| assert!(v.is_none()));
    }

    #[test]
    fn get_data_reads_the_value_set_at_start() {
        let mut a = new_wiring();
        let w = a.start(b"laddr", b"raddr", None, Some(123)).unwrap();
        let r = a.new_ref();
        a.get_data(&r, w, |v| assert_eq!(v.copied(), Some(123)));
    }

    #[test]
    fn destroy_reclaims_every_wire_without_leaking() {
        let mut a = new_wiring();
        let w1 = a.start(b"l1", b"r1", None, None).unwrap();
        let w2 = a.start(b"l2", b"r2", None, None).unwrap();
        a.table.wire_mut(w1.0).state = State::Live;
        a.table.wire_mut(w1.0).sender_id = Some(1);
        a.table.wire_mut(w2.0).state = State::Live;
        a.table.wire_mut(w2.0).sender_id = Some(2);
        a.destroy(true);
    }

    #[test]
    fn growth_preserves_wires_and_their_association_data() {
        let mut a = new_wiring();
        let mut ids = Vec::new();
        for i in 0..8u32 {
            let id = a.start(format!("l{i}").as_bytes(), b"raddr", None, Some(i)).unwrap();
            ids.push(id);
        }
        let r = a.new_ref();
        for (i, id) in ids.iter().enumerate() {
            a.get_data(&r, *id, |v| assert_eq!(v.copied(), Some(i as u32)));
        }
    }

    #[test]
    fn send_failure_on_initial_req_leaves_wire_retryable() {
        let mut a = new_wiring();
        *a.transport.fail_next_send.borrow_mut() = true;
        let w = a.start(b"laddr", b"raddr", None, None).unwrap();
        assert_eq!(a.table.state_of(w), Some(State::Initial));
        assert!(a.transport.outbox.borrow().is_empty());
    }
}
