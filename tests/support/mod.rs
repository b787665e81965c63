// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 wireup contributors
//
// In-process loopback `Transport` used by the integration suite
// (SPEC_FULL.md section 8: "two independent `Wiring` instances
// exchanging encoded messages through a pair of `VecDeque` mailboxes").
// Addresses are arbitrary byte strings naming a peer's inbox in a
// shared registry; `create_endpoint` looks one up (inserting an empty
// one if the peer hasn't registered yet), so either side may dial the
// other first.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use wireup::{RequestHandle, RequestStatus, RxDescriptor, RxStatus, SendOutcome, Transport, WireEventCb, WireEventInfo, WiringConfig};

pub type Packet = (u64, Vec<u8>);
pub type Inbox = Rc<RefCell<VecDeque<Packet>>>;

#[derive(Default)]
pub struct Registry {
    inboxes: HashMap<Vec<u8>, Inbox>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&mut self, addr: &[u8]) -> Inbox {
        self.inboxes.entry(addr.to_vec()).or_insert_with(|| Rc::new(RefCell::new(VecDeque::new()))).clone()
    }
}

/// Every loopback send completes synchronously; this only exists to
/// satisfy `Transport::Request`.
pub struct ImmediateRequest;

impl RequestHandle for ImmediateRequest {
    fn poll(&self) -> RequestStatus {
        RequestStatus::Complete
    }
}

pub struct LoopbackTransport {
    registry: Rc<RefCell<Registry>>,
    /// When set, the next `send` is dropped on the floor instead of
    /// delivered — used to model a lost REQ (S3) without touching the
    /// wire state machine directly.
    pub drop_next_send: Rc<RefCell<bool>>,
}

impl LoopbackTransport {
    pub fn new(registry: Rc<RefCell<Registry>>) -> Self {
        Self { registry, drop_next_send: Rc::new(RefCell::new(false)) }
    }
}

pub struct LoopbackEndpoint {
    inbox: Inbox,
}

impl Transport for LoopbackTransport {
    type Endpoint = LoopbackEndpoint;
    type Request = ImmediateRequest;

    fn create_endpoint(&self, peer_addr: &[u8]) -> std::io::Result<Self::Endpoint> {
        let inbox = self.registry.borrow_mut().register(peer_addr);
        Ok(LoopbackEndpoint { inbox })
    }

    fn close_endpoint(&self, _ep: Self::Endpoint) -> SendOutcome<Self::Request> {
        SendOutcome::Immediate
    }

    fn send(&self, ep: &Self::Endpoint, tag: u64, buf: &[u8]) -> SendOutcome<Self::Request> {
        if *self.drop_next_send.borrow() {
            *self.drop_next_send.borrow_mut() = false;
            return SendOutcome::Immediate;
        }
        ep.inbox.borrow_mut().push_back((tag, buf.to_vec()));
        SendOutcome::Immediate
    }

    fn progress(&self) {}
}

pub struct Descriptor {
    pub tag: u64,
    pub buf: Vec<u8>,
}

impl RxDescriptor for Descriptor {
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

/// A node's own address and the inbox it receives on, obtained up
/// front (before the transport is handed to `Wiring::new`, which takes
/// ownership of it) so the test driver can keep polling it.
pub struct Node {
    pub addr: Vec<u8>,
    pub inbox: Inbox,
    pub transport: LoopbackTransport,
}

pub fn new_node(registry: &Rc<RefCell<Registry>>, addr: &[u8]) -> Node {
    let inbox = registry.borrow_mut().register(addr);
    Node { addr: addr.to_vec(), inbox, transport: LoopbackTransport::new(registry.clone()) }
}

/// Pop the oldest queued packet addressed to this node, if any, as a
/// ready-to-dispatch descriptor.
pub fn next_descriptor(inbox: &Inbox) -> Option<Descriptor> {
    inbox.borrow_mut().pop_front().map(|(tag, buf)| Descriptor { tag, buf })
}

/// Corrupt the sender id embedded in a queued packet's header (bytes
/// 4..8, big-endian `u32`) without touching anything else — used to
/// simulate a peer advertising a mismatched sender id (S6) without
/// reaching into the codec from the test itself.
pub fn corrupt_sender_id(inbox: &Inbox, new_sender_id: u32) {
    let mut inbox = inbox.borrow_mut();
    if let Some((_, buf)) = inbox.front_mut() {
        buf[4..8].copy_from_slice(&new_sender_id.to_be_bytes());
    }
}

/// Config with short, test-friendly cadences; callers override whatever
/// field the scenario under test cares about.
pub fn fast_config() -> WiringConfig {
    WiringConfig {
        keepalive_interval: std::time::Duration::from_millis(100),
        retry_interval: std::time::Duration::from_millis(20),
        timeout_interval: Some(std::time::Duration::from_secs(10)),
    }
}

/// `WireEventCb`/`AcceptCb` both require `Send`, so a test's event log
/// must be `Arc<Mutex<_>>` rather than the `Rc<RefCell<_>>` used
/// elsewhere in these single-threaded tests.
pub fn recording_callback(log: &Arc<Mutex<Vec<WireEventInfo>>>) -> WireEventCb {
    let log = log.clone();
    Box::new(move |info: WireEventInfo| {
        log.lock().unwrap().push(info);
        true
    })
}
