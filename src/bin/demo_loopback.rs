// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 wireup contributors
//
// Minimal two-wiring handshake over an in-process loopback transport:
// originates a wire from "alice" to "bob", drives both sides' driver
// loops by hand until the handshake completes, then tears both down
// orderly. No real transport or OS resources are involved; this is a
// smoke test for the public API shape, not a deployment example.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use wireup::{
    NullLock, RequestHandle, RequestStatus, RxDescriptor, RxStatus, SendOutcome, Transport,
    Wiring, WiringConfig,
};

type Inbox = Rc<RefCell<VecDeque<(u64, Vec<u8>)>>>;

#[derive(Default)]
struct Registry {
    inboxes: HashMap<Vec<u8>, Inbox>,
}

impl Registry {
    fn register(&mut self, addr: &[u8]) -> Inbox {
        self.inboxes.entry(addr.to_vec()).or_insert_with(|| Rc::new(RefCell::new(VecDeque::new()))).clone()
    }
}

struct NoRequest;
impl RequestHandle for NoRequest {
    fn poll(&self) -> RequestStatus {
        RequestStatus::Complete
    }
}

struct LoopbackEndpoint {
    inbox: Inbox,
}

struct LoopbackTransport {
    registry: Rc<RefCell<Registry>>,
}

impl Transport for LoopbackTransport {
    type Endpoint = LoopbackEndpoint;
    type Request = NoRequest;

    fn create_endpoint(&self, peer_addr: &[u8]) -> std::io::Result<Self::Endpoint> {
        Ok(LoopbackEndpoint { inbox: self.registry.borrow_mut().register(peer_addr) })
    }

    fn close_endpoint(&self, _ep: Self::Endpoint) -> SendOutcome<Self::Request> {
        SendOutcome::Immediate
    }

    fn send(&self, ep: &Self::Endpoint, tag: u64, buf: &[u8]) -> SendOutcome<Self::Request> {
        ep.inbox.borrow_mut().push_back((tag, buf.to_vec()));
        SendOutcome::Immediate
    }

    fn progress(&self) {}
}

struct Descriptor {
    tag: u64,
    buf: Vec<u8>,
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

fn next(inbox: &Inbox) -> Option<Descriptor> {
    inbox.borrow_mut().pop_front().map(|(tag, buf)| Descriptor { tag, buf })
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let registry = Rc::new(RefCell::new(Registry::default()));
    let alice_addr = b"alice".to_vec();
    let bob_addr = b"bob".to_vec();
    let alice_inbox = registry.borrow_mut().register(&alice_addr);
    let bob_inbox = registry.borrow_mut().register(&bob_addr);

    let mut alice: Wiring<LoopbackTransport, NullLock, ()> = Wiring::new(
        LoopbackTransport { registry: registry.clone() },
        NullLock,
        WiringConfig::default(),
    );
    let mut bob: Wiring<LoopbackTransport, NullLock, ()> =
        Wiring::new(LoopbackTransport { registry: registry.clone() }, NullLock, WiringConfig::default());

    bob.set_accept_callback(Box::new(|info| {
        println!("bob: answering REQ from sender_id={}", info.sender_id);
        (None, None)
    }));

    let wire = alice
        .start(&alice_addr, &bob_addr, Some(Box::new(|ev| {
            println!("alice: wire {:?} -> {:?}", ev.wire_id, ev.event);
            true
        })), None)
        .expect("start");

    println!("alice: originated wire {wire:?}, delivering REQ to bob");
    let req = next(&bob_inbox).expect("REQ queued");
    bob.once(Some(&req as &dyn RxDescriptor)).unwrap();

    println!("bob: answered, delivering ACK back to alice");
    let ack = next(&alice_inbox).expect("ACK queued");
    alice.once(Some(&ack as &dyn RxDescriptor)).unwrap();

    println!("alice: wire state after handshake: {:?}", alice.state_of(wire));

    alice.stop(wire, true).unwrap();
    if let Some(stop) = next(&bob_inbox) {
        bob.once(Some(&stop as &dyn RxDescriptor)).unwrap();
    }
    alice.once(None).unwrap();
    bob.once(None).unwrap();

    alice.destroy(true);
    bob.destroy(true);
    std::thread::sleep(Duration::from_millis(1));
}
