// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 wireup contributors
//
// Interactive two-peer demo over the loopback transport: "alice" and
// "bob" establish a wire, then both sides' driver loops are ticked
// once per command while the main thread reads from stdin. Type "s"
// to print the wire's current state, "q" to stop it orderly and quit.
//
// Unlike the teacher's chat demo, there is no payload channel here —
// wireup is control-plane only (SPEC_FULL.md section 1's "out of
// scope" list). What this demo actually shows is the same thing a
// production embedder would watch: handshake, keepalive cadence, and
// orderly teardown, observed through wire lifecycle callbacks.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::{self, BufRead, Write};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
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

/// Drain mail between alice and bob until neither side has anything
/// left to process, ticking both driver loops on every pass.
fn pump(
    alice: &mut Wiring<LoopbackTransport, NullLock, ()>,
    bob: &mut Wiring<LoopbackTransport, NullLock, ()>,
    alice_inbox: &Inbox,
    bob_inbox: &Inbox,
) {
    loop {
        let mut progressed = false;
        if let Some(desc) = next(bob_inbox) {
            bob.once(Some(&desc as &dyn RxDescriptor)).unwrap();
            progressed = true;
        } else {
            bob.once(None).unwrap();
        }
        if let Some(desc) = next(alice_inbox) {
            alice.once(Some(&desc as &dyn RxDescriptor)).unwrap();
            progressed = true;
        } else {
            alice.once(None).unwrap();
        }
        if !progressed {
            break;
        }
    }
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let registry = Rc::new(RefCell::new(Registry::default()));
    let alice_addr = b"alice".to_vec();
    let bob_addr = b"bob".to_vec();
    let alice_inbox = registry.borrow_mut().register(&alice_addr);
    let bob_inbox = registry.borrow_mut().register(&bob_addr);

    let cfg = WiringConfig {
        keepalive_interval: Duration::from_millis(500),
        retry_interval: Duration::from_millis(200),
        timeout_interval: Some(Duration::from_secs(5)),
    };

    let mut alice: Wiring<LoopbackTransport, NullLock, ()> =
        Wiring::new(LoopbackTransport { registry: registry.clone() }, NullLock, cfg);
    let mut bob: Wiring<LoopbackTransport, NullLock, ()> =
        Wiring::new(LoopbackTransport { registry: registry.clone() }, NullLock, cfg);

    let events = Arc::new(Mutex::new(Vec::new()));
    bob.set_accept_callback(Box::new({
        let events = events.clone();
        move |info| {
            let sender_id = info.sender_id;
            let events = events.clone();
            let cb: wireup::WireEventCb = Box::new(move |ev: wireup::WireEventInfo| {
                events.lock().unwrap().push(format!("bob: peer {sender_id} -> {:?}", ev.event));
                true
            });
            (None, Some(cb))
        }
    }));

    let wire = alice
        .start(
            &alice_addr,
            &bob_addr,
            Some(Box::new({
                let events = events.clone();
                move |ev| {
                    events.lock().unwrap().push(format!("alice: {:?}", ev.event));
                    true
                }
            })),
            None,
        )
        .expect("start");

    println!("alice dialed bob (wire {wire:?}). Commands: 's' = status, 'q' = quit.");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        pump(&mut alice, &mut bob, &alice_inbox, &bob_inbox);
        for line in events.lock().unwrap().drain(..) {
            println!("{line}");
        }

        print!("> ");
        io::stdout().flush().ok();
        let Some(Ok(cmd)) = lines.next() else { break };
        match cmd.trim() {
            "q" => {
                alice.stop(wire, true).unwrap();
                break;
            }
            "s" => println!("alice: wire {:?} is {:?}", wire, alice.state_of(wire)),
            "" => {}
            other => println!("unknown command: {other}"),
        }
    }

    // Flush the orderly STOP and let both sides reclaim before exit.
    for _ in 0..5 {
        pump(&mut alice, &mut bob, &alice_inbox, &bob_inbox);
    }
    alice.destroy(true);
    bob.destroy(true);

    println!("bye");
}
