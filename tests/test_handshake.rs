// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 wireup contributors
//
// Handshake-path end-to-end scenarios (SPEC_FULL.md section 8: S1, S3,
// S6) driven over the loopback transport in `support/mod.rs`.

mod support;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use support::{corrupt_sender_id, fast_config, new_node, next_descriptor, recording_callback, LoopbackTransport, Registry};
use wireup::{NullLock, RxDescriptor, WireLifecycleEvent, Wiring, WiringConfig};

#[test]
fn s1_req_ack_handshake_establishes_both_sides() {
    let registry = Rc::new(RefCell::new(Registry::new()));
    let a_node = new_node(&registry, b"addr-a");
    let b_node = new_node(&registry, b"addr-b");
    let a_inbox = a_node.inbox.clone();
    let b_inbox = b_node.inbox.clone();

    let mut a: Wiring<LoopbackTransport, NullLock, u32> =
        Wiring::new(a_node.transport, NullLock, fast_config());
    let mut b: Wiring<LoopbackTransport, NullLock, u32> =
        Wiring::new(b_node.transport, NullLock, fast_config());

    let a_events = Arc::new(Mutex::new(Vec::new()));
    let b_events = Arc::new(Mutex::new(Vec::new()));
    b.set_accept_callback(Box::new({
        let b_events = b_events.clone();
        move |_info| (Some(0u32), Some(recording_callback(&b_events)))
    }));

    let w_a = a.start(&a_node.addr, &b_node.addr, Some(recording_callback(&a_events)), Some(7)).unwrap();

    // B's driver receives the REQ, allocates a slot, answers with ACK.
    let desc = next_descriptor(&b_inbox).expect("REQ never reached B");
    b.once(Some(&desc as &dyn RxDescriptor)).unwrap();
    assert_eq!(
        b_events.lock().unwrap().last().map(|e| e.event),
        Some(WireLifecycleEvent::Established),
        "B should establish immediately on answering a REQ"
    );
    let b_sender_id = b_events.lock().unwrap().last().unwrap().sender_id;

    // A's driver receives the ACK and transitions INITIAL -> LIVE.
    let ack = next_descriptor(&a_inbox).expect("ACK never reached A");
    a.once(Some(&ack as &dyn RxDescriptor)).unwrap();

    let established = a_events.lock().unwrap().last().copied().expect("estd callback never fired");
    assert_eq!(established.event, WireLifecycleEvent::Established);
    assert_eq!(established.wire_id, w_a);
    assert_eq!(established.sender_id, b_sender_id);

    let r = a.new_ref();
    a.get_data(&r, w_a, |v| assert_eq!(v.copied(), Some(7)));
}

#[test]
fn s3_dropped_req_is_resent_until_acked_without_duplicate_allocation() {
    let registry = Rc::new(RefCell::new(Registry::new()));
    let a_node = new_node(&registry, b"addr-a");
    let b_node = new_node(&registry, b"addr-b");
    let a_inbox = a_node.inbox.clone();
    let b_inbox = b_node.inbox.clone();
    let drop_next = a_node.transport.drop_next_send.clone();

    let mut a: Wiring<LoopbackTransport, NullLock, ()> =
        Wiring::new(a_node.transport, NullLock, fast_config());
    let mut b: Wiring<LoopbackTransport, NullLock, ()> =
        Wiring::new(b_node.transport, NullLock, fast_config());

    *drop_next.borrow_mut() = true;
    a.start(&a_node.addr, &b_node.addr, None, None).unwrap();
    assert!(next_descriptor(&b_inbox).is_none(), "first REQ should have been dropped silently");
    assert_eq!(a.wire_count(), 1);

    let mut resent = None;
    for _ in 0..100 {
        std::thread::sleep(Duration::from_millis(5));
        a.once(None).unwrap();
        resent = next_descriptor(&b_inbox);
        if resent.is_some() {
            break;
        }
    }
    let resent = resent.expect("REQ retry never arrived at B");
    b.once(Some(&resent as &dyn RxDescriptor)).unwrap();
    assert_eq!(b.wire_count(), 1, "exactly one slot allocated for the retried REQ");

    let ack = next_descriptor(&a_inbox).expect("ACK never sent back");
    a.once(Some(&ack as &dyn RxDescriptor)).unwrap();
    assert_eq!(a.wire_count(), 1, "retry must not have allocated a second originator slot");
}

#[test]
fn s6_mismatched_keepalive_sender_id_forces_closing() {
    let registry = Rc::new(RefCell::new(Registry::new()));
    let a_node = new_node(&registry, b"addr-a");
    let b_node = new_node(&registry, b"addr-b");
    let a_inbox = a_node.inbox.clone();
    let b_inbox = b_node.inbox.clone();

    let cfg = WiringConfig { keepalive_interval: Duration::from_millis(20), ..fast_config() };
    let mut a: Wiring<LoopbackTransport, NullLock, ()> = Wiring::new(a_node.transport, NullLock, cfg);
    let mut b: Wiring<LoopbackTransport, NullLock, ()> = Wiring::new(b_node.transport, NullLock, cfg);

    let a_events = Arc::new(Mutex::new(Vec::new()));
    let w_a = a.start(&a_node.addr, &b_node.addr, Some(recording_callback(&a_events)), None).unwrap();

    let req = next_descriptor(&b_inbox).unwrap();
    b.once(Some(&req as &dyn RxDescriptor)).unwrap();
    let ack = next_descriptor(&a_inbox).unwrap();
    a.once(Some(&ack as &dyn RxDescriptor)).unwrap();
    assert_eq!(a_events.lock().unwrap().last().map(|e| e.event), Some(WireLifecycleEvent::Established));

    // Wait for B's keepalive wakeup, then corrupt the sender id it
    // advertised before A ever sees it.
    let mut tampered = false;
    for _ in 0..100 {
        std::thread::sleep(Duration::from_millis(5));
        b.once(None).unwrap();
        if !a_inbox.borrow().is_empty() {
            corrupt_sender_id(&a_inbox, 0xDEAD_u32);
            tampered = true;
            break;
        }
    }
    assert!(tampered, "B never sent a keepalive to tamper with");

    let bad_keepalive = next_descriptor(&a_inbox).unwrap();
    a.once(Some(&bad_keepalive as &dyn RxDescriptor)).unwrap();

    let last = a_events.lock().unwrap().last().copied().expect("closed callback never fired");
    assert_eq!(last.event, WireLifecycleEvent::Closed);
    assert_eq!(last.wire_id, w_a);
}
