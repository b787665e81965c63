// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 wireup contributors
//
// wireup: the control-plane protocol that establishes, maintains, and
// tears down logical connections ("wires") between peers on top of an
// unreliable, connectionless, tagged message-passing transport. See
// SPEC_FULL.md for the full design; DESIGN.md for the grounding ledger.

mod assoc;
mod codec;
mod epoch;
mod error;
mod lock;
mod request_pool;
mod spin;
mod tag;
mod timeout;
mod transport;
mod wire;
mod wire_table;
mod wiring;

pub use codec::{self, Message, Opcode};
pub use epoch::Ref;
pub use error::{Result, WireupError};
pub use lock::{LockBundle, MutexLock, NullLock, SpinLockBundle};
pub use tag::{app_tag, SENDER_ID_MAX, WIREUP_START_TAG, WIRE_ID_NIL};
pub use transport::{RequestHandle, RequestStatus, RxDescriptor, RxStatus, SendOutcome, Transport};
pub use wire::{State, WireEvent, WireEventCb, WireEventInfo, WireId, WireLifecycleEvent};
pub use wiring::{AcceptCb, AcceptInfo, Wiring, WiringConfig};
