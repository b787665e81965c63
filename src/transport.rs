// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 wireup contributors
//
// External collaborator interfaces (SPEC_FULL.md section 6). wires.c
// hard-codes these against UCX (ucp_worker_h, ucp_ep_h, rxdesc_t); here
// they are traits so a `Wiring` can be driven by any non-blocking
// tagged-message transport, including an in-process loopback used by
// the test suite and demo binaries.

/// Outcome of a non-blocking tagged send.
pub enum SendOutcome<R> {
    /// The send completed synchronously; no request to track.
    Immediate,
    /// The send is in flight; poll the returned handle for completion.
    Pending(R),
    /// The send failed to post at all.
    Failed(String),
}

/// Completion state of an in-flight transport operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    InProgress,
    Complete,
    Failed,
}

/// An opaque handle to one in-flight asynchronous transport operation.
pub trait RequestHandle {
    fn poll(&self) -> RequestStatus;
}

/// Non-blocking tagged-message transport, the one external dependency
/// the wire state machine and driver loop are written against.
pub trait Transport {
    /// A created connection to a peer address.
    type Endpoint;
    /// A handle to one in-flight asynchronous operation.
    type Request: RequestHandle;

    /// Create an endpoint addressed at `peer_addr` (an opaque,
    /// transport-specific byte string, e.g. a UCX worker address).
    fn create_endpoint(&self, peer_addr: &[u8]) -> std::io::Result<Self::Endpoint>;

    /// Close a previously created endpoint. May complete
    /// asynchronously, in which case the returned request is tracked
    /// the same way a send's request is.
    fn close_endpoint(&self, ep: Self::Endpoint) -> SendOutcome<Self::Request>;

    /// Post a non-blocking tagged send of `buf` to `ep`.
    fn send(&self, ep: &Self::Endpoint, tag: u64, buf: &[u8]) -> SendOutcome<Self::Request>;

    /// Drive the underlying transport's own progress engine. Called
    /// once per driver-loop iteration by the embedding application,
    /// not by `Wiring` itself (the original leaves `ucp_worker_progress`
    /// to its caller's event loop too).
    fn progress(&self);
}

/// Status of one received descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxStatus {
    Ok,
    Error,
}

/// A single received, tagged message, handed to `Wiring::once` by
/// whatever polls the embedder's receive-buffer pool. That pool
/// (`RxPool` in SPEC_FULL.md section 6) is named there as an external
/// collaborator interface-only, like the transport worker itself —
/// this crate drives neither, it only consumes the descriptor each
/// poll yields.
pub trait RxDescriptor {
    fn status(&self) -> RxStatus;
    fn sender_tag(&self) -> u64;
    fn payload(&self) -> &[u8];
}
