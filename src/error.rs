// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 wireup contributors
//
// Error taxonomy for the wire lifecycle: resource exhaustion, protocol
// violation, transport error, and send error. Internal recovery paths
// (retry on next wakeup/expire) do not surface these; only operations
// that fail outright return them.

use std::fmt;

/// Errors that can be returned directly from a public `Wiring` operation.
///
/// Most failures inside the driver loop are handled locally (the wire
/// stays in its current state and retries on the next wakeup or
/// expires) rather than propagated here — see the module-level design
/// note in `SPEC_FULL.md` section 7.
#[derive(Debug)]
pub enum WireupError {
    /// No free wire slot, no free request handle, or an allocation
    /// failed while originating or answering a wire.
    ResourceExhausted(&'static str),
    /// A received message violated the protocol: bad opcode for the
    /// current state, out-of-range sender id, truncated header,
    /// address length overruns the receive buffer, or a keepalive
    /// whose sender id does not match the one adopted at handshake.
    Protocol(&'static str),
    /// The underlying transport reported a fatal error on receive;
    /// the wiring is no longer usable and must be destroyed.
    Transport(String),
    /// A non-blocking send failed to post.
    Send(String),
}

impl fmt::Display for WireupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireupError::ResourceExhausted(what) => {
                write!(f, "resource exhausted: {what}")
            }
            WireupError::Protocol(what) => write!(f, "protocol violation: {what}"),
            WireupError::Transport(msg) => write!(f, "transport error: {msg}"),
            WireupError::Send(msg) => write!(f, "send error: {msg}"),
        }
    }
}

impl std::error::Error for WireupError {}

pub type Result<T> = std::result::Result<T, WireupError>;
