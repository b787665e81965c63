// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 wireup contributors
//
// Wire message format (SPEC_FULL.md section 4.6) and the receive-side
// validation rules ported from na/wireup/wiring.c's wireup_rx_msg and
// wireup_rx_req: header-length check, opcode whitelist, addrlen
// overrun check, and the req-specific empty-address /
// oversized-sender-id rejections.

use crate::error::WireupError;
use crate::tag::is_valid_sender_id;

/// Fixed header size in bytes: op(2) + addrlen(2) + sender_id(4).
pub const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Req = 1,
    Ack = 2,
    Keepalive = 3,
    Stop = 4,
}

impl Opcode {
    fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(Opcode::Req),
            2 => Some(Opcode::Ack),
            3 => Some(Opcode::Keepalive),
            4 => Some(Opcode::Stop),
            _ => None,
        }
    }
}

/// A decoded wireup message. `addr` borrows from the buffer it was
/// decoded out of.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    pub op: Opcode,
    pub sender_id: u32,
    pub addr: &'a [u8],
}

/// Encode a message into `out`, appending rather than truncating.
pub fn encode(op: Opcode, sender_id: u32, addr: &[u8], out: &mut Vec<u8>) {
    debug_assert!(addr.len() <= u16::MAX as usize);
    out.extend_from_slice(&(op as u16).to_be_bytes());
    out.extend_from_slice(&(addr.len() as u16).to_be_bytes());
    out.extend_from_slice(&sender_id.to_be_bytes());
    out.extend_from_slice(addr);
}

/// Decode and validate a raw wireup message.
///
/// Rejects messages shorter than the fixed header, messages whose
/// declared `addrlen` would overrun the buffer, and unknown opcodes.
/// Does not enforce the opcode-specific rules (e.g. REQ requiring a
/// non-empty address) — callers apply those once they know which
/// state is dispatching the message, per `wireup_rx_req` vs
/// `wireup_rx_msg`.
pub fn decode(buf: &[u8]) -> Result<Message<'_>, WireupError> {
    if buf.len() < HEADER_LEN {
        return Err(WireupError::Protocol("message shorter than fixed header"));
    }
    let op = u16::from_be_bytes([buf[0], buf[1]]);
    let addrlen = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let sender_id = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

    let op = Opcode::from_u16(op).ok_or(WireupError::Protocol("unknown opcode"))?;

    if HEADER_LEN + addrlen > buf.len() {
        return Err(WireupError::Protocol("addrlen overruns received buffer"));
    }

    Ok(Message { op, sender_id, addr: &buf[HEADER_LEN..HEADER_LEN + addrlen] })
}

/// Additional validation applied to a freshly received REQ: the
/// address must be non-empty and the originator's advertised sender
/// id must be in range. Mirrors `wireup_rx_req`'s drop conditions.
pub fn validate_req(msg: &Message<'_>) -> Result<(), WireupError> {
    if msg.addr.is_empty() {
        return Err(WireupError::Protocol("REQ carried an empty address"));
    }
    if !is_valid_sender_id(msg.sender_id) {
        return Err(WireupError::Protocol("REQ sender id out of range"));
    }
    Ok(())
}

/// Validation applied to every non-REQ message before dispatch: the
/// sender id must be in range. Mirrors `wireup_rx_msg`'s leading
/// `msg->sender_id >= SENDER_ID_MAX` guard, which runs for ACK,
/// KEEPALIVE and STOP alike, *before* either handler looks at the
/// opcode. Unlike that guard, this does not reject on `addrlen`: in
/// `start_life`/`continue_life`, `OP_STOP` unconditionally closes the
/// wire ahead of the `addrlen != 0` check, so a STOP carrying a
/// nonzero (or garbage) addrlen must still reach dispatch instead of
/// being dropped here. The empty-address rule is therefore enforced
/// separately, only for ACK/KEEPALIVE, by `validate_no_addr`.
pub fn validate_reply(msg: &Message<'_>) -> Result<(), WireupError> {
    if !is_valid_sender_id(msg.sender_id) {
        return Err(WireupError::Protocol("sender id out of range"));
    }
    Ok(())
}

/// Additional check for ACK/KEEPALIVE, applied by `start_life`/
/// `continue_life` once the opcode is known to require an empty
/// address — STOP never calls this. Mirrors the `addrlen != 0` gate
/// in `wiring.c`'s `start_life`/`continue_life`, reached only after
/// their `OP_STOP` branch has already returned.
pub fn validate_no_addr(msg: &Message<'_>) -> Result<(), WireupError> {
    if !msg.addr.is_empty() {
        return Err(WireupError::Protocol("message carried an unexpected address"));
    }
    Ok(())
}
