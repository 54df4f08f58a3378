//! Link-layer envelope.
//!
//! Every on-air byte frame starts with a 16-byte envelope naming the
//! transmitting station and, for unicasts, the intended next hop; then
//! the packet bytes follow. The mesh layer needs the previous hop to
//! install reverse routes, and on a broadcast medium a unicast is only a
//! broadcast with a name on it, so the link supplies both. The packet
//! header itself carries no addresses (addressing lives in the mesh
//! payloads).
//!
//! Layout:
//! `[sender_len: u8][sender: 6][recipient_len: u8][recipient: 6][reserved: 2]`
//! with `recipient_len == 0` meaning broadcast.

use crate::{
    Callsign, MAX_CALLSIGN_LEN, Packet,
    errors::{ProtocolError, Result},
};

/// Envelope length preceding the packet bytes.
pub const LINK_HEADER_LEN: usize = 16;

/// A decoded link frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    /// Transmitting station.
    pub sender: Callsign,
    /// Intended next hop; `None` for broadcasts.
    pub recipient: Option<Callsign>,
    /// The carried packet.
    pub packet: Packet,
}

fn put_callsign(out: &mut Vec<u8>, callsign: Option<Callsign>) {
    match callsign {
        Some(callsign) => {
            out.push(callsign.len() as u8);
            let mut name = [0u8; MAX_CALLSIGN_LEN];
            name[..callsign.len()].copy_from_slice(callsign.as_str().as_bytes());
            out.extend_from_slice(&name);
        },
        None => {
            out.push(0);
            out.extend_from_slice(&[0u8; MAX_CALLSIGN_LEN]);
        },
    }
}

fn take_callsign(frame: &[u8], offset: usize) -> Result<Option<Callsign>> {
    let len = usize::from(frame[offset]);
    if len == 0 {
        return Ok(None);
    }
    if len > MAX_CALLSIGN_LEN {
        return Err(ProtocolError::InvalidCallsign(format!("length byte {len}")));
    }
    let name = std::str::from_utf8(&frame[offset + 1..offset + 1 + len])
        .map_err(|_| ProtocolError::InvalidCallsign("non-utf8 callsign".to_string()))?;
    Ok(Some(Callsign::parse(name)?))
}

/// Wrap a packet for the air.
#[must_use]
pub fn encode(sender: Callsign, recipient: Option<Callsign>, packet: &Packet) -> Vec<u8> {
    let mut out = Vec::with_capacity(LINK_HEADER_LEN + packet.encoded_len());
    put_callsign(&mut out, Some(sender));
    put_callsign(&mut out, recipient);
    out.extend_from_slice(&[0u8; 2]);
    packet.encode(&mut out);
    out
}

/// Unwrap a received byte frame.
pub fn decode(frame: &[u8]) -> Result<LinkFrame> {
    if frame.len() < LINK_HEADER_LEN {
        return Err(ProtocolError::HeaderTooShort {
            expected: LINK_HEADER_LEN,
            actual: frame.len(),
        });
    }
    let sender = take_callsign(frame, 0)?
        .ok_or_else(|| ProtocolError::InvalidCallsign("missing sender".to_string()))?;
    let recipient = take_callsign(frame, 1 + MAX_CALLSIGN_LEN)?;
    let packet = Packet::decode(&frame[LINK_HEADER_LEN..])?;
    Ok(LinkFrame { sender, recipient, packet })
}
