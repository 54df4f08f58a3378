//! Packet type codes, flag bits, and packet identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// On-wire packet type codes.
///
/// Codes are grouped by concern: `0x0x` application traffic, `0x1x` mesh
/// control, `0x2x` link control. Unknown codes are rejected at decode so a
/// newer peer cannot smuggle frames past an older one unnoticed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// HTTP-style request
    Request = 0x01,
    /// HTTP-style response
    Response = 0x02,
    /// Virtual-DOM delta update
    Delta = 0x03,
    /// Opaque stream chunk
    Stream = 0x04,
    /// Schema descriptor (opaque; caching capability deferred)
    Schema = 0x05,
    /// AODV route request broadcast
    RouteRequest = 0x10,
    /// AODV route reply unicast
    RouteReply = 0x11,
    /// AODV route error
    RouteError = 0x12,
    /// Relayed data frame with source, destination, hop count, TTL
    DataRelay = 0x13,
    /// Per-fragment acknowledgement
    Ack = 0x20,
}

impl PacketType {
    /// Decode a type code. `None` for unknown codes.
    #[must_use]
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Request),
            0x02 => Some(Self::Response),
            0x03 => Some(Self::Delta),
            0x04 => Some(Self::Stream),
            0x05 => Some(Self::Schema),
            0x10 => Some(Self::RouteRequest),
            0x11 => Some(Self::RouteReply),
            0x12 => Some(Self::RouteError),
            0x13 => Some(Self::DataRelay),
            0x20 => Some(Self::Ack),
            _ => None,
        }
    }

    /// The on-wire code.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// True for the mesh control types that never carry application data.
    #[must_use]
    pub fn is_mesh_control(self) -> bool {
        matches!(self, Self::RouteRequest | Self::RouteReply | Self::RouteError)
    }
}

/// Flag bitfield carried in every packet header.
///
/// `ENCRYPTED` is reserved: the operating regime forbids payload
/// encryption, so nothing sets or interprets it, but the bit round-trips
/// untouched. `LAST_FRAGMENT` is the only bit allowed to differ between
/// fragments of one packet id.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// Payload is compressed (see the content pipeline blob header).
    pub const COMPRESSED: Self = Self(0x01);
    /// Reserved; semantics undefined.
    pub const ENCRYPTED: Self = Self(0x02);
    /// Packet is one fragment of a larger logical message.
    pub const FRAGMENTED: Self = Self(0x04);
    /// Final fragment of its packet id.
    pub const LAST_FRAGMENT: Self = Self(0x08);
    /// Payload is a delta update against previously delivered content.
    pub const DELTA_UPDATE: Self = Self(0x10);
    /// Payload is protobuf-encoded (reserved capability).
    pub const PROTOBUF_ENCODED: Self = Self(0x20);

    /// Empty flag set.
    #[must_use]
    pub fn empty() -> Self {
        Self(0)
    }

    /// Reconstruct from a raw byte. Unknown bits are preserved.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// The raw byte.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        self.0
    }

    /// True if every bit of `other` is set in `self`.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    #[must_use]
    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Clear the bits of `other`.
    #[must_use]
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Flags with the two fragmentation bits cleared.
    ///
    /// This is the portion that must be identical across all fragments of
    /// one packet id.
    #[must_use]
    pub fn shared_bits(self) -> Self {
        self.without(Self::FRAGMENTED).without(Self::LAST_FRAGMENT)
    }
}

impl fmt::Debug for PacketFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        for (bit, name) in [
            (Self::COMPRESSED, "COMPRESSED"),
            (Self::ENCRYPTED, "ENCRYPTED"),
            (Self::FRAGMENTED, "FRAGMENTED"),
            (Self::LAST_FRAGMENT, "LAST_FRAGMENT"),
            (Self::DELTA_UPDATE, "DELTA_UPDATE"),
            (Self::PROTOBUF_ENCODED, "PROTOBUF_ENCODED"),
        ] {
            if self.contains(bit) {
                names.push(name);
            }
        }
        write!(f, "PacketFlags({:#04x}: {})", self.0, names.join("|"))
    }
}

/// Opaque 8-byte packet identifier assigned by the originator.
///
/// All fragments of one logical message share its id. Ids are drawn from
/// the originator's randomness source; collisions inside the reassembly
/// window are treated like callsign collisions: misbehaviour, not a
/// protocol case.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PacketId([u8; 8]);

impl PacketId {
    /// Wrap raw id bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// The raw id bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketId({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_round_trip() {
        for code in 0..=u8::MAX {
            if let Some(t) = PacketType::from_u8(code) {
                assert_eq!(t.to_u8(), code);
            }
        }
    }

    #[test]
    fn wire_codes_match_spec() {
        assert_eq!(PacketType::Request.to_u8(), 0x01);
        assert_eq!(PacketType::Response.to_u8(), 0x02);
        assert_eq!(PacketType::Delta.to_u8(), 0x03);
        assert_eq!(PacketType::Stream.to_u8(), 0x04);
        assert_eq!(PacketType::Schema.to_u8(), 0x05);
        assert_eq!(PacketType::RouteRequest.to_u8(), 0x10);
        assert_eq!(PacketType::RouteReply.to_u8(), 0x11);
        assert_eq!(PacketType::RouteError.to_u8(), 0x12);
        assert_eq!(PacketType::DataRelay.to_u8(), 0x13);
        assert_eq!(PacketType::Ack.to_u8(), 0x20);
    }

    #[test]
    fn flag_bits_match_spec() {
        assert_eq!(PacketFlags::COMPRESSED.to_byte(), 0x01);
        assert_eq!(PacketFlags::ENCRYPTED.to_byte(), 0x02);
        assert_eq!(PacketFlags::FRAGMENTED.to_byte(), 0x04);
        assert_eq!(PacketFlags::LAST_FRAGMENT.to_byte(), 0x08);
        assert_eq!(PacketFlags::DELTA_UPDATE.to_byte(), 0x10);
        assert_eq!(PacketFlags::PROTOBUF_ENCODED.to_byte(), 0x20);
    }

    #[test]
    fn shared_bits_strip_fragmentation() {
        let flags = PacketFlags::COMPRESSED
            .with(PacketFlags::FRAGMENTED)
            .with(PacketFlags::LAST_FRAGMENT);
        assert_eq!(flags.shared_bits(), PacketFlags::COMPRESSED);
    }

    #[test]
    fn unknown_flag_bits_round_trip() {
        let flags = PacketFlags::from_byte(0xC0);
        assert_eq!(flags.to_byte(), 0xC0);
    }
}
