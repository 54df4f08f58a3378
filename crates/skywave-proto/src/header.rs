//! Packet header with zero-copy parsing.
//!
//! The header is a fixed 16-byte structure serialized as raw binary with
//! little-endian multi-byte fields. Relays make their forwarding decision
//! from the header alone, without touching the payload.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    PacketFlags, PacketId, PacketType,
    errors::{ProtocolError, Result},
};

/// Fixed 16-byte packet header.
///
/// Multi-byte integers are little-endian. Fields are raw byte arrays so the
/// struct can be cast directly from untrusted radio bytes: every 16-byte
/// pattern is a valid bit pattern, and semantic validation (version, type
/// code) happens in [`PacketHeader::from_bytes`].
///
/// # Invariants
///
/// - `payload_len` equals the exact count of payload bytes that follow the
///   header on the wire. [`crate::Packet::new`] sets it automatically and
///   [`crate::Packet::decode`] verifies it.
/// - All fragments of one `packet_id` share `packet_type` and every flag
///   bit except `LAST_FRAGMENT`.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct PacketHeader {
    version: u8,
    packet_type: u8,
    packet_id: [u8; 8],
    sequence: [u8; 2],
    flags: u8,
    pub(crate) payload_len: [u8; 2],
    reserved: u8,
}

impl PacketHeader {
    /// Size of the serialized header.
    pub const SIZE: usize = 16;

    /// Current protocol version.
    pub const VERSION: u8 = 0x01;

    /// Maximum payload length representable by the 16-bit length field.
    pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

    /// Create a header for the given type and id.
    ///
    /// Sequence, flags, and payload length start zeroed; the packet codec
    /// fills them in.
    #[must_use]
    pub fn new(packet_type: PacketType, packet_id: PacketId) -> Self {
        Self {
            version: Self::VERSION,
            packet_type: packet_type.to_u8(),
            packet_id: *packet_id.as_bytes(),
            sequence: [0; 2],
            flags: 0,
            payload_len: [0; 2],
            reserved: 0,
        }
    }

    /// Parse a header from the front of a byte buffer (zero-copy).
    ///
    /// Validates cheapest-first: length, version, then type code. Does not
    /// check `payload_len` against the buffer; that is the packet codec's
    /// job because the header may be inspected before the payload arrives.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::HeaderTooShort` if fewer than 16 bytes
    /// - `ProtocolError::UnsupportedVersion` on a version we do not speak
    /// - `ProtocolError::UnknownType` on an unrecognized type code
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::HeaderTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        if PacketType::from_u8(header.packet_type).is_none() {
            return Err(ProtocolError::UnknownType(header.packet_type));
        }

        Ok(header)
    }

    /// Serialize the header to its 16 wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Protocol version byte.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Packet type.
    ///
    /// Infallible on headers obtained through [`Self::from_bytes`] or
    /// [`Self::new`]; falls back to `Ack` only on a hand-assembled header
    /// with a bad code, which validation upstream prevents.
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        PacketType::from_u8(self.packet_type).unwrap_or(PacketType::Ack)
    }

    /// Raw packet type code.
    #[must_use]
    pub fn packet_type_code(&self) -> u8 {
        self.packet_type
    }

    /// Originator-assigned packet identifier, shared across fragments.
    #[must_use]
    pub fn packet_id(&self) -> PacketId {
        PacketId::from_bytes(self.packet_id)
    }

    /// Fragment ordinal within the packet id.
    #[must_use]
    pub fn sequence(&self) -> u16 {
        u16::from_le_bytes(self.sequence)
    }

    /// Flag bitfield.
    #[must_use]
    pub fn flags(&self) -> PacketFlags {
        PacketFlags::from_byte(self.flags)
    }

    /// Payload byte count claimed by the header.
    #[must_use]
    pub fn payload_len(&self) -> u16 {
        u16::from_le_bytes(self.payload_len)
    }

    /// Set the fragment ordinal.
    pub fn set_sequence(&mut self, sequence: u16) {
        self.sequence = sequence.to_le_bytes();
    }

    /// Set the flag bitfield.
    pub fn set_flags(&mut self, flags: PacketFlags) {
        self.flags = flags.to_byte();
    }

    /// Set the payload length field.
    pub fn set_payload_len(&mut self, len: u16) {
        self.payload_len = len.to_le_bytes();
    }
}

// Manual Debug: derive is unavailable on packed reprs without copies.
impl std::fmt::Debug for PacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketHeader")
            .field("version", &self.version())
            .field("type", &format_args!("{:#04x}", self.packet_type_code()))
            .field("id", &self.packet_id())
            .field("sequence", &self.sequence())
            .field("flags", &self.flags())
            .field("payload_len", &self.payload_len())
            .finish()
    }
}

impl PartialEq for PacketHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PacketHeader {}
