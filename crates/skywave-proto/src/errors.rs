//! Protocol-layer error types.
//!
//! Errors are scoped to a single frame or reassembly: a malformed packet
//! never poisons the codec, it is rejected and the next packet parses from
//! a clean state. Callers surface these as counters, not faults (only the
//! reliability layer promotes losses into caller-visible errors).

use thiserror::Error;

use crate::PacketId;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding, decoding, fragmenting, or reassembling
/// packets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is shorter than the fixed header.
    #[error("malformed header: need {expected} bytes, got {actual}")]
    HeaderTooShort {
        /// Bytes required for a full header
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Protocol version byte is not one we speak.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Type code does not map to any known packet type.
    #[error("unknown packet type: {0:#04x}")]
    UnknownType(u8),

    /// Header claims more payload bytes than the buffer holds.
    #[error("truncated packet: header claims {expected} payload bytes, got {actual}")]
    Truncated {
        /// Payload length from the header
        expected: usize,
        /// Payload bytes present after the header
        actual: usize,
    },

    /// Payload exceeds the 16-bit length field.
    #[error("payload too large: {size} bytes exceeds {max}")]
    PayloadTooLarge {
        /// Attempted payload size
        size: usize,
        /// Maximum representable size
        max: usize,
    },

    /// Logical message exceeds the fragmentable maximum.
    #[error("message too large: {size} bytes exceeds {max}")]
    MessageTooLarge {
        /// Attempted message size
        size: usize,
        /// Maximum logical message size
        max: usize,
    },

    /// Callsign failed validation.
    #[error("invalid callsign: {0}")]
    InvalidCallsign(String),

    /// CBOR serialization failed.
    #[error("cbor encode error: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed.
    #[error("cbor decode error: {0}")]
    CborDecode(String),

    /// A fragment arrived whose type or flags disagree with the fragments
    /// already held for the same packet id.
    #[error("fragment mismatch for packet {id}")]
    FragmentMismatch {
        /// Packet id of the conflicting fragment
        id: PacketId,
    },

    /// Reassembly completed the last fragment but sequences are missing.
    #[error("fragment gap in packet {id}: missing sequence {missing}")]
    FragmentGap {
        /// Packet id of the incomplete message
        id: PacketId,
        /// First missing sequence number
        missing: u16,
    },

    /// A partial reassembly aged out before completing.
    #[error("reassembly timed out for packet {id}")]
    ReassemblyTimeout {
        /// Packet id of the expired message
        id: PacketId,
    },

    /// The reassembly table hit its capacity bound.
    #[error("reassembly table full")]
    ReassemblyTableFull,
}
