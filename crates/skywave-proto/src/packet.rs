//! Packet type combining header and payload bytes.
//!
//! A `Packet` is one on-wire unit: the 16-byte binary header followed by
//! payload bytes. It is a pure data holder; relays forward packets without
//! deserializing the payload, and [`crate::Payload`] provides the typed
//! view when one is needed.

use bytes::{BufMut, Bytes};

use crate::{
    PacketHeader,
    errors::{ProtocolError, Result},
};

/// One on-wire packet.
///
/// Layout: `[PacketHeader: 16 bytes] + [payload: variable]`.
///
/// # Invariants
///
/// - `payload.len()` always matches `header.payload_len()`. Enforced by
///   [`Packet::new`] and verified by [`Packet::decode`], so a header can
///   never claim a different size than the bytes it travels with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header (16 bytes on the wire)
    pub header: PacketHeader,

    /// Raw payload bytes (CBOR for typed payloads)
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet, setting the header's `payload_len` from the actual
    /// payload.
    ///
    /// # Errors
    ///
    /// `ProtocolError::PayloadTooLarge` if the payload exceeds the 16-bit
    /// length field. The fragmentation layer keeps payloads far below this,
    /// but hand-built packets are checked too.
    pub fn new(mut header: PacketHeader, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();

        let len = u16::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: PacketHeader::MAX_PAYLOAD_LEN,
        })?;
        header.set_payload_len(len);

        Ok(Self { header, payload })
    }

    /// Total serialized length.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        PacketHeader::SIZE + self.payload.len()
    }

    /// Encode into a buffer: header bytes then payload bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        debug_assert_eq!(self.payload.len(), self.header.payload_len() as usize);
        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);
    }

    /// Encode into a fresh byte vector.
    #[must_use]
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf
    }

    /// Decode a packet from wire bytes.
    ///
    /// Reads exactly `payload_len` bytes after the header; trailing bytes
    /// are ignored so a packet can be peeled off the front of a larger
    /// buffer.
    ///
    /// # Errors
    ///
    /// - header errors from [`PacketHeader::from_bytes`]
    /// - `ProtocolError::Truncated` if fewer payload bytes are present than
    ///   the header claims
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = *PacketHeader::from_bytes(bytes)?;

        let payload_len = header.payload_len() as usize;
        let available = bytes.len().saturating_sub(PacketHeader::SIZE);
        if available < payload_len {
            return Err(ProtocolError::Truncated { expected: payload_len, actual: available });
        }

        let payload =
            Bytes::copy_from_slice(&bytes[PacketHeader::SIZE..PacketHeader::SIZE + payload_len]);

        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{PacketFlags, PacketId, PacketType};

    impl Arbitrary for Packet {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            (any::<PacketHeader>(), prop::collection::vec(any::<u8>(), 0..512))
                .prop_map(|(header, payload)| {
                    Packet::new(header, payload).expect("payload under 64 KiB")
                })
                .boxed()
        }
    }

    proptest! {
        #[test]
        fn packet_round_trip(packet in any::<Packet>()) {
            let wire = packet.to_wire();
            let parsed = Packet::decode(&wire).expect("should decode");
            prop_assert_eq!(packet, parsed);
        }

        #[test]
        fn payload_len_is_exact(packet in any::<Packet>()) {
            let wire = packet.to_wire();
            prop_assert_eq!(wire.len(), PacketHeader::SIZE + packet.header.payload_len() as usize);
        }
    }

    #[test]
    fn reject_truncated_payload() {
        let header = PacketHeader::new(PacketType::Request, PacketId::from_bytes([9; 8]));
        let packet = Packet::new(header, vec![1, 2, 3, 4, 5]).unwrap();
        let wire = packet.to_wire();

        let result = Packet::decode(&wire[..wire.len() - 2]);
        assert_eq!(result, Err(ProtocolError::Truncated { expected: 5, actual: 3 }));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let header = PacketHeader::new(PacketType::Ack, PacketId::from_bytes([1; 8]));
        let packet = Packet::new(header, vec![0xAA]).unwrap();
        let mut wire = packet.to_wire();
        wire.extend_from_slice(&[0xFF; 8]);

        let parsed = Packet::decode(&wire).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn oversized_payload_rejected() {
        let header = PacketHeader::new(PacketType::Response, PacketId::from_bytes([2; 8]));
        let result = Packet::new(header, vec![0u8; PacketHeader::MAX_PAYLOAD_LEN + 1]);
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })));
    }

    #[test]
    fn flags_survive_round_trip() {
        let mut header = PacketHeader::new(PacketType::Delta, PacketId::from_bytes([3; 8]));
        header.set_flags(PacketFlags::COMPRESSED.with(PacketFlags::DELTA_UPDATE));
        let packet = Packet::new(header, Vec::new()).unwrap();

        let parsed = Packet::decode(&packet.to_wire()).unwrap();
        assert!(parsed.header.flags().contains(PacketFlags::COMPRESSED));
        assert!(parsed.header.flags().contains(PacketFlags::DELTA_UPDATE));
        assert!(!parsed.header.flags().contains(PacketFlags::FRAGMENTED));
    }
}
