//! Fragmentation of logical messages into on-wire packets.
//!
//! A logical message up to 64 KiB is split into equal-sized chunks (the
//! last one short) whenever its single-packet serialization would exceed
//! the configured maximum. Every fragment carries the shared packet id and
//! a dense 0-based ordinal; the final fragment sets `LAST_FRAGMENT`.

use crate::{
    Packet, PacketFlags, PacketHeader, PacketId, PacketType,
    errors::{ProtocolError, Result},
};

/// Largest logical message the protocol can carry.
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

/// Default maximum packet size, header included.
pub const DEFAULT_MAX_PACKET_LEN: usize = 256;

/// Split a payload into wire packets.
///
/// If the whole message fits inside `max_packet_len` a single packet is
/// produced with neither fragmentation bit set. Otherwise fragments are
/// produced with ordinals `0..n`, all flagged `FRAGMENTED` and exactly the
/// last also `LAST_FRAGMENT`. The caller's fragmentation bits in `flags`
/// are ignored; only the shared bits are carried into the fragments.
///
/// # Errors
///
/// - `ProtocolError::MessageTooLarge` if the payload exceeds
///   [`MAX_MESSAGE_LEN`]
/// - `ProtocolError::PayloadTooLarge` if `max_packet_len` leaves no room
///   for payload after the 16-byte header
pub fn fragment_message(
    packet_type: PacketType,
    id: PacketId,
    flags: PacketFlags,
    payload: &[u8],
    max_packet_len: usize,
) -> Result<Vec<Packet>> {
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(ProtocolError::MessageTooLarge {
            size: payload.len(),
            max: MAX_MESSAGE_LEN,
        });
    }

    let chunk_len = max_packet_len.saturating_sub(PacketHeader::SIZE);
    if chunk_len == 0 {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: 0,
        });
    }

    let shared = flags.shared_bits();

    if payload.len() <= chunk_len {
        let mut header = PacketHeader::new(packet_type, id);
        header.set_flags(shared);
        return Ok(vec![Packet::new(header, payload.to_vec())?]);
    }

    let chunks: Vec<&[u8]> = payload.chunks(chunk_len).collect();
    let last = chunks.len() - 1;

    chunks
        .iter()
        .enumerate()
        .map(|(seq, chunk)| {
            let mut header = PacketHeader::new(packet_type, id);
            header.set_sequence(seq as u16);
            let mut frag_flags = shared.with(PacketFlags::FRAGMENTED);
            if seq == last {
                frag_flags = frag_flags.with(PacketFlags::LAST_FRAGMENT);
            }
            header.set_flags(frag_flags);
            Packet::new(header, chunk.to_vec())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: PacketId = PacketId::from_bytes([5; 8]);

    #[test]
    fn small_message_stays_whole() {
        let packets = fragment_message(
            PacketType::Request,
            ID,
            PacketFlags::empty(),
            b"hello",
            DEFAULT_MAX_PACKET_LEN,
        )
        .unwrap();

        assert_eq!(packets.len(), 1);
        let flags = packets[0].header.flags();
        assert!(!flags.contains(PacketFlags::FRAGMENTED));
        assert!(!flags.contains(PacketFlags::LAST_FRAGMENT));
        assert_eq!(&packets[0].payload[..], b"hello");
    }

    #[test]
    fn five_kilobyte_body_fragments() {
        let body = vec![0xABu8; 5000];
        let packets =
            fragment_message(PacketType::Response, ID, PacketFlags::empty(), &body, 256).unwrap();

        // 5000 bytes at 240 payload bytes per packet.
        assert!(packets.len() >= 20);
        assert_eq!(packets.len(), 5000usize.div_ceil(240));

        let last_flagged: Vec<_> = packets
            .iter()
            .filter(|p| p.header.flags().contains(PacketFlags::LAST_FRAGMENT))
            .collect();
        assert_eq!(last_flagged.len(), 1);
        assert!(packets.iter().all(|p| p.header.flags().contains(PacketFlags::FRAGMENTED)));

        for (i, p) in packets.iter().enumerate() {
            assert_eq!(p.header.sequence(), i as u16);
            assert_eq!(p.header.packet_id(), ID);
        }

        let total: usize = packets.iter().map(|p| p.payload.len()).sum();
        assert_eq!(total, 5000);
    }

    #[test]
    fn chunks_are_equal_sized_except_last() {
        let body = vec![1u8; 1000];
        let packets =
            fragment_message(PacketType::Response, ID, PacketFlags::empty(), &body, 116).unwrap();

        let sizes: Vec<usize> = packets.iter().map(|p| p.payload.len()).collect();
        for &size in &sizes[..sizes.len() - 1] {
            assert_eq!(size, 100);
        }
        assert_eq!(sizes[sizes.len() - 1], 1000 - 100 * (sizes.len() - 1));
    }

    #[test]
    fn shared_flags_carried_into_fragments() {
        let body = vec![2u8; 600];
        let packets =
            fragment_message(PacketType::Response, ID, PacketFlags::COMPRESSED, &body, 128)
                .unwrap();
        assert!(packets.len() > 1);
        for p in &packets {
            assert!(p.header.flags().contains(PacketFlags::COMPRESSED));
        }
    }

    #[test]
    fn oversized_message_rejected() {
        let body = vec![0u8; MAX_MESSAGE_LEN + 1];
        let result =
            fragment_message(PacketType::Response, ID, PacketFlags::empty(), &body, 256);
        assert!(matches!(result, Err(ProtocolError::MessageTooLarge { .. })));
    }
}
