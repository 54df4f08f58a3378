//! Fragment reassembly.
//!
//! A bounded table keyed by packet id collects fragments until the last
//! one arrives and the ordinal range is dense, then hands the concatenated
//! payload upward. Partial messages age out after a timeout and the table
//! evicts its oldest entry when full; both events are counted rather than
//! raised, because a lost reassembly is a per-frame matter the reliability
//! layer will repair.
//!
//! Generic over the instant type so the same table runs under real time
//! and the simulated clock.

use std::{
    collections::{BTreeMap, HashMap},
    ops::Sub,
    time::Duration,
};

use bytes::Bytes;

use crate::{
    Packet, PacketFlags, PacketId, PacketType,
    errors::{ProtocolError, Result},
};

/// Default lifetime of a partial reassembly.
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default table capacity.
pub const DEFAULT_REASSEMBLY_CAPACITY: usize = 64;

/// Reassembly table tuning.
#[derive(Debug, Clone, Copy)]
pub struct ReassemblyConfig {
    /// Partial messages older than this are discarded.
    pub timeout: Duration,
    /// Maximum concurrent partial messages.
    pub capacity: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self { timeout: DEFAULT_REASSEMBLY_TIMEOUT, capacity: DEFAULT_REASSEMBLY_CAPACITY }
    }
}

/// A fully reassembled logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteMessage {
    /// Shared packet id.
    pub id: PacketId,
    /// Packet type shared by every fragment.
    pub packet_type: PacketType,
    /// Shared flag bits (fragmentation bits cleared).
    pub flags: PacketFlags,
    /// Concatenated payload in ordinal order.
    pub payload: Vec<u8>,
}

/// Counters the owner can surface as warnings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    /// Entries evicted because the table was full.
    pub evictions: u64,
    /// Entries discarded because they timed out incomplete.
    pub expirations: u64,
}

#[derive(Debug)]
struct PartialMessage<I> {
    packet_type: PacketType,
    shared_flags: PacketFlags,
    fragments: BTreeMap<u16, Bytes>,
    last_sequence: Option<u16>,
    first_seen: I,
}

/// Bounded, id-keyed fragment reassembly table.
#[derive(Debug)]
pub struct Reassembler<I> {
    entries: HashMap<PacketId, PartialMessage<I>>,
    config: ReassemblyConfig,
    stats: ReassemblyStats,
}

impl<I> Reassembler<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create an empty table.
    #[must_use]
    pub fn new(config: ReassemblyConfig) -> Self {
        Self { entries: HashMap::new(), config, stats: ReassemblyStats::default() }
    }

    /// Number of partial messages currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no partial messages are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Eviction and expiry counters.
    #[must_use]
    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Feed one received packet.
    ///
    /// Unfragmented packets pass straight through as complete messages.
    /// Fragments accumulate; the complete message is returned once the
    /// last fragment is present and ordinals `0..=last` are dense.
    /// Duplicate fragments are idempotent.
    ///
    /// # Errors
    ///
    /// `ProtocolError::FragmentMismatch` when a fragment disagrees with
    /// the type, shared flags, or known last ordinal of the fragments
    /// already held under its id. The conflicting fragment is dropped; the
    /// partial message is kept.
    pub fn accept(&mut self, now: I, packet: &Packet) -> Result<Option<CompleteMessage>> {
        let flags = packet.header.flags();
        let id = packet.header.packet_id();

        if !flags.contains(PacketFlags::FRAGMENTED) {
            return Ok(Some(CompleteMessage {
                id,
                packet_type: packet.header.packet_type(),
                flags: flags.shared_bits(),
                payload: packet.payload.to_vec(),
            }));
        }

        if !self.entries.contains_key(&id) {
            self.make_room(now);
            self.entries.insert(
                id,
                PartialMessage {
                    packet_type: packet.header.packet_type(),
                    shared_flags: flags.shared_bits(),
                    fragments: BTreeMap::new(),
                    last_sequence: None,
                    first_seen: now,
                },
            );
        }

        let entry = match self.entries.get_mut(&id) {
            Some(entry) => entry,
            None => return Err(ProtocolError::ReassemblyTableFull),
        };

        if entry.packet_type != packet.header.packet_type()
            || entry.shared_flags != flags.shared_bits()
        {
            return Err(ProtocolError::FragmentMismatch { id });
        }

        let sequence = packet.header.sequence();
        if let Some(last) = entry.last_sequence {
            if sequence > last {
                return Err(ProtocolError::FragmentMismatch { id });
            }
        }

        if flags.contains(PacketFlags::LAST_FRAGMENT) {
            match entry.last_sequence {
                None => entry.last_sequence = Some(sequence),
                Some(last) if last != sequence => {
                    return Err(ProtocolError::FragmentMismatch { id });
                },
                Some(_) => {},
            }
        }

        entry.fragments.entry(sequence).or_insert_with(|| packet.payload.clone());

        if let Some(last) = entry.last_sequence {
            let expected = usize::from(last) + 1;
            let highest = entry.fragments.keys().next_back().copied();
            if entry.fragments.len() == expected && highest == Some(last) {
                // Keys are unique and the highest equals `last`, so equal
                // count means ordinals 0..=last are all present.
                let entry = match self.entries.remove(&id) {
                    Some(entry) => entry,
                    None => return Ok(None),
                };
                let mut payload = Vec::new();
                for fragment in entry.fragments.values() {
                    payload.extend_from_slice(fragment);
                }
                return Ok(Some(CompleteMessage {
                    id,
                    packet_type: entry.packet_type,
                    flags: entry.shared_flags,
                    payload,
                }));
            }
        }

        Ok(None)
    }

    /// Discard partial messages older than the timeout. Returns the ids
    /// dropped.
    pub fn expire(&mut self, now: I) -> Vec<PacketId> {
        let timeout = self.config.timeout;
        let expired: Vec<PacketId> = self
            .entries
            .iter()
            .filter(|(_, e)| now >= e.first_seen && now - e.first_seen >= timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.entries.remove(id);
            self.stats.expirations += 1;
        }
        expired
    }

    /// Evict the oldest entry if the table is at capacity.
    fn make_room(&mut self, _now: I) {
        if self.entries.len() < self.config.capacity {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.first_seen)
            .map(|(id, _)| *id);
        if let Some(id) = oldest {
            self.entries.remove(&id);
            self.stats.evictions += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::fragment::fragment_message;

    fn config() -> ReassemblyConfig {
        ReassemblyConfig { timeout: Duration::from_secs(30), capacity: 8 }
    }

    fn fragments(id: u8, payload: &[u8]) -> Vec<Packet> {
        fragment_message(
            PacketType::Response,
            PacketId::from_bytes([id; 8]),
            PacketFlags::empty(),
            payload,
            64,
        )
        .unwrap()
    }

    #[test]
    fn in_order_reassembly() {
        let mut table: Reassembler<Instant> = Reassembler::new(config());
        let now = Instant::now();
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

        let mut complete = None;
        for packet in fragments(1, &payload) {
            complete = table.accept(now, &packet).unwrap();
        }
        assert_eq!(complete.unwrap().payload, payload);
        assert!(table.is_empty());
    }

    proptest! {
        #[test]
        fn permuted_reassembly(
            payload in prop::collection::vec(any::<u8>(), 1..2000),
            seed in any::<u64>(),
        ) {
            let mut table: Reassembler<Instant> = Reassembler::new(config());
            let now = Instant::now();

            let mut packets = fragments(2, &payload);
            // Deterministic shuffle from the seed.
            let mut state = seed | 1;
            for i in (1..packets.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                packets.swap(i, (state as usize) % (i + 1));
            }

            let mut complete = None;
            for packet in &packets {
                if let Some(message) = table.accept(now, packet).unwrap() {
                    complete = Some(message);
                }
            }
            let complete = complete.expect("all fragments fed");
            prop_assert_eq!(complete.payload, payload);
        }
    }

    #[test]
    fn duplicates_are_idempotent() {
        let mut table: Reassembler<Instant> = Reassembler::new(config());
        let now = Instant::now();
        let payload = vec![7u8; 500];
        let packets = fragments(3, &payload);

        // Feed every fragment twice except the last.
        for packet in &packets[..packets.len() - 1] {
            assert!(table.accept(now, packet).unwrap().is_none());
            assert!(table.accept(now, packet).unwrap().is_none());
        }
        let complete = table.accept(now, &packets[packets.len() - 1]).unwrap().unwrap();
        assert_eq!(complete.payload, payload);
    }

    #[test]
    fn unfragmented_passes_through() {
        let mut table: Reassembler<Instant> = Reassembler::new(config());
        let packets = fragments(4, b"tiny");
        assert_eq!(packets.len(), 1);
        let complete = table.accept(Instant::now(), &packets[0]).unwrap().unwrap();
        assert_eq!(complete.payload, b"tiny");
        assert!(table.is_empty());
    }

    #[test]
    fn incomplete_entries_expire() {
        let mut table: Reassembler<Instant> = Reassembler::new(config());
        let start = Instant::now();
        let packets = fragments(5, &vec![1u8; 500]);
        table.accept(start, &packets[0]).unwrap();
        assert_eq!(table.len(), 1);

        let expired = table.expire(start + Duration::from_secs(31));
        assert_eq!(expired, vec![PacketId::from_bytes([5; 8])]);
        assert!(table.is_empty());
        assert_eq!(table.stats().expirations, 1);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut table: Reassembler<Instant> = Reassembler::new(ReassemblyConfig {
            timeout: Duration::from_secs(30),
            capacity: 2,
        });
        let base = Instant::now();

        table.accept(base, &fragments(10, &vec![0u8; 500])[0]).unwrap();
        table.accept(base + Duration::from_secs(1), &fragments(11, &vec![0u8; 500])[0]).unwrap();
        table.accept(base + Duration::from_secs(2), &fragments(12, &vec![0u8; 500])[0]).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.stats().evictions, 1);

        // The oldest (id 10) was the one evicted: finishing id 11 still works.
        let packets = fragments(11, &vec![0u8; 500]);
        let mut complete = None;
        for packet in &packets[1..] {
            complete = table.accept(base + Duration::from_secs(3), packet).unwrap();
        }
        assert!(complete.is_some());
    }

    #[test]
    fn mismatched_type_rejected() {
        let mut table: Reassembler<Instant> = Reassembler::new(config());
        let now = Instant::now();
        let packets = fragments(6, &vec![9u8; 500]);
        table.accept(now, &packets[0]).unwrap();

        // Same id, different type.
        let conflicting = fragment_message(
            PacketType::Request,
            PacketId::from_bytes([6; 8]),
            PacketFlags::empty(),
            &vec![9u8; 500],
            64,
        )
        .unwrap();
        let result = table.accept(now, &conflicting[1]);
        assert!(matches!(result, Err(ProtocolError::FragmentMismatch { .. })));
    }
}
