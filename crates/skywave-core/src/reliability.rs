//! Per-fragment acknowledgement tracking and retransmission.
//!
//! A pure state machine in the action style: callers feed it transmitted
//! fragments, received ACKs, and clock ticks; it returns the
//! retransmissions and failures the driver must act on. No I/O, no timer
//! of its own, so the retry schedule is exact under the simulated clock.
//!
//! Schedule: first wait is `initial_timeout`, doubling per retry up to
//! `backoff_cap`; after `max_retries` retransmissions the next expiry
//! reports the fragment failed.

use std::{collections::HashMap, ops::Sub, time::Duration};

use skywave_proto::{Callsign, Packet, PacketId};
use thiserror::Error;

/// Raised to callers when a fragment exhausts its retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("retries exhausted for packet {id} fragment {sequence}")]
pub struct RetriesExhausted {
    /// Packet id of the failed fragment.
    pub id: PacketId,
    /// Fragment ordinal.
    pub sequence: u16,
}

/// Retry tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReliabilityConfig {
    /// First ACK wait.
    pub initial_timeout: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
    /// Retransmissions before giving up.
    pub max_retries: u8,
    /// Maximum fragments awaiting ACK at once.
    pub capacity: usize,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_millis(200),
            backoff_cap: Duration::from_secs(2),
            max_retries: 3,
            capacity: 128,
        }
    }
}

/// Actions the driver executes after a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReliabilityAction {
    /// Send this fragment again.
    Retransmit {
        /// Destination station.
        destination: Callsign,
        /// The fragment to resend.
        packet: Packet,
    },
    /// The fragment ran out of retries; surface to the caller.
    Failed {
        /// Destination station.
        destination: Callsign,
        /// The failure to report.
        error: RetriesExhausted,
    },
}

#[derive(Debug)]
struct PendingFragment<I> {
    destination: Callsign,
    packet: Packet,
    deadline: I,
    attempts: u8,
    tracked_at: I,
}

/// Pending-ACK table.
#[derive(Debug)]
pub struct PendingAcks<I> {
    entries: HashMap<(PacketId, u16), PendingFragment<I>>,
    config: ReliabilityConfig,
    evictions: u64,
}

impl<I> PendingAcks<I>
where
    I: Copy + Ord + Sub<Output = Duration> + std::ops::Add<Duration, Output = I>,
{
    /// Create an empty table.
    #[must_use]
    pub fn new(config: ReliabilityConfig) -> Self {
        Self { entries: HashMap::new(), config, evictions: 0 }
    }

    /// Fragments currently awaiting acknowledgement.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Entries evicted by the capacity bound so far.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Register a fragment that was just transmitted.
    ///
    /// When the table is full the oldest entry is evicted first; the
    /// eviction is counted, not raised, because a dropped tracking entry
    /// degrades to an unacknowledged send.
    pub fn track(&mut self, now: I, destination: Callsign, packet: Packet) {
        if self.entries.len() >= self.config.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.tracked_at)
                .map(|(k, _)| *k);
            if let Some(key) = oldest {
                self.entries.remove(&key);
                self.evictions += 1;
            }
        }

        let key = (packet.header.packet_id(), packet.header.sequence());
        self.entries.insert(
            key,
            PendingFragment {
                destination,
                packet,
                deadline: now + self.config.initial_timeout,
                attempts: 0,
                tracked_at: now,
            },
        );
    }

    /// Process a received ACK. Returns true when it cleared a pending
    /// fragment; a second ACK for the same fragment is a no-op.
    pub fn acknowledge(&mut self, id: PacketId, sequence: u16) -> bool {
        self.entries.remove(&(id, sequence)).is_some()
    }

    /// Drop every pending fragment of a packet, e.g. after the caller's
    /// deadline was cancelled.
    pub fn abandon(&mut self, id: PacketId) -> usize {
        let keys: Vec<(PacketId, u16)> =
            self.entries.keys().filter(|(k, _)| *k == id).copied().collect();
        for key in &keys {
            self.entries.remove(key);
        }
        keys.len()
    }

    /// Advance time: emit retransmissions for expired waits and failures
    /// for fragments out of retries.
    pub fn tick(&mut self, now: I) -> Vec<ReliabilityAction> {
        let mut actions = Vec::new();
        let mut failed_keys = Vec::new();

        for (key, entry) in &mut self.entries {
            if now < entry.deadline {
                continue;
            }
            if entry.attempts >= self.config.max_retries {
                failed_keys.push(*key);
                continue;
            }
            entry.attempts += 1;
            // Clamp the exponent: the cap makes anything past 2^20 moot.
            let exponent = u32::from(entry.attempts).min(20);
            let backoff = self
                .config
                .initial_timeout
                .saturating_mul(1u32 << exponent)
                .min(self.config.backoff_cap);
            entry.deadline = now + backoff;
            actions.push(ReliabilityAction::Retransmit {
                destination: entry.destination,
                packet: entry.packet.clone(),
            });
        }

        for key in failed_keys {
            if let Some(entry) = self.entries.remove(&key) {
                actions.push(ReliabilityAction::Failed {
                    destination: entry.destination,
                    error: RetriesExhausted { id: key.0, sequence: key.1 },
                });
            }
        }

        actions
    }
}

/// Wrapping 16-bit fragment counter, one per originator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequenceCounter(u16);

impl SequenceCounter {
    /// Start from zero.
    #[must_use]
    pub fn new() -> Self {
        Self(0)
    }

    /// Current value without advancing.
    #[must_use]
    pub fn peek(&self) -> u16 {
        self.0
    }

    /// Return the current value and advance, wrapping at 2^16.
    pub fn next(&mut self) -> u16 {
        let value = self.0;
        self.0 = self.0.wrapping_add(1);
        value
    }

    /// Advance past a block of `count` fragments, returning the first
    /// value of the block.
    pub fn take(&mut self, count: u16) -> u16 {
        let value = self.0;
        self.0 = self.0.wrapping_add(count);
        value
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use skywave_proto::{PacketFlags, PacketHeader, PacketType};

    use super::*;

    fn packet(seq: u16) -> Packet {
        let mut header = PacketHeader::new(PacketType::Response, PacketId::from_bytes([9; 8]));
        header.set_sequence(seq);
        header.set_flags(PacketFlags::FRAGMENTED);
        Packet::new(header, vec![seq as u8]).unwrap()
    }

    fn dest() -> Callsign {
        Callsign::parse("W2DEF").unwrap()
    }

    #[test]
    fn ack_clears_pending() {
        let mut table: PendingAcks<Instant> = PendingAcks::new(ReliabilityConfig::default());
        let now = Instant::now();
        table.track(now, dest(), packet(0));
        assert_eq!(table.pending(), 1);

        assert!(table.acknowledge(PacketId::from_bytes([9; 8]), 0));
        assert_eq!(table.pending(), 0);
        // Duplicate ACK is a no-op.
        assert!(!table.acknowledge(PacketId::from_bytes([9; 8]), 0));
    }

    #[test]
    fn retry_schedule_then_failure() {
        let mut table: PendingAcks<Instant> = PendingAcks::new(ReliabilityConfig::default());
        let t0 = Instant::now();
        table.track(t0, dest(), packet(0));

        // Nothing before the first deadline.
        assert!(table.tick(t0 + Duration::from_millis(199)).is_empty());

        // Retry 1 at +200 ms.
        let actions = table.tick(t0 + Duration::from_millis(200));
        assert!(matches!(actions[..], [ReliabilityAction::Retransmit { .. }]));

        // Retry 2 another 400 ms later.
        let t1 = t0 + Duration::from_millis(200);
        assert!(table.tick(t1 + Duration::from_millis(399)).is_empty());
        let actions = table.tick(t1 + Duration::from_millis(400));
        assert!(matches!(actions[..], [ReliabilityAction::Retransmit { .. }]));

        // Retry 3 another 800 ms later.
        let t2 = t1 + Duration::from_millis(400);
        let actions = table.tick(t2 + Duration::from_millis(800));
        assert!(matches!(actions[..], [ReliabilityAction::Retransmit { .. }]));

        // Out of retries: next expiry reports failure, nothing further.
        let t3 = t2 + Duration::from_millis(800);
        let actions = table.tick(t3 + Duration::from_millis(1600));
        match &actions[..] {
            [ReliabilityAction::Failed { error, .. }] => {
                assert_eq!(error.sequence, 0);
            },
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(table.pending(), 0);
        assert!(table.tick(t3 + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn backoff_caps_at_configured_ceiling() {
        let config = ReliabilityConfig {
            initial_timeout: Duration::from_millis(800),
            backoff_cap: Duration::from_secs(2),
            max_retries: 3,
            capacity: 16,
        };
        let mut table: PendingAcks<Instant> = PendingAcks::new(config);
        let t0 = Instant::now();
        table.track(t0, dest(), packet(1));

        // First retry at +800 ms; backoff would be 1600 ms, then 3200 ms
        // capped to 2000 ms.
        let t1 = t0 + Duration::from_millis(800);
        assert_eq!(table.tick(t1).len(), 1);
        let t2 = t1 + Duration::from_millis(1600);
        assert_eq!(table.tick(t2).len(), 1);
        // Third retry must fire at +2000 ms, not +3200 ms.
        assert!(table.tick(t2 + Duration::from_millis(1999)).is_empty());
        assert_eq!(table.tick(t2 + Duration::from_millis(2000)).len(), 1);
    }

    #[test]
    fn abandon_clears_whole_packet() {
        let mut table: PendingAcks<Instant> = PendingAcks::new(ReliabilityConfig::default());
        let now = Instant::now();
        for seq in 0..5 {
            table.track(now, dest(), packet(seq));
        }
        assert_eq!(table.abandon(PacketId::from_bytes([9; 8])), 5);
        assert_eq!(table.pending(), 0);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let config = ReliabilityConfig { capacity: 2, ..ReliabilityConfig::default() };
        let mut table: PendingAcks<Instant> = PendingAcks::new(config);
        let t0 = Instant::now();
        table.track(t0, dest(), packet(0));
        table.track(t0 + Duration::from_millis(1), dest(), packet(1));
        table.track(t0 + Duration::from_millis(2), dest(), packet(2));

        assert_eq!(table.pending(), 2);
        assert_eq!(table.evictions(), 1);
        // The oldest (seq 0) is gone.
        assert!(!table.acknowledge(PacketId::from_bytes([9; 8]), 0));
        assert!(table.acknowledge(PacketId::from_bytes([9; 8]), 1));
    }

    #[test]
    fn sequence_counter_wraps() {
        let mut counter = SequenceCounter::new();
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
        let first = counter.take(10);
        assert_eq!(first, 2);
        assert_eq!(counter.peek(), 12);

        let mut near_wrap = SequenceCounter::new();
        near_wrap.take(u16::MAX);
        assert_eq!(near_wrap.next(), u16::MAX);
        assert_eq!(near_wrap.next(), 0);
    }
}
