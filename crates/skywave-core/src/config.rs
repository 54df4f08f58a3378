//! Process-wide stack configuration.
//!
//! Set once at startup and passed by value into task contexts; there are
//! no hidden singletons, so two stack instances can share a process (the
//! simulation harness relies on this).

use std::time::Duration;

use skywave_proto::Callsign;

/// Store-and-forward policy for frames to currently unreachable
/// destinations. Capacity zero disables queueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreForwardPolicy {
    /// Maximum queued frames per node.
    pub capacity: usize,
    /// How long a queued frame stays eligible for flushing.
    pub ttl: Duration,
}

impl Default for StoreForwardPolicy {
    fn default() -> Self {
        Self { capacity: 16, ttl: Duration::from_secs(60) }
    }
}

/// Protocol-side configuration for one stack instance.
///
/// Modem parameters (rates, FEC dimensions, SNR thresholds) live in the
/// modem's own config; this struct covers everything above the sample
/// boundary.
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// This station's callsign: the network address.
    pub callsign: Callsign,

    /// Maximum on-wire packet size including the 16-byte header.
    pub max_packet_len: usize,

    /// First ACK wait; doubles per retry.
    pub ack_timeout: Duration,
    /// Ceiling for the exponential backoff.
    pub ack_backoff_cap: Duration,
    /// Retransmissions before `RetriesExhausted`.
    pub ack_retries: u8,

    /// Partial reassemblies older than this are discarded.
    pub reassembly_timeout: Duration,
    /// Concurrent partial reassemblies.
    pub reassembly_capacity: usize,

    /// Lifetime granted to installed routes.
    pub route_lifetime: Duration,
    /// Maximum destinations held in the routing table.
    pub routing_table_capacity: usize,
    /// Wait for a route reply before retrying discovery.
    pub route_discovery_timeout: Duration,
    /// Discovery attempts before `NoRoute`.
    pub route_discovery_retries: u8,
    /// Initial TTL on route request floods and data relays.
    pub mesh_ttl: u8,

    /// Recently-seen window for fragment duplicate suppression.
    pub seen_fragments_capacity: usize,
    /// Recently-seen window for mesh broadcast suppression.
    pub seen_broadcasts_capacity: usize,

    /// Queueing policy for unreachable destinations.
    pub store_forward: StoreForwardPolicy,

    /// Whether received data fragments are acknowledged. Stations that
    /// only listen (or tests exercising the retry path) turn this off.
    pub send_acks: bool,
}

impl StackConfig {
    /// Configuration with spec defaults for the given callsign.
    #[must_use]
    pub fn new(callsign: Callsign) -> Self {
        Self {
            callsign,
            max_packet_len: 256,
            ack_timeout: Duration::from_millis(200),
            ack_backoff_cap: Duration::from_secs(2),
            ack_retries: 3,
            reassembly_timeout: Duration::from_secs(30),
            reassembly_capacity: 64,
            route_lifetime: Duration::from_secs(120),
            routing_table_capacity: 64,
            route_discovery_timeout: Duration::from_secs(5),
            route_discovery_retries: 2,
            mesh_ttl: 8,
            seen_fragments_capacity: 512,
            seen_broadcasts_capacity: 256,
            store_forward: StoreForwardPolicy::default(),
            send_acks: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_operating_profile() {
        let config = StackConfig::new(Callsign::parse("KA1ABC").unwrap());
        assert_eq!(config.max_packet_len, 256);
        assert_eq!(config.ack_timeout, Duration::from_millis(200));
        assert_eq!(config.ack_retries, 3);
        assert_eq!(config.reassembly_timeout, Duration::from_secs(30));
    }
}
