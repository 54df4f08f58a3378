//! Mesh control payloads: AODV route discovery, maintenance, and relaying.

use serde::{Deserialize, Serialize};

use crate::Callsign;

/// Route request, flooded hop by hop until the destination (or a node with
/// a fresh route to it) answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequest {
    /// Node that wants the route.
    pub originator: Callsign,
    /// Node being sought.
    pub destination: Callsign,
    /// Originator's sequence number at request time.
    pub originator_seq: u32,
    /// Fresh per discovery attempt; `(originator, broadcast_id)` dedupes.
    pub broadcast_id: u32,
    /// Hops traversed so far.
    pub hop_count: u8,
    /// Remaining flood radius.
    pub ttl: u8,
}

/// Route reply, unicast back along the reverse route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteReply {
    /// Originator of the route request this answers.
    pub originator: Callsign,
    /// Destination the route leads to.
    pub destination: Callsign,
    /// Destination's sequence number (freshness).
    pub destination_seq: u32,
    /// Hops from the replier to the destination, incremented per hop.
    pub hop_count: u8,
    /// Route lifetime granted by the replier, in milliseconds.
    pub lifetime_ms: u64,
}

/// One destination reported unreachable by a route error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreachableDestination {
    /// The destination that can no longer be reached.
    pub destination: Callsign,
    /// Its last known sequence number, incremented to invalidate.
    pub destination_seq: u32,
}

/// Route error listing newly unreachable destinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteError {
    /// Destinations lost by the sender.
    pub unreachable: Vec<UnreachableDestination>,
}

/// Data frame wrapped for multi-hop relaying.
///
/// `frame` holds a complete serialized packet; relays forward on the
/// header of the *relay* and never look inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRelay {
    /// Originating node.
    pub source: Callsign,
    /// Final destination.
    pub destination: Callsign,
    /// Hops traversed so far.
    pub hop_count: u8,
    /// Remaining hop budget; a relay drops the frame at zero.
    pub ttl: u8,
    /// The wrapped packet, serialized.
    pub frame: Vec<u8>,
}
