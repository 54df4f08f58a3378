//! Routing table with AODV freshness semantics.
//!
//! One entry per destination. Acceptance follows the AODV rule: a newer
//! destination sequence always wins; an equal sequence wins only with a
//! strictly lower hop count. The link-quality metric is advisory and never
//! overrides freshness. Entries age out on a lifetime refreshed by data
//! traversal, and an entry invalidated by a route error stays visible as
//! invalid until purged so the state machine can report it.

use std::{
    collections::{HashMap, HashSet},
    ops::{Add, Sub},
    time::Duration,
};

use skywave_proto::Callsign;

/// Lifecycle of the route to one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    /// No entry and no discovery in flight.
    Idle,
    /// Discovery broadcast outstanding.
    Discovering,
    /// Valid entry installed.
    Active,
    /// Entry present but past its lifetime.
    Stale,
    /// Entry invalidated by a route error.
    Invalid,
}

/// One routing table entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteEntry<I> {
    /// Destination this entry reaches.
    pub destination: Callsign,
    /// Neighbour to hand frames to.
    pub next_hop: Callsign,
    /// Hops to the destination.
    pub hop_count: u8,
    /// Destination sequence number (freshness).
    pub destination_seq: u32,
    /// Wall-clock expiry.
    pub expires_at: I,
    /// Hop count aggregated with observed link quality; advisory.
    pub metric: f32,
    invalidated: bool,
}

impl<I> RouteEntry<I> {
    /// Build a fresh entry.
    pub fn new(
        destination: Callsign,
        next_hop: Callsign,
        hop_count: u8,
        destination_seq: u32,
        expires_at: I,
        metric: f32,
    ) -> Self {
        Self {
            destination,
            next_hop,
            hop_count,
            destination_seq,
            expires_at,
            metric,
            invalidated: false,
        }
    }

    /// Whether a route error has invalidated this entry.
    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }
}

/// Outcome of offering an entry to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Entry accepted (possibly replacing a staler one).
    Installed,
    /// Entry rejected: the stored route is fresher.
    Rejected,
    /// Entry accepted after evicting another destination for capacity.
    InstalledWithEviction,
}

/// Bounded per-destination routing table.
#[derive(Debug)]
pub struct RoutingTable<I> {
    routes: HashMap<Callsign, RouteEntry<I>>,
    precursors: HashMap<Callsign, HashSet<Callsign>>,
    capacity: usize,
    evictions: u64,
}

impl<I> RoutingTable<I>
where
    I: Copy + Ord + Add<Duration, Output = I> + Sub<Duration, Output = I>,
{
    /// Create a table bounded to `capacity` destinations.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            routes: HashMap::new(),
            precursors: HashMap::new(),
            capacity: capacity.max(1),
            evictions: 0,
        }
    }

    /// Number of entries, including stale and invalidated ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// True when the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Entries evicted for capacity so far.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Valid route to `destination`: installed, unexpired, not
    /// invalidated.
    #[must_use]
    pub fn lookup(&self, now: I, destination: Callsign) -> Option<&RouteEntry<I>> {
        self.routes
            .get(&destination)
            .filter(|e| !e.invalidated && e.expires_at > now)
    }

    /// Raw entry regardless of validity, for state reporting.
    #[must_use]
    pub fn entry(&self, destination: Callsign) -> Option<&RouteEntry<I>> {
        self.routes.get(&destination)
    }

    /// Offer an entry under the AODV freshness rule.
    pub fn install(&mut self, now: I, entry: RouteEntry<I>) -> InstallOutcome {
        if let Some(stored) = self.routes.get(&entry.destination) {
            let stored_usable = !stored.invalidated && stored.expires_at > now;
            if stored_usable {
                let fresher = entry.destination_seq > stored.destination_seq;
                let tie_better = entry.destination_seq == stored.destination_seq
                    && entry.hop_count < stored.hop_count;
                if !fresher && !tie_better {
                    return InstallOutcome::Rejected;
                }
            } else if entry.destination_seq < stored.destination_seq {
                // Even a dead entry remembers the freshness floor.
                return InstallOutcome::Rejected;
            }
            self.routes.insert(entry.destination, entry);
            return InstallOutcome::Installed;
        }

        let mut evicted = false;
        if self.routes.len() >= self.capacity {
            let victim = self
                .routes
                .values()
                .min_by_key(|e| e.expires_at)
                .map(|e| e.destination);
            if let Some(destination) = victim {
                self.routes.remove(&destination);
                self.precursors.remove(&destination);
                self.evictions += 1;
                evicted = true;
            }
        }

        self.routes.insert(entry.destination, entry);
        if evicted { InstallOutcome::InstalledWithEviction } else { InstallOutcome::Installed }
    }

    /// Extend the lifetime of a route data just traversed.
    pub fn refresh(&mut self, now: I, destination: Callsign, lifetime: Duration) {
        if let Some(entry) = self.routes.get_mut(&destination) {
            if !entry.invalidated {
                let renewed = now + lifetime;
                if renewed > entry.expires_at {
                    entry.expires_at = renewed;
                }
            }
        }
    }

    /// Mark a route invalid and bump its sequence so stale advertisements
    /// cannot resurrect it. Returns the stored sequence after the bump.
    pub fn invalidate(&mut self, destination: Callsign) -> Option<u32> {
        self.routes.get_mut(&destination).map(|entry| {
            entry.invalidated = true;
            entry.destination_seq = entry.destination_seq.wrapping_add(1);
            entry.destination_seq
        })
    }

    /// Destinations currently routed through `next_hop`.
    #[must_use]
    pub fn destinations_via(&self, next_hop: Callsign) -> Vec<Callsign> {
        self.routes
            .values()
            .filter(|e| !e.invalidated && e.next_hop == next_hop)
            .map(|e| e.destination)
            .collect()
    }

    /// Record that `precursor` relies on the route to `destination`.
    pub fn add_precursor(&mut self, destination: Callsign, precursor: Callsign) {
        self.precursors.entry(destination).or_default().insert(precursor);
    }

    /// Neighbours that rely on the route to `destination`.
    #[must_use]
    pub fn precursors(&self, destination: Callsign) -> Vec<Callsign> {
        self.precursors
            .get(&destination)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// State of the route to `destination` (discovery state is layered on
    /// by the router).
    #[must_use]
    pub fn state(&self, now: I, destination: Callsign) -> RouteState {
        match self.routes.get(&destination) {
            None => RouteState::Idle,
            Some(e) if e.invalidated => RouteState::Invalid,
            Some(e) if e.expires_at <= now => RouteState::Stale,
            Some(_) => RouteState::Active,
        }
    }

    /// Drop invalidated entries and entries expired past a grace period.
    pub fn purge(&mut self, now: I, grace: Duration) {
        let dead: Vec<Callsign> = self
            .routes
            .values()
            .filter(|e| e.invalidated || e.expires_at + grace <= now)
            .map(|e| e.destination)
            .collect();
        for destination in dead {
            self.routes.remove(&destination);
            self.precursors.remove(&destination);
        }
    }
}
