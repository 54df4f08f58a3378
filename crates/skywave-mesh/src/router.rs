//! On-demand mesh router.
//!
//! A pure state machine in the action style: the driver feeds it locally
//! originated sends, packets heard on the air, and clock ticks; it returns
//! broadcasts, unicasts, local deliveries, and warnings for the driver to
//! execute. Route discovery is AODV-flavoured: flood a route request,
//! unicast the reply back along the reverse path, repair with route
//! errors, and queue frames for unreachable destinations under a bounded
//! store-and-forward policy.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use skywave_core::{
    BroadcastKey, Environment, FragmentKey, Freshness, RecentlySeen, StackConfig,
};
use skywave_proto::{
    Callsign, Packet, PacketHeader, PacketType, Payload,
    payload::mesh::{DataRelay, RouteError, RouteReply, RouteRequest, UnreachableDestination},
};

use crate::table::{RouteEntry, RouteState, RoutingTable};

/// Actions the driver executes after feeding the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterAction {
    /// Transmit to every neighbour in range.
    Broadcast(Packet),
    /// Transmit to one neighbour.
    Unicast {
        /// Neighbour to address.
        next_hop: Callsign,
        /// The packet to send.
        packet: Packet,
    },
    /// Hand a packet up to the local stack.
    Deliver {
        /// Originating station.
        source: Callsign,
        /// The unwrapped packet.
        packet: Packet,
    },
    /// Route discovery gave up; the caller waiting on this destination
    /// gets `NoRoute`.
    DiscoveryFailed {
        /// The unreachable destination.
        destination: Callsign,
    },
    /// Non-fatal resource or protocol event worth logging.
    Warning(MeshWarning),
}

/// Non-fatal events surfaced to the driver's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshWarning {
    /// A relay arrived with no TTL budget left.
    TtlExpired {
        /// Destination of the dropped relay.
        destination: Callsign,
    },
    /// A queued frame aged out before a route appeared.
    StoreForwardDropped {
        /// Destination of the dropped frame.
        destination: Callsign,
    },
    /// The store-and-forward queue was full; the newest frame was
    /// dropped.
    StoreForwardFull {
        /// Destination of the dropped frame.
        destination: Callsign,
    },
}

/// Router event counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeshCounters {
    /// Route requests originated.
    pub rreq_sent: u64,
    /// Route requests rebroadcast for others.
    pub rreq_relayed: u64,
    /// Route replies originated.
    pub rrep_sent: u64,
    /// Data relays forwarded.
    pub relays_forwarded: u64,
    /// Packets delivered to the local stack.
    pub delivered: u64,
    /// Duplicate floods and relays suppressed.
    pub duplicates_suppressed: u64,
    /// Relays dropped for TTL.
    pub ttl_expired: u64,
    /// Relays with no route and no queue slot.
    pub no_route: u64,
    /// Frames that could not be encoded or decoded.
    pub malformed: u64,
}

#[derive(Debug)]
struct PendingDiscovery<I> {
    broadcast_id: u32,
    started_at: I,
    retries: u8,
}

#[derive(Debug)]
struct QueuedFrame<I> {
    packet: Packet,
    enqueued_at: I,
}

/// The mesh router for one station.
pub struct MeshRouter<E: Environment> {
    env: E,
    config: StackConfig,
    table: RoutingTable<E::Instant>,
    pending: HashMap<Callsign, PendingDiscovery<E::Instant>>,
    store: HashMap<Callsign, VecDeque<QueuedFrame<E::Instant>>>,
    seen_broadcasts: RecentlySeen<BroadcastKey>,
    seen_relays: RecentlySeen<FragmentKey>,
    originator_seq: u32,
    link_quality: f32,
    counters: MeshCounters,
}

impl<E: Environment> MeshRouter<E>
where
    E::Instant: std::ops::Add<Duration, Output = E::Instant>
        + std::ops::Sub<Duration, Output = E::Instant>,
{
    /// Create a router for the configured callsign.
    pub fn new(env: E, config: StackConfig) -> Self {
        let seen_broadcasts = RecentlySeen::new(config.seen_broadcasts_capacity);
        let seen_relays = RecentlySeen::new(config.seen_fragments_capacity);
        let table = RoutingTable::new(config.routing_table_capacity);
        Self {
            env,
            config,
            table,
            pending: HashMap::new(),
            store: HashMap::new(),
            seen_broadcasts,
            seen_relays,
            originator_seq: 0,
            link_quality: 1.0,
            counters: MeshCounters::default(),
        }
    }

    /// This station's callsign.
    #[must_use]
    pub fn callsign(&self) -> Callsign {
        self.config.callsign
    }

    /// Event counters.
    #[must_use]
    pub fn counters(&self) -> MeshCounters {
        self.counters
    }

    /// Discoveries currently in flight.
    #[must_use]
    pub fn pending_discoveries(&self) -> usize {
        self.pending.len()
    }

    /// Broadcast id of the in-flight discovery for `destination`, if any.
    #[must_use]
    pub fn pending_broadcast_id(&self, destination: Callsign) -> Option<u32> {
        self.pending.get(&destination).map(|p| p.broadcast_id)
    }

    /// Update the link-quality term folded into new route metrics, from
    /// the modem's SNR tracking. Clamped to `[0, 1]`.
    pub fn set_link_quality(&mut self, quality: f32) {
        self.link_quality = quality.clamp(0.0, 1.0);
    }

    /// Lifecycle state of the route to `destination`.
    #[must_use]
    pub fn route_state(&self, now: E::Instant, destination: Callsign) -> RouteState {
        if self.pending.contains_key(&destination) {
            return RouteState::Discovering;
        }
        self.table.state(now, destination)
    }

    /// Valid next hop toward `destination`, if one is installed.
    #[must_use]
    pub fn next_hop(&self, now: E::Instant, destination: Callsign) -> Option<Callsign> {
        self.table.lookup(now, destination).map(|e| e.next_hop)
    }

    /// Send a locally originated packet toward `destination`.
    ///
    /// With a valid route the packet goes out immediately, wrapped in a
    /// data relay. Otherwise it is queued under the store-and-forward
    /// policy and a route discovery starts (or continues).
    pub fn send_data(
        &mut self,
        now: E::Instant,
        destination: Callsign,
        inner: Packet,
    ) -> Vec<RouterAction> {
        let mut actions = Vec::new();

        if destination == self.config.callsign {
            self.counters.delivered += 1;
            actions.push(RouterAction::Deliver { source: self.config.callsign, packet: inner });
            return actions;
        }

        let relay = DataRelay {
            source: self.config.callsign,
            destination,
            hop_count: 0,
            ttl: self.config.mesh_ttl,
            frame: inner.to_wire(),
        };
        let Some(packet) = self.control_packet(Payload::DataRelay(relay)) else {
            return actions;
        };

        if let Some(entry) = self.table.lookup(now, destination) {
            let next_hop = entry.next_hop;
            self.table.refresh(now, destination, self.config.route_lifetime);
            actions.push(RouterAction::Unicast { next_hop, packet });
            return actions;
        }

        self.enqueue_store(now, destination, packet, &mut actions);
        self.start_discovery(now, destination, &mut actions);
        actions
    }

    /// Process a packet heard from neighbour `from`.
    pub fn handle_packet(
        &mut self,
        now: E::Instant,
        from: Callsign,
        packet: &Packet,
    ) -> Vec<RouterAction> {
        match packet.header.packet_type() {
            PacketType::RouteRequest => match Payload::from_packet(packet) {
                Ok(Payload::RouteRequest(rreq)) => self.handle_rreq(now, from, &rreq),
                _ => self.malformed(),
            },
            PacketType::RouteReply => match Payload::from_packet(packet) {
                Ok(Payload::RouteReply(rrep)) => self.handle_rrep(now, from, &rrep),
                _ => self.malformed(),
            },
            PacketType::RouteError => match Payload::from_packet(packet) {
                Ok(Payload::RouteError(rerr)) => self.handle_rerr(now, from, &rerr),
                _ => self.malformed(),
            },
            PacketType::DataRelay => match Payload::from_packet(packet) {
                Ok(Payload::DataRelay(relay)) => {
                    self.handle_relay(now, from, packet.header.packet_id(), relay)
                },
                _ => self.malformed(),
            },
            _ => {
                // Link-local traffic (acks, unwrapped frames from a direct
                // neighbour): hand it up.
                self.counters.delivered += 1;
                vec![RouterAction::Deliver { source: from, packet: packet.clone() }]
            },
        }
    }

    /// Advance time: retry or fail discoveries, expire queued frames,
    /// purge dead routes.
    pub fn tick(&mut self, now: E::Instant) -> Vec<RouterAction> {
        let mut actions = Vec::new();

        let timeout = self.config.route_discovery_timeout;
        let expired: Vec<Callsign> = self
            .pending
            .iter()
            .filter(|(_, p)| now >= p.started_at + timeout)
            .map(|(d, _)| *d)
            .collect();

        for destination in expired {
            let retries_left = self
                .pending
                .get(&destination)
                .map(|p| p.retries < self.config.route_discovery_retries)
                .unwrap_or(false);

            if retries_left {
                self.originator_seq = self.originator_seq.wrapping_add(1);
                let broadcast_id = self.env.random_u64() as u32;
                if let Some(p) = self.pending.get_mut(&destination) {
                    p.retries += 1;
                    p.started_at = now;
                    p.broadcast_id = broadcast_id;
                }
                self.broadcast_rreq(destination, broadcast_id, &mut actions);
            } else {
                self.pending.remove(&destination);
                actions.push(RouterAction::DiscoveryFailed { destination });
                if self.config.store_forward.capacity == 0 {
                    self.store.remove(&destination);
                }
            }
        }

        // Age out queued frames.
        let ttl = self.config.store_forward.ttl;
        for (destination, queue) in &mut self.store {
            while let Some(front) = queue.front() {
                if now >= front.enqueued_at + ttl {
                    queue.pop_front();
                    actions.push(RouterAction::Warning(MeshWarning::StoreForwardDropped {
                        destination: *destination,
                    }));
                } else {
                    break;
                }
            }
        }
        self.store.retain(|_, q| !q.is_empty());

        self.table.purge(now, self.config.route_lifetime);
        actions
    }

    fn handle_rreq(
        &mut self,
        now: E::Instant,
        from: Callsign,
        rreq: &RouteRequest,
    ) -> Vec<RouterAction> {
        let mut actions = Vec::new();

        if rreq.originator == self.config.callsign {
            // Our own flood echoed back.
            return actions;
        }

        let key = BroadcastKey { originator: rreq.originator, broadcast_id: rreq.broadcast_id };
        if self.seen_broadcasts.offer(key) == Freshness::Duplicate {
            self.counters.duplicates_suppressed += 1;
            return actions;
        }

        // Reverse route to the originator through the previous hop.
        let hops = rreq.hop_count.saturating_add(1);
        self.table.install(
            now,
            RouteEntry::new(
                rreq.originator,
                from,
                hops,
                rreq.originator_seq,
                now + self.config.route_lifetime,
                self.metric(hops),
            ),
        );
        self.flush_store(now, rreq.originator, &mut actions);

        if rreq.destination == self.config.callsign {
            // We are the destination: answer with our own sequence.
            self.originator_seq = self.originator_seq.wrapping_add(1);
            let rrep = RouteReply {
                originator: rreq.originator,
                destination: self.config.callsign,
                destination_seq: self.originator_seq,
                hop_count: 0,
                lifetime_ms: self.config.route_lifetime.as_millis() as u64,
            };
            if let Some(packet) = self.control_packet(Payload::RouteReply(rrep)) {
                self.counters.rrep_sent += 1;
                actions.push(RouterAction::Unicast { next_hop: from, packet });
            }
            return actions;
        }

        if let Some(route) = self.table.lookup(now, rreq.destination) {
            // Intermediate reply from a fresh route.
            let rrep = RouteReply {
                originator: rreq.originator,
                destination: rreq.destination,
                destination_seq: route.destination_seq,
                hop_count: route.hop_count,
                lifetime_ms: self.config.route_lifetime.as_millis() as u64,
            };
            if let Some(packet) = self.control_packet(Payload::RouteReply(rrep)) {
                self.counters.rrep_sent += 1;
                actions.push(RouterAction::Unicast { next_hop: from, packet });
            }
            return actions;
        }

        if rreq.ttl > 1 {
            let forwarded = RouteRequest {
                hop_count: hops,
                ttl: rreq.ttl - 1,
                ..rreq.clone()
            };
            if let Some(packet) = self.control_packet(Payload::RouteRequest(forwarded)) {
                self.counters.rreq_relayed += 1;
                actions.push(RouterAction::Broadcast(packet));
            }
        } else {
            self.counters.ttl_expired += 1;
        }

        actions
    }

    fn handle_rrep(
        &mut self,
        now: E::Instant,
        from: Callsign,
        rrep: &RouteReply,
    ) -> Vec<RouterAction> {
        let mut actions = Vec::new();

        // Forward route to the replied destination.
        let hops = rrep.hop_count.saturating_add(1);
        let lifetime = Duration::from_millis(rrep.lifetime_ms).min(self.config.route_lifetime);
        self.table.install(
            now,
            RouteEntry::new(
                rrep.destination,
                from,
                hops,
                rrep.destination_seq,
                now + lifetime,
                self.metric(hops),
            ),
        );

        if rrep.originator == self.config.callsign {
            // Discovery complete.
            self.pending.remove(&rrep.destination);
            self.flush_store(now, rrep.destination, &mut actions);
            return actions;
        }

        // Forward along the reverse route toward the originator.
        if let Some(reverse) = self.table.lookup(now, rrep.originator) {
            let reverse_hop = reverse.next_hop;
            self.table.add_precursor(rrep.destination, reverse_hop);
            self.table.add_precursor(rrep.originator, from);

            let forwarded = RouteReply { hop_count: hops, ..rrep.clone() };
            if let Some(packet) = self.control_packet(Payload::RouteReply(forwarded)) {
                actions.push(RouterAction::Unicast { next_hop: reverse_hop, packet });
            }
        }
        // Also serve anything we queued for that destination ourselves.
        self.flush_store(now, rrep.destination, &mut actions);
        actions
    }

    fn handle_rerr(
        &mut self,
        _now: E::Instant,
        from: Callsign,
        rerr: &RouteError,
    ) -> Vec<RouterAction> {
        let mut actions = Vec::new();
        let mut propagate = Vec::new();

        for unreachable in &rerr.unreachable {
            let destination = unreachable.destination;
            let via_sender = self
                .table
                .entry(destination)
                .map(|e| e.next_hop == from)
                .unwrap_or(false);
            if !via_sender {
                continue;
            }
            let seq = self.table.invalidate(destination).unwrap_or(unreachable.destination_seq);
            propagate.push((destination, seq));
        }

        for (destination, seq) in propagate {
            let precursors = self.table.precursors(destination);
            if precursors.is_empty() {
                continue;
            }
            let payload = Payload::RouteError(RouteError {
                unreachable: vec![UnreachableDestination { destination, destination_seq: seq }],
            });
            for precursor in precursors {
                if let Some(packet) = self.control_packet(payload.clone()) {
                    actions.push(RouterAction::Unicast { next_hop: precursor, packet });
                }
            }
        }
        actions
    }

    fn handle_relay(
        &mut self,
        now: E::Instant,
        from: Callsign,
        wrapper_id: skywave_proto::PacketId,
        relay: DataRelay,
    ) -> Vec<RouterAction> {
        let mut actions = Vec::new();

        let Ok(inner_header) = PacketHeader::from_bytes(&relay.frame) else {
            self.counters.malformed += 1;
            return actions;
        };

        // Loop freedom: this relay instance is never handled twice. Each
        // wrap (including an end-to-end retransmission of the same inner
        // fragment) carries a fresh wrapper id, so retries pass while
        // loops and link echoes are suppressed.
        let key = FragmentKey {
            originator: relay.source,
            id: wrapper_id,
            sequence: inner_header.sequence(),
        };
        if self.seen_relays.offer(key) == Freshness::Duplicate {
            self.counters.duplicates_suppressed += 1;
            return actions;
        }

        // Data traversal refreshes both directions.
        let reverse_hops = relay.hop_count.saturating_add(1);
        self.table.install(
            now,
            RouteEntry::new(
                relay.source,
                from,
                reverse_hops,
                0,
                now + self.config.route_lifetime,
                self.metric(reverse_hops),
            ),
        );
        self.table.refresh(now, relay.source, self.config.route_lifetime);
        self.table.refresh(now, relay.destination, self.config.route_lifetime);
        // Data traversal just proved a path back to the source; anything
        // queued for it can go.
        self.flush_store(now, relay.source, &mut actions);

        if relay.destination == self.config.callsign {
            match Packet::decode(&relay.frame) {
                Ok(inner) => {
                    self.counters.delivered += 1;
                    actions.push(RouterAction::Deliver { source: relay.source, packet: inner });
                },
                Err(_) => self.counters.malformed += 1,
            }
            return actions;
        }

        if relay.ttl == 0 {
            self.counters.ttl_expired += 1;
            actions.push(RouterAction::Warning(MeshWarning::TtlExpired {
                destination: relay.destination,
            }));
            return actions;
        }

        let forwarded = DataRelay {
            hop_count: relay.hop_count.saturating_add(1),
            ttl: relay.ttl - 1,
            ..relay.clone()
        };
        let destination = forwarded.destination;
        let Some(packet) = self.control_packet(Payload::DataRelay(forwarded)) else {
            return actions;
        };

        if let Some(route) = self.table.lookup(now, destination) {
            let next_hop = route.next_hop;
            self.table.refresh(now, destination, self.config.route_lifetime);
            self.counters.relays_forwarded += 1;
            actions.push(RouterAction::Unicast { next_hop, packet });
            return actions;
        }

        // No route: report back toward the source and try to repair.
        self.counters.no_route += 1;
        let seq = self.table.entry(destination).map(|e| e.destination_seq).unwrap_or(0);
        let rerr = Payload::RouteError(RouteError {
            unreachable: vec![UnreachableDestination { destination, destination_seq: seq }],
        });
        if let Some(rerr_packet) = self.control_packet(rerr) {
            if let Some(back) = self.table.lookup(now, relay.source) {
                actions
                    .push(RouterAction::Unicast { next_hop: back.next_hop, packet: rerr_packet });
            } else {
                actions.push(RouterAction::Broadcast(rerr_packet));
            }
        }

        self.enqueue_store(now, destination, packet, &mut actions);
        self.start_discovery(now, destination, &mut actions);
        actions
    }

    fn start_discovery(
        &mut self,
        now: E::Instant,
        destination: Callsign,
        actions: &mut Vec<RouterAction>,
    ) {
        if self.pending.contains_key(&destination) {
            return;
        }
        self.originator_seq = self.originator_seq.wrapping_add(1);
        let broadcast_id = self.env.random_u64() as u32;
        self.pending.insert(
            destination,
            PendingDiscovery { broadcast_id, started_at: now, retries: 0 },
        );
        self.broadcast_rreq(destination, broadcast_id, actions);
    }

    fn broadcast_rreq(
        &mut self,
        destination: Callsign,
        broadcast_id: u32,
        actions: &mut Vec<RouterAction>,
    ) {
        let rreq = RouteRequest {
            originator: self.config.callsign,
            destination,
            originator_seq: self.originator_seq,
            broadcast_id,
            hop_count: 0,
            ttl: self.config.mesh_ttl,
        };
        // Never forward our own flood when neighbours echo it back.
        self.seen_broadcasts
            .offer(BroadcastKey { originator: self.config.callsign, broadcast_id });
        if let Some(packet) = self.control_packet(Payload::RouteRequest(rreq)) {
            self.counters.rreq_sent += 1;
            actions.push(RouterAction::Broadcast(packet));
        }
    }

    fn enqueue_store(
        &mut self,
        now: E::Instant,
        destination: Callsign,
        packet: Packet,
        actions: &mut Vec<RouterAction>,
    ) {
        let policy = self.config.store_forward;
        if policy.capacity == 0 {
            return;
        }
        let queue = self.store.entry(destination).or_default();
        if queue.len() >= policy.capacity {
            actions.push(RouterAction::Warning(MeshWarning::StoreForwardFull { destination }));
            return;
        }
        queue.push_back(QueuedFrame { packet, enqueued_at: now });
    }

    fn flush_store(
        &mut self,
        now: E::Instant,
        destination: Callsign,
        actions: &mut Vec<RouterAction>,
    ) {
        let Some(route) = self.table.lookup(now, destination) else {
            return;
        };
        let next_hop = route.next_hop;
        let Some(queue) = self.store.remove(&destination) else {
            return;
        };
        for frame in queue {
            actions.push(RouterAction::Unicast { next_hop, packet: frame.packet });
        }
    }

    fn metric(&self, hop_count: u8) -> f32 {
        f32::from(hop_count) + (1.0 - self.link_quality)
    }

    fn control_packet(&mut self, payload: Payload) -> Option<Packet> {
        let header = PacketHeader::new(payload.packet_type(), self.env.random_packet_id());
        match payload.into_packet(header) {
            Ok(packet) => Some(packet),
            Err(_) => {
                self.counters.malformed += 1;
                None
            },
        }
    }

    fn malformed(&mut self) -> Vec<RouterAction> {
        self.counters.malformed += 1;
        Vec::new()
    }
}
