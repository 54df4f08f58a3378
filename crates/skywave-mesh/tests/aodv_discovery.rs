//! Multi-node route discovery over a simulated topology.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use skywave_core::{Environment, StackConfig};
use skywave_mesh::{MeshRouter, RouteState, RouterAction};
use skywave_proto::{Callsign, Packet, PacketHeader, PacketId, PacketType, Payload, payload};

/// Deterministic environment: real instants (tests pass instants
/// explicitly) and a counter-backed byte source.
#[derive(Clone)]
struct TestEnv {
    counter: Arc<AtomicU64>,
}

impl TestEnv {
    fn new(seed: u64) -> Self {
        Self { counter: Arc::new(AtomicU64::new(seed)) }
    }
}

impl Environment for TestEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        for chunk in buffer.chunks_mut(8) {
            let value = self
                .counter
                .fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed)
                .wrapping_mul(0xBF58_476D_1CE4_E5B9);
            let bytes = value.to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

fn cs(s: &str) -> Callsign {
    Callsign::parse(s).unwrap()
}

/// A line topology where each node only hears its direct neighbours.
struct Chain {
    nodes: Vec<MeshRouter<TestEnv>>,
    names: Vec<Callsign>,
    /// (from, to, packet) still in the air.
    in_flight: Vec<(Callsign, Callsign, Packet)>,
    delivered: Vec<(Callsign, Callsign, Packet)>,
    failures: Vec<Callsign>,
    rreq_broadcasts: HashMap<Callsign, usize>,
}

impl Chain {
    fn new(names: &[&str]) -> Self {
        let names: Vec<Callsign> = names.iter().map(|n| cs(n)).collect();
        let nodes = names
            .iter()
            .enumerate()
            .map(|(i, &callsign)| {
                MeshRouter::new(TestEnv::new(i as u64 + 1), StackConfig::new(callsign))
            })
            .collect();
        Self {
            nodes,
            names,
            in_flight: Vec::new(),
            delivered: Vec::new(),
            failures: Vec::new(),
            rreq_broadcasts: HashMap::new(),
        }
    }

    fn index(&self, callsign: Callsign) -> usize {
        self.names.iter().position(|&n| n == callsign).unwrap()
    }

    fn neighbours(&self, callsign: Callsign) -> Vec<Callsign> {
        let i = self.index(callsign);
        let mut out = Vec::new();
        if i > 0 {
            out.push(self.names[i - 1]);
        }
        if i + 1 < self.names.len() {
            out.push(self.names[i + 1]);
        }
        out
    }

    fn absorb(&mut self, from: Callsign, actions: Vec<RouterAction>) {
        for action in actions {
            match action {
                RouterAction::Broadcast(packet) => {
                    if packet.header.packet_type() == PacketType::RouteRequest {
                        *self.rreq_broadcasts.entry(from).or_insert(0) += 1;
                    }
                    for neighbour in self.neighbours(from) {
                        self.in_flight.push((from, neighbour, packet.clone()));
                    }
                },
                RouterAction::Unicast { next_hop, packet } => {
                    // Unicasts only arrive when the hop is in range.
                    if self.neighbours(from).contains(&next_hop) {
                        self.in_flight.push((from, next_hop, packet));
                    }
                },
                RouterAction::Deliver { source, packet } => {
                    self.delivered.push((from, source, packet));
                },
                RouterAction::DiscoveryFailed { destination } => {
                    self.failures.push(destination);
                },
                RouterAction::Warning(_) => {},
            }
        }
    }

    /// Deliver everything in flight until the air is quiet.
    fn settle(&mut self, now: Instant) {
        for _ in 0..64 {
            if self.in_flight.is_empty() {
                return;
            }
            let batch = std::mem::take(&mut self.in_flight);
            for (from, to, packet) in batch {
                let i = self.index(to);
                let actions = self.nodes[i].handle_packet(now, from, &packet);
                self.absorb(to, actions);
            }
        }
        panic!("topology did not settle");
    }

    fn node(&mut self, callsign: Callsign) -> &mut MeshRouter<TestEnv> {
        let i = self.index(callsign);
        &mut self.nodes[i]
    }
}

fn data_packet(marker: u8) -> Packet {
    let payload = Payload::Request(payload::app::HttpRequest::new("GET", format!("/{marker}")));
    let header = PacketHeader::new(PacketType::Request, PacketId::from_bytes([marker; 8]));
    payload.into_packet(header).unwrap()
}

#[test]
fn three_hop_discovery_and_delivery() {
    let mut chain = Chain::new(&["A1A", "B2B", "C3C", "D4D"]);
    let now = Instant::now();

    // A sends to D with no routes anywhere.
    let actions = {
        let a = chain.node(cs("A1A"));
        a.send_data(now, cs("D4D"), data_packet(1))
    };
    chain.absorb(cs("A1A"), actions);
    chain.settle(now);

    // Exactly one rreq broadcast from each of A, B, C (dedupe), none
    // from D (it answers instead).
    assert_eq!(chain.rreq_broadcasts.get(&cs("A1A")), Some(&1));
    assert_eq!(chain.rreq_broadcasts.get(&cs("B2B")), Some(&1));
    assert_eq!(chain.rreq_broadcasts.get(&cs("C3C")), Some(&1));
    assert_eq!(chain.rreq_broadcasts.get(&cs("D4D")), None);

    // The queued frame flushed through to D.
    assert_eq!(chain.delivered.len(), 1);
    let (at, source, packet) = &chain.delivered[0];
    assert_eq!(*at, cs("D4D"));
    assert_eq!(*source, cs("A1A"));
    assert_eq!(packet.header.packet_type(), PacketType::Request);

    // Intermediate nodes now have forward routes to D.
    assert_eq!(chain.node(cs("B2B")).next_hop(now, cs("D4D")), Some(cs("C3C")));
    assert_eq!(chain.node(cs("C3C")).next_hop(now, cs("D4D")), Some(cs("D4D")));
    // And reverse routes to A.
    assert_eq!(chain.node(cs("C3C")).next_hop(now, cs("A1A")), Some(cs("B2B")));

    // A subsequent send performs no new discovery.
    chain.rreq_broadcasts.clear();
    let actions = {
        let a = chain.node(cs("A1A"));
        assert_eq!(a.route_state(now, cs("D4D")), RouteState::Active);
        a.send_data(now, cs("D4D"), data_packet(2))
    };
    chain.absorb(cs("A1A"), actions);
    chain.settle(now);

    assert!(chain.rreq_broadcasts.is_empty(), "second send re-discovered");
    assert_eq!(chain.delivered.len(), 2);
}

#[test]
fn discovery_timeout_reports_no_route() {
    // A single node with no neighbours to answer.
    let mut chain = Chain::new(&["A1A"]);
    let t0 = Instant::now();

    let actions = chain.node(cs("A1A")).send_data(t0, cs("ZZ9"), data_packet(3));
    chain.absorb(cs("A1A"), actions);
    assert_eq!(chain.node(cs("A1A")).route_state(t0, cs("ZZ9")), RouteState::Discovering);

    let config = StackConfig::new(cs("A1A"));
    let retry_step = config.route_discovery_timeout + Duration::from_millis(10);

    // Each timeout triggers a fresh attempt until retries run out.
    let mut now = t0;
    for _ in 0..config.route_discovery_retries {
        now += retry_step;
        let actions = chain.node(cs("A1A")).tick(now);
        chain.absorb(cs("A1A"), actions);
        assert!(chain.failures.is_empty());
    }

    now += retry_step;
    let actions = chain.node(cs("A1A")).tick(now);
    chain.absorb(cs("A1A"), actions);
    assert_eq!(chain.failures, vec![cs("ZZ9")]);
    assert_eq!(chain.node(cs("A1A")).pending_discoveries(), 0);
}

#[test]
fn duplicate_relay_instance_is_suppressed() {
    let mut chain = Chain::new(&["A1A", "B2B", "C3C"]);
    let now = Instant::now();

    let actions = chain.node(cs("A1A")).send_data(now, cs("C3C"), data_packet(4));
    chain.absorb(cs("A1A"), actions);
    chain.settle(now);
    assert_eq!(chain.delivered.len(), 1);

    // Capture the relay wrapper A emits with its route installed.
    let actions = chain.node(cs("A1A")).send_data(now, cs("C3C"), data_packet(5));
    let wrapper = match &actions[..] {
        [RouterAction::Unicast { packet, .. }] => packet.clone(),
        other => panic!("expected an immediate unicast, got {other:?}"),
    };

    // First copy forwards; a link echo of the same instance does not.
    let first = chain.node(cs("B2B")).handle_packet(now, cs("A1A"), &wrapper);
    assert!(first.iter().any(|a| matches!(a, RouterAction::Unicast { .. })));
    let before = chain.node(cs("B2B")).counters().duplicates_suppressed;
    let echoed = chain.node(cs("B2B")).handle_packet(now, cs("A1A"), &wrapper);
    assert!(echoed.is_empty(), "echo forwarded: {echoed:?}");
    assert_eq!(chain.node(cs("B2B")).counters().duplicates_suppressed, before + 1);

    // An end-to-end retransmission is a fresh wrap of the same inner
    // fragment and must still pass.
    let actions = chain.node(cs("A1A")).send_data(now, cs("C3C"), data_packet(5));
    let retry = match &actions[..] {
        [RouterAction::Unicast { packet, .. }] => packet.clone(),
        other => panic!("expected an immediate unicast, got {other:?}"),
    };
    let forwarded = chain.node(cs("B2B")).handle_packet(now, cs("A1A"), &retry);
    assert!(forwarded.iter().any(|a| matches!(a, RouterAction::Unicast { .. })));
}

#[test]
fn route_error_propagates_to_precursors() {
    let env = TestEnv::new(99);
    let mut router = MeshRouter::new(env.clone(), StackConfig::new(cs("B2B")));
    let now = Instant::now();

    let make = |payload: Payload| {
        let header = PacketHeader::new(payload.packet_type(), PacketId::from_bytes([9; 8]));
        payload.into_packet(header).unwrap()
    };

    // A floods looking for C; B learns the reverse route to A.
    let rreq = make(Payload::RouteRequest(payload::mesh::RouteRequest {
        originator: cs("A1A"),
        destination: cs("C3C"),
        originator_seq: 1,
        broadcast_id: 7,
        hop_count: 0,
        ttl: 8,
    }));
    let actions = router.handle_packet(now, cs("A1A"), &rreq);
    assert!(actions.iter().any(|a| matches!(a, RouterAction::Broadcast(_))));

    // N answers for C; B installs the forward route and records A as a
    // precursor while forwarding the reply.
    let rrep = make(Payload::RouteReply(payload::mesh::RouteReply {
        originator: cs("A1A"),
        destination: cs("C3C"),
        destination_seq: 5,
        hop_count: 1,
        lifetime_ms: 120_000,
    }));
    let actions = router.handle_packet(now, cs("N0N"), &rrep);
    assert!(
        actions
            .iter()
            .any(|a| matches!(a, RouterAction::Unicast { next_hop, .. } if *next_hop == cs("A1A")))
    );
    assert_eq!(router.next_hop(now, cs("C3C")), Some(cs("N0N")));

    // N loses C: B invalidates and tells A, which depended on the route.
    let rerr = make(Payload::RouteError(payload::mesh::RouteError {
        unreachable: vec![payload::mesh::UnreachableDestination {
            destination: cs("C3C"),
            destination_seq: 6,
        }],
    }));
    let actions = router.handle_packet(now, cs("N0N"), &rerr);
    match &actions[..] {
        [RouterAction::Unicast { next_hop, packet }] => {
            assert_eq!(*next_hop, cs("A1A"));
            assert_eq!(packet.header.packet_type(), PacketType::RouteError);
        },
        other => panic!("expected rerr to one precursor, got {other:?}"),
    }
    assert_eq!(router.route_state(now, cs("C3C")), RouteState::Invalid);
    assert_eq!(router.next_hop(now, cs("C3C")), None);
}

#[test]
fn exhausted_ttl_drops_relay_with_warning() {
    let env = TestEnv::new(100);
    let mut router = MeshRouter::new(env, StackConfig::new(cs("B2B")));
    let now = Instant::now();

    let inner = data_packet(9);
    let relay = Payload::DataRelay(payload::mesh::DataRelay {
        source: cs("A1A"),
        destination: cs("C3C"),
        hop_count: 8,
        ttl: 0,
        frame: inner.to_wire(),
    });
    let header = PacketHeader::new(relay.packet_type(), PacketId::from_bytes([4; 8]));
    let packet = relay.into_packet(header).unwrap();

    let actions = router.handle_packet(now, cs("A1A"), &packet);
    assert!(actions.iter().any(|a| matches!(
        a,
        RouterAction::Warning(skywave_mesh::MeshWarning::TtlExpired { .. })
    )));
    assert!(!actions.iter().any(|a| matches!(a, RouterAction::Unicast { .. })));
    assert_eq!(router.counters().ttl_expired, 1);
}

#[test]
fn fresh_discovery_uses_new_broadcast_id() {
    let mut chain = Chain::new(&["A1A"]);
    let t0 = Instant::now();

    let actions = chain.node(cs("A1A")).send_data(t0, cs("ZZ9"), data_packet(5));
    chain.absorb(cs("A1A"), actions);
    let first = chain.node(cs("A1A")).pending_broadcast_id(cs("ZZ9")).unwrap();

    let config = StackConfig::new(cs("A1A"));
    let now = t0 + config.route_discovery_timeout + Duration::from_millis(10);
    let actions = chain.node(cs("A1A")).tick(now);
    chain.absorb(cs("A1A"), actions);

    let second = chain.node(cs("A1A")).pending_broadcast_id(cs("ZZ9")).unwrap();
    assert_ne!(first, second, "retry must use a fresh broadcast id");
}
