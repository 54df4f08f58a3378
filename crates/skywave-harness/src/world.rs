//! Multi-node mesh simulation.
//!
//! Every node runs a real router, reassembler, and duplicate window on
//! the shared virtual clock; the world moves packets between linked
//! nodes and records what reaches each upper layer. No reliability layer
//! runs here: the world is for routing semantics, the station tests own
//! the ACK path.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use skywave_core::{Environment, FragmentKey, Freshness, RecentlySeen, StackConfig};
use skywave_mesh::{MeshRouter, RouteState, RouterAction};
use skywave_proto::{
    Callsign, Packet, PacketFlags, PacketType, Payload,
    fragment::fragment_message,
    reassembly::{CompleteMessage, Reassembler, ReassemblyConfig},
};

use crate::sim_env::{SimEnv, SimInstant};

/// A message that completed reassembly at some node.
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    /// Node that received it.
    pub at: Callsign,
    /// Originating node.
    pub source: Callsign,
    /// The reassembled message.
    pub message: CompleteMessage,
}

struct WorldNode {
    router: MeshRouter<SimEnv>,
    reassembler: Reassembler<SimInstant>,
    seen: RecentlySeen<FragmentKey>,
}

/// The simulated mesh.
pub struct MeshWorld {
    env: SimEnv,
    nodes: BTreeMap<Callsign, WorldNode>,
    links: BTreeSet<(Callsign, Callsign)>,
    in_flight: VecDeque<(Callsign, Callsign, Packet)>,
    /// Messages that reached their destination's upper layer.
    pub delivered: Vec<DeliveredMessage>,
    /// `(node, destination)` pairs whose discovery gave up.
    pub failures: Vec<(Callsign, Callsign)>,
}

impl MeshWorld {
    /// Empty world on a seeded clock.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            env: SimEnv::with_seed(seed),
            nodes: BTreeMap::new(),
            links: BTreeSet::new(),
            in_flight: VecDeque::new(),
            delivered: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// The shared environment (for advancing the clock).
    #[must_use]
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Add a node with default configuration.
    pub fn add_node(&mut self, callsign: Callsign) {
        self.add_node_with_config(StackConfig::new(callsign));
    }

    /// Add a node with explicit configuration.
    pub fn add_node_with_config(&mut self, config: StackConfig) {
        let callsign = config.callsign;
        let node = WorldNode {
            router: MeshRouter::new(self.env.clone(), config),
            reassembler: Reassembler::new(ReassemblyConfig::default()),
            seen: RecentlySeen::new(512),
        };
        self.nodes.insert(callsign, node);
    }

    fn link_key(a: Callsign, b: Callsign) -> (Callsign, Callsign) {
        if a <= b { (a, b) } else { (b, a) }
    }

    /// Connect two nodes bidirectionally.
    pub fn link(&mut self, a: Callsign, b: Callsign) {
        self.links.insert(Self::link_key(a, b));
    }

    /// Cut the link between two nodes.
    pub fn unlink(&mut self, a: Callsign, b: Callsign) {
        self.links.remove(&Self::link_key(a, b));
    }

    fn linked(&self, a: Callsign, b: Callsign) -> bool {
        self.links.contains(&Self::link_key(a, b))
    }

    fn neighbours(&self, node: Callsign) -> Vec<Callsign> {
        self.nodes
            .keys()
            .copied()
            .filter(|&other| other != node && self.linked(node, other))
            .collect()
    }

    /// Route state as one node sees one destination.
    #[must_use]
    pub fn route_state(&self, node: Callsign, destination: Callsign) -> Option<RouteState> {
        let now = self.env.now();
        self.nodes.get(&node).map(|n| n.router.route_state(now, destination))
    }

    /// Originate a payload from `from` toward `destination`, fragmenting
    /// at the node's configured packet size.
    pub fn send(&mut self, from: Callsign, destination: Callsign, payload: &Payload) {
        let now = self.env.now();
        let bytes = match payload.to_bytes() {
            Ok(bytes) => bytes,
            Err(_) => return,
        };
        let id = self.env.random_packet_id();
        let Some(node) = self.nodes.get_mut(&from) else { return };
        let Ok(fragments) = fragment_message(
            payload.packet_type(),
            id,
            PacketFlags::empty(),
            &bytes,
            256,
        ) else {
            return;
        };

        let mut actions = Vec::new();
        for fragment in fragments {
            actions.extend(node.router.send_data(now, destination, fragment));
        }
        self.absorb(from, actions);
    }

    /// Put a hand-crafted packet on the air from `from` to `to`.
    pub fn inject(&mut self, from: Callsign, to: Callsign, packet: Packet) {
        self.in_flight.push_back((from, to, packet));
    }

    /// Tick every node's router at the current virtual time.
    pub fn tick_all(&mut self) {
        let now = self.env.now();
        let names: Vec<Callsign> = self.nodes.keys().copied().collect();
        for name in names {
            let actions = match self.nodes.get_mut(&name) {
                Some(node) => node.router.tick(now),
                None => Vec::new(),
            };
            self.absorb(name, actions);
        }
    }

    /// Deliver everything in flight until the air goes quiet.
    ///
    /// # Panics
    ///
    /// Panics if the world fails to settle within a generous round
    /// bound, which means a forwarding loop.
    pub fn settle(&mut self) {
        for _ in 0..128 {
            if self.in_flight.is_empty() {
                return;
            }
            let batch: Vec<(Callsign, Callsign, Packet)> =
                std::mem::take(&mut self.in_flight).into();
            let now = self.env.now();
            for (from, to, packet) in batch {
                let actions = match self.nodes.get_mut(&to) {
                    Some(node) => node.router.handle_packet(now, from, &packet),
                    None => Vec::new(),
                };
                self.absorb(to, actions);
            }
        }
        assert!(self.in_flight.is_empty(), "mesh world did not settle");
    }

    fn absorb(&mut self, at: Callsign, actions: Vec<RouterAction>) {
        for action in actions {
            match action {
                RouterAction::Broadcast(packet) => {
                    for neighbour in self.neighbours(at) {
                        self.in_flight.push_back((at, neighbour, packet.clone()));
                    }
                },
                RouterAction::Unicast { next_hop, packet } => {
                    if self.linked(at, next_hop) {
                        self.in_flight.push_back((at, next_hop, packet));
                    }
                    // An unreachable next hop loses the frame; link
                    // failure detection is the station's concern.
                },
                RouterAction::Deliver { source, packet } => {
                    self.deliver(at, source, &packet);
                },
                RouterAction::DiscoveryFailed { destination } => {
                    self.failures.push((at, destination));
                },
                RouterAction::Warning(_) => {},
            }
        }
    }

    fn deliver(&mut self, at: Callsign, source: Callsign, packet: &Packet) {
        // Mesh control delivered locally is not application traffic.
        if packet.header.packet_type().is_mesh_control()
            || packet.header.packet_type() == PacketType::Ack
        {
            return;
        }
        let now = self.env.now();
        let Some(node) = self.nodes.get_mut(&at) else { return };

        let key = FragmentKey {
            originator: source,
            id: packet.header.packet_id(),
            sequence: packet.header.sequence(),
        };
        if node.seen.offer(key) == Freshness::Duplicate {
            return;
        }

        if let Ok(Some(message)) = node.reassembler.accept(now, packet) {
            self.delivered.push(DeliveredMessage { at, source, message });
        }
    }
}
