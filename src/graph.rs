//! Node registry and lifecycle for the star graph.
//!
//! One [`Node`] per remote host, or per country when clustering is on. Nodes
//! are created the first time their key shows up, pulse on every matching
//! event, decay while quiet, and are removed once fully dark.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::Settings;
use crate::model::{FlowEvent, Protocol};

/// Radius of the center core before any heat, in simulation units. The
/// renderer keeps its core visuals in sync with this.
pub const CORE_BASE_RADIUS: f64 = 35.0;

/// Identity of one visual node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    Host(IpAddr),
    Country(String),
}

/// A transient token for one packet traveling between a node and the center.
#[derive(Debug, Clone, Copy)]
pub struct Particle {
    /// 0.0 at the start of the trip, finished at 1.0.
    pub progress: f64,
    pub inbound: bool,
    pub speed: f64,
    pub proto: Protocol,
}

/// One star in the constellation.
#[derive(Debug)]
pub struct Node {
    /// First remote address seen for this node.
    pub ip: IpAddr,
    /// Resolved host name, the raw address until DNS answers.
    pub display_name: String,
    pub country: Option<String>,

    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,

    /// 1.0 right after a pulse, decays toward 0.
    pub activity: f64,
    pub frozen: bool,

    /// Member host -> last seen. Keeps cluster nodes alive while any member
    /// is hot; entries expire after the star lifespan.
    pub hosts: HashMap<IpAddr, Instant>,

    pub total_bytes: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub packets: u64,
    pub proto_counts: [u64; Protocol::COUNT],
    pub last_ports: Option<(u16, u16)>,
    pub last_proto: Protocol,

    pub particles: Vec<Particle>,
}

impl Node {
    /// New node on a random ring around the center, drifting slightly.
    pub fn spawn(ip: IpAddr, now: Instant) -> Self {
        let mut rng = rand::thread_rng();
        let angle = rng.gen::<f64>() * std::f64::consts::TAU;
        let distance = 200.0 + rng.gen::<f64>() * 150.0;
        let mut hosts = HashMap::new();
        hosts.insert(ip, now);
        Node {
            ip,
            display_name: ip.to_string(),
            country: None,
            x: angle.cos() * distance,
            y: angle.sin() * distance,
            vx: (rng.gen::<f64>() - 0.5) * 2.0,
            vy: (rng.gen::<f64>() - 0.5) * 2.0,
            activity: 1.0,
            frozen: false,
            hosts,
            total_bytes: 0,
            bytes_in: 0,
            bytes_out: 0,
            packets: 0,
            proto_counts: [0; Protocol::COUNT],
            last_ports: None,
            last_proto: Protocol::Other,
            particles: Vec::new(),
        }
    }

    pub fn is_cluster(&self) -> bool {
        self.hosts.len() > 1
    }

    pub fn unique_hosts(&self) -> usize {
        self.hosts.len()
    }

    /// Sidebar / map label.
    pub fn label(&self) -> String {
        match &self.country {
            Some(code) if self.is_cluster() => {
                format!("Cluster: {} ({})", code, self.hosts.len())
            }
            _ => self.display_name.clone(),
        }
    }

    fn pulse(&mut self, remote: IpAddr, ev: &FlowEvent, inbound: bool, now: Instant, s: &Settings) {
        self.activity = 1.0;
        self.particles.push(Particle {
            progress: 0.0,
            inbound,
            speed: s.random_particle_speed(),
            proto: ev.proto,
        });
        self.last_proto = ev.proto;

        self.total_bytes += ev.wire_len as u64;
        if inbound {
            self.bytes_in += ev.wire_len as u64;
        } else {
            self.bytes_out += ev.wire_len as u64;
        }
        self.packets += 1;
        self.proto_counts[ev.proto.index()] += 1;
        self.hosts.insert(remote, now);

        self.last_ports = Some(if inbound {
            (ev.src_port, ev.dst_port)
        } else {
            (ev.dst_port, ev.src_port)
        });
    }

    fn advance(&mut self, decay: f64, lifespan: Duration, now: Instant) {
        if self.activity > 0.0 {
            self.activity -= decay;
        }
        self.hosts.retain(|_, seen| now.duration_since(*seen) <= lifespan);
        self.particles.retain_mut(|p| {
            p.progress += p.speed;
            p.progress < 1.0
        });
    }

    /// A node dies once it is dark, has no particles in flight, and no
    /// member host has been seen within the lifespan.
    pub fn is_dead(&self) -> bool {
        self.activity <= 0.0 && self.particles.is_empty() && self.hosts.is_empty()
    }

    /// Most frequent protocol seen on this node.
    pub fn top_protocol(&self) -> Protocol {
        [Protocol::Tcp, Protocol::Udp, Protocol::Icmp, Protocol::Other]
            .into_iter()
            .max_by_key(|p| self.proto_counts[p.index()])
            .unwrap_or(Protocol::Other)
    }
}

/// The live node map plus the center core's heat level.
pub struct StarGraph {
    nodes: HashMap<NodeKey, Node>,
    center_heat: f64,
}

impl Default for StarGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl StarGraph {
    pub fn new() -> Self {
        StarGraph { nodes: HashMap::new(), center_heat: 0.0 }
    }

    /// Feeds one event into the graph, creating the node on first sight.
    /// Returns the node so the caller can attach enrichment.
    pub fn apply(
        &mut self,
        key: NodeKey,
        remote: IpAddr,
        ev: &FlowEvent,
        inbound: bool,
        now: Instant,
        s: &Settings,
    ) -> &mut Node {
        self.center_heat = (self.center_heat + s.center_heat_increment).min(s.center_heat_max);
        let node = self.nodes.entry(key).or_insert_with(|| Node::spawn(remote, now));
        node.pulse(remote, ev, inbound, now, s);
        node
    }

    /// Ages every node by one tick and removes the dead ones.
    pub fn tick(&mut self, s: &Settings, now: Instant) {
        self.center_heat *= s.center_heat_decay;
        let decay = s.decay_rate_per_tick();
        let lifespan = s.star_lifespan();
        self.nodes.retain(|_, node| {
            node.advance(decay, lifespan, now);
            !node.is_dead()
        });
    }

    /// Solid collision radius of the center core for this tick.
    pub fn core_radius(&self) -> f64 {
        CORE_BASE_RADIUS + self.center_heat
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.center_heat = 0.0;
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn get(&self, key: &NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn get_mut(&mut self, key: &NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeKey, &Node)> {
        self.nodes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    /// Stable sidebar ordering: label-sorted keys.
    pub fn roster(&self) -> Vec<(NodeKey, String)> {
        let mut rows: Vec<(NodeKey, String)> =
            self.nodes.iter().map(|(k, n)| (k.clone(), n.label())).collect();
        rows.sort_by(|a, b| a.1.cmp(&b.1));
        rows
    }

    pub fn toggle_frozen(&mut self, key: &NodeKey) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.frozen = !node.frozen;
        }
    }

    /// Attaches a resolved host name to the node representing `ip`.
    pub fn apply_name(&mut self, ip: IpAddr, name: String) {
        if let Some(node) = self.nodes.get_mut(&NodeKey::Host(ip)) {
            node.display_name = name;
            return;
        }
        // Clustered nodes keep the name of their first member.
        for node in self.nodes.values_mut() {
            if node.ip == ip {
                node.display_name = name;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(93, 184, 216, last))
    }

    fn event(src: IpAddr) -> FlowEvent {
        FlowEvent {
            src,
            src_port: 443,
            dst: IpAddr::V4(Ipv4Addr::new(192, 168, 0, 2)),
            dst_port: 51000,
            proto: Protocol::Tcp,
            wire_len: 1400,
            ts_millis: 0,
        }
    }

    #[test]
    fn first_event_creates_a_pulsing_node() {
        let s = Settings::default();
        let mut graph = StarGraph::new();
        let now = Instant::now();
        let ip = addr(34);
        graph.apply(NodeKey::Host(ip), ip, &event(ip), true, now, &s);

        let node = graph.get(&NodeKey::Host(ip)).expect("node created");
        assert_eq!(node.activity, 1.0);
        assert_eq!(node.particles.len(), 1);
        assert!(node.particles[0].inbound);
        assert_eq!(node.total_bytes, 1400);
        assert_eq!(node.bytes_in, 1400);
        assert_eq!(node.proto_counts[Protocol::Tcp.index()], 1);
        assert_eq!(node.last_ports, Some((443, 51000)));
    }

    #[test]
    fn node_dies_only_when_dark_empty_and_memberless() {
        let s = Settings::default();
        let mut graph = StarGraph::new();
        let now = Instant::now();
        let ip = addr(1);
        let key = NodeKey::Host(ip);
        graph.apply(key.clone(), ip, &event(ip), true, now, &s);

        {
            let node = graph.get_mut(&key).unwrap();
            node.activity = 0.0;
            node.particles.clear();
        }
        // Membership entry is still fresh, so the node survives.
        graph.tick(&s, now);
        assert!(graph.contains(&key));

        // Past the lifespan the membership empties and the node dies.
        graph.tick(&s, now + s.star_lifespan() + Duration::from_millis(1));
        assert!(!graph.contains(&key));
    }

    #[test]
    fn particles_finish_and_are_removed() {
        let s = Settings::default();
        let mut graph = StarGraph::new();
        let now = Instant::now();
        let ip = addr(2);
        let key = NodeKey::Host(ip);
        graph.apply(key.clone(), ip, &event(ip), false, now, &s);

        // Slowest configured particle finishes within 1/min ticks.
        let max_ticks = (1.0 / s.particle_speed_min).ceil() as usize + 1;
        for _ in 0..max_ticks {
            graph.tick(&s, now);
        }
        if let Some(node) = graph.get(&key) {
            assert!(node.particles.is_empty());
        }
    }

    #[test]
    fn cluster_key_groups_multiple_hosts() {
        let s = Settings::default();
        let mut graph = StarGraph::new();
        let now = Instant::now();
        let key = NodeKey::Country("DE".to_string());
        graph.apply(key.clone(), addr(10), &event(addr(10)), true, now, &s).country =
            Some("DE".to_string());
        graph.apply(key.clone(), addr(11), &event(addr(11)), true, now, &s);

        assert_eq!(graph.len(), 1);
        let node = graph.get(&key).unwrap();
        assert_eq!(node.unique_hosts(), 2);
        assert!(node.is_cluster());
        assert_eq!(node.label(), "Cluster: DE (2)");
    }

    #[test]
    fn activity_decays_at_configured_rate() {
        let s = Settings { star_life_seconds: 1.0, ..Settings::default() };
        let mut graph = StarGraph::new();
        let now = Instant::now();
        let ip = addr(3);
        let key = NodeKey::Host(ip);
        graph.apply(key.clone(), ip, &event(ip), true, now, &s);

        for _ in 0..30 {
            graph.tick(&s, now);
        }
        let node = graph.get(&key).unwrap();
        assert!((node.activity - 0.5).abs() < 1e-9);
    }

    #[test]
    fn center_heat_rises_and_decays() {
        let s = Settings::default();
        let mut graph = StarGraph::new();
        let now = Instant::now();
        let base = graph.core_radius();
        for i in 0..100 {
            let ip = addr(i);
            graph.apply(NodeKey::Host(ip), ip, &event(ip), true, now, &s);
        }
        let heated = graph.core_radius();
        assert!(heated > base);
        assert!(heated <= CORE_BASE_RADIUS + s.center_heat_max);

        for _ in 0..600 {
            graph.tick(&s, now);
        }
        assert!(graph.core_radius() - CORE_BASE_RADIUS < 0.5);
    }

    #[test]
    fn resolved_name_lands_on_node() {
        let s = Settings::default();
        let mut graph = StarGraph::new();
        let now = Instant::now();
        let ip = addr(34);
        graph.apply(NodeKey::Host(ip), ip, &event(ip), true, now, &s);
        graph.apply_name(ip, "example.net".to_string());
        assert_eq!(graph.get(&NodeKey::Host(ip)).unwrap().label(), "example.net");
    }
}
