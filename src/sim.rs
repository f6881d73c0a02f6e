//! Fixed-timestep consumer loop.
//!
//! Owns the accumulator state that turns variable frame timing into fixed
//! simulation ticks, the time-boxed ring drain, and the per-tick ordering:
//! apply events, deliver enrichment, age the graph, step the layout.

use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::graph::{NodeKey, StarGraph};
use crate::physics::{self, PhysicsParams};
use crate::resolve::{CountryLookup, NameResolver};
use crate::ring::Consumer;
use crate::stats::Stats;

/// Nominal simulation rate.
pub const TICK: Duration = Duration::from_nanos(1_000_000_000 / 60);

/// Accumulator cap: never replay more than this many ticks after a stall.
const MAX_CATCHUP_TICKS: u32 = 3;

/// Per-tick budget for draining the ring. Events past the budget stay queued
/// for later ticks; the budget itself never drops anything.
const DRAIN_BUDGET: Duration = Duration::from_millis(8);

/// Layout center in simulation coordinates.
pub const CENTER: (f64, f64) = (0.0, 0.0);

pub struct SimLoop {
    rx: Consumer,
    pub graph: StarGraph,
    pub stats: Stats,
    settings: Arc<RwLock<Settings>>,
    names: NameResolver,
    geo: Arc<dyn CountryLookup>,
    pub paused: bool,

    last_tick: Option<Instant>,
    accumulator: Duration,
    events_last_tick: usize,
}

impl SimLoop {
    pub fn new(
        rx: Consumer,
        settings: Arc<RwLock<Settings>>,
        names: NameResolver,
        geo: Arc<dyn CountryLookup>,
    ) -> Self {
        SimLoop {
            rx,
            graph: StarGraph::new(),
            stats: Stats::new(Instant::now()),
            settings,
            names,
            geo,
            paused: false,
            last_tick: None,
            accumulator: Duration::ZERO,
            events_last_tick: 0,
        }
    }

    /// Advances the simulation by however many fixed ticks the elapsed
    /// wall-clock time covers. Call once per rendered frame.
    pub fn pump(&mut self, now: Instant) {
        let last = match self.last_tick {
            Some(last) => last,
            None => {
                self.last_tick = Some(now);
                return;
            }
        };
        self.accumulator += now.saturating_duration_since(last);
        self.last_tick = Some(now);

        if self.accumulator > TICK * MAX_CATCHUP_TICKS {
            self.accumulator = TICK;
        }
        while self.accumulator >= TICK {
            self.accumulator -= TICK;
            if !self.paused {
                let snapshot = self.settings.read().unwrap().clone();
                self.tick_once(&snapshot, Instant::now());
            }
        }
    }

    /// One fixed simulation tick.
    fn tick_once(&mut self, s: &Settings, now: Instant) {
        self.events_last_tick = self.drain_events(s, now);
        for (ip, name) in self.names.drain() {
            self.graph.apply_name(ip, name);
        }
        self.stats.tick(now);
        self.graph.tick(s, now);

        let params = PhysicsParams::from_settings(s);
        let core_radius = self.graph.core_radius();
        let mut nodes: Vec<_> = self.graph.iter_mut().collect();
        physics::step(&mut nodes, CENTER, core_radius, &params);
    }

    /// Drains committed events under the per-tick time budget. Returns the
    /// number of events applied.
    fn drain_events(&mut self, s: &Settings, now: Instant) -> usize {
        let deadline = now + DRAIN_BUDGET;
        let mut processed = 0;
        while let Some(slot) = self.rx.poll() {
            let ev = *slot;
            drop(slot);
            processed += 1;

            let inbound = !is_local(&ev.src);
            let remote = if inbound { ev.src } else { ev.dst };
            let key = if s.cluster_by_country {
                match self.geo.cached(&remote) {
                    Some(code) => NodeKey::Country(code),
                    None => {
                        self.geo.request(remote);
                        NodeKey::Host(remote)
                    }
                }
            } else {
                NodeKey::Host(remote)
            };

            let fresh = !self.graph.contains(&key);
            self.stats.process(&ev, inbound);
            let node = self.graph.apply(key, remote, &ev, inbound, now, s);
            if node.country.is_none() {
                node.country = self.geo.cached(&remote);
            }
            if fresh {
                self.names.request(remote);
            }

            if Instant::now() >= deadline {
                break;
            }
        }
        if processed > 1000 {
            tracing::warn!(processed, "event burst in a single tick");
        }
        processed
    }

    pub fn queue_len(&self) -> usize {
        self.rx.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.rx.capacity()
    }

    pub fn dropped(&self) -> u64 {
        self.rx.dropped()
    }

    pub fn events_last_tick(&self) -> usize {
        self.events_last_tick
    }
}

/// Source addresses on the local side of the capture count as outbound
/// traffic; everything else is a remote peer.
fn is_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let seg = v6.segments();
            v6.is_loopback()
                || (seg[0] & 0xffc0) == 0xfe80 // link-local
                || (seg[0] & 0xfe00) == 0xfc00 // unique local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FlowEvent, Protocol};
    use crate::resolve::NoCountryLookup;
    use crate::ring::{self, Producer};
    use std::net::Ipv4Addr;

    fn push_event(tx: &mut Producer, src: IpAddr) {
        let mut slot = tx.claim().expect("ring has room");
        *slot = FlowEvent {
            src,
            src_port: 443,
            dst: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)),
            dst_port: 50000,
            proto: Protocol::Tcp,
            wire_len: 1200,
            ts_millis: 0,
        };
        slot.commit();
    }

    fn sim_with_events(addrs: &[IpAddr]) -> SimLoop {
        let (mut tx, rx) = ring::channel(64);
        for &a in addrs {
            push_event(&mut tx, a);
        }
        SimLoop::new(
            rx,
            Arc::new(RwLock::new(Settings::default())),
            NameResolver::new(),
            Arc::new(NoCountryLookup),
        )
    }

    fn remote(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(93, 184, 216, last))
    }

    #[tokio::test]
    async fn three_events_make_three_live_separating_nodes() {
        let addrs = [remote(1), remote(2), remote(3)];
        let mut sim = sim_with_events(&addrs);
        let s = Settings::default();

        sim.tick_once(&s, Instant::now());
        assert_eq!(sim.graph.len(), 3);

        // Activity is 1.0 minus exactly one decay step.
        for (_, node) in sim.graph.iter() {
            assert!((node.activity - (1.0 - s.decay_rate_per_tick())).abs() < 1e-9);
        }

        // Restart them nearly coincident; repulsion must separate them.
        for (i, node) in sim.graph.iter_mut().enumerate() {
            node.x = 120.0 + i as f64 * 0.1;
            node.y = 0.0;
            node.vx = 0.0;
            node.vy = 0.0;
        }
        for _ in 0..5 {
            sim.tick_once(&s, Instant::now());
        }
        let xs: Vec<f64> = sim.graph.iter().map(|(_, n)| n.x).collect();
        let spread = xs.iter().cloned().fold(f64::MIN, f64::max)
            - xs.iter().cloned().fold(f64::MAX, f64::min);
        assert!(spread > 0.3, "nodes failed to separate: spread {spread}");
    }

    #[tokio::test]
    async fn inbound_heuristic_keys_on_the_remote_side() {
        // Outbound packet: private source, public destination.
        let (mut tx, rx) = ring::channel(8);
        let mut slot = tx.claim().unwrap();
        *slot = FlowEvent {
            src: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            src_port: 50000,
            dst: remote(9),
            dst_port: 443,
            proto: Protocol::Tcp,
            wire_len: 600,
            ts_millis: 0,
        };
        slot.commit();

        let mut sim = SimLoop::new(
            rx,
            Arc::new(RwLock::new(Settings::default())),
            NameResolver::new(),
            Arc::new(NoCountryLookup),
        );
        sim.tick_once(&Settings::default(), Instant::now());

        assert!(sim.graph.contains(&NodeKey::Host(remote(9))));
        assert_eq!(sim.stats.total_up(), 600);
        let node = sim.graph.get(&NodeKey::Host(remote(9))).unwrap();
        assert!(!node.particles[0].inbound);
    }

    #[tokio::test]
    async fn cluster_mode_uses_country_keys_when_cached() {
        struct FixedCountry;
        impl CountryLookup for FixedCountry {
            fn cached(&self, _ip: &IpAddr) -> Option<String> {
                Some("BR".to_string())
            }
        }

        let (mut tx, rx) = ring::channel(8);
        push_event(&mut tx, remote(20));
        push_event(&mut tx, remote(21));

        let settings = Settings { cluster_by_country: true, ..Settings::default() };
        let mut sim = SimLoop::new(
            rx,
            Arc::new(RwLock::new(settings.clone())),
            NameResolver::new(),
            Arc::new(FixedCountry),
        );
        sim.tick_once(&settings, Instant::now());

        assert_eq!(sim.graph.len(), 1);
        let node = sim.graph.get(&NodeKey::Country("BR".to_string())).unwrap();
        assert_eq!(node.unique_hosts(), 2);
    }

    #[tokio::test]
    async fn accumulator_is_capped_after_a_stall() {
        let mut sim = sim_with_events(&[]);
        let start = Instant::now();
        sim.pump(start);
        // A five-second stall must not replay three hundred ticks.
        sim.pump(start + Duration::from_secs(5));
        assert!(sim.accumulator < TICK);
    }

    #[test]
    fn local_address_classification() {
        assert!(is_local(&"10.1.2.3".parse().unwrap()));
        assert!(is_local(&"192.168.0.1".parse().unwrap()));
        assert!(is_local(&"127.0.0.1".parse().unwrap()));
        assert!(is_local(&"fe80::1".parse().unwrap()));
        assert!(is_local(&"fd00::1".parse().unwrap()));
        assert!(!is_local(&"8.8.8.8".parse().unwrap()));
        assert!(!is_local(&"2001:4860:4860::8888".parse().unwrap()));
    }
}
