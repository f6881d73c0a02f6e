//! Force-directed layout step for the node constellation.
//!
//! One call advances every node by exactly one fixed simulation tick:
//! pairwise repulsion, linear attraction toward the center, a hard speed
//! clamp, integration with friction, and collision with the solid core.

use crate::config::Settings;
use crate::graph::Node;

/// Beyond this distance the repulsion is too weak to matter.
const REPULSION_CUTOFF: f64 = 400.0;
const REPULSION_CUTOFF_SQ: f64 = REPULSION_CUTOFF * REPULSION_CUTOFF;

/// Velocity retained after each integration step.
const FRICTION: f64 = 0.90;

/// Tangential velocity retained after bumping the center core.
const COLLISION_DAMPING: f64 = 0.85;

/// Physics constants snapshotted from the settings once per tick.
#[derive(Debug, Clone, Copy)]
pub struct PhysicsParams {
    pub repulsion: f64,
    pub attraction: f64,
    pub max_speed: f64,
}

impl PhysicsParams {
    pub fn from_settings(s: &Settings) -> Self {
        PhysicsParams {
            repulsion: s.repulsion_force,
            attraction: s.attraction_force,
            max_speed: s.max_physics_speed,
        }
    }
}

/// Advances positions and velocities by one tick.
///
/// Frozen nodes exert repulsion on others but receive no impulse and do not
/// move; their velocity is forced to zero. Pair application order follows the
/// slice order, so identical inputs produce identical outputs.
pub fn step(nodes: &mut [&mut Node], center: (f64, f64), center_solid_radius: f64, p: &PhysicsParams) {
    let n = nodes.len();

    // Pairwise repulsion, equal and opposite. The axis-aligned check prunes
    // far pairs before any square root.
    for i in 0..n {
        let (head, tail) = nodes.split_at_mut(i + 1);
        let a = &mut *head[i];
        for b in tail.iter_mut() {
            let dx = a.x - b.x;
            let dy = a.y - b.y;
            if dx.abs() > REPULSION_CUTOFF || dy.abs() > REPULSION_CUTOFF {
                continue;
            }
            let mut dist_sq = dx * dx + dy * dy;
            if dist_sq > REPULSION_CUTOFF_SQ {
                continue;
            }
            if dist_sq < 1.0 {
                dist_sq = 1.0;
            }
            let force = p.repulsion / dist_sq;
            let dist = dist_sq.sqrt();
            let fx = dx / dist * force;
            let fy = dy / dist * force;
            if !a.frozen {
                a.vx += fx;
                a.vy += fy;
            }
            if !b.frozen {
                b.vx -= fx;
                b.vy -= fy;
            }
        }
    }

    let min_dist = center_solid_radius.max(0.0);
    let min_dist_sq = min_dist * min_dist;

    for node in nodes.iter_mut() {
        if node.frozen {
            node.vx = 0.0;
            node.vy = 0.0;
            continue;
        }

        // Hooke spring toward the center.
        node.vx += (center.0 - node.x) * p.attraction;
        node.vy += (center.1 - node.y) * p.attraction;

        let speed_sq = node.vx * node.vx + node.vy * node.vy;
        if speed_sq > p.max_speed * p.max_speed {
            let speed = speed_sq.sqrt();
            node.vx = node.vx / speed * p.max_speed;
            node.vy = node.vy / speed * p.max_speed;
        }

        node.x += node.vx;
        node.y += node.vy;
        node.vx *= FRICTION;
        node.vy *= FRICTION;

        // Keep nodes outside the solid core: project back onto the boundary
        // and strip the inward velocity component.
        let cx = node.x - center.0;
        let cy = node.y - center.1;
        let dist_sq = cx * cx + cy * cy;
        if dist_sq < min_dist_sq {
            let dist = dist_sq.max(1e-4).sqrt();
            let nx = cx / dist;
            let ny = cy / dist;
            node.x = center.0 + nx * min_dist;
            node.y = center.1 + ny * min_dist;

            let v_dot_n = node.vx * nx + node.vy * ny;
            if v_dot_n < 0.0 {
                node.vx -= v_dot_n * nx;
                node.vy -= v_dot_n * ny;
            }
            node.vx *= COLLISION_DAMPING;
            node.vy *= COLLISION_DAMPING;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Instant;

    const CENTER: (f64, f64) = (0.0, 0.0);

    fn params() -> PhysicsParams {
        PhysicsParams { repulsion: 1200.0, attraction: 0.0008, max_speed: 4.0 }
    }

    fn node_at(x: f64, y: f64) -> Node {
        let mut node = Node::spawn(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), Instant::now());
        node.x = x;
        node.y = y;
        node.vx = 0.0;
        node.vy = 0.0;
        node
    }

    #[test]
    fn repulsion_is_equal_and_opposite() {
        let mut a = node_at(100.0, 100.0);
        let mut b = node_at(130.0, 80.0);
        {
            let mut nodes = [&mut a, &mut b];
            // Attraction off so only the pair impulse shows up in velocity.
            let p = PhysicsParams { attraction: 0.0, ..params() };
            step(&mut nodes, CENTER, 0.0, &p);
        }
        // Velocities were integrated once (friction), so compare pre-friction.
        assert!((a.vx / FRICTION + b.vx / FRICTION).abs() < 1e-9);
        assert!((a.vy / FRICTION + b.vy / FRICTION).abs() < 1e-9);
        assert!(a.vx != 0.0 || a.vy != 0.0);
    }

    #[test]
    fn frozen_node_never_moves() {
        let mut pinned = node_at(150.0, 0.0);
        pinned.frozen = true;
        pinned.vx = 3.0;
        let mut other = node_at(160.0, 5.0);
        for _ in 0..50 {
            let mut nodes = [&mut pinned, &mut other];
            step(&mut nodes, CENTER, 30.0, &params());
        }
        assert_eq!((pinned.x, pinned.y), (150.0, 0.0));
        assert_eq!((pinned.vx, pinned.vy), (0.0, 0.0));
    }

    #[test]
    fn speed_never_exceeds_clamp() {
        let p = params();
        let mut a = node_at(100.0, 0.0);
        let mut b = node_at(100.5, 0.0);
        a.vx = 100.0;
        b.vy = -80.0;
        for _ in 0..20 {
            let mut nodes = [&mut a, &mut b];
            step(&mut nodes, CENTER, 0.0, &p);
        }
        for node in [&a, &b] {
            let speed = (node.vx * node.vx + node.vy * node.vy).sqrt();
            assert!(speed <= p.max_speed + 1e-6, "speed {} over clamp", speed);
        }
    }

    #[test]
    fn nodes_cannot_rest_inside_core() {
        let mut node = node_at(10.0, 0.0);
        node.vx = -2.0;
        let mut nodes = [&mut node];
        step(&mut nodes, CENTER, 30.0, &params());
        let dist = (node.x * node.x + node.y * node.y).sqrt();
        assert!(dist >= 30.0 - 1e-6);
        // Inward component removed.
        let v_dot_n = node.vx * (node.x / dist) + node.vy * (node.y / dist);
        assert!(v_dot_n >= -1e-9);
    }

    #[test]
    fn near_coincident_nodes_separate() {
        let mut a = node_at(200.0, 0.0);
        let mut b = node_at(200.1, 0.05);
        let start = ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
        for _ in 0..5 {
            let mut nodes = [&mut a, &mut b];
            step(&mut nodes, CENTER, 30.0, &params());
        }
        let end = ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
        assert!(end > start, "expected separation, got {} -> {}", start, end);
    }

    #[test]
    fn attraction_pulls_distant_node_inward() {
        let mut node = node_at(350.0, 0.0);
        let before = node.x;
        for _ in 0..30 {
            let mut nodes = [&mut node];
            step(&mut nodes, CENTER, 30.0, &params());
        }
        assert!(node.x < before);
    }
}
