//! Session-wide traffic statistics for the header bar.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::model::{FlowEvent, Protocol};

const MAX_HISTORY: usize = 100;
const WINDOW: Duration = Duration::from_secs(1);

/// Totals, per-second speeds and a bounded speed history.
pub struct Stats {
    total_down: u64,
    total_up: u64,
    down_speed: u64,
    up_speed: u64,
    window_down: u64,
    window_up: u64,
    window_start: Instant,
    history: VecDeque<(u64, u64)>,
    proto_counts: [u64; Protocol::COUNT],
    packets: u64,
}

impl Stats {
    pub fn new(now: Instant) -> Self {
        Stats {
            total_down: 0,
            total_up: 0,
            down_speed: 0,
            up_speed: 0,
            window_down: 0,
            window_up: 0,
            window_start: now,
            history: VecDeque::with_capacity(MAX_HISTORY),
            proto_counts: [0; Protocol::COUNT],
            packets: 0,
        }
    }

    pub fn process(&mut self, ev: &FlowEvent, inbound: bool) {
        let size = ev.wire_len as u64;
        if inbound {
            self.total_down += size;
            self.window_down += size;
        } else {
            self.total_up += size;
            self.window_up += size;
        }
        self.proto_counts[ev.proto.index()] += 1;
        self.packets += 1;
    }

    /// Closes the speed window once a second has elapsed.
    pub fn tick(&mut self, now: Instant) {
        if now.duration_since(self.window_start) >= WINDOW {
            self.down_speed = self.window_down;
            self.up_speed = self.window_up;
            self.history.push_back((self.down_speed, self.up_speed));
            if self.history.len() > MAX_HISTORY {
                self.history.pop_front();
            }
            self.window_down = 0;
            self.window_up = 0;
            self.window_start = now;
        }
    }

    pub fn total_down(&self) -> u64 {
        self.total_down
    }

    pub fn total_up(&self) -> u64 {
        self.total_up
    }

    /// Bytes per second, inbound.
    pub fn down_speed(&self) -> u64 {
        self.down_speed
    }

    /// Bytes per second, outbound.
    pub fn up_speed(&self) -> u64 {
        self.up_speed
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn proto_counts(&self) -> &[u64; Protocol::COUNT] {
        &self.proto_counts
    }

    /// Download speed history, oldest first. Feeds the header sparkline.
    pub fn down_history(&self) -> Vec<u64> {
        self.history.iter().map(|(down, _)| *down).collect()
    }
}

/// "1.4 KB" style formatting for the header and tooltips.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let exp = ((bytes as f64).log2() as u32 / 10).min(UNITS.len() as u32 - 1);
    format!("{:.1} {}", bytes as f64 / 1024f64.powi(exp as i32), UNITS[exp as usize])
}
