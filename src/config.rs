//! Runtime settings, loaded from a YAML file with sane defaults.

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Capture device name; `any` captures on all interfaces.
    pub interface: String,
    /// BPF filter installed on the capture.
    pub bpf_filter: String,

    pub repulsion_force: f64,
    pub attraction_force: f64,
    pub max_physics_speed: f64,

    /// How long a star keeps glowing after its last packet, in seconds.
    pub star_life_seconds: f64,
    pub particle_speed_min: f64,
    pub particle_speed_max: f64,

    /// Group remote hosts into one node per country (needs a country lookup).
    pub cluster_by_country: bool,

    pub center_heat_increment: f64,
    pub center_heat_max: f64,
    pub center_heat_decay: f64,

    pub debug: bool,
    pub log_file: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            interface: "any".to_string(),
            bpf_filter: "ip or ip6".to_string(),
            repulsion_force: 1200.0,
            attraction_force: 0.0008,
            max_physics_speed: 4.0,
            star_life_seconds: 5.0,
            particle_speed_min: 0.02,
            particle_speed_max: 0.05,
            cluster_by_country: false,
            center_heat_increment: 2.0,
            center_heat_max: 50.0,
            center_heat_decay: 0.90,
            debug: false,
            log_file: "netstar.log".to_string(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&contents)?;
        Ok(settings)
    }

    /// Loads `path` if it exists, otherwise returns defaults. A malformed
    /// file is reported and ignored rather than aborting startup.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Settings::default();
        }
        match Settings::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("ignoring config {}: {}", path.display(), e);
                Settings::default()
            }
        }
    }

    /// Activity lost per simulation tick, derived so that a star fades to
    /// zero after `star_life_seconds` at the nominal 60 Hz tick rate.
    pub fn decay_rate_per_tick(&self) -> f64 {
        1.0 / (60.0 * self.star_life_seconds.max(0.1))
    }

    pub fn star_lifespan(&self) -> Duration {
        Duration::from_secs_f64(self.star_life_seconds.max(0.1))
    }

    /// A travel speed drawn uniformly from the configured particle range.
    pub fn random_particle_speed(&self) -> f64 {
        let min = self.particle_speed_min;
        let max = self.particle_speed_max.max(min);
        if max > min {
            rand::thread_rng().gen_range(min..max)
        } else {
            min
        }
    }
}
