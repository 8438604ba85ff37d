//! Synthetic portal sets.
//!
//! Generates random portal layouts for benchmarks, demos and tests.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use field_kernel::geometry::EARTH_RADIUS_M;
use field_kernel::Portal;

/// Configuration for generating portal layouts.
#[derive(Debug, Clone)]
pub struct PortalScenarioConfig {
    /// Number of portals.
    pub count: usize,
    /// Centre of the area (degrees).
    pub centre: (f64, f64),
    /// Portals are scattered uniformly over a disc of this radius (metres).
    pub radius_m: f64,
    /// Fraction of portals that are boosted (0.0 to 1.0).
    pub boosted_fraction: f64,
    /// Keys in hand per portal range (min, max).
    pub keys_range: (u32, u32),
}

impl Default for PortalScenarioConfig {
    fn default() -> Self {
        Self::medium()
    }
}

impl PortalScenarioConfig {
    /// A handful of portals around one park.
    pub fn small() -> Self {
        Self {
            count: 6,
            centre: (37.7749, -122.4194),
            radius_m: 300.0,
            boosted_fraction: 0.0,
            keys_range: (0, 1),
        }
    }

    /// About the size of a typical neighbourhood operation.
    pub fn medium() -> Self {
        Self {
            count: 18,
            centre: (37.7749, -122.4194),
            radius_m: 800.0,
            boosted_fraction: 0.1,
            keys_range: (0, 3),
        }
    }

    /// A dense district.
    pub fn large() -> Self {
        Self {
            count: 60,
            centre: (37.7749, -122.4194),
            radius_m: 1500.0,
            boosted_fraction: 0.15,
            keys_range: (0, 5),
        }
    }
}

/// Generator for portal layouts.
pub struct PortalScenario {
    config: PortalScenarioConfig,
    rng: ChaCha8Rng,
}

impl PortalScenario {
    /// Create a new generator with the given config and seed.
    pub fn new(config: PortalScenarioConfig, seed: u64) -> Self {
        Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Generate the portal list.
    pub fn generate(&mut self) -> Vec<Portal> {
        let (lat0, lng0) = self.config.centre;
        let metres_per_deg_lat = EARTH_RADIUS_M.to_radians();
        let metres_per_deg_lng = metres_per_deg_lat * lat0.to_radians().cos();
        let (min_keys, max_keys) = self.config.keys_range;
        let width = self.config.count.to_string().len();

        (0..self.config.count)
            .map(|i| {
                // Uniform over the disc
                let r = self.config.radius_m * self.rng.random::<f64>().sqrt();
                let theta = self.rng.random_range(0.0..std::f64::consts::TAU);
                let lat = lat0 + r * theta.sin() / metres_per_deg_lat;
                let lng = lng0 + r * theta.cos() / metres_per_deg_lng;

                let mut portal = Portal::new(format!("Portal {:0width$}", i + 1), lat, lng)
                    .with_keys(self.rng.random_range(min_keys..=max_keys));
                if self.rng.random_bool(self.config.boosted_fraction.clamp(0.0, 1.0)) {
                    portal = portal.boosted();
                }
                portal
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use field_kernel::geometry::{spherical_distance, LatLng};

    #[test]
    fn test_generate_is_seeded() {
        let a = PortalScenario::new(PortalScenarioConfig::medium(), 42).generate();
        let b = PortalScenario::new(PortalScenarioConfig::medium(), 42).generate();
        let c = PortalScenario::new(PortalScenarioConfig::medium(), 43).generate();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 18);
    }

    #[test]
    fn test_portals_stay_within_radius() {
        let config = PortalScenarioConfig::large();
        let centre = LatLng::new(config.centre.0, config.centre.1);
        let radius = config.radius_m;
        for portal in PortalScenario::new(config, 1).generate() {
            assert!(spherical_distance(centre, portal.position()) <= radius * 1.01);
        }
    }

    #[test]
    fn test_names_are_unique() {
        let portals = PortalScenario::new(PortalScenarioConfig::large(), 5).generate();
        let mut names: Vec<&str> = portals.iter().map(|p| p.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), portals.len());
    }
}
