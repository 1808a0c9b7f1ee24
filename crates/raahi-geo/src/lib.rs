//! Hexagonal geospatial index over moving entities (§4.1).
//!
//! Wraps `h3o` so the rest of the core only ever deals in opaque cell
//! strings (`h3Index`) and never has to know which hierarchical grid
//! backs them.

use h3o::{CellIndex, LatLng, Resolution};
use utility::geo::haversine_distance;

pub use h3o::Resolution as H3Resolution;

#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("coordinates out of range: lat={lat}, lng={lng}")]
    InvalidCoordinates { lat: f64, lng: f64 },
    #[error("not a valid h3 index: {0}")]
    InvalidH3Index(String),
}

/// Configuration-driven hex grid. Cheap to clone; holds no state beyond
/// the chosen resolution.
#[derive(Debug, Clone, Copy)]
pub struct GeoIndex {
    resolution: Resolution,
}

impl GeoIndex {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// `encode(lat, lng) -> h3Index`. Pure, stable.
    pub fn encode(&self, lat: f64, lng: f64) -> Result<String, GeoError> {
        let ll = LatLng::new(lat, lng)
            .map_err(|_| GeoError::InvalidCoordinates { lat, lng })?;
        Ok(ll.to_cell(self.resolution).to_string())
    }

    fn parse_cell(&self, h3_index: &str) -> Result<CellIndex, GeoError> {
        let raw = u64::from_str_radix(h3_index, 16)
            .map_err(|_| GeoError::InvalidH3Index(h3_index.to_owned()))?;
        CellIndex::try_from(raw).map_err(|_| GeoError::InvalidH3Index(h3_index.to_owned()))
    }

    /// `kRing(center, k) -> set<h3Index>`. Includes `center`. Ordering is
    /// not significant to callers (§4.1), so we return whatever order
    /// `h3o::grid_disk` yields.
    pub fn k_ring(&self, center: &str, k: u32) -> Result<Vec<String>, GeoError> {
        let cell = self.parse_cell(center)?;
        Ok(cell
            .grid_disk::<Vec<_>>(k)
            .into_iter()
            .map(|c| c.to_string())
            .collect())
    }

    /// `haversineKm` — post-filter after the coarse k-ring match.
    pub fn haversine_km(&self, lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
        haversine_distance(lat1, lng1, lat2, lng2)
    }

    /// Expands `k = 1..=maxK`, invoking `probe` with the k-ring's cells at
    /// each step, and stops at the first `k` that yields a non-empty
    /// candidate set. Never expands past `maxK`, even if the result stays
    /// empty — the caller must handle "no drivers found".
    pub fn find_expanding<T, F>(
        &self,
        center: &str,
        max_k: u32,
        mut probe: F,
    ) -> Result<Vec<T>, GeoError>
    where
        F: FnMut(&[String]) -> Vec<T>,
    {
        for k in 1..=max_k.max(1) {
            let cells = self.k_ring(center, k)?;
            let candidates = probe(&cells);
            if !candidates.is_empty() {
                return Ok(candidates);
            }
        }
        Ok(Vec::new())
    }
}

impl Default for GeoIndex {
    fn default() -> Self {
        Self {
            resolution: Resolution::Nine,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_stable() {
        let geo = GeoIndex::default();
        let a = geo.encode(28.6139, 77.2090).unwrap();
        let b = geo.encode(28.6139, 77.2090).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn k_ring_includes_center() {
        let geo = GeoIndex::default();
        let center = geo.encode(28.6139, 77.2090).unwrap();
        let ring = geo.k_ring(&center, 2).unwrap();
        assert!(ring.contains(&center));
    }

    #[test]
    fn k_ring_grows_with_k() {
        let geo = GeoIndex::default();
        let center = geo.encode(28.6139, 77.2090).unwrap();
        let ring1 = geo.k_ring(&center, 1).unwrap();
        let ring2 = geo.k_ring(&center, 2).unwrap();
        assert!(ring2.len() > ring1.len());
    }

    #[test]
    fn haversine_zero_for_same_point() {
        let geo = GeoIndex::default();
        let d = geo.haversine_km(28.6139, 77.2090, 28.6139, 77.2090);
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn haversine_known_distance() {
        let geo = GeoIndex::default();
        // Connaught Place to IGI Airport, Delhi: ~13km as the crow flies.
        let d = geo.haversine_km(28.6315, 77.2167, 28.5562, 77.1000);
        assert!((10.0..16.0).contains(&d), "got {d}");
    }

    #[test]
    fn find_expanding_stops_at_first_nonempty_k() {
        let geo = GeoIndex::default();
        let center = geo.encode(28.6139, 77.2090).unwrap();
        let mut probed_ks = vec![];
        let result = geo
            .find_expanding(&center, 5, |cells| {
                probed_ks.push(cells.len());
                if cells.len() >= 7 {
                    vec!["found"]
                } else {
                    vec![]
                }
            })
            .unwrap();
        assert_eq!(result, vec!["found"]);
        // k=1 gives 7 cells in h3's grid_disk (center + 6 neighbours), so
        // probing should stop immediately.
        assert_eq!(probed_ks.len(), 1);
    }

    #[test]
    fn find_expanding_never_exceeds_max_k() {
        let geo = GeoIndex::default();
        let center = geo.encode(28.6139, 77.2090).unwrap();
        let mut calls = 0;
        let result: Vec<i32> = geo
            .find_expanding(&center, 3, |_cells| {
                calls += 1;
                vec![]
            })
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(calls, 3);
    }

    #[test]
    fn invalid_h3_index_is_rejected() {
        let geo = GeoIndex::default();
        assert!(geo.k_ring("not-a-hex-string!!", 1).is_err());
    }
}
