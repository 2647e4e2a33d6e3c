//! Fixed-resolution grid keys for coordinates.
//!
//! `grid_key` is pure: the same `(lat, lon, resolution)` always yields the same
//! key, so downstream bounding-box pre-filters can use `lat_grid`/`lon_grid`
//! without recomputing anything. Bad input never errors; it maps to
//! [`SpatialKey::UNINDEXED`].

use serde::{Deserialize, Serialize};

/// Products within this distance of an integer snap to it before flooring
const SNAP_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpatialKey {
    pub lat_grid: i32,
    pub lon_grid: i32,
}

impl SpatialKey {
    /// Missing or invalid coordinates. Written as null grid columns.
    pub const UNINDEXED: SpatialKey = SpatialKey {
        lat_grid: i32::MIN,
        lon_grid: i32::MIN,
    };

    pub fn is_indexed(&self) -> bool {
        *self != Self::UNINDEXED
    }

    /// `(lat_grid, lon_grid)` for indexed keys
    pub fn cells(&self) -> Option<(i32, i32)> {
        self.is_indexed().then_some((self.lat_grid, self.lon_grid))
    }
}

/// Grid cells per degree. 100 ≈ 1.1 km at the equator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GridResolution(u32);

impl GridResolution {
    pub const DEFAULT: GridResolution = GridResolution(100);
    /// Keeps `180 * cells_per_degree` inside i32
    pub const MAX_CELLS_PER_DEGREE: u32 = 1_000_000;

    /// Values above the maximum are clamped. Zero is allowed and indexes nothing.
    pub const fn new(cells_per_degree: u32) -> Self {
        if cells_per_degree > Self::MAX_CELLS_PER_DEGREE {
            GridResolution(Self::MAX_CELLS_PER_DEGREE)
        } else {
            GridResolution(cells_per_degree)
        }
    }

    pub const fn cells_per_degree(self) -> u32 {
        self.0
    }
}

impl Default for GridResolution {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Coordinates usable for indexing: finite, in range, and not the `(0, 0)` placeholder
pub fn valid_coords(lat: Option<f64>, lon: Option<f64>) -> Option<(f64, f64)> {
    let (lat, lon) = (lat?, lon?);
    if !lat.is_finite() || !lon.is_finite() {
        return None;
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }
    if lat == 0.0 && lon == 0.0 {
        return None;
    }
    Some((lat, lon))
}

fn cell(coord: f64, cells_per_degree: u32) -> i32 {
    let scaled = coord * f64::from(cells_per_degree);
    let nearest = scaled.round();
    let cell = if (scaled - nearest).abs() <= SNAP_EPSILON {
        nearest
    } else {
        scaled.floor()
    };
    // |coord| <= 180 and cells_per_degree <= 1e6, so this fits
    cell as i32
}

/// Grid cell for a coordinate pair
pub fn grid_key(lat: f64, lon: f64, resolution: GridResolution) -> SpatialKey {
    grid_key_opt(Some(lat), Some(lon), resolution)
}

/// Grid cell for optional coordinates; missing either one is unindexed
pub fn grid_key_opt(lat: Option<f64>, lon: Option<f64>, resolution: GridResolution) -> SpatialKey {
    let cpd = resolution.cells_per_degree();
    if cpd == 0 {
        return SpatialKey::UNINDEXED;
    }
    match valid_coords(lat, lon) {
        Some((lat, lon)) => SpatialKey {
            lat_grid: cell(lat, cpd),
            lon_grid: cell(lon, cpd),
        },
        None => SpatialKey::UNINDEXED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const R100: GridResolution = GridResolution::new(100);

    #[test]
    fn sydney_cell() {
        let key = grid_key(-33.8688, 151.2093, R100);
        assert_eq!(key.cells(), Some((-3387, 15120)));
    }

    #[test]
    fn deterministic() {
        let a = grid_key(-27.4698, 153.0251, R100);
        for _ in 0..100 {
            assert_eq!(grid_key(-27.4698, 153.0251, R100), a);
        }
    }

    #[test]
    fn float_representation_error_snaps() {
        // 0.29 * 100 == 28.999999999999996 in binary floating point
        assert_eq!(grid_key(0.29, 1.0, R100).lat_grid, 29);
        assert_eq!(grid_key(-0.29, 1.0, R100).lat_grid, -29);
    }

    #[test]
    fn negative_coords_floor_downward() {
        assert_eq!(grid_key(-0.005, 10.0, R100).lat_grid, -1);
    }

    #[test]
    fn boundary_coordinates_index() {
        assert!(grid_key(90.0, 180.0, R100).is_indexed());
        assert!(grid_key(-90.0, -180.0, R100).is_indexed());
    }

    #[test]
    fn invalid_inputs_unindexed() {
        for (lat, lon) in [
            (f64::NAN, 151.0),
            (-33.0, f64::INFINITY),
            (91.0, 0.5),
            (-33.0, 181.0),
            (0.0, 0.0),
        ] {
            assert_eq!(grid_key(lat, lon, R100), SpatialKey::UNINDEXED, "{lat},{lon}");
        }
    }

    #[test]
    fn missing_coordinate_unindexed() {
        assert_eq!(
            grid_key_opt(Some(-33.0), None, R100),
            SpatialKey::UNINDEXED
        );
        assert_eq!(grid_key_opt(None, None, R100), SpatialKey::UNINDEXED);
    }

    #[test]
    fn zero_resolution_unindexed() {
        assert_eq!(
            grid_key(-33.8688, 151.2093, GridResolution::new(0)),
            SpatialKey::UNINDEXED
        );
    }

    #[test]
    fn resolution_clamped() {
        let max = GridResolution::new(u32::MAX);
        assert_eq!(
            max.cells_per_degree(),
            GridResolution::MAX_CELLS_PER_DEGREE
        );
        let key = grid_key(-90.0, 180.0, max);
        assert_eq!(key.cells(), Some((-90_000_000, 180_000_000)));
    }
}
