use anyhow::Result;

use crate::position::Coords;
use crate::utils::Distance;

/// Landmass / obstacle source. Adapters (coastline rasters, vector charts)
/// implement the two point queries; the segment test has a sampling default
/// that most adapters keep.
pub trait GeometryPort: Send + Sync {
    fn is_land(&self, point: &Coords) -> Result<bool>;

    fn distance_to_land(&self, point: &Coords) -> Result<Distance>;

    /// True when any sampled point of the segment comes closer to land than
    /// `within`. Sampling resolution is a compromise: the mesh clipper also
    /// keeps vertices off the shoreline, so skipping a sliver between two
    /// samples cannot put a route on the beach.
    fn segment_crosses_land(&self, from: &Coords, to: &Coords, within: &Distance) -> Result<bool> {
        const STEP: i8 = 10;

        for i in 0..(STEP + 1) {
            let lat = from.lat + (i as f64) * (to.lat - from.lat) / (STEP as f64);
            let lon = from.lon + (i as f64) * (to.lon - from.lon) / (STEP as f64);
            if self.distance_to_land(&Coords { lat, lon })? < *within {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

/// Unbounded water. Used by tests and by offshore planning where the
/// bounding box is known to be clear of land.
pub struct OpenSea;

impl GeometryPort for OpenSea {
    fn is_land(&self, _point: &Coords) -> Result<bool> {
        Ok(false)
    }

    fn distance_to_land(&self, _point: &Coords) -> Result<Distance> {
        Ok(Distance::from_m(f64::MAX))
    }

    fn segment_crosses_land(&self, _from: &Coords, _to: &Coords, _within: &Distance) -> Result<bool> {
        Ok(false)
    }
}

/// A circular island, handy for exercising the clipper against a shoreline
/// with a closed form distance.
pub struct CircularIsland {
    pub center: Coords,
    pub radius: Distance,
}

impl GeometryPort for CircularIsland {
    fn is_land(&self, point: &Coords) -> Result<bool> {
        use crate::algorithm::{spherical::Spherical, Algorithm};
        Ok(Spherical {}.distance_to(&self.center, point) <= self.radius)
    }

    fn distance_to_land(&self, point: &Coords) -> Result<Distance> {
        use crate::algorithm::{spherical::Spherical, Algorithm};
        let d = Spherical {}.distance_to(&self.center, point);
        Ok(Distance::from_m((d.m() - self.radius.m()).max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_sea_never_blocks() {
        let sea = OpenSea;
        let a = Coords::new(54.0, 18.0);
        let b = Coords::new(55.0, 19.0);
        assert!(!sea.is_land(&a).unwrap());
        assert!(!sea.segment_crosses_land(&a, &b, &Distance::from_m(500.0)).unwrap());
    }

    #[test]
    fn island_blocks_crossing_segments() {
        let island = CircularIsland {
            center: Coords::new(54.5, 18.5),
            radius: Distance::from_m(2000.0),
        };

        let west = Coords::new(54.5, 18.3);
        let east = Coords::new(54.5, 18.7);
        assert!(island.segment_crosses_land(&west, &east, &Distance::from_m(100.0)).unwrap());

        // A segment passing well clear to the north.
        let nw = Coords::new(54.7, 18.3);
        let ne = Coords::new(54.7, 18.7);
        assert!(!island.segment_crosses_land(&nw, &ne, &Distance::from_m(100.0)).unwrap());

        assert!(island.is_land(&island.center).unwrap());
        assert!(island.distance_to_land(&west).unwrap().m() > 0.0);
    }
}
