use crate::position::Coords;
use crate::utils::{Distance, DistanceUnit};

pub mod spherical;

pub const MEAN_EARTH_RADIUS: Distance = Distance {
    value: 6_371_000.0,
    unit: DistanceUnit::Meters,
};

/// Meters per degree of latitude on the mean sphere (1 NM per arc minute).
pub(crate) const METERS_PER_DEG: f64 = 1852.0 * 60.0;

/// Geodesy kernel. Great-circle operations drive all distances and bearings;
/// the rhumb-line pair only shapes the high-resolution corridor and the
/// auto-preset leg measure (constant-bearing corridors are what a navigator
/// draws on the chart).
pub trait Algorithm {
    fn distance_to(&self, from: &Coords, to: &Coords) -> Distance;

    fn heading_to(&self, from: &Coords, to: &Coords) -> f64;

    fn distance_and_heading_to(&self, from: &Coords, to: &Coords) -> (Distance, f64);

    fn destination(&self, from: &Coords, heading: f64, distance: &Distance) -> Coords;

    fn midpoint(&self, from: &Coords, to: &Coords) -> Coords;

    fn rhumb_distance_to(&self, from: &Coords, to: &Coords) -> Distance;

    fn rhumb_heading_to(&self, from: &Coords, to: &Coords) -> f64;
}

pub(crate) trait Utils {
    fn wrap360(self) -> Self;
}

impl Utils for f64 {
    fn wrap360(self) -> Self {
        if 0.0 <= self && self < 360.0 {
            return self;
        }
        let d1 = self + 360.0;
        d1 - ((d1 / 360.0) as i64 * 360) as f64
    }
}
