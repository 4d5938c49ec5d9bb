use std::fmt;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// WGS84 geodetic point, degrees.
#[derive(Clone, Copy, Default, Debug, Serialize, Deserialize, PartialEq)]
pub struct Coords {
    pub lat: f64,
    pub lon: f64,
}

impl Coords {
    pub fn new(lat: f64, lon: f64) -> Self {
        Coords { lat, lon }
    }

    /// Rejects NaN / infinite / out-of-range coordinates at API entry so the
    /// geodesy kernel never has to propagate NaN.
    pub fn checked(&self) -> Result<()> {
        if !self.lat.is_finite() || !self.lon.is_finite() {
            return Err(Error::InvalidInput(format!("non-finite coordinates {self}")));
        }
        if self.lat.abs() > 90.0 {
            return Err(Error::InvalidInput(format!("latitude out of range: {}", self.lat)));
        }
        Ok(())
    }
}

impl From<(f64, f64)> for Coords {
    fn from(latlon: (f64, f64)) -> Self {
        Coords {
            lat: latlon.0,
            lon: latlon.1,
        }
    }
}

impl From<[f64; 2]> for Coords {
    fn from(latlon: [f64; 2]) -> Self {
        Coords {
            lat: latlon[0],
            lon: latlon[1],
        }
    }
}

impl Display for Coords {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}

/// Normalizes an angle into `(-180, 180]`.
pub fn normalize_signed(angle: f64) -> f64 {
    let mut a = angle % 360.0;
    if a <= -180.0 {
        a += 360.0
    }
    if a > 180.0 {
        a -= 360.0
    }
    a
}

/// True wind angle of a boat steering `bearing`, given the meteorological
/// ("from") wind direction. Stated once: `twa = wind_from - bearing`,
/// normalized signed. 0 = head to wind, 180 = dead run, positive = wind on
/// starboard.
pub fn twa_of(wind_from: f64, bearing: f64) -> f64 {
    normalize_signed(wind_from - bearing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_normalization() {
        assert_eq!(normalize_signed(190.0), -170.0);
        assert_eq!(normalize_signed(-190.0), 170.0);
        assert_eq!(normalize_signed(180.0), 180.0);
        assert_eq!(normalize_signed(-180.0), 180.0);
        assert_eq!(normalize_signed(540.0), 180.0);
        assert_eq!(normalize_signed(0.0), 0.0);
    }

    #[test]
    fn twa_convention() {
        // Westerly wind (from 270), boat heading east: dead run.
        assert_eq!(twa_of(270.0, 90.0), 180.0);
        // Northerly wind, boat heading north: in irons.
        assert_eq!(twa_of(0.0, 0.0), 0.0);
        // Northerly wind, boat heading east: wind on port side.
        assert_eq!(twa_of(0.0, 90.0), -90.0);
        // Northerly wind, boat heading west: wind on starboard side.
        assert_eq!(twa_of(0.0, 270.0), 90.0);
    }

    #[test]
    fn checked_rejects_nan() {
        assert!(Coords::new(f64::NAN, 0.0).checked().is_err());
        assert!(Coords::new(91.0, 0.0).checked().is_err());
        assert!(Coords::new(54.5, 18.5).checked().is_ok());
    }
}
