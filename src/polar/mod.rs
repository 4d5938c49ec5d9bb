use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::utils::Speed;

/// Process-wide polar registry, keyed by vessel name.
pub type Polars = Arc<RwLock<HashMap<String, Arc<Polar>>>>;

pub trait PolarsSpec {
    fn new() -> Self;

    fn get(&self, name: &str) -> Result<Arc<Polar>>;

    fn insert(&self, name: String, polar: Polar);
}

impl PolarsSpec for Polars {
    fn new() -> Self {
        Arc::new(RwLock::new(HashMap::new()))
    }

    fn get(&self, name: &str) -> Result<Arc<Polar>> {
        let polars = self.read().unwrap();
        match polars.get(name) {
            Some(polar) => Ok(polar.clone()),
            None => Err(Error::InvalidInput(format!("polar {name} not found"))),
        }
    }

    fn insert(&self, name: String, polar: Polar) {
        let mut polars = self.write().unwrap();
        polars.insert(name, Arc::new(polar));
    }
}

/// Qualitative sailing regime by |TWA|, inclusive lower bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointOfSail {
    InIrons,
    CloseHauled,
    CloseReach,
    BeamReach,
    BroadReach,
    Running,
    DeadRun,
}

impl PointOfSail {
    pub fn from_twa(twa: f64) -> Self {
        let twa = twa.abs().min(180.0);
        if twa < 30.0 {
            PointOfSail::InIrons
        } else if twa < 50.0 {
            PointOfSail::CloseHauled
        } else if twa < 70.0 {
            PointOfSail::CloseReach
        } else if twa < 110.0 {
            PointOfSail::BeamReach
        } else if twa < 150.0 {
            PointOfSail::BroadReach
        } else if twa < 170.0 {
            PointOfSail::Running
        } else {
            PointOfSail::DeadRun
        }
    }

    /// Regimes where the crew works hardest; feeds the difficulty score.
    pub(crate) fn is_upwind(&self) -> bool {
        matches!(self, PointOfSail::InIrons | PointOfSail::CloseHauled)
    }
}

/// Vessel polar: boat speed over a (|TWA|, TWS) grid, with a storm cutoff
/// and maneuver durations. Fields stay private so every construction path
/// (including deserialization) goes through validation and queries can
/// never fail.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Polar {
    tws: Vec<f64>,
    twa: Vec<f64>,
    /// `speed[i][j]` = boat speed in knots at `twa[i]`, `tws[j]`.
    speed: Vec<Vec<f64>>,
    max_wind_kts: f64,
    tack_duration_s: f64,
    jibe_duration_s: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPolar {
    tws: Vec<f64>,
    twa: Vec<f64>,
    speed: Vec<Vec<f64>>,
    max_wind_kts: f64,
    tack_duration_s: f64,
    jibe_duration_s: f64,
}

impl<'de> Deserialize<'de> for Polar {
    fn deserialize<D>(deserializer: D) -> Result<Polar, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawPolar::deserialize(deserializer)?;
        Polar::new(
            raw.tws,
            raw.twa,
            raw.speed,
            raw.max_wind_kts,
            raw.tack_duration_s,
            raw.jibe_duration_s,
        )
        .map_err(de::Error::custom)
    }
}

impl Polar {
    pub fn new(
        tws: Vec<f64>,
        twa: Vec<f64>,
        speed: Vec<Vec<f64>>,
        max_wind_kts: f64,
        tack_duration_s: f64,
        jibe_duration_s: f64,
    ) -> Result<Self> {
        let polar = Polar {
            tws,
            twa,
            speed,
            max_wind_kts,
            tack_duration_s,
            jibe_duration_s,
        };
        polar.validate()?;
        Ok(polar)
    }

    fn validate(&self) -> Result<()> {
        if self.tws.is_empty() || self.twa.is_empty() {
            return Err(Error::InvalidPolar("empty axes".into()));
        }
        if !self.tws.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::InvalidPolar("tws axis not strictly ascending".into()));
        }
        if !self.twa.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::InvalidPolar("twa axis not strictly ascending".into()));
        }
        if self.twa[0] != 0.0 || *self.twa.last().unwrap() > 180.0 {
            return Err(Error::InvalidPolar("twa axis must cover [0, 180] starting at 0".into()));
        }
        if self.speed.len() != self.twa.len() {
            return Err(Error::InvalidPolar(format!(
                "speed table has {} rows for {} twa values",
                self.speed.len(),
                self.twa.len()
            )));
        }
        for (i, row) in self.speed.iter().enumerate() {
            if row.len() != self.tws.len() {
                return Err(Error::InvalidPolar(format!(
                    "speed row {i} has {} columns for {} tws values",
                    row.len(),
                    self.tws.len()
                )));
            }
            if row.iter().any(|s| !s.is_finite() || *s < 0.0) {
                return Err(Error::InvalidPolar(format!("speed row {i} has negative or non-finite entries")));
            }
        }
        // Head to wind the boat stops.
        if self.speed[0].iter().any(|s| *s != 0.0) {
            return Err(Error::InvalidPolar("speed at TWA 0 must be 0".into()));
        }
        if !self.max_wind_kts.is_finite() || self.max_wind_kts <= 0.0 {
            return Err(Error::InvalidPolar("max wind must be positive".into()));
        }
        if self.tack_duration_s < 0.0 || self.jibe_duration_s < 0.0 {
            return Err(Error::InvalidPolar("maneuver durations must be non-negative".into()));
        }
        Ok(())
    }

    pub fn max_wind_kts(&self) -> f64 {
        self.max_wind_kts
    }

    pub fn tack_duration_s(&self) -> f64 {
        self.tack_duration_s
    }

    pub fn jibe_duration_s(&self) -> f64 {
        self.jibe_duration_s
    }

    fn interpolation_index(values: &[f64], value: f64) -> (usize, usize, f64) {
        let mut i = 0;
        while values[i] < value {
            i += 1;
            if i == values.len() {
                return (i - 1, i - 1, 1.0);
            }
        }

        if i > 0 {
            return (i - 1, i, (values[i] - value) / (values[i] - values[i - 1]));
        }

        (0, 0, 1.0)
    }

    /// Boat speed at the given signed TWA and TWS. Bilinear over the grid,
    /// symmetric over the TWA sign, clamped to the axes, zero above the
    /// storm cutoff. Never fails at query time.
    pub fn boat_speed(&self, twa: f64, tws: f64) -> Speed {
        if tws > self.max_wind_kts {
            return Speed::from_kts(0.0);
        }

        let twa = twa.abs().min(180.0);
        let tws = tws.max(0.0).min(*self.tws.last().unwrap());

        let (t0, t1, tf) = Self::interpolation_index(&self.twa, twa);
        let (w0, w1, wf) = Self::interpolation_index(&self.tws, tws);

        let r0 = &self.speed[t0];
        let r1 = &self.speed[t1];

        let kts = (r0[w0] * wf + r0[w1] * (1.0 - wf)) * tf + (r1[w0] * wf + r1[w1] * (1.0 - wf)) * (1.0 - tf);

        Speed::from_kts(kts)
    }

    /// Sweeps the polar in 0.1 degree steps for the best velocity-made-good
    /// towards (upwind) and away from (downwind) the wind.
    pub fn best_vmg(&self, tws: f64) -> Vmgs {
        let mut up = Vmg {
            twa: 0.0,
            speed: Speed::from_kts(0.0),
            vmg: 0.0,
        };
        let mut down = Vmg {
            twa: 180.0,
            speed: Speed::from_kts(0.0),
            vmg: 0.0,
        };

        for step in 0..1801 {
            let twa = step as f64 / 10.0;
            let speed = self.boat_speed(twa, tws);
            let vmg = speed.kts() * twa.to_radians().cos();

            if vmg > up.vmg {
                up = Vmg { twa, speed, vmg };
            }
            if vmg < down.vmg {
                down = Vmg { twa, speed, vmg };
            }
        }

        Vmgs { up, down }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Vmgs {
    pub up: Vmg,
    pub down: Vmg,
}

#[derive(Clone, Copy, Debug)]
pub struct Vmg {
    pub twa: f64,
    pub speed: Speed,
    /// Knots towards the wind (negative = away).
    pub vmg: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cruiser() -> Polar {
        Polar::new(
            vec![0.0, 10.0, 20.0, 30.0],
            vec![0.0, 45.0, 90.0, 135.0, 180.0],
            vec![
                vec![0.0, 0.0, 0.0, 0.0],
                vec![0.0, 5.0, 6.5, 6.0],
                vec![0.0, 6.5, 8.0, 7.5],
                vec![0.0, 6.0, 7.5, 7.0],
                vec![0.0, 5.0, 6.5, 6.0],
            ],
            35.0,
            12.0,
            8.0,
        )
        .unwrap()
    }

    #[test]
    fn rejects_mismatched_table() {
        let bad = Polar::new(
            vec![0.0, 10.0],
            vec![0.0, 90.0],
            vec![vec![0.0, 0.0]],
            30.0,
            10.0,
            10.0,
        );
        assert!(matches!(bad, Err(Error::InvalidPolar(_))));
    }

    #[test]
    fn rejects_moving_in_irons() {
        let bad = Polar::new(
            vec![0.0, 10.0],
            vec![0.0, 90.0],
            vec![vec![1.0, 1.0], vec![2.0, 4.0]],
            30.0,
            10.0,
            10.0,
        );
        assert!(matches!(bad, Err(Error::InvalidPolar(_))));
    }

    #[test]
    fn deserialization_validates() {
        let valid = serde_json::to_string(&cruiser()).unwrap();
        let polar: Polar = serde_json::from_str(&valid).unwrap();
        assert_eq!(polar.boat_speed(90.0, 10.0).kts(), 6.5);

        // A table row short of one tws column must not get past the parser.
        let broken = valid.replacen("[0.0,5.0,6.5,6.0]", "[0.0,5.0,6.5]", 1);
        assert_ne!(valid, broken);
        assert!(serde_json::from_str::<Polar>(&broken).is_err());

        // Neither does an empty wind axis.
        let empty_axis = r#"{"tws":[],"twa":[],"speed":[],"maxWindKts":30.0,"tackDurationS":10.0,"jibeDurationS":10.0}"#;
        assert!(serde_json::from_str::<Polar>(empty_axis).is_err());
    }

    #[test]
    fn bilinear_lookup_hits_grid_points() {
        let polar = cruiser();
        assert_eq!(polar.boat_speed(90.0, 10.0).kts(), 6.5);
        assert_eq!(polar.boat_speed(90.0, 20.0).kts(), 8.0);
        // Halfway in tws between the 10 and 20 knot columns.
        assert!((polar.boat_speed(90.0, 15.0).kts() - 7.25).abs() < 1e-9);
        // Halfway in twa between 45 and 90 at 10 knots.
        assert!((polar.boat_speed(67.5, 10.0).kts() - 5.75).abs() < 1e-9);
    }

    #[test]
    fn symmetric_in_twa_sign() {
        let polar = cruiser();
        for twa in [10.0, 45.0, 77.0, 120.0, 179.0] {
            assert_eq!(polar.boat_speed(twa, 12.0).kts(), polar.boat_speed(-twa, 12.0).kts());
        }
    }

    #[test]
    fn storm_cutoff() {
        let polar = cruiser();
        // At the cutoff the polar still answers, above it the boat is reefed down.
        assert!(polar.boat_speed(90.0, 35.0).kts() > 0.0);
        assert_eq!(polar.boat_speed(90.0, 35.1).kts(), 0.0);
    }

    #[test]
    fn clamps_above_axis_below_cutoff() {
        let polar = cruiser();
        assert_eq!(polar.boat_speed(90.0, 32.0).kts(), polar.boat_speed(90.0, 30.0).kts());
    }

    #[test]
    fn point_of_sail_boundaries() {
        assert_eq!(PointOfSail::from_twa(0.0), PointOfSail::InIrons);
        assert_eq!(PointOfSail::from_twa(29.9), PointOfSail::InIrons);
        assert_eq!(PointOfSail::from_twa(30.0), PointOfSail::CloseHauled);
        assert_eq!(PointOfSail::from_twa(-49.9), PointOfSail::CloseHauled);
        assert_eq!(PointOfSail::from_twa(50.0), PointOfSail::CloseReach);
        assert_eq!(PointOfSail::from_twa(70.0), PointOfSail::BeamReach);
        assert_eq!(PointOfSail::from_twa(110.0), PointOfSail::BroadReach);
        assert_eq!(PointOfSail::from_twa(150.0), PointOfSail::Running);
        assert_eq!(PointOfSail::from_twa(170.0), PointOfSail::DeadRun);
        assert_eq!(PointOfSail::from_twa(180.0), PointOfSail::DeadRun);
    }

    #[test]
    fn vmg_sweet_spots() {
        let polar = cruiser();
        let vmgs = polar.best_vmg(15.0);
        assert!(vmgs.up.twa > 30.0 && vmgs.up.twa < 90.0, "upwind twa {}", vmgs.up.twa);
        assert!(vmgs.down.twa > 90.0, "downwind twa {}", vmgs.down.twa);
        assert!(vmgs.up.vmg > 0.0);
        assert!(vmgs.down.vmg < 0.0);
    }
}
